use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::exchange::{Exchange, ExchangeUrl, ResponseState, TimingEvents};

const UNKNOWN_SOURCE: &str = "unknown";

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:[A-Za-z][A-Za-z0-9+.\-]*://)?(?:[^@/?#]*@)?(\[[^\]]*\]|[^:/?#]*)(?::\d*)?([^?#]*)",
    )
    .expect("url pattern compiles")
});

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid exchange record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("url has no hostname: {0:?}")]
    MissingHost(String),
    #[error("unrecognized response value: {0}")]
    InvalidResponse(String),
}

/// One exchange as it appears in a capture file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub response: ResponseRecord,
    #[serde(default)]
    pub timing: TimingRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResponseRecord {
    #[default]
    Pending,
    Aborted,
    Completed {
        status_code: u16,
        headers: BTreeMap<String, String>,
    },
}

impl<'de> Deserialize<'de> for ResponseRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Completed {
            status_code: u16,
            #[serde(default)]
            headers: BTreeMap<String, String>,
        }

        let value = Value::deserialize(deserializer)?;
        let record = match value {
            Value::Null => Self::Pending,
            Value::String(marker) => match marker.as_str() {
                "pending" => Self::Pending,
                "aborted" => Self::Aborted,
                other => {
                    return Err(serde::de::Error::custom(ProtocolError::InvalidResponse(
                        other.to_owned(),
                    )));
                }
            },
            object @ Value::Object(_) => {
                let completed: Completed =
                    serde_json::from_value(object).map_err(serde::de::Error::custom)?;
                Self::Completed {
                    status_code: completed.status_code,
                    headers: completed.headers,
                }
            }
            other => {
                return Err(serde::de::Error::custom(ProtocolError::InvalidResponse(
                    other.to_string(),
                )));
            }
        };

        Ok(record)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingRecord {
    #[serde(default)]
    pub request_sent: Option<f64>,
    #[serde(default)]
    pub response_body_received: Option<f64>,
}

impl TryFrom<ExchangeRecord> for Exchange {
    type Error = ProtocolError;

    fn try_from(record: ExchangeRecord) -> Result<Self, Self::Error> {
        let url = parse_url(&record.url)?;
        let response = match record.response {
            ResponseRecord::Pending => ResponseState::Pending,
            ResponseRecord::Aborted => ResponseState::Aborted,
            ResponseRecord::Completed {
                status_code,
                headers,
            } => ResponseState::Completed {
                status_code,
                headers,
            },
        };

        Ok(Exchange {
            id: record
                .id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            method: record.method,
            url,
            response,
            timestamp: record.timestamp,
            source: record
                .source
                .map(|source| source.trim().to_owned())
                .filter(|source| !source.is_empty())
                .unwrap_or_else(|| UNKNOWN_SOURCE.to_owned()),
            timing: TimingEvents {
                request_sent_timestamp: record.timing.request_sent,
                response_body_received_timestamp: record.timing.response_body_received,
            },
            revision: 0,
        })
    }
}

/// Splits a URL into hostname and path. The hostname keeps its original
/// casing; grouping decides how to normalize it.
pub fn parse_url(raw: &str) -> Result<ExchangeUrl, ProtocolError> {
    let trimmed = raw.trim();
    let captures = URL_PATTERN
        .captures(trimmed)
        .ok_or_else(|| ProtocolError::MissingHost(raw.to_owned()))?;

    let hostname = captures
        .get(1)
        .map(|host| host.as_str())
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ProtocolError::MissingHost(raw.to_owned()))?;

    let path = captures
        .get(2)
        .map(|path| path.as_str())
        .filter(|path| !path.is_empty())
        .unwrap_or("/");

    Ok(ExchangeUrl {
        raw: trimmed.to_owned(),
        hostname: hostname.to_owned(),
        path: path.to_owned(),
    })
}

pub fn decode_line(line: &str) -> Result<Exchange, ProtocolError> {
    let record: ExchangeRecord = serde_json::from_str(line.trim())?;
    Exchange::try_from(record)
}

/// Decodes a whole capture document: either a JSON array of records or one
/// record per line. Blank lines are ignored.
pub fn decode_document(text: &str) -> Vec<Result<Exchange, ProtocolError>> {
    if text.trim_start().starts_with('[') {
        return match serde_json::from_str::<Vec<Value>>(text) {
            Ok(values) => values
                .into_iter()
                .map(|value| {
                    let record: ExchangeRecord = serde_json::from_value(value)?;
                    Exchange::try_from(record)
                })
                .collect(),
            Err(err) => vec![Err(ProtocolError::Json(err))],
        };
    }

    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(decode_line)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_completed_exchange() {
        let raw = r#"
        {
            "id": "ex-1",
            "method": "POST",
            "url": "https://API.example.com:8443/v1/items?page=2",
            "timestamp": 1700000000000,
            "source": "Firefox",
            "response": {
                "statusCode": 201,
                "headers": { "content-type": "application/json" }
            },
            "timing": { "requestSent": 100.0, "responseBodyReceived": 142.5 }
        }
        "#;

        let exchange = decode_line(raw).expect("record should decode");

        assert_eq!(exchange.id, "ex-1");
        assert_eq!(exchange.method, "POST");
        assert_eq!(exchange.hostname(), "API.example.com");
        assert_eq!(exchange.url.path, "/v1/items");
        assert_eq!(exchange.status_code(), Some(201));
        assert_eq!(exchange.source, "Firefox");
        assert_eq!(exchange.response_time(), Some(42.5));
        match &exchange.response {
            ResponseState::Completed { headers, .. } => {
                assert_eq!(
                    headers.get("content-type").map(String::as_str),
                    Some("application/json")
                );
            }
            other => panic!("unexpected response state: {:?}", other),
        }
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let exchange = decode_line(r#"{"method":"GET","url":"http://a.com"}"#)
            .expect("minimal record should decode");

        assert!(Uuid::parse_str(&exchange.id).is_ok());
        assert_eq!(exchange.response, ResponseState::Pending);
        assert_eq!(exchange.source, "unknown");
        assert_eq!(exchange.url.path, "/");
        assert_eq!(exchange.response_time(), None);
    }

    #[test]
    fn response_markers_map_to_states() {
        let aborted =
            decode_line(r#"{"method":"GET","url":"a.com/x","response":"aborted"}"#)
                .expect("aborted marker should decode");
        assert_eq!(aborted.response, ResponseState::Aborted);

        let pending =
            decode_line(r#"{"method":"GET","url":"a.com/x","response":"pending"}"#)
                .expect("pending marker should decode");
        assert_eq!(pending.response, ResponseState::Pending);

        let invalid = decode_line(r#"{"method":"GET","url":"a.com/x","response":"teapot"}"#);
        assert!(matches!(invalid, Err(ProtocolError::Json(_))));
    }

    #[test]
    fn url_parsing_handles_userinfo_and_ipv6() {
        let url = parse_url("https://user:pw@[::1]:8080/health").expect("url should parse");
        assert_eq!(url.hostname, "[::1]");
        assert_eq!(url.path, "/health");

        let bare = parse_url("example.org/search#top").expect("bare host should parse");
        assert_eq!(bare.hostname, "example.org");
        assert_eq!(bare.path, "/search");

        assert!(matches!(
            parse_url("https:///nohost"),
            Err(ProtocolError::MissingHost(_))
        ));
    }

    #[test]
    fn decodes_array_and_line_documents() {
        let array = r#"[
            {"method":"GET","url":"https://a.com/1"},
            {"method":"GET","url":"https://b.com/2"}
        ]"#;
        let decoded = decode_document(array);
        assert_eq!(decoded.len(), 2);
        assert!(decoded.iter().all(Result::is_ok));

        let lines = "{\"method\":\"GET\",\"url\":\"https://a.com/1\"}\n\nnot json\n";
        let decoded = decode_document(lines);
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_ok());
        assert!(decoded[1].is_err());
    }
}
