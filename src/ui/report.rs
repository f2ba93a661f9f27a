//! One-shot renderings of a capture for `--print`.

use std::{fmt::Write as _, sync::Arc};

use serde::Serialize;

use crate::{
    exchange::Exchange,
    grouping::{EventGroup, GroupingConfig, GroupingMode},
    perf::virtualize::VirtualRow,
};

use super::summary::{DetailLine, format_millis, row_line, status_segment};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    mode: GroupingMode,
    max_depth: u8,
    total_exchanges: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    groups: Option<&'a [EventGroup]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exchanges: Option<Vec<ExchangeSummary<'a>>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeSummary<'a> {
    id: &'a str,
    method: &'a str,
    url: &'a str,
    status: String,
    timestamp: f64,
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_time: Option<f64>,
}

impl<'a> From<&'a Exchange> for ExchangeSummary<'a> {
    fn from(exchange: &'a Exchange) -> Self {
        Self {
            id: &exchange.id,
            method: &exchange.method,
            url: &exchange.url.raw,
            status: status_segment(&exchange.response).0,
            timestamp: exchange.timestamp,
            source: &exchange.source,
            response_time: exchange.response_time(),
        }
    }
}

/// Chronological mode lists exchanges; grouped modes list the tree with
/// event ids in place of full records.
pub fn render_json_report(
    config: GroupingConfig,
    groups: &[EventGroup],
    exchanges: &[Arc<Exchange>],
) -> serde_json::Result<String> {
    let grouped = config.mode.is_grouped();
    let report = JsonReport {
        mode: config.mode,
        max_depth: config.max_depth,
        total_exchanges: exchanges.len(),
        groups: grouped.then_some(groups),
        exchanges: (!grouped).then(|| {
            let mut ordered: Vec<&Exchange> = exchanges.iter().map(AsRef::as_ref).collect();
            ordered.sort_by(|left, right| left.timestamp.total_cmp(&right.timestamp));
            ordered.into_iter().map(ExchangeSummary::from).collect()
        }),
    };
    serde_json::to_string_pretty(&report)
}

/// Plain-text tree. Every group is printed expanded regardless of its flag.
pub fn render_text_report(
    config: GroupingConfig,
    groups: &[EventGroup],
    rows: &[VirtualRow],
    total: usize,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} exchanges grouped by {}", total, config.mode.label());

    if !config.mode.is_grouped() {
        for row in rows {
            let _ = writeln!(out, "{}", indented(&row_line(row)));
        }
        return out;
    }

    for group in groups {
        write_group(&mut out, group);
    }
    out
}

fn write_group(out: &mut String, group: &EventGroup) {
    let pad = "  ".repeat(usize::from(group.level));
    let stats = &group.stats;
    let _ = write!(
        out,
        "{pad}{} ({} req, {} ok, {} err",
        group.label, stats.total_requests, stats.success_count, stats.error_count
    );
    if stats.average_response_time > 0.0 {
        let _ = write!(out, ", avg {}", format_millis(stats.average_response_time));
    }
    let _ = writeln!(out, ")");

    if group.is_leaf() {
        for exchange in &group.events {
            let row = VirtualRow::Exchange {
                exchange: Arc::clone(exchange),
                level: group.level + 1,
                group_key: Some(group.key.clone()),
            };
            let _ = writeln!(out, "{}", indented(&row_line(&row)));
        }
    } else {
        for child in group.children() {
            write_group(out, child);
        }
    }
}

fn indented(line: &DetailLine) -> String {
    format!("{}{}", "  ".repeat(line.indent), line.text())
}
