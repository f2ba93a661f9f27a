use std::collections::BTreeMap;

use crate::{
    exchange::{Exchange, ResponseState},
    grouping::{EventGroup, GroupStats},
    perf::virtualize::VirtualRow,
};

#[derive(Debug, Clone)]
pub struct DetailViewModel {
    pub header: String,
    pub footer: String,
    pub lines: Vec<DetailLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailLine {
    pub indent: usize,
    pub segments: Vec<DetailSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailSegment {
    pub text: String,
    pub style: SegmentStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStyle {
    Plain,
    Key,
    Label,
    Method,
    Number,
    Success,
    Redirect,
    Error,
    Pending,
    Muted,
}

impl DetailLine {
    fn new(indent: usize) -> Self {
        Self {
            indent,
            segments: Vec::new(),
        }
    }

    fn push(mut self, text: impl Into<String>, style: SegmentStyle) -> Self {
        self.segments.push(DetailSegment {
            text: text.into(),
            style,
        });
        self
    }

    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|segment| segment.text.as_str())
            .collect()
    }
}

/// One list row: a group header or an exchange underneath it.
pub fn row_line(row: &VirtualRow) -> DetailLine {
    let indent = usize::from(row.level());
    match row {
        VirtualRow::Header {
            label,
            expanded,
            child_count,
            stats,
            ..
        } => {
            let marker = if *expanded { "▾ " } else { "▸ " };
            let mut line = DetailLine::new(indent)
                .push(marker, SegmentStyle::Muted)
                .push(label.clone(), SegmentStyle::Label)
                .push(format!(" ({child_count})"), SegmentStyle::Muted)
                .push(format!("  {} req", stats.total_requests), SegmentStyle::Number);

            if stats.success_count > 0 {
                line = line.push(format!("  {} ok", stats.success_count), SegmentStyle::Success);
            }
            if stats.error_count > 0 {
                line = line.push(format!("  {} err", stats.error_count), SegmentStyle::Error);
            }
            if stats.average_response_time > 0.0 {
                line = line.push(
                    format!("  avg {}", format_millis(stats.average_response_time)),
                    SegmentStyle::Muted,
                );
            }
            line
        }
        VirtualRow::Exchange { exchange, .. } => exchange_line(exchange, indent),
    }
}

fn exchange_line(exchange: &Exchange, indent: usize) -> DetailLine {
    let (status, style) = status_segment(&exchange.response);
    let mut line = DetailLine::new(indent)
        .push(format!("{:<7}", exchange.method), SegmentStyle::Method)
        .push(format!("{status:<8}"), style)
        .push(exchange.hostname().to_string(), SegmentStyle::Key)
        .push(exchange.url.path.clone(), SegmentStyle::Plain);

    if let Some(elapsed) = exchange.response_time() {
        line = line.push(format!("  {}", format_millis(elapsed)), SegmentStyle::Muted);
    }
    line
}

pub fn status_segment(response: &ResponseState) -> (String, SegmentStyle) {
    match response {
        ResponseState::Pending => ("pending".to_string(), SegmentStyle::Pending),
        ResponseState::Aborted => ("aborted".to_string(), SegmentStyle::Pending),
        ResponseState::Completed { status_code, .. } => {
            let style = match status_code {
                200..=299 => SegmentStyle::Success,
                300..=399 => SegmentStyle::Redirect,
                400.. => SegmentStyle::Error,
                _ => SegmentStyle::Plain,
            };
            (status_code.to_string(), style)
        }
    }
}

pub fn build_group_detail(group: &EventGroup) -> DetailViewModel {
    let mut lines = stats_lines(&group.stats);

    if let Some(children) = &group.sub_groups {
        lines.push(DetailLine::new(0));
        lines.push(DetailLine::new(0).push("Groups", SegmentStyle::Label));
        for child in children {
            lines.push(
                DetailLine::new(1)
                    .push(child.label.clone(), SegmentStyle::Key)
                    .push(format!("  {}", child.stats.total_requests), SegmentStyle::Number),
            );
        }
    }

    DetailViewModel {
        header: format!("{} • {} exchanges", group.label, group.stats.total_requests),
        footer: group.key.clone(),
        lines,
    }
}

pub fn build_exchange_detail(exchange: &Exchange) -> DetailViewModel {
    let (status, status_style) = status_segment(&exchange.response);
    let mut lines = vec![
        key_value("Method", &exchange.method, SegmentStyle::Method),
        key_value("URL", &exchange.url.raw, SegmentStyle::Plain),
        key_value("Host", exchange.hostname(), SegmentStyle::Plain),
        key_value("Status", &status, status_style),
        key_value("Source", &exchange.source, SegmentStyle::Plain),
    ];

    if let Some(elapsed) = exchange.response_time() {
        lines.push(key_value("Time", &format_millis(elapsed), SegmentStyle::Number));
    }

    if let ResponseState::Completed { headers, .. } = &exchange.response {
        if !headers.is_empty() {
            lines.push(DetailLine::new(0));
            lines.push(DetailLine::new(0).push("Headers", SegmentStyle::Label));
            for (name, value) in headers {
                lines.push(
                    DetailLine::new(1)
                        .push(format!("{name}: "), SegmentStyle::Key)
                        .push(value.clone(), SegmentStyle::Plain),
                );
            }
        }
    }

    DetailViewModel {
        header: format!("{} {}", exchange.method, exchange.url.raw),
        footer: exchange.id.clone(),
        lines,
    }
}

fn stats_lines(stats: &GroupStats) -> Vec<DetailLine> {
    let mut lines = vec![
        key_value("Requests", &stats.total_requests.to_string(), SegmentStyle::Number),
        key_value("Success", &stats.success_count.to_string(), SegmentStyle::Success),
        key_value("Errors", &stats.error_count.to_string(), SegmentStyle::Error),
        key_value(
            "Avg time",
            &format_millis(stats.average_response_time),
            SegmentStyle::Number,
        ),
    ];

    push_distribution(&mut lines, "Methods", &stats.method_distribution);
    push_distribution(&mut lines, "Statuses", &stats.status_distribution);
    lines
}

fn push_distribution(lines: &mut Vec<DetailLine>, title: &str, values: &BTreeMap<String, usize>) {
    if values.is_empty() {
        return;
    }

    lines.push(DetailLine::new(0));
    lines.push(DetailLine::new(0).push(title, SegmentStyle::Label));
    for (value, count) in values {
        lines.push(
            DetailLine::new(1)
                .push(format!("{value}: "), SegmentStyle::Key)
                .push(count.to_string(), SegmentStyle::Number),
        );
    }
}

fn key_value(label: &str, value: &str, style: SegmentStyle) -> DetailLine {
    DetailLine::new(0)
        .push(format!("{label}: "), SegmentStyle::Key)
        .push(value.to_string(), style)
}

pub fn format_millis(value: f64) -> String {
    if value >= 1000.0 {
        format!("{:.2}s", value / 1000.0)
    } else {
        format!("{value:.0}ms")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exchange::fixtures::{exchange, shared, timed},
        grouping::{GroupingMode, strategy::group_exchanges},
        perf::virtualize::flatten_groups,
    };
    use std::{collections::HashSet, sync::Arc};

    #[test]
    fn header_rows_summarize_group_stats() {
        let events = shared(vec![
            timed(exchange("1", "GET", "a.com", Some(200)), 0.0, 100.0),
            timed(exchange("2", "GET", "a.com", Some(500)), 0.0, 300.0),
        ]);
        let groups = group_exchanges(GroupingMode::Domain, &events, &HashSet::new());
        let rows = flatten_groups(&groups);

        let text = row_line(&rows[0]).text();
        assert_eq!(text, "▸ a.com (2)  2 req  1 ok  1 err  avg 200ms");
    }

    #[test]
    fn exchange_rows_follow_group_level() {
        let events = shared(vec![exchange("1", "POST", "a.com", None)]);
        let expanded: HashSet<String> = ["domain:a.com".to_string()].into();
        let groups = group_exchanges(GroupingMode::Domain, &events, &expanded);
        let rows = flatten_groups(&groups);

        let line = row_line(&rows[1]);
        assert_eq!(line.indent, 1);
        assert_eq!(line.segments[0].style, SegmentStyle::Method);
        assert_eq!(line.segments[1].style, SegmentStyle::Pending);
        assert!(line.text().starts_with("POST   pending "));
    }

    #[test]
    fn status_styles_track_status_class() {
        let completed = |status_code| ResponseState::Completed {
            status_code,
            headers: Default::default(),
        };
        assert_eq!(status_segment(&completed(204)).1, SegmentStyle::Success);
        assert_eq!(status_segment(&completed(301)).1, SegmentStyle::Redirect);
        assert_eq!(status_segment(&completed(404)).1, SegmentStyle::Error);
        assert_eq!(status_segment(&completed(101)).1, SegmentStyle::Plain);
        assert_eq!(
            status_segment(&ResponseState::Aborted),
            ("aborted".to_string(), SegmentStyle::Pending)
        );
    }

    #[test]
    fn group_detail_lists_distributions_and_children() {
        let events = shared(vec![
            exchange("1", "GET", "a.com", Some(200)),
            exchange("2", "POST", "a.com", Some(201)),
            exchange("3", "GET", "a.com", None),
        ]);
        let groups = group_exchanges(GroupingMode::DomainMethod, &events, &HashSet::new());
        let detail = build_group_detail(&groups[0]);

        assert_eq!(detail.header, "a.com • 3 exchanges");
        assert_eq!(detail.footer, "domain:a.com");

        let rendered: Vec<String> = detail.lines.iter().map(DetailLine::text).collect();
        assert!(rendered.contains(&"GET: 2".to_string()));
        assert!(rendered.contains(&"201: 1".to_string()));
        assert!(rendered.contains(&"Groups".to_string()));
        assert!(!rendered.iter().any(|line| line.starts_with("pending")));
    }

    #[test]
    fn exchange_detail_includes_headers() {
        let mut record = exchange("7", "GET", "a.com", None);
        record.response = ResponseState::Completed {
            status_code: 200,
            headers: [("content-type".to_string(), "text/html".to_string())].into(),
        };
        let detail = build_exchange_detail(&Arc::new(record));

        let rendered: Vec<String> = detail.lines.iter().map(DetailLine::text).collect();
        assert!(rendered.contains(&"content-type: text/html".to_string()));
        assert_eq!(detail.footer, "7");
    }

    #[test]
    fn formats_millis_and_seconds() {
        assert_eq!(format_millis(0.0), "0ms");
        assert_eq!(format_millis(250.4), "250ms");
        assert_eq!(format_millis(1500.0), "1.50s");
    }
}
