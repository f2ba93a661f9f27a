use std::{
    io::{self, Stdout},
    time::{Duration, Instant},
};

use crate::{
    grouping::GroupingMode,
    ui::summary::{DetailLine, DetailSegment, DetailViewModel, SegmentStyle},
};
use color_eyre::Result;
use crossterm::{
    event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use tokio::{sync::mpsc, task};
use tracing::{debug, error};

const HEADER_HEIGHT: u16 = 3;
const FOOTER_HEIGHT: u16 = 2;

#[derive(Debug)]
pub enum Event {
    Input(KeyEvent),
    Tick,
    Resize(u16, u16),
}

#[derive(Debug, Clone)]
pub struct AppViewModel {
    pub source: String,
    pub following: bool,
    pub total_exchanges: usize,
    pub mode: GroupingMode,
    pub max_depth: u8,
    pub group_count: usize,
    pub expanded_count: usize,
    /// Rendered slice of the row list, starting at `window_start`.
    pub rows: Vec<DetailLine>,
    pub window_start: usize,
    pub total_rows: usize,
    /// First row shown at the top of the list pane.
    pub scroll: usize,
    pub selected: Option<usize>,
    pub detail: Option<DetailViewModel>,
    pub show_help: bool,
}

pub struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalGuard {
    pub fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.hide_cursor()?;

        Ok(Self { terminal })
    }

    pub fn size(&self) -> Result<Rect> {
        Ok(self.terminal.size()?)
    }

    pub fn draw<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Frame<'_>),
    {
        self.terminal.draw(f)?;
        Ok(())
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            error!(?err, "failed to disable raw mode");
        }

        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, LeaveAlternateScreen) {
            error!(?err, "failed to leave alternate screen");
        }

        if let Err(err) = self.terminal.show_cursor() {
            error!(?err, "failed to show cursor");
        }
    }
}

pub fn spawn_event_loop(
    tx: mpsc::UnboundedSender<Event>,
    tick_rate: Duration,
) -> task::JoinHandle<()> {
    task::spawn_blocking(move || {
        let mut last_tick = Instant::now();

        loop {
            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or(Duration::ZERO);

            match event::poll(timeout) {
                Ok(true) => {
                    let forwarded = match event::read() {
                        Ok(CrosstermEvent::Key(key)) if key.kind != KeyEventKind::Release => {
                            tx.send(Event::Input(key))
                        }
                        Ok(CrosstermEvent::Resize(w, h)) => tx.send(Event::Resize(w, h)),
                        Ok(_) => Ok(()),
                        Err(err) => {
                            error!(?err, "failed to read terminal event");
                            break;
                        }
                    };
                    if forwarded.is_err() {
                        break;
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    error!(?err, "failed to poll terminal events");
                    break;
                }
            }

            if last_tick.elapsed() >= tick_rate {
                if tx.send(Event::Tick).is_err() {
                    break;
                }
                last_tick = Instant::now();
            }
        }

        debug!("terminal event loop terminated");
    })
}

/// Rows that fit inside the list pane for a terminal of `height` rows.
pub fn list_height(height: u16) -> usize {
    usize::from(height.saturating_sub(HEADER_HEIGHT + FOOTER_HEIGHT + 2))
}

pub fn render_app(frame: &mut Frame<'_>, view_model: &AppViewModel) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Min(3),
            Constraint::Length(FOOTER_HEIGHT),
        ])
        .split(frame.size());

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(layout[1]);

    render_header(frame, layout[0], view_model);
    render_rows(frame, body[0], view_model);
    render_detail(frame, body[1], view_model);
    render_footer(frame, layout[2]);

    if view_model.show_help {
        render_help(frame, frame.size());
    }
}

fn render_header(frame: &mut Frame<'_>, area: Rect, view_model: &AppViewModel) {
    let follow = if view_model.following { " (following)" } else { "" };
    let grouping = if view_model.mode.is_grouped() {
        format!(
            "{} groups by {} · depth {} · {} expanded",
            view_model.group_count,
            view_model.mode.label(),
            view_model.max_depth,
            view_model.expanded_count
        )
    } else {
        view_model.mode.label().to_string()
    };

    let block = Block::default()
        .borders(Borders::BOTTOM)
        .title(format!(
            "exlens · {}{} · {} exchanges · {}",
            view_model.source, follow, view_model.total_exchanges, grouping
        ))
        .style(Style::default().fg(Color::Cyan));

    frame.render_widget(block, area);
}

fn render_rows(frame: &mut Frame<'_>, area: Rect, view_model: &AppViewModel) {
    let title = match view_model.selected {
        Some(index) => format!("Exchanges {}/{}", index + 1, view_model.total_rows),
        None => "Exchanges".to_string(),
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title_style(
            Style::default()
                .fg(Color::LightBlue)
                .add_modifier(Modifier::BOLD),
        );

    frame.render_widget(block, area);

    if view_model.total_rows == 0 {
        let content = Paragraph::new(format!(
            "No exchanges captured yet.\n\nReading {}.\nPress `q` to exit.",
            view_model.source
        ))
        .wrap(Wrap { trim: true })
        .style(Style::default().fg(Color::Gray));

        frame.render_widget(content, inner(area));
        return;
    }

    let inner_area = inner(area);
    let skip = view_model.scroll.saturating_sub(view_model.window_start);
    let items: Vec<ListItem> = view_model
        .rows
        .iter()
        .enumerate()
        .skip(skip)
        .take(usize::from(inner_area.height))
        .map(|(offset, line)| {
            let index = view_model.window_start + offset;
            let mut item = ListItem::new(styled_line(line));
            if Some(index) == view_model.selected {
                item = item.style(Style::default().add_modifier(Modifier::BOLD).bg(Color::DarkGray));
            }
            item
        })
        .collect();

    frame.render_widget(List::new(items), inner_area);
}

fn render_detail(frame: &mut Frame<'_>, area: Rect, view_model: &AppViewModel) {
    let block = Block::default()
        .title("Details")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title_style(
            Style::default()
                .fg(Color::LightBlue)
                .add_modifier(Modifier::BOLD),
        );

    frame.render_widget(block, area);

    let inner_area = inner(area);

    let Some(detail) = &view_model.detail else {
        let paragraph =
            Paragraph::new("Nothing selected").style(Style::default().fg(Color::DarkGray));
        frame.render_widget(paragraph, inner_area);
        return;
    };

    let mut lines: Vec<Line> = vec![
        Line::from(Span::styled(
            detail.header.clone(),
            Style::default()
                .fg(Color::LightBlue)
                .add_modifier(Modifier::BOLD),
        )),
        Line::default(),
    ];
    lines.extend(detail.lines.iter().map(styled_line));

    if !detail.footer.is_empty() {
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            detail.footer.clone(),
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        )));
    }

    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(paragraph, inner_area);
}

fn render_footer(frame: &mut Frame<'_>, area: Rect) {
    let block = Block::default()
        .borders(Borders::TOP)
        .style(Style::default().fg(Color::DarkGray));

    let content = Paragraph::new(
        "q quit · ↑/↓ navigate · enter toggle · e/c expand/collapse all · m/M mode · d depth · ? help",
    )
    .style(Style::default().fg(Color::DarkGray));

    frame.render_widget(block, area);
    frame.render_widget(content, inner_bottom(area));
}

fn render_help(frame: &mut Frame<'_>, area: Rect) {
    let popup = centered(area, 56, 16);
    let bindings = [
        ("q / esc / ctrl+c", "quit"),
        ("↑ ↓ / j k", "move selection"),
        ("pgup pgdn home end", "jump"),
        ("enter / space", "toggle group"),
        ("→ / ←", "expand / collapse, ← on a row jumps to its group"),
        ("e / c", "expand all / collapse all"),
        ("m / tab", "next grouping mode"),
        ("M / shift+tab", "previous grouping mode"),
        ("d", "toggle nesting depth"),
        ("ctrl+k", "clear captured exchanges"),
        ("?", "close this help"),
    ];
    let lines: Vec<Line> = bindings
        .iter()
        .map(|(keys, action)| {
            Line::from(vec![
                Span::styled(format!("{keys:<20}"), Style::default().fg(Color::Cyan)),
                Span::styled(*action, Style::default().fg(Color::Gray)),
            ])
        })
        .collect();

    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .title("Keys")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    frame.render_widget(Clear, popup);
    frame.render_widget(paragraph, popup);
}

fn styled_line(line: &DetailLine) -> Line<'static> {
    let mut spans = Vec::with_capacity(line.segments.len() + 1);
    if line.indent > 0 {
        spans.push(Span::raw("  ".repeat(line.indent)));
    }
    spans.extend(
        line.segments
            .iter()
            .map(|segment| Span::styled(segment.text.clone(), style_for_segment(segment))),
    );
    Line::from(spans)
}

fn inner(area: Rect) -> Rect {
    Rect {
        x: area.x + 1,
        y: area.y + 1,
        width: area.width.saturating_sub(2),
        height: area.height.saturating_sub(2),
    }
}

fn inner_bottom(area: Rect) -> Rect {
    Rect {
        x: area.x,
        y: area.y + 1,
        width: area.width,
        height: area.height.saturating_sub(1),
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn style_for_segment(segment: &DetailSegment) -> Style {
    match segment.style {
        SegmentStyle::Plain => Style::default().fg(Color::Gray),
        SegmentStyle::Key => Style::default().fg(Color::Cyan),
        SegmentStyle::Label => Style::default()
            .fg(Color::LightBlue)
            .add_modifier(Modifier::BOLD),
        SegmentStyle::Method => Style::default().fg(Color::Yellow),
        SegmentStyle::Number => Style::default().fg(Color::LightMagenta),
        SegmentStyle::Success => Style::default().fg(Color::Green),
        SegmentStyle::Redirect => Style::default().fg(Color::LightBlue),
        SegmentStyle::Error => Style::default().fg(Color::Red),
        SegmentStyle::Pending => Style::default().fg(Color::DarkGray),
        SegmentStyle::Muted => Style::default().fg(Color::DarkGray),
    }
}
