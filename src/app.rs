use std::{sync::Arc, time::Duration};

use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::{select, sync::mpsc};
use tracing::{debug, info, trace, warn};

use crate::{
    config::Config,
    feed::{self, FeedHandle, FeedUpdate},
    grouping::{
        EventGroup, GroupingConfigUpdate, GroupingMode, GroupingStore, find_group, group_keys,
    },
    perf::{
        PerfSettings,
        debounce::Debouncer,
        lazy::LazyGroupLoader,
        virtualize::{
            VirtualRow, Viewport, chronological_rows, flatten_groups, total_height, visible_range,
        },
    },
    state::CaptureState,
    tui::{self, AppViewModel, Event, TerminalGuard},
    ui::{
        report::{render_json_report, render_text_report},
        summary::{build_exchange_detail, build_group_detail, row_line},
    },
};

/// Upper bound on how long a steady stream of feed updates can hold back a
/// refresh, in multiples of the debounce delay.
const MAX_WAIT_FACTOR: u32 = 4;
const PAGE: isize = 10;

pub struct ExlensApp {
    tick_rate: Duration,
    settings: PerfSettings,
    source: String,
    following: bool,
    state: Arc<CaptureState>,
    feed: Option<FeedHandle>,
    feed_updates: Option<mpsc::UnboundedReceiver<FeedUpdate>>,
    store: GroupingStore,
    loader: LazyGroupLoader,
    groups: Arc<[EventGroup]>,
    rows: Vec<VirtualRow>,
    /// Keeps the selected subtree alive in the loader's weak cache.
    selected_group: Option<Arc<EventGroup>>,
    total_exchanges: usize,
    selected: Option<usize>,
    scroll: usize,
    list_height: usize,
    show_help: bool,
    view_dirty: bool,
}

/// Identity of a row that survives regrouping.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RowAnchor {
    Group(String),
    Exchange(String),
}

impl RowAnchor {
    fn of(row: &VirtualRow) -> Self {
        match row {
            VirtualRow::Header { key, .. } => Self::Group(key.clone()),
            VirtualRow::Exchange { exchange, .. } => Self::Exchange(exchange.id.clone()),
        }
    }

    fn matches(&self, row: &VirtualRow) -> bool {
        match (self, row) {
            (Self::Group(key), VirtualRow::Header { key: other, .. }) => key == other,
            (Self::Exchange(id), VirtualRow::Exchange { exchange, .. }) => *id == exchange.id,
            _ => false,
        }
    }
}

impl ExlensApp {
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let settings = config.perf_settings();
        let state = Arc::new(CaptureState::new(config.retention));
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let feed_config = config.feed_config();
        let following = feed_config.follow;
        let feed = feed::spawn(Arc::clone(&state), feed_config, Some(updates_tx)).await?;

        let mut store = GroupingStore::new(&settings);
        store.set_grouping_config(GroupingConfigUpdate {
            mode: Some(config.mode),
            max_depth: Some(config.max_depth),
        });

        info!(input = %config.input.display(), mode = %config.mode, "exlens ready");

        Ok(Self {
            tick_rate: Duration::from_millis(250),
            settings,
            source: config.input.display().to_string(),
            following,
            state,
            feed: Some(feed),
            feed_updates: Some(updates_rx),
            store,
            loader: LazyGroupLoader::new(),
            groups: Arc::from(Vec::new()),
            rows: Vec::new(),
            selected_group: None,
            total_exchanges: 0,
            selected: None,
            scroll: 0,
            list_height: 0,
            show_help: false,
            view_dirty: true,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        let mut terminal = TerminalGuard::new()?;
        self.list_height = tui::list_height(terminal.size()?.height);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let event_handle = tui::spawn_event_loop(tx, self.tick_rate);

        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(self.settings.debounce, flush_tx)
            .with_max_wait(self.settings.debounce * MAX_WAIT_FACTOR);
        debug!(delay_ms = debouncer.delay().as_millis() as u64, "view refresh debounced");
        let (_idle_tx, idle_rx) = mpsc::unbounded_channel();
        let mut feed_updates = self.feed_updates.take().unwrap_or(idle_rx);

        loop {
            if self.view_dirty {
                self.refresh_view().await;
            }

            let view_model = self.build_view_model();
            terminal.draw(|frame| tui::render_app(frame, &view_model))?;

            let exit_requested = select! {
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event).await,
                        None => true,
                    }
                }
                Some(update) = feed_updates.recv() => {
                    trace!(total = update.total, recorded = update.recorded, "feed update");
                    debouncer.schedule(update.total);
                    false
                }
                Some(total) = flush_rx.recv() => {
                    debug!(total, "refreshing grouped view");
                    self.view_dirty = true;
                    false
                }
                ctrl_c = tokio::signal::ctrl_c() => {
                    if let Err(err) = ctrl_c {
                        warn!(?err, "failed to listen for ctrl+c");
                    } else {
                        info!("received ctrl+c");
                    }
                    true
                }
            };

            if exit_requested {
                break;
            }
        }

        if debouncer.is_pending() {
            debug!("discarding pending view refresh");
            debouncer.cancel();
        }
        drop(terminal);
        drop(rx);

        if let Err(err) = event_handle.await {
            warn!(?err, "terminal event loop task ended unexpectedly");
        }

        if let Some(feed) = self.feed.take() {
            let summary = feed.shutdown().await?;
            info!(
                recorded = summary.recorded,
                rejected = summary.rejected,
                "capture feed stopped"
            );
        }

        info!("exlens shutting down");
        Ok(())
    }

    async fn refresh_view(&mut self) {
        let anchor = self.selected_row().map(RowAnchor::of);
        let state = Arc::clone(&self.state);
        let log = state.read().await;

        self.total_exchanges = log.len();
        self.groups = self.store.grouped_events(&log);
        self.rows = if self.store.grouping_mode().is_grouped() {
            flatten_groups(&self.groups)
        } else {
            chronological_rows(log.exchanges(), self.settings.batch_size)
        };
        drop(log);

        if self.store.grouping_mode().is_grouped() {
            debug_assert_eq!(total_height(&self.groups, 1, 1), self.rows.len());
        }

        let (cached, loads) = (self.loader.cached(), self.loader.loads());
        if self.loader.sync_generation(self.store.generation()) {
            trace!(cached, loads, "group tree replaced");
            self.selected_group = None;
        }

        let position =
            anchor.and_then(|anchor| self.rows.iter().position(|row| anchor.matches(row)));
        self.selected = match (position, self.rows.len()) {
            (_, 0) => None,
            (Some(index), _) => Some(index),
            (None, len) => Some(self.selected.unwrap_or(0).min(len - 1)),
        };
        self.keep_selection_visible();
        self.view_dirty = false;
    }

    fn build_view_model(&mut self) -> AppViewModel {
        let viewport = Viewport::new(self.scroll, self.list_height, 1)
            .with_overscan(self.settings.overscan);
        let window = visible_range(&viewport, self.rows.len());
        let rows = self.rows[window.clone()].iter().map(row_line).collect();

        let detail = match self.selected.and_then(|index| self.rows.get(index)) {
            Some(VirtualRow::Header { key, .. }) => {
                let groups = &self.groups;
                let group = self
                    .loader
                    .get_or_load(key, || find_group(groups, key).cloned());
                let detail = group.as_deref().map(build_group_detail);
                self.selected_group = group;
                detail
            }
            Some(VirtualRow::Exchange { exchange, .. }) => {
                self.selected_group = None;
                Some(build_exchange_detail(exchange))
            }
            None => None,
        };

        let config = self.store.grouping_config();
        AppViewModel {
            source: self.source.clone(),
            following: self.following,
            total_exchanges: self.total_exchanges,
            mode: config.mode,
            max_depth: config.max_depth,
            group_count: self.groups.len(),
            expanded_count: self.store.expanded_groups().len(),
            rows,
            window_start: window.start,
            total_rows: self.rows.len(),
            scroll: self.scroll,
            selected: self.selected,
            detail,
            show_help: self.show_help,
        }
    }

    async fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Input(key) => self.handle_key(key).await,
            Event::Tick => false,
            Event::Resize(width, height) => {
                debug!(%width, %height, "terminal resized");
                self.list_height = tui::list_height(height);
                self.keep_selection_visible();
                false
            }
        }
    }

    async fn handle_key(&mut self, key: KeyEvent) -> bool {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        if self.show_help {
            return match key.code {
                KeyCode::Char('c') if ctrl => true,
                KeyCode::Char('?') | KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => {
                    self.show_help = false;
                    false
                }
                _ => false,
            };
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('c') if ctrl => return true,
            KeyCode::Char('k') if ctrl => self.clear_capture().await,
            KeyCode::Char('?') => self.show_help = true,
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(PAGE),
            KeyCode::PageUp => self.move_selection(-PAGE),
            KeyCode::Home => self.select(0),
            KeyCode::End => self.select(self.rows.len().saturating_sub(1)),
            KeyCode::Enter | KeyCode::Char(' ') => {
                if let Some(key) = self.selected_group_key() {
                    self.toggle(&key);
                }
            }
            KeyCode::Right | KeyCode::Char('l') => {
                if let Some(key) = self.selected_group_key() {
                    if !self.store.is_expanded(&key) {
                        self.toggle(&key);
                    }
                }
            }
            KeyCode::Left | KeyCode::Char('h') => self.collapse_or_ascend(),
            KeyCode::Char('e') => {
                self.store.expand_all_groups(group_keys(&self.groups));
                self.view_dirty = true;
            }
            KeyCode::Char('c') => {
                self.store.collapse_all_groups();
                self.view_dirty = true;
            }
            KeyCode::Char('m') | KeyCode::Tab => {
                self.switch_mode(self.store.grouping_mode().next())
            }
            KeyCode::Char('M') | KeyCode::BackTab => {
                self.switch_mode(self.store.grouping_mode().previous())
            }
            KeyCode::Char('d') => {
                let depth = if self.store.grouping_config().max_depth > 1 { 1 } else { 2 };
                self.store.set_grouping_config(GroupingConfigUpdate {
                    mode: None,
                    max_depth: Some(depth),
                });
                self.view_dirty = true;
            }
            _ => {}
        }
        false
    }

    fn selected_row(&self) -> Option<&VirtualRow> {
        self.selected.and_then(|index| self.rows.get(index))
    }

    fn selected_group_key(&self) -> Option<String> {
        match self.selected_row()? {
            VirtualRow::Header { key, .. } => Some(key.clone()),
            VirtualRow::Exchange { .. } => None,
        }
    }

    fn toggle(&mut self, key: &str) {
        self.store.toggle_group_expansion(key);
        self.view_dirty = true;
    }

    /// Collapses an expanded header; on any other row moves to the row's
    /// parent group.
    fn collapse_or_ascend(&mut self) {
        let Some(row) = self.selected_row() else {
            return;
        };

        let parent = match row {
            VirtualRow::Header {
                key,
                expanded: true,
                ..
            } => {
                let key = key.clone();
                self.toggle(&key);
                return;
            }
            VirtualRow::Header { key, .. } => find_group(&self.groups, key)
                .and_then(|group| group.parent_key.clone()),
            VirtualRow::Exchange { .. } => row.group_key().map(ToOwned::to_owned),
        };

        if let Some(parent) = parent {
            let anchor = RowAnchor::Group(parent);
            if let Some(index) = self.rows.iter().position(|row| anchor.matches(row)) {
                self.select(index);
            }
        }
    }

    fn switch_mode(&mut self, mode: GroupingMode) {
        self.store.set_grouping_mode(mode);
        self.selected = None;
        self.scroll = 0;
        self.view_dirty = true;
        info!(mode = %mode, "grouping mode changed");
    }

    async fn clear_capture(&mut self) {
        self.state.clear().await;
        self.store.collapse_all_groups();
        self.store.clear_caches();
        self.loader.clear_cache();
        self.selected_group = None;
        self.selected = None;
        self.scroll = 0;
        self.view_dirty = true;
    }

    fn move_selection(&mut self, delta: isize) {
        if self.rows.is_empty() {
            self.selected = None;
            return;
        }

        let current = self.selected.unwrap_or(0);
        let target = current.saturating_add_signed(delta);
        self.select(target);
    }

    fn select(&mut self, index: usize) {
        if self.rows.is_empty() {
            self.selected = None;
            return;
        }
        self.selected = Some(index.min(self.rows.len() - 1));
        self.keep_selection_visible();
    }

    fn keep_selection_visible(&mut self) {
        let Some(selected) = self.selected else {
            self.scroll = 0;
            return;
        };

        let height = self.list_height.max(1);
        if selected < self.scroll {
            self.scroll = selected;
        } else if selected >= self.scroll + height {
            self.scroll = selected + 1 - height;
        }
    }
}

/// Reads the whole capture once and prints its grouping to stdout.
pub async fn run_report(config: Config) -> Result<()> {
    let settings = config.perf_settings();
    let state = Arc::new(CaptureState::new(config.retention));
    let summary = feed::spawn(Arc::clone(&state), config.feed_config(), None)
        .await?
        .wait()
        .await?;
    debug!(
        recorded = summary.recorded,
        rejected = summary.rejected,
        "capture loaded for report"
    );

    let mut store = GroupingStore::new(&settings);
    store.set_grouping_config(GroupingConfigUpdate {
        mode: Some(config.mode),
        max_depth: Some(config.max_depth),
    });

    let log = state.read().await;
    if log.is_empty() {
        warn!(input = %config.input.display(), "capture contains no exchanges");
    }
    let groups = store.grouped_events(&log);
    let grouping = store.grouping_config();

    let output = if config.json {
        render_json_report(grouping, &groups, log.exchanges())?
    } else {
        let rows = if grouping.mode.is_grouped() {
            Vec::new()
        } else {
            chronological_rows(log.exchanges(), settings.batch_size)
        };
        render_text_report(grouping, &groups, &rows, log.len())
    };

    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CAPTURE: &str = concat!(
        r#"{"id":"1","method":"GET","url":"https://a.com/x","timestamp":3,"response":{"statusCode":200}}"#,
        "\n",
        r#"{"id":"2","method":"POST","url":"https://a.com/y","timestamp":1,"response":{"statusCode":500}}"#,
        "\n",
        r#"{"id":"3","method":"GET","url":"https://b.com/","timestamp":2}"#,
        "\n",
    );

    async fn app_with(mode: GroupingMode) -> (ExlensApp, NamedTempFile) {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(CAPTURE.as_bytes()).expect("write capture");

        let path = file.path().to_string_lossy().to_string();
        let config =
            Config::try_parse_from(["exlens", "--input", path.as_str(), "--mode", mode.as_str()])
                .expect("config should parse");
        let mut app = ExlensApp::bootstrap(config).await.expect("bootstrap");
        if let Some(feed) = app.feed.take() {
            feed.wait().await.expect("feed should finish");
        }
        app.list_height = 20;
        app.refresh_view().await;
        (app, file)
    }

    fn press(code: KeyCode) -> Event {
        Event::Input(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[tokio::test]
    async fn chronological_view_lists_every_exchange_by_time() {
        let (mut app, _file) = app_with(GroupingMode::Chronological).await;

        let view = app.build_view_model();
        assert_eq!(view.total_rows, 3);
        assert!(view.rows[0].text().starts_with("POST"));
        assert_eq!(view.selected, Some(0));
        assert!(view.detail.is_some());
    }

    #[tokio::test]
    async fn enter_expands_and_collapses_the_selected_group() {
        let (mut app, _file) = app_with(GroupingMode::Domain).await;
        assert_eq!(app.rows.len(), 2);

        app.handle_event(press(KeyCode::Enter)).await;
        app.refresh_view().await;
        assert_eq!(app.rows.len(), 4, "a.com should show its two exchanges");
        assert!(app.store.is_expanded("domain:a.com"));

        app.handle_event(press(KeyCode::Down)).await;
        app.handle_event(press(KeyCode::Left)).await;
        assert_eq!(app.selected, Some(0), "left on an exchange jumps to its group");

        app.handle_event(press(KeyCode::Left)).await;
        app.refresh_view().await;
        assert_eq!(app.rows.len(), 2);
    }

    #[tokio::test]
    async fn selection_follows_its_row_across_regrouping() {
        let (mut app, _file) = app_with(GroupingMode::Domain).await;
        app.handle_event(press(KeyCode::Char('e'))).await;
        app.refresh_view().await;

        app.handle_event(press(KeyCode::End)).await;
        let before = app.selected_row().map(RowAnchor::of);
        assert_eq!(before, Some(RowAnchor::Exchange("3".to_string())));

        app.handle_event(press(KeyCode::Char('c'))).await;
        app.handle_event(press(KeyCode::Char('e'))).await;
        app.refresh_view().await;
        assert_eq!(app.selected_row().map(RowAnchor::of), before);
    }

    #[tokio::test]
    async fn mode_keys_cycle_and_reset_selection() {
        let (mut app, _file) = app_with(GroupingMode::Domain).await;

        app.handle_event(press(KeyCode::Char('m'))).await;
        app.refresh_view().await;
        assert_eq!(app.store.grouping_mode(), GroupingMode::DomainMethod);
        assert_eq!(app.selected, Some(0));

        app.handle_event(press(KeyCode::BackTab)).await;
        app.handle_event(press(KeyCode::BackTab)).await;
        app.refresh_view().await;
        assert_eq!(app.store.grouping_mode(), GroupingMode::Chronological);
        assert!(app.store.expanded_groups().is_empty());
        assert!(app.groups.is_empty());
    }

    #[tokio::test]
    async fn detail_reuses_the_loaded_subtree() {
        let (mut app, _file) = app_with(GroupingMode::DomainStatus).await;

        let first = app.build_view_model();
        let second = app.build_view_model();
        assert_eq!(app.loader.loads(), 1);

        let detail = second.detail.expect("group detail");
        assert_eq!(detail.footer, "domain:a.com");
        assert_eq!(first.group_count, 2);
    }

    #[tokio::test]
    async fn depth_key_flattens_nested_modes() {
        let (mut app, _file) = app_with(GroupingMode::DomainMethod).await;
        assert!(app.groups.iter().all(|group| !group.is_leaf()));

        app.handle_event(press(KeyCode::Char('d'))).await;
        app.refresh_view().await;
        assert_eq!(app.store.grouping_config().max_depth, 1);
        assert!(app.groups.iter().all(EventGroup::is_leaf));
    }

    #[tokio::test]
    async fn clearing_empties_the_view() {
        let (mut app, _file) = app_with(GroupingMode::Domain).await;

        app.handle_event(Event::Input(KeyEvent::new(
            KeyCode::Char('k'),
            KeyModifiers::CONTROL,
        )))
        .await;
        app.refresh_view().await;

        assert_eq!(app.total_exchanges, 0);
        assert!(app.rows.is_empty());
        assert_eq!(app.selected, None);
        assert!(app.build_view_model().detail.is_none());
    }

    #[tokio::test]
    async fn quit_keys_request_exit() {
        let (mut app, _file) = app_with(GroupingMode::Chronological).await;
        assert!(app.handle_event(press(KeyCode::Char('q'))).await);
        assert!(!app.handle_event(press(KeyCode::Char('?'))).await);
        assert!(app.show_help);
        assert!(!app.handle_event(press(KeyCode::Char('q'))).await);
        assert!(!app.show_help);
    }
}
