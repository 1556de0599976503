use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use ratatui::widgets::ListState;

use crate::{
    input::{LoadRequest, LoadResponse, TraceSource, ViewMode},
    model::{Event, GroupSummary, TraceSummary},
    parsers::{ParserRegistry, ParserStore, detect_name},
    script::Limits,
};

use super::table::TableView;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Focus {
    List,
    Detail,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterTarget {
    Column(String),
    Common,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    FilterInput(FilterTarget),
    ColumnSelect,
    ParserSelect,
    ParserTest(String),
    TracePicker,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

/// One-line status message, replaced by the next one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

/// Loads the parser store and registers its parsers, seeding the defaults
/// when nothing could be registered. Store failures become a notice.
pub fn init_parsers(
    path: Option<&Path>,
    limits: Limits,
) -> (ParserRegistry, ParserStore, Option<Notice>) {
    let mut registry = ParserRegistry::new(limits);
    let (mut store, mut notice) = match ParserStore::load(path) {
        Ok(store) => (store, None),
        Err(err) => {
            tracing::warn!(error = %err, "failed to load parser store");
            let notice = Notice {
                kind: NoticeKind::Error,
                text: format!("Parser store: {err}"),
            };
            (ParserStore::empty_at(path), Some(notice))
        }
    };
    let loaded = registry.load_from(&store);
    tracing::info!(
        loaded,
        stored = store.records().len(),
        path = ?store.path(),
        "parsers loaded"
    );
    if registry.seed_defaults_if_empty() && notice.is_none() {
        if let Some(entry) = registry.list().first() {
            if let Err(err) = store.upsert(&entry.name, &entry.source) {
                tracing::warn!(error = %err, "failed to persist default parser");
                notice = Some(Notice {
                    kind: NoticeKind::Error,
                    text: format!("Parser store: {err}"),
                });
            }
        }
    }
    (registry, store, notice)
}

pub struct App {
    pub table: TableView,
    pub parsers: ParserRegistry,
    pub store: ParserStore,
    pub sources: Arc<[TraceSource]>,
    pub summaries: Vec<Option<TraceSummary>>,
    pub mode: ViewMode,
    pub selected_source: usize,
    pub trace_name: String,
    pub groups: Vec<GroupSummary>,
    pub generation: u64,
    pub loading: bool,
    pub export_dir: PathBuf,
    pub list_state: ListState,
    pub column_select_state: ListState,
    pub parser_select_state: ListState,
    pub trace_select_state: ListState,
    pub focus: Focus,
    pub show_help: bool,
    pub zoom: Option<Focus>,
    pub input_mode: InputMode,
    pub input_buffer: String,
    pub notice: Option<Notice>,
    pub parser_test_result: Option<Result<String, String>>,
    pub last_list_height: usize,
    pub last_list_width: usize,
    pub last_detail_height: usize,
    pub detail_scroll: u16,
    pub detail_total_lines: usize,
    pub horiz_offset: usize,
    pub max_row_width: usize,
    pub force_redraw: bool,
}

impl App {
    pub fn new(
        sources: Vec<TraceSource>,
        mode: ViewMode,
        parsers: ParserRegistry,
        store: ParserStore,
        export_dir: PathBuf,
    ) -> Self {
        let summaries = vec![None; sources.len()];
        Self {
            table: TableView::default(),
            parsers,
            store,
            sources: sources.into(),
            summaries,
            mode,
            selected_source: 0,
            trace_name: String::new(),
            groups: Vec::new(),
            generation: 0,
            loading: false,
            export_dir,
            list_state: ListState::default(),
            column_select_state: ListState::default(),
            parser_select_state: ListState::default(),
            trace_select_state: ListState::default(),
            focus: Focus::List,
            show_help: false,
            zoom: None,
            input_mode: InputMode::Normal,
            input_buffer: String::new(),
            notice: None,
            parser_test_result: None,
            last_list_height: 0,
            last_list_width: 0,
            last_detail_height: 0,
            detail_scroll: 0,
            detail_total_lines: 0,
            horiz_offset: 0,
            max_row_width: 0,
            force_redraw: true,
        }
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.notice = Some(Notice {
            kind: NoticeKind::Info,
            text: text.into(),
        });
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.notice = Some(Notice {
            kind: NoticeKind::Error,
            text: text.into(),
        });
    }

    /// Starts a new load; any response for an older generation is ignored.
    pub fn request_load(&mut self) -> LoadRequest {
        self.generation += 1;
        self.loading = true;
        LoadRequest {
            generation: self.generation,
            mode: self.mode,
            selected: self.selected_source,
        }
    }

    /// Applies a load response; returns false when it was stale.
    pub fn apply_load(&mut self, response: LoadResponse) -> bool {
        if response.request.generation != self.generation {
            tracing::debug!(
                stale = response.request.generation,
                current = self.generation,
                "dropping stale load response"
            );
            return false;
        }
        self.loading = false;
        match response.outcome {
            Ok(loaded) => {
                for (idx, summary) in loaded.summaries {
                    if let Some(slot) = self.summaries.get_mut(idx) {
                        *slot = Some(summary);
                    }
                }
                let total = loaded.set.rows.len();
                self.trace_name = loaded.set.name;
                self.groups = loaded.set.groups;
                self.table.load(loaded.columns, loaded.set.rows);
                self.column_select_state
                    .select((!self.table.columns().is_empty()).then_some(0));
                self.horiz_offset = 0;
                self.select_first();
                tracing::info!(trace = %self.trace_name, rows = total, "trace loaded");
                let groups = if self.groups.is_empty() {
                    String::new()
                } else {
                    format!(" from {} uploads", self.groups.len())
                };
                self.info(format!("Loaded {total} events{groups}"));
            }
            Err(err) => {
                tracing::warn!(error = %err, "trace load failed");
                self.error(format!("Load failed: {err}"));
            }
        }
        true
    }

    pub fn toggle_mode(&mut self) -> LoadRequest {
        self.mode = self.mode.toggled();
        self.request_load()
    }

    pub fn select_source(&mut self, idx: usize) -> Option<LoadRequest> {
        if idx >= self.sources.len() {
            return None;
        }
        self.selected_source = idx;
        self.mode = ViewMode::ByUpload;
        Some(self.request_load())
    }

    pub fn visible_len(&self) -> usize {
        self.table.row_counts().0
    }

    pub fn current_row(&self) -> Option<&Event> {
        self.table.visible_row(self.list_state.selected()?)
    }

    pub fn next(&mut self) {
        self.move_selection(1);
    }

    pub fn previous(&mut self) {
        self.move_selection(-1);
    }

    pub fn page_down(&mut self) {
        let half = (self.last_list_height.max(1) / 2).max(1);
        self.move_selection(half as isize);
    }

    pub fn page_up(&mut self) {
        let half = (self.last_list_height.max(1) / 2).max(1);
        self.move_selection(-(half as isize));
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.visible_len();
        if len == 0 {
            return;
        }
        let current = self.list_state.selected().unwrap_or(0);
        let next = current.saturating_add_signed(delta).min(len - 1);
        self.list_state.select(Some(next));
        self.reset_detail_position();
    }

    pub fn select_first(&mut self) {
        let selection = (self.visible_len() > 0).then_some(0);
        self.list_state.select(selection);
        *self.list_state.offset_mut() = 0;
        self.reset_detail_position();
    }

    pub fn select_last(&mut self) {
        let selection = self.visible_len().checked_sub(1);
        self.list_state.select(selection);
        self.reset_detail_position();
    }

    pub fn detail_down(&mut self, lines: usize) {
        if self.detail_total_lines == 0 {
            return;
        }
        let max_offset = self
            .detail_total_lines
            .saturating_sub(self.last_detail_height.max(1));
        let new = (self.detail_scroll as usize + lines).min(max_offset);
        self.detail_scroll = new as u16;
    }

    pub fn detail_up(&mut self, lines: usize) {
        self.detail_scroll = self.detail_scroll.saturating_sub(lines as u16);
    }

    pub(crate) fn reset_detail_position(&mut self) {
        self.detail_scroll = 0;
    }

    pub(crate) fn clamp_offset(&mut self) {
        if self.max_row_width > self.last_list_width {
            let max_off = self.max_row_width.saturating_sub(self.last_list_width);
            self.horiz_offset = self.horiz_offset.min(max_off);
        } else {
            self.horiz_offset = 0;
        }
    }

    /// Keeps the selection inside the visible rows after filtering.
    fn clamp_selection(&mut self) {
        let len = self.visible_len();
        match self.list_state.selected() {
            _ if len == 0 => self.list_state.select(None),
            Some(sel) if sel >= len => self.list_state.select(Some(len - 1)),
            None => self.list_state.select(Some(0)),
            _ => {}
        }
        self.reset_detail_position();
    }

    pub fn selected_column(&self) -> Option<&str> {
        let idx = self.column_select_state.selected()?;
        self.table.columns().get(idx).map(String::as_str)
    }

    pub fn begin_filter(&mut self, target: FilterTarget) {
        self.input_buffer = match &target {
            FilterTarget::Column(column) => self.table.filter_for(column).unwrap_or_default(),
            FilterTarget::Common => self.table.common_filter().unwrap_or_default(),
        }
        .to_string();
        self.input_mode = InputMode::FilterInput(target);
    }

    pub fn submit_filter(&mut self, target: FilterTarget) {
        let text = std::mem::take(&mut self.input_buffer);
        match target {
            FilterTarget::Column(column) => {
                self.table.set_filter(&column, &text, &self.parsers);
                self.input_mode = InputMode::ColumnSelect;
            }
            FilterTarget::Common => {
                self.input_mode = InputMode::Normal;
                if let Err(err) = self.table.set_common_filter(&text, &self.parsers) {
                    self.error(err.to_string());
                    return;
                }
            }
        }
        self.clamp_selection();
        self.report_counts();
    }

    pub fn clear_selected_filter(&mut self) {
        let Some(column) = self.selected_column().map(str::to_string) else {
            return;
        };
        self.table.clear_filter(&column, &self.parsers);
        self.clamp_selection();
        self.report_counts();
    }

    pub fn sort_selected_column(&mut self) {
        let Some(column) = self.selected_column().map(str::to_string) else {
            return;
        };
        self.table.sort(&column);
        self.select_first();
    }

    pub fn move_column(&mut self, delta: isize) {
        let Some(idx) = self.column_select_state.selected() else {
            return;
        };
        let new_idx = self.table.move_column(idx, delta);
        self.column_select_state.select(Some(new_idx));
    }

    fn report_counts(&mut self) {
        let (visible, total) = self.table.row_counts();
        self.info(format!("Showing {visible} of {total} events"));
    }

    pub fn selected_parser(&self) -> Option<&str> {
        let idx = self.parser_select_state.selected()?;
        self.parsers.list().get(idx).map(|e| e.name.as_str())
    }

    /// Registers edited source and persists it. An edited parser keeps the
    /// name it was opened under; a new one is named by its source.
    pub fn save_parser(&mut self, source: &str, editing: Option<&str>) {
        let Some(name) = editing.map(str::to_string).or_else(|| detect_name(source)) else {
            self.error("No function name detected; declare a named function or binding");
            return;
        };
        if let Err(err) = self.parsers.register(&name, source) {
            self.error(err.to_string());
            return;
        }
        self.table.refilter(&self.parsers);
        self.clamp_selection();
        if let Some(idx) = self.parsers.list().iter().position(|e| e.name == name) {
            self.parser_select_state.select(Some(idx));
        }
        match self.store.upsert(&name, source) {
            Ok(_) => self.info(format!("Parser \"{name}\" saved")),
            Err(err) => {
                tracing::warn!(parser = %name, error = %err, "failed to persist parser");
                self.error(format!("Parser \"{name}\" registered but not saved: {err}"));
            }
        }
    }

    pub fn delete_selected_parser(&mut self) {
        let Some(name) = self.selected_parser().map(str::to_string) else {
            return;
        };
        self.parsers.remove(&name);
        self.table.refilter(&self.parsers);
        self.clamp_selection();
        let current = self.parser_select_state.selected().unwrap_or(0);
        let last = self.parsers.list().len().checked_sub(1);
        self.parser_select_state
            .select(last.map(|last| current.min(last)));
        let result = match self.store.id_of(&name) {
            Some(id) => self.store.delete(id).map(|_| ()),
            None => Ok(()),
        };
        match result {
            Ok(()) => self.info(format!("Parser \"{name}\" deleted")),
            Err(err) => self.error(format!("Parser \"{name}\" removed but store failed: {err}")),
        }
    }

    pub fn run_parser_test(&mut self, name: &str, input: &str) {
        self.parser_test_result = Some(self.parsers.test(name, input).map_err(|err| err.to_string()));
    }

    pub fn export_csv(&mut self) {
        let hint = if self.trace_name.is_empty() {
            "trace".to_string()
        } else {
            self.trace_name.clone()
        };
        match self.table.export_visible_csv(&self.export_dir, &hint) {
            Ok(path) => self.info(format!("Exported to {}", path.display())),
            Err(err) => {
                tracing::warn!(error = %err, "csv export failed");
                self.error(format!("Export failed: {err}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{LoadedTrace, load_trace};
    use serde_json::json;

    fn source(value: serde_json::Value) -> TraceSource {
        TraceSource::Inline {
            label: "inline".into(),
            text: value.to_string(),
        }
    }

    fn app() -> App {
        let (parsers, store, _) = init_parsers(None, Limits::default());
        App::new(
            vec![
                source(json!([{"operation": "a", "v": 1}, {"operation": "b", "v": 5}])),
                source(json!([{"operation": "c"}])),
            ],
            ViewMode::ByUpload,
            parsers,
            store,
            PathBuf::from("."),
        )
    }

    fn respond(app: &App, request: LoadRequest) -> LoadResponse {
        LoadResponse {
            request,
            outcome: load_trace(&app.sources, request.mode, request.selected),
        }
    }

    #[test]
    fn latest_requested_load_wins() {
        let mut app = app();
        let first = app.request_load();
        let second = app.select_source(1).unwrap();
        let stale = respond(&app, first);
        let fresh = respond(&app, second);

        assert!(app.apply_load(fresh));
        assert!(!app.apply_load(stale));
        assert_eq!(app.table.row_counts(), (1, 1));
        assert!(!app.loading);
    }

    #[test]
    fn failed_load_keeps_table() {
        let mut app = app();
        let request = app.request_load();
        let response = respond(&app, request);
        app.apply_load(response);
        let request = app.request_load();
        app.apply_load(LoadResponse {
            request,
            outcome: Err(crate::error::TransportError::MissingSource(9)),
        });
        assert_eq!(app.table.row_counts(), (2, 2));
        assert_eq!(app.notice.as_ref().map(|n| n.kind), Some(NoticeKind::Error));
    }

    #[test]
    fn defaults_are_seeded_without_a_store() {
        let app = app();
        assert_eq!(app.parsers.list()[0].name, "tensorShape");
        assert_eq!(app.store.records().len(), 1);
    }

    #[test]
    fn column_filter_round_trip_through_input() {
        let mut app = app();
        let request = app.request_load();
        let response = respond(&app, request);
        app.apply_load(response);
        app.column_select_state.select(Some(1));
        assert_eq!(app.selected_column(), Some("v"));

        app.begin_filter(FilterTarget::Column("v".into()));
        app.input_buffer = "value > 2".into();
        app.submit_filter(FilterTarget::Column("v".into()));
        assert_eq!(app.table.row_counts(), (1, 2));
        assert_eq!(app.list_state.selected(), Some(0));
        assert_eq!(app.input_mode, InputMode::ColumnSelect);

        app.begin_filter(FilterTarget::Column("v".into()));
        assert_eq!(app.input_buffer, "value > 2");
        app.clear_selected_filter();
        assert_eq!(app.table.row_counts(), (2, 2));
    }

    #[test]
    fn invalid_common_filter_reports_error() {
        let mut app = app();
        let request = app.request_load();
        let response = respond(&app, request);
        app.apply_load(response);
        app.input_buffer = "row.v >".into();
        app.submit_filter(FilterTarget::Common);
        assert_eq!(app.notice.as_ref().map(|n| n.kind), Some(NoticeKind::Error));
        assert!(app.table.common_filter().is_none());
    }

    #[test]
    fn saving_and_deleting_parsers() {
        let mut app = app();
        app.save_parser("const double = x => x * 2", None);
        assert!(app.parsers.get("double").is_some());
        assert!(app.store.id_of("double").is_some());
        assert_eq!(app.selected_parser(), Some("double"));

        app.run_parser_test("double", "21");
        assert_eq!(app.parser_test_result, Some(Ok("42".to_string())));

        app.delete_selected_parser();
        assert!(app.parsers.get("double").is_none());
        assert!(app.store.id_of("double").is_none());
    }

    #[test]
    fn anonymous_parser_needs_a_name() {
        let mut app = app();
        app.save_parser("x => x", None);
        assert_eq!(app.notice.as_ref().map(|n| n.kind), Some(NoticeKind::Error));
        app.save_parser("x => x", Some("identity"));
        assert!(app.parsers.get("identity").is_some());
    }

    #[test]
    fn editing_keeps_the_parser_name() {
        let mut app = app();
        app.save_parser("const shape = x => 0", None);
        let count = app.parsers.list().len();
        app.save_parser("function parseShape(x) { return 1; }", Some("shape"));
        assert_eq!(app.parsers.list().len(), count);
        assert!(app.parsers.get("parseShape").is_none());
        assert!(app.store.id_of("parseShape").is_none());
        assert_eq!(
            app.parsers.entry("shape").map(|e| e.source.as_str()),
            Some("function parseShape(x) { return 1; }")
        );
        app.run_parser_test("shape", "");
        assert_eq!(app.parser_test_result, Some(Ok("1".to_string())));
    }

    #[test]
    fn export_reports_written_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app();
        app.export_dir = dir.path().to_path_buf();
        let LoadedTrace { set, columns, .. } = load_trace(&app.sources, ViewMode::ByUpload, 0).unwrap();
        app.trace_name = set.name.clone();
        app.table.load(columns, set.rows);
        app.export_csv();
        assert!(dir.path().join("inline.csv").exists());
        assert_eq!(app.notice.as_ref().map(|n| n.kind), Some(NoticeKind::Info));
    }
}
