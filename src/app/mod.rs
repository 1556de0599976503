use std::{sync::mpsc, time::Duration};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{Terminal, backend::Backend, widgets::ListState};

use crate::{
    editor::{NEW_PARSER_TEMPLATE, edit_parser_source, open_event_in_editor},
    input::{LoadRequest, LoadResponse, spawn_load},
    ui,
};

pub mod columns;
mod state;
pub mod table;

pub use state::{App, FilterTarget, Focus, InputMode, NoticeKind, init_parsers};

/// What the key loop must do after a key was handled.
#[derive(Debug, PartialEq, Eq)]
enum Action {
    Continue,
    Quit,
    Load(LoadRequest),
    NewParser,
    EditParser(String),
    OpenEvent,
}

fn move_list(state: &mut ListState, len: usize, delta: isize) {
    if len == 0 {
        state.select(None);
        return;
    }
    let current = state.selected().unwrap_or(0).min(len - 1);
    state.select(Some(current.saturating_add_signed(delta).min(len - 1)));
}

fn jump_list(state: &mut ListState, len: usize, last: bool) {
    state.select(match (len, last) {
        (0, _) => None,
        (_, false) => Some(0),
        (n, true) => Some(n - 1),
    });
}

fn ctrl(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
}

fn handle_text_input(app: &mut App, key: KeyEvent) -> Action {
    match key.code {
        KeyCode::Esc => {
            app.input_buffer.clear();
            app.input_mode = match app.input_mode {
                InputMode::FilterInput(FilterTarget::Column(_)) => InputMode::ColumnSelect,
                InputMode::ParserTest(_) => InputMode::ParserSelect,
                _ => InputMode::Normal,
            };
        }
        KeyCode::Enter => match std::mem::replace(&mut app.input_mode, InputMode::Normal) {
            InputMode::FilterInput(target) => app.submit_filter(target),
            InputMode::ParserTest(name) => {
                let sample = app.input_buffer.clone();
                app.run_parser_test(&name, &sample);
                app.input_mode = InputMode::ParserTest(name);
            }
            other => app.input_mode = other,
        },
        KeyCode::Backspace => {
            app.input_buffer.pop();
        }
        KeyCode::Char('u') if ctrl(&key) => app.input_buffer.clear(),
        KeyCode::Char(c) if !ctrl(&key) => app.input_buffer.push(c),
        _ => {}
    }
    Action::Continue
}

fn handle_column_select(app: &mut App, key: KeyEvent) -> Action {
    let len = app.table.columns().len();
    match key.code {
        KeyCode::Esc | KeyCode::Char('c') => app.input_mode = InputMode::Normal,
        KeyCode::Char('q') => return Action::Quit,
        KeyCode::Down | KeyCode::Char('j') => move_list(&mut app.column_select_state, len, 1),
        KeyCode::Up | KeyCode::Char('k') => move_list(&mut app.column_select_state, len, -1),
        KeyCode::Char('g') => jump_list(&mut app.column_select_state, len, false),
        KeyCode::Char('G') => jump_list(&mut app.column_select_state, len, true),
        KeyCode::Char('J') => app.move_column(1),
        KeyCode::Char('K') => app.move_column(-1),
        KeyCode::Char('s') => app.sort_selected_column(),
        KeyCode::Char('x') => app.clear_selected_filter(),
        KeyCode::Enter | KeyCode::Char('/') => {
            if let Some(column) = app.selected_column().map(str::to_string) {
                app.begin_filter(FilterTarget::Column(column));
            }
        }
        _ => {}
    }
    Action::Continue
}

fn handle_parser_select(app: &mut App, key: KeyEvent) -> Action {
    let len = app.parsers.list().len();
    match key.code {
        KeyCode::Esc | KeyCode::Char('p') => {
            app.parser_test_result = None;
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Char('q') => return Action::Quit,
        KeyCode::Down | KeyCode::Char('j') => {
            move_list(&mut app.parser_select_state, len, 1);
            app.parser_test_result = None;
        }
        KeyCode::Up | KeyCode::Char('k') => {
            move_list(&mut app.parser_select_state, len, -1);
            app.parser_test_result = None;
        }
        KeyCode::Char('n') => return Action::NewParser,
        KeyCode::Char('e') | KeyCode::Enter => {
            if let Some(name) = app.selected_parser() {
                return Action::EditParser(name.to_string());
            }
        }
        KeyCode::Char('d') => app.delete_selected_parser(),
        KeyCode::Char('t') => {
            if let Some(name) = app.selected_parser().map(str::to_string) {
                app.input_buffer.clear();
                app.parser_test_result = None;
                app.input_mode = InputMode::ParserTest(name);
            }
        }
        _ => {}
    }
    Action::Continue
}

fn handle_trace_picker(app: &mut App, key: KeyEvent) -> Action {
    let len = app.sources.len();
    match key.code {
        KeyCode::Esc | KeyCode::Char('t') => app.input_mode = InputMode::Normal,
        KeyCode::Char('q') => return Action::Quit,
        KeyCode::Down | KeyCode::Char('j') => move_list(&mut app.trace_select_state, len, 1),
        KeyCode::Up | KeyCode::Char('k') => move_list(&mut app.trace_select_state, len, -1),
        KeyCode::Enter => {
            app.input_mode = InputMode::Normal;
            let idx = app.trace_select_state.selected().unwrap_or(0);
            if let Some(request) = app.select_source(idx) {
                return Action::Load(request);
            }
        }
        _ => {}
    }
    Action::Continue
}

/// Keys shared by both panes in normal mode.
fn handle_global(app: &mut App, key: KeyEvent) -> Option<Action> {
    let action = match key.code {
        KeyCode::Char('q') => Action::Quit,
        KeyCode::Char('e') if ctrl(&key) => Action::OpenEvent,
        KeyCode::Char('l') if ctrl(&key) => {
            app.force_redraw = true;
            Action::Continue
        }
        KeyCode::Char('n') if ctrl(&key) => {
            app.next();
            Action::Continue
        }
        KeyCode::Char('p') if ctrl(&key) => {
            app.previous();
            Action::Continue
        }
        KeyCode::Char('/') => {
            app.begin_filter(FilterTarget::Common);
            Action::Continue
        }
        KeyCode::Char('c') => {
            app.input_mode = InputMode::ColumnSelect;
            if app.column_select_state.selected().is_none() {
                jump_list(&mut app.column_select_state, app.table.columns().len(), false);
            }
            Action::Continue
        }
        KeyCode::Char('p') => {
            app.input_mode = InputMode::ParserSelect;
            if app.parser_select_state.selected().is_none() {
                jump_list(&mut app.parser_select_state, app.parsers.list().len(), false);
            }
            Action::Continue
        }
        KeyCode::Char('t') => {
            app.input_mode = InputMode::TracePicker;
            app.trace_select_state.select(Some(app.selected_source));
            Action::Continue
        }
        KeyCode::Char('m') => Action::Load(app.toggle_mode()),
        KeyCode::Char('r') => Action::Load(app.request_load()),
        KeyCode::Char('E') => {
            app.export_csv();
            Action::Continue
        }
        _ => return None,
    };
    Some(action)
}

fn handle_list(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.next(),
        KeyCode::Char('k') | KeyCode::Up => app.previous(),
        KeyCode::Char('h') | KeyCode::Left => {
            let step = (app.last_list_width / 4).max(4);
            app.horiz_offset = app.horiz_offset.saturating_sub(step);
            app.clamp_offset();
        }
        KeyCode::Char('l') => {
            let step = (app.last_list_width / 4).max(4);
            app.horiz_offset = app.horiz_offset.saturating_add(step);
            app.clamp_offset();
        }
        KeyCode::Char('0') => app.horiz_offset = 0,
        KeyCode::Char('$') => {
            app.horiz_offset = app.max_row_width.saturating_sub(app.last_list_width);
            app.clamp_offset();
        }
        KeyCode::Char('g') => app.select_first(),
        KeyCode::Char('G') => app.select_last(),
        KeyCode::Char('d') if ctrl(&key) => app.page_down(),
        KeyCode::Char('u') if ctrl(&key) => app.page_up(),
        KeyCode::Char('z') => {
            app.zoom = match app.zoom {
                Some(Focus::List) => None,
                _ => Some(Focus::List),
            }
        }
        KeyCode::Enter | KeyCode::Tab | KeyCode::Right => app.focus = Focus::Detail,
        _ => {}
    }
}

fn handle_detail(app: &mut App, key: KeyEvent) {
    let half = (app.last_detail_height.max(1) / 2).max(1);
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.detail_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.detail_up(1),
        KeyCode::Char('d') if ctrl(&key) => app.detail_down(half),
        KeyCode::Char('u') if ctrl(&key) => app.detail_up(half),
        KeyCode::Char('g') => app.detail_scroll = 0,
        KeyCode::Char('G') => app.detail_down(usize::MAX / 2),
        KeyCode::Char('z') => {
            app.zoom = match app.zoom {
                Some(Focus::Detail) => None,
                _ => Some(Focus::Detail),
            }
        }
        KeyCode::Tab | KeyCode::Esc | KeyCode::Left => app.focus = Focus::List,
        _ => {}
    }
}

fn handle_key(app: &mut App, key: KeyEvent) -> Action {
    if key.code == KeyCode::Char('c') && ctrl(&key) {
        return Action::Quit;
    }
    match &app.input_mode {
        InputMode::FilterInput(_) | InputMode::ParserTest(_) => return handle_text_input(app, key),
        InputMode::ColumnSelect => return handle_column_select(app, key),
        InputMode::ParserSelect => return handle_parser_select(app, key),
        InputMode::TracePicker => return handle_trace_picker(app, key),
        InputMode::Normal => {}
    }
    if key.code == KeyCode::Char('?') {
        app.show_help = !app.show_help;
        return Action::Continue;
    }
    if app.show_help {
        match key.code {
            KeyCode::Esc => app.show_help = false,
            KeyCode::Char('q') => return Action::Quit,
            _ => {}
        }
        return Action::Continue;
    }
    if let Some(action) = handle_global(app, key) {
        return action;
    }
    match app.focus {
        Focus::List => handle_list(app, key),
        Focus::Detail => handle_detail(app, key),
    }
    Action::Continue
}

pub fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    tx: mpsc::Sender<LoadResponse>,
    rx: mpsc::Receiver<LoadResponse>,
) -> Result<()> {
    spawn_load(app.sources.clone(), app.request_load(), tx.clone());
    loop {
        for response in rx.try_iter() {
            app.apply_load(response);
        }

        if app.force_redraw {
            terminal.clear().ok();
            app.force_redraw = false;
        }

        terminal
            .draw(|f| ui::render(f, app))
            .context("drawing frame")?;

        if !event::poll(Duration::from_millis(100)).context("polling for events")? {
            continue;
        }
        let Event::Key(key) = event::read().context("reading event")? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match handle_key(app, key) {
            Action::Continue => {}
            Action::Quit => break,
            Action::Load(request) => spawn_load(app.sources.clone(), request, tx.clone()),
            Action::NewParser => {
                if let Some(source) = edit_parser_source(terminal, "", NEW_PARSER_TEMPLATE)? {
                    app.save_parser(&source, None);
                }
            }
            Action::EditParser(name) => {
                let initial = app
                    .parsers
                    .entry(&name)
                    .map(|entry| entry.source.clone())
                    .unwrap_or_default();
                if let Some(source) = edit_parser_source(terminal, &name, &initial)? {
                    app.save_parser(&source, Some(&name));
                }
            }
            Action::OpenEvent => {
                if let Some(row) = app.current_row().cloned() {
                    open_event_in_editor(terminal, &row)?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        input::{TraceSource, ViewMode, load_trace},
        script::Limits,
    };
    use serde_json::json;
    use std::path::PathBuf;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn loaded_app() -> App {
        let (parsers, store, _) = init_parsers(None, Limits::default());
        let sources = vec![TraceSource::Inline {
            label: "t".into(),
            text: json!([
                {"operation": "matmul", "shape": "Tensor[8x384|BF16]"},
                {"operation": "add", "shape": "Tensor[4x384|BF16]"},
            ])
            .to_string(),
        }];
        let mut app = App::new(sources, ViewMode::ByUpload, parsers, store, PathBuf::from("."));
        let request = app.request_load();
        let outcome = load_trace(&app.sources, request.mode, request.selected);
        app.apply_load(LoadResponse { request, outcome });
        app
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            handle_key(app, press(KeyCode::Char(c)));
        }
    }

    #[test]
    fn column_panel_filters_with_parsers() {
        let mut app = loaded_app();
        handle_key(&mut app, press(KeyCode::Char('c')));
        handle_key(&mut app, press(KeyCode::Char('j')));
        assert_eq!(app.selected_column(), Some("shape"));
        handle_key(&mut app, press(KeyCode::Enter));
        type_text(&mut app, "tensorShape(value)[0] == 8");
        handle_key(&mut app, press(KeyCode::Enter));
        assert_eq!(app.table.row_counts(), (1, 2));
        assert_eq!(app.input_mode, InputMode::ColumnSelect);
    }

    #[test]
    fn quit_key_is_typed_inside_filters() {
        let mut app = loaded_app();
        handle_key(&mut app, press(KeyCode::Char('/')));
        assert_eq!(handle_key(&mut app, press(KeyCode::Char('q'))), Action::Continue);
        assert_eq!(app.input_buffer, "q");
        handle_key(&mut app, press(KeyCode::Esc));
        assert_eq!(handle_key(&mut app, press(KeyCode::Char('q'))), Action::Quit);
    }

    #[test]
    fn sort_key_toggles_direction() {
        let mut app = loaded_app();
        handle_key(&mut app, press(KeyCode::Char('c')));
        handle_key(&mut app, press(KeyCode::Char('s')));
        assert_eq!(
            app.current_row().and_then(|r| r.get("operation")),
            Some(&json!("add"))
        );
        handle_key(&mut app, press(KeyCode::Char('s')));
        assert_eq!(
            app.current_row().and_then(|r| r.get("operation")),
            Some(&json!("matmul"))
        );
    }

    #[test]
    fn mode_toggle_requests_a_new_generation() {
        let mut app = loaded_app();
        let before = app.generation;
        match handle_key(&mut app, press(KeyCode::Char('m'))) {
            Action::Load(request) => {
                assert_eq!(request.generation, before + 1);
                assert_eq!(request.mode, ViewMode::Consolidated);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn parser_test_shows_result() {
        let mut app = loaded_app();
        handle_key(&mut app, press(KeyCode::Char('p')));
        handle_key(&mut app, press(KeyCode::Char('t')));
        type_text(&mut app, "Tensor[2x3|F32]");
        handle_key(&mut app, press(KeyCode::Enter));
        assert_eq!(app.parser_test_result, Some(Ok("[2,3]".to_string())));
    }
}
