use ratatui::{
    prelude::*,
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::{
    app::{App, FilterTarget, Focus, InputMode, NoticeKind},
    model::{Event, cell_text},
};

const MAX_COLUMN_WIDTH: usize = 40;
const COLUMN_SEPARATOR: &str = " │ ";

pub fn render(f: &mut Frame, app: &mut App) {
    let full_area = f.size();
    f.render_widget(Clear, full_area);

    let lines = status_lines(app);
    let status_height = (lines.len() as u16).saturating_add(2).max(3);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(status_height)])
        .split(full_area);

    let area = vertical[0];
    let chunks = match app.zoom {
        Some(Focus::List) => vec![area, Rect::new(0, 0, 0, 0)],
        Some(Focus::Detail) => vec![Rect::new(0, 0, 0, 0), area],
        None => Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(area)
            .to_vec(),
    };

    render_table(f, chunks[0], app);
    if chunks[1].width > 0 && chunks[1].height > 0 {
        render_detail(f, chunks[1], app);
    }
    render_status(f, vertical[1], lines);

    match app.input_mode {
        InputMode::ColumnSelect | InputMode::FilterInput(FilterTarget::Column(_)) => {
            render_column_panel(f, full_area, app)
        }
        InputMode::ParserSelect | InputMode::ParserTest(_) => render_parser_panel(f, full_area, app),
        InputMode::TracePicker => render_trace_picker(f, full_area, app),
        _ => {}
    }
    if app.show_help {
        render_help(f, full_area);
    }
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    // One line for the header inside the borders.
    app.last_list_height = area.height.saturating_sub(3) as usize;
    let list_width = area.width.saturating_sub(4) as usize;
    app.last_list_width = list_width;

    let columns = app.table.columns().to_vec();
    let widths = column_widths(&columns, app.table.visible_rows());
    let header = header_row(app, &columns, &widths);
    let mut max_full_width = header.width();
    let items: Vec<ListItem> = app
        .table
        .visible_rows()
        .map(|row| {
            let full = render_row(row, &columns, &widths);
            max_full_width = max_full_width.max(full.width());
            ListItem::new(slice_row(&full, app.horiz_offset, list_width))
        })
        .collect();
    app.max_row_width = max_full_width;
    app.clamp_offset();

    let (visible, total) = app.table.row_counts();
    let mut title = if app.trace_name.is_empty() {
        format!("Events ({visible}/{total})")
    } else {
        format!("{} ({visible}/{total})", app.trace_name)
    };
    if app.loading {
        title.push_str(" loading…");
    }

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(match app.focus {
            Focus::List => Style::default().fg(Color::Cyan),
            Focus::Detail => Style::default(),
        });
    let inner = block.inner(area);
    f.render_widget(block, area);
    if inner.height == 0 {
        return;
    }

    let header_area = Rect::new(inner.x, inner.y, inner.width, 1);
    let body_area = Rect::new(inner.x, inner.y + 1, inner.width, inner.height.saturating_sub(1));
    let header_line = format!("  {}", slice_row(&header, app.horiz_offset, list_width));
    f.render_widget(
        Paragraph::new(header_line).style(Style::default().add_modifier(Modifier::BOLD)),
        header_area,
    );

    if items.is_empty() {
        let message = match (app.loading, total) {
            (true, _) => "Loading trace...",
            (false, 0) => "No events",
            (false, _) => "No events match the current filters",
        };
        f.render_widget(
            Paragraph::new(message).style(Style::default().fg(Color::DarkGray)),
            body_area,
        );
        return;
    }

    let list = List::new(items)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("▸ ");
    f.render_stateful_widget(list, body_area, &mut app.list_state);
}

fn column_widths<'a>(columns: &[String], rows: impl Iterator<Item = &'a Event>) -> Vec<usize> {
    // Room for the sort arrow and filter marker.
    let mut widths: Vec<usize> = columns.iter().map(|c| c.width() + 2).collect();
    for row in rows {
        for (width, column) in widths.iter_mut().zip(columns) {
            *width = (*width).max(cell_text(row.get(column)).width());
        }
    }
    widths
        .into_iter()
        .map(|w| w.min(MAX_COLUMN_WIDTH))
        .collect()
}

fn header_row(app: &App, columns: &[String], widths: &[usize]) -> String {
    if columns.is_empty() {
        return "[no columns]".to_string();
    }
    let sort = app.table.sort_state();
    let cells: Vec<String> = columns
        .iter()
        .map(|column| {
            let mut label = column.clone();
            if let Some((sorted, direction)) = sort {
                if sorted == column {
                    label.push_str(direction.arrow());
                }
            }
            if app.table.filter_for(column).is_some() {
                label.push('*');
            }
            label
        })
        .collect();
    join_cells(&cells, widths)
}

fn render_row(row: &Event, columns: &[String], widths: &[usize]) -> String {
    if columns.is_empty() {
        return "[no columns]".to_string();
    }
    let cells: Vec<String> = columns
        .iter()
        .map(|column| cell_text(row.get(column)).replace(['\n', '\r', '\t'], " "))
        .collect();
    join_cells(&cells, widths)
}

fn join_cells(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| pad_cell(cell, width))
        .collect::<Vec<_>>()
        .join(COLUMN_SEPARATOR)
}

fn pad_cell(cell: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    for ch in cell.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > width {
            // Replace the last visible char with an ellipsis.
            if let Some(last) = out.pop() {
                used -= last.width().unwrap_or(0);
            }
            out.push('…');
            used += 1;
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push_str(&" ".repeat(width.saturating_sub(used)));
    out
}

fn slice_row(s: &str, offset: usize, width: usize) -> String {
    let mut out = String::new();
    let mut current_width = 0usize;
    let mut skip_width = offset;

    for ch in s.chars() {
        let w = ch.width().unwrap_or(1);
        if skip_width > 0 {
            skip_width = skip_width.saturating_sub(w);
            continue;
        }
        if current_width + w > width {
            break;
        }
        out.push(ch);
        current_width += w;
    }

    if current_width < width {
        out.push_str(&" ".repeat(width.saturating_sub(current_width)));
    }
    out
}

fn render_detail(f: &mut Frame, area: Rect, app: &mut App) {
    app.last_detail_height = area.height.saturating_sub(2) as usize;
    let detail_text = match app.current_row() {
        Some(row) => {
            let mut lines = Vec::new();
            render_object(row, 0, false, &mut lines);
            Text::from(lines)
        }
        None => Text::from("No event selected"),
    };
    let inner_width = area.width.saturating_sub(2) as usize;
    app.detail_total_lines = wrapped_height(&detail_text, inner_width);
    let max_offset = app
        .detail_total_lines
        .saturating_sub(app.last_detail_height.max(1));
    if app.detail_scroll as usize > max_offset {
        app.detail_scroll = max_offset as u16;
    }

    let block = Block::default()
        .title("Event")
        .borders(Borders::ALL)
        .border_style(match app.focus {
            Focus::Detail => Style::default().fg(Color::Cyan),
            Focus::List => Style::default(),
        });
    let detail = Paragraph::new(detail_text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.detail_scroll, 0));
    f.render_widget(detail, area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn render_column_panel(f: &mut Frame, area: Rect, app: &mut App) {
    let width = (area.width.saturating_sub(10)).clamp(40, 90);
    let height = (app.table.columns().len() as u16 + 2)
        .min(area.height.saturating_sub(6))
        .max(5);
    let popup = centered(area, width, height);

    let sort = app.table.sort_state();
    let items: Vec<ListItem> = app
        .table
        .columns()
        .iter()
        .map(|column| {
            let mut spans = vec![Span::raw(column.clone())];
            if let Some((sorted, direction)) = sort {
                if sorted == column {
                    spans.push(Span::styled(
                        format!(" {}", direction.arrow()),
                        Style::default().fg(Color::Yellow),
                    ));
                }
            }
            if let Some(filter) = app.table.filter_for(column) {
                spans.push(Span::styled(
                    format!("  [{filter}]"),
                    Style::default().fg(Color::Green),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .title("Columns (Enter filter, s sort, x clear, J/K move, Esc close)")
                .borders(Borders::ALL),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("▸ ");

    f.render_widget(Clear, popup);
    f.render_stateful_widget(list, popup, &mut app.column_select_state);
}

fn render_parser_panel(f: &mut Frame, area: Rect, app: &mut App) {
    let width = (area.width.saturating_sub(10)).clamp(40, 100);
    let height = area.height.saturating_sub(4).clamp(8, 30);
    let popup = centered(area, width, height);
    f.render_widget(Clear, popup);

    let block = Block::default()
        .title("Parsers (n new, e edit, d delete, t test, Esc close)")
        .borders(Borders::ALL);
    let inner = block.inner(popup);
    f.render_widget(block, popup);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(4)])
        .split(inner);

    let items: Vec<ListItem> = app
        .parsers
        .list()
        .iter()
        .map(|entry| ListItem::new(entry.name.clone()))
        .collect();
    let list = List::new(items)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("▸ ");
    f.render_stateful_widget(list, chunks[0], &mut app.parser_select_state);

    let mut lines = Vec::new();
    if let InputMode::ParserTest(name) = &app.input_mode {
        lines.push(Line::from(format!("{name}(\"{}_\")", app.input_buffer)));
    }
    match &app.parser_test_result {
        Some(Ok(result)) => lines.push(Line::styled(
            format!("=> {result}"),
            Style::default().fg(Color::Green),
        )),
        Some(Err(err)) => lines.push(Line::styled(
            format!("error: {err}"),
            Style::default().fg(Color::Red),
        )),
        None => {}
    }
    let test = Paragraph::new(Text::from(lines))
        .block(Block::default().title("Test").borders(Borders::TOP))
        .wrap(Wrap { trim: false });
    f.render_widget(test, chunks[1]);
}

fn render_trace_picker(f: &mut Frame, area: Rect, app: &mut App) {
    let width = (area.width.saturating_sub(10)).clamp(40, 100);
    let height = (app.sources.len() as u16 + 2)
        .min(area.height.saturating_sub(6))
        .max(5);
    let popup = centered(area, width, height);

    let items: Vec<ListItem> = app
        .sources
        .iter()
        .zip(&app.summaries)
        .enumerate()
        .map(|(idx, (source, summary))| {
            let marker = if idx == app.selected_source { "* " } else { "  " };
            let mut spans = vec![Span::raw(format!("{marker}{}", source.label()))];
            match summary {
                Some(summary) => match &summary.error {
                    Some(err) => spans.push(Span::styled(
                        format!("  {err}"),
                        Style::default().fg(Color::Red),
                    )),
                    None => spans.push(Span::styled(
                        format!("  {} events", summary.row_count),
                        Style::default().fg(Color::DarkGray),
                    )),
                },
                None => spans.push(Span::styled(
                    "  not loaded",
                    Style::default().fg(Color::DarkGray),
                )),
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .title("Traces (Enter open, Esc close)")
                .borders(Borders::ALL),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("▸ ");

    f.render_widget(Clear, popup);
    f.render_stateful_widget(list, popup, &mut app.trace_select_state);
}

fn status_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines: Vec<Line> = Vec::new();
    let (visible, total) = app.table.row_counts();
    let mut summary = format!("Showing {visible} of {total} events | {}", app.mode.label());
    if !app.groups.is_empty() {
        summary.push_str(&format!(" | {} uploads", app.groups.len()));
    }
    let column_filters = app.table.filters().len();
    if column_filters > 0 {
        summary.push_str(&format!(" | {column_filters} column filters"));
    }
    if app.loading {
        summary.push_str(" | loading");
    }
    lines.push(Line::from(summary));

    match &app.input_mode {
        InputMode::FilterInput(FilterTarget::Column(column)) => {
            lines.push(Line::from(format!("Filter {column}: {}_", app.input_buffer)));
        }
        InputMode::FilterInput(FilterTarget::Common) => {
            lines.push(Line::from(format!("Filter rows: {}_", app.input_buffer)));
        }
        _ => {
            if let Some(common) = app.table.common_filter() {
                lines.push(Line::from(format!("Row filter: {common}")));
            }
        }
    }

    if let Some(notice) = &app.notice {
        let color = match notice.kind {
            NoticeKind::Info => Color::Gray,
            NoticeKind::Error => Color::Red,
        };
        lines.push(Line::styled(notice.text.clone(), Style::default().fg(color)));
    }
    lines
}

fn render_status(f: &mut Frame, area: Rect, lines: Vec<Line<'static>>) {
    let block = Block::default().borders(Borders::ALL);
    let status = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: true });
    f.render_widget(Clear, area);
    f.render_widget(status, area);
}

fn render_help(f: &mut Frame, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();
    let mut current_context: Option<&str> = None;
    for sc in SHORTCUTS {
        if current_context != Some(sc.context) {
            if current_context.is_some() {
                lines.push(Line::from(""));
            }
            current_context = Some(sc.context);
            lines.push(Line::styled(
                sc.context,
                Style::default().add_modifier(Modifier::BOLD),
            ));
        }
        lines.push(Line::from(vec![
            Span::styled(format!("{:20}", sc.keys), Style::default().fg(Color::Yellow)),
            Span::raw(sc.description),
        ]));
    }

    let width = (area.width.saturating_sub(10)).clamp(50, 90);
    let height = (lines.len() as u16)
        .saturating_add(2)
        .min(area.height.saturating_sub(2))
        .max(8);
    let popup = centered(area, width, height);

    let block = Block::default().title("Shortcuts").borders(Borders::ALL);
    let help = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false });
    f.render_widget(Clear, popup);
    f.render_widget(help, popup);
}

fn indent_span(indent: usize) -> Span<'static> {
    Span::raw(" ".repeat(indent))
}

fn render_value(
    value: &serde_json::Value,
    indent: usize,
    trailing_comma: bool,
    out: &mut Vec<Line<'static>>,
) {
    match value {
        serde_json::Value::Object(map) => render_object(map, indent, trailing_comma, out),
        serde_json::Value::Array(arr) => render_array(arr, indent, trailing_comma, out),
        _ => {
            let mut spans = vec![indent_span(indent)];
            spans.push(primitive_span(value));
            if trailing_comma {
                spans.push(Span::raw(","));
            }
            out.push(Line::from(spans));
        }
    }
}

fn render_object(
    map: &serde_json::Map<String, serde_json::Value>,
    indent: usize,
    trailing_comma: bool,
    out: &mut Vec<Line<'static>>,
) {
    out.push(Line::from(vec![indent_span(indent), Span::raw("{")]));
    let len = map.len();
    for (idx, (key, value)) in map.iter().enumerate() {
        let is_last = idx + 1 == len;
        let mut spans = vec![
            indent_span(indent + 2),
            Span::styled(format!("\"{key}\""), Style::default().fg(Color::Cyan)),
            Span::raw(": "),
        ];
        match value {
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                out.push(Line::from(spans));
                render_value(value, indent + 2, !is_last, out);
            }
            _ => {
                spans.push(primitive_span(value));
                if !is_last {
                    spans.push(Span::raw(","));
                }
                out.push(Line::from(spans));
            }
        }
    }
    let mut closing = vec![indent_span(indent), Span::raw("}")];
    if trailing_comma {
        closing.push(Span::raw(","));
    }
    out.push(Line::from(closing));
}

fn render_array(
    arr: &[serde_json::Value],
    indent: usize,
    trailing_comma: bool,
    out: &mut Vec<Line<'static>>,
) {
    out.push(Line::from(vec![indent_span(indent), Span::raw("[")]));
    let len = arr.len();
    for (idx, value) in arr.iter().enumerate() {
        render_value(value, indent + 2, idx + 1 != len, out);
    }
    let mut closing = vec![indent_span(indent), Span::raw("]")];
    if trailing_comma {
        closing.push(Span::raw(","));
    }
    out.push(Line::from(closing));
}

fn primitive_span(value: &serde_json::Value) -> Span<'static> {
    match value {
        serde_json::Value::String(s) => {
            Span::styled(format!("\"{s}\""), Style::default().fg(Color::Green))
        }
        serde_json::Value::Number(num) => {
            Span::styled(num.to_string(), Style::default().fg(Color::Yellow))
        }
        serde_json::Value::Bool(b) => Span::styled(b.to_string(), Style::default().fg(Color::Magenta)),
        serde_json::Value::Null => Span::styled("null", Style::default().fg(Color::Gray)),
        _ => Span::raw(value.to_string()),
    }
}

fn wrapped_height(text: &Text<'_>, width: usize) -> usize {
    let effective_width = width.max(1);
    text.lines
        .iter()
        .map(|line| {
            let line_width: usize = line
                .spans
                .iter()
                .map(|s| UnicodeWidthStr::width(s.content.as_ref()))
                .sum();
            line_width.div_ceil(effective_width).max(1)
        })
        .sum()
}

struct Shortcut {
    context: &'static str,
    keys: &'static str,
    description: &'static str,
}

const fn shortcut(context: &'static str, keys: &'static str, description: &'static str) -> Shortcut {
    Shortcut {
        context,
        keys,
        description,
    }
}

const SHORTCUTS: &[Shortcut] = &[
    shortcut("Global", "q, Ctrl+C", "Quit"),
    shortcut("Global", "?", "Toggle help"),
    shortcut("Global", "/", "Filter rows (expression over row)"),
    shortcut("Global", "c", "Column panel"),
    shortcut("Global", "p", "Parser panel"),
    shortcut("Global", "t", "Pick trace file"),
    shortcut("Global", "m", "Toggle by-upload / consolidated"),
    shortcut("Global", "r", "Reload"),
    shortcut("Global", "E", "Export visible rows as CSV"),
    shortcut("Global", "Ctrl+E", "Open event in $EDITOR"),
    shortcut("Global", "Ctrl+N / Ctrl+P", "Next/previous event"),
    shortcut("Global", "Ctrl+L", "Force redraw"),
    shortcut("List", "j/k, Up/Down", "Move selection"),
    shortcut("List", "h/l, 0/$", "Scroll columns"),
    shortcut("List", "Ctrl+d / Ctrl+u", "Half-page down/up"),
    shortcut("List", "g / G", "Jump to top/bottom"),
    shortcut("List", "Enter, Tab", "Focus event"),
    shortcut("List", "z", "Toggle zoom"),
    shortcut("Event", "j/k, Ctrl+d/u, g/G", "Scroll"),
    shortcut("Event", "Tab, Left, Esc", "Back to list"),
    shortcut("Columns", "Enter or /", "Edit column filter"),
    shortcut("Columns", "s", "Sort (again to reverse)"),
    shortcut("Columns", "x", "Clear column filter"),
    shortcut("Columns", "J / K", "Move column"),
    shortcut("Parsers", "n / e", "New / edit in $EDITOR"),
    shortcut("Parsers", "d", "Delete"),
    shortcut("Parsers", "t", "Test with a sample value"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slice_row_pads_and_offsets() {
        assert_eq!(slice_row("abcdef", 2, 3), "cde");
        assert_eq!(slice_row("ab", 0, 4), "ab  ");
        assert_eq!(slice_row("日本語", 2, 4), "本語");
    }

    #[test]
    fn long_cells_are_truncated() {
        assert_eq!(pad_cell("abcdef", 4), "abc…");
        assert_eq!(pad_cell("ab", 4), "ab  ");
    }

    #[test]
    fn rows_line_up_with_header() {
        let columns = vec!["operation".to_string(), "ms".to_string()];
        let rows: Vec<Event> = vec![
            json!({"operation": "matmul", "ms": 1.5}),
            json!({"operation": "add", "ms": 12}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
        let widths = column_widths(&columns, rows.iter());
        assert_eq!(widths, vec![11, 4]);
        let line = render_row(&rows[1], &columns, &widths);
        assert_eq!(line, "add         │ 12  ");
    }

    #[test]
    fn wrapped_height_counts_wrapped_lines() {
        let text = Text::from(vec![Line::from("abcdef"), Line::from("")]);
        assert_eq!(wrapped_height(&text, 4), 3);
    }

    #[test]
    fn json_detail_renders_nested_values() {
        let mut lines = Vec::new();
        render_value(&json!({"a": [1, {"b": null}]}), 0, false, &mut lines);
        let rendered: Vec<String> = lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect();
        assert_eq!(
            rendered,
            vec!["{", "  \"a\": ", "  [", "    1,", "    {", "      \"b\": null", "    }", "  ]", "}"]
        );
    }
}
