use std::{
    borrow::Cow,
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::{FilterEvalError, TransportError},
    filter::{CommonFilter, FilterEngine},
    model::{Event, cell_text},
    parsers::ParserRegistry,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn arrow(self) -> &'static str {
        match self {
            SortDirection::Ascending => "▲",
            SortDirection::Descending => "▼",
        }
    }
}

/// Rows, columns and the filter/sort state over them. Rows are never
/// mutated; sorting permutes `order` and filtering masks `kept`.
#[derive(Debug, Default)]
pub struct TableView {
    rows: Vec<Event>,
    columns: Vec<String>,
    order: Vec<usize>,
    kept: Vec<bool>,
    sort: Option<(String, SortDirection)>,
    filters: Vec<(String, String)>,
    common: Option<CommonFilter>,
    engine: FilterEngine,
}

impl TableView {
    /// Replaces everything, including sort and filters.
    pub fn load(&mut self, columns: Vec<String>, rows: Vec<Event>) {
        self.order = (0..rows.len()).collect();
        self.kept = vec![true; rows.len()];
        self.rows = rows;
        self.columns = columns;
        self.sort = None;
        self.filters.clear();
        self.common = None;
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn sort_state(&self) -> Option<(&str, SortDirection)> {
        self.sort.as_ref().map(|(c, d)| (c.as_str(), *d))
    }

    pub fn filter_for(&self, column: &str) -> Option<&str> {
        self.filters
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, text)| text.as_str())
    }

    pub fn filters(&self) -> &[(String, String)] {
        &self.filters
    }

    pub fn common_filter(&self) -> Option<&str> {
        self.common.as_ref().map(CommonFilter::text)
    }

    /// Blank text removes the column's filter.
    pub fn set_filter(&mut self, column: &str, text: &str, parsers: &ParserRegistry) {
        let text = text.trim();
        if text.is_empty() {
            self.clear_filter(column, parsers);
            return;
        }
        match self.filters.iter_mut().find(|(c, _)| c == column) {
            Some((_, existing)) => *existing = text.to_string(),
            None => self.filters.push((column.to_string(), text.to_string())),
        }
        self.refilter(parsers);
    }

    pub fn clear_filter(&mut self, column: &str, parsers: &ParserRegistry) {
        let before = self.filters.len();
        self.filters.retain(|(c, _)| c != column);
        if self.filters.len() != before {
            self.refilter(parsers);
        }
    }

    /// On a syntax error the previous common filter stays active.
    pub fn set_common_filter(
        &mut self,
        text: &str,
        parsers: &ParserRegistry,
    ) -> Result<(), FilterEvalError> {
        self.common = CommonFilter::compile(text)?;
        self.refilter(parsers);
        Ok(())
    }

    /// Re-evaluates every filter, for example after a parser changed.
    pub fn refilter(&mut self, parsers: &ParserRegistry) {
        let Self {
            rows,
            kept,
            filters,
            common,
            engine,
            ..
        } = self;
        for (row, keep) in rows.iter().zip(kept.iter_mut()) {
            *keep = filters.iter().all(|(column, text)| {
                engine.keep_cell(text, &cell_text(row.get(column)), parsers)
            }) && common.as_ref().is_none_or(|f| f.keep(row, parsers));
        }
        tracing::debug!(
            visible = kept.iter().filter(|k| **k).count(),
            total = rows.len(),
            compiled = engine.cached(),
            "filters applied"
        );
    }

    /// Ascending on a new column, toggles on a repeat.
    pub fn sort(&mut self, column: &str) {
        let direction = match &self.sort {
            Some((current, SortDirection::Ascending)) if current == column => {
                SortDirection::Descending
            }
            _ => SortDirection::Ascending,
        };
        let keys: Vec<String> = self
            .rows
            .iter()
            .map(|row| cell_text(row.get(column)))
            .collect();
        let mut buf = Vec::with_capacity(self.order.len());
        merge_sort(&mut self.order, &mut buf, &mut |a: &usize, b: &usize| {
            let ord = compare_cells(&keys[*a], &keys[*b]);
            match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
        self.sort = Some((column.to_string(), direction));
    }

    pub fn visible_rows(&self) -> impl Iterator<Item = &Event> + '_ {
        self.order
            .iter()
            .filter(|idx| self.kept[**idx])
            .map(|idx| &self.rows[*idx])
    }

    pub fn visible_row(&self, position: usize) -> Option<&Event> {
        self.visible_rows().nth(position)
    }

    /// `(visible, total)`.
    pub fn row_counts(&self) -> (usize, usize) {
        (self.kept.iter().filter(|k| **k).count(), self.rows.len())
    }

    /// Moves the column at `idx` by `delta` places; returns its new index.
    pub fn move_column(&mut self, idx: usize, delta: isize) -> usize {
        if idx >= self.columns.len() {
            return idx;
        }
        let target = idx
            .saturating_add_signed(delta)
            .min(self.columns.len() - 1);
        let column = self.columns.remove(idx);
        self.columns.insert(target, column);
        target
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_record(&mut out, self.columns.iter().map(|c| Cow::Borrowed(c.as_str())));
        for row in self.visible_rows() {
            push_record(
                &mut out,
                self.columns
                    .iter()
                    .map(|c| Cow::Owned(cell_text(row.get(c)))),
            );
        }
        out
    }

    /// Writes the visible rows to `<hint>.csv` inside `dir`.
    pub fn export_visible_csv(&self, dir: &Path, hint: &str) -> Result<PathBuf, TransportError> {
        let path = dir.join(format!("{}.csv", sanitize_file_stem(hint)));
        fs::write(&path, self.to_csv()).map_err(|source| TransportError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), rows = self.row_counts().0, "exported csv");
        Ok(path)
    }
}

fn numeric(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Numbers compare numerically when both sides are numbers, otherwise
/// case-folded text first and code points second.
pub fn compare_cells(a: &str, b: &str) -> Ordering {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a
            .to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b)),
    }
}

/// Stable top-down merge sort. Unlike `slice::sort_by` it tolerates a
/// comparator that is not a total order.
fn merge_sort<T, F>(items: &mut [T], buf: &mut Vec<T>, cmp: &mut F)
where
    T: Copy,
    F: FnMut(&T, &T) -> Ordering,
{
    let len = items.len();
    if len <= 1 {
        return;
    }
    let mid = len / 2;
    merge_sort(&mut items[..mid], buf, cmp);
    merge_sort(&mut items[mid..], buf, cmp);

    buf.clear();
    let (mut i, mut j) = (0, mid);
    while i < mid && j < len {
        if cmp(&items[j], &items[i]) == Ordering::Less {
            buf.push(items[j]);
            j += 1;
        } else {
            buf.push(items[i]);
            i += 1;
        }
    }
    buf.extend_from_slice(&items[i..mid]);
    buf.extend_from_slice(&items[j..len]);
    items.copy_from_slice(buf);
}

fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn push_record<'a>(out: &mut String, fields: impl Iterator<Item = Cow<'a, str>>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&csv_field(&field));
    }
    out.push('\n');
}

pub fn sanitize_file_stem(hint: &str) -> String {
    let stem = hint.strip_suffix(".json").unwrap_or(hint);
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches(['_', '.']).is_empty() {
        "trace".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Limits;
    use serde_json::{Value, json};

    fn rows(values: Vec<Value>) -> Vec<Event> {
        values
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect()
    }

    fn parsers() -> ParserRegistry {
        let mut reg = ParserRegistry::new(Limits::default());
        reg.seed_defaults_if_empty();
        reg
    }

    fn column(table: &TableView, name: &str) -> Vec<String> {
        table
            .visible_rows()
            .map(|row| cell_text(row.get(name)))
            .collect()
    }

    fn table(values: Vec<Value>) -> TableView {
        let mut table = TableView::default();
        table.load(vec!["v".into(), "tag".into()], rows(values));
        table
    }

    #[test]
    fn mixed_values_sort_numbers_before_words() {
        let mut t = table(vec![json!({"v": "apple"}), json!({"v": "10"}), json!({"v": "2"})]);
        t.sort("v");
        assert_eq!(column(&t, "v"), vec!["2", "10", "apple"]);
        t.sort("v");
        assert_eq!(t.sort_state(), Some(("v", SortDirection::Descending)));
        assert_eq!(column(&t, "v"), vec!["apple", "10", "2"]);
    }

    #[test]
    fn ties_keep_original_order() {
        let mut t = table(vec![
            json!({"v": 1, "tag": "a"}),
            json!({"v": 0, "tag": "b"}),
            json!({"v": 1, "tag": "c"}),
            json!({"v": 0, "tag": "d"}),
        ]);
        t.sort("v");
        assert_eq!(column(&t, "tag"), vec!["b", "d", "a", "c"]);
        t.sort("v");
        assert_eq!(column(&t, "tag"), vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn text_sort_is_case_folded() {
        let mut t = table(vec![json!({"v": "b"}), json!({"v": "B"}), json!({"v": "a"})]);
        t.sort("v");
        assert_eq!(column(&t, "v"), vec!["a", "B", "b"]);
    }

    #[test]
    fn missing_cells_sort_as_empty_text() {
        let mut t = table(vec![json!({"v": "x"}), json!({}), json!({"v": 3})]);
        t.sort("v");
        assert_eq!(column(&t, "v"), vec!["", "3", "x"]);
    }

    #[test]
    fn filters_and_together() {
        let reg = parsers();
        let mut t = table(vec![
            json!({"v": "Tensor[8x384|BF16]", "tag": "keep"}),
            json!({"v": "Tensor[4x384|BF16]", "tag": "keep"}),
            json!({"v": "Tensor[8x16|BF16]", "tag": "drop"}),
        ]);
        t.set_filter("v", "tensorShape(value)[0] == 8", &reg);
        assert_eq!(t.row_counts(), (2, 3));
        t.set_filter("tag", "keep", &reg);
        assert_eq!(t.row_counts(), (1, 3));
        t.clear_filter("v", &reg);
        assert_eq!(t.row_counts(), (2, 3));
        t.set_filter("tag", "  ", &reg);
        assert_eq!(t.row_counts(), (3, 3));
    }

    #[test]
    fn bad_common_filter_keeps_previous() {
        let reg = parsers();
        let mut t = table(vec![json!({"v": 1}), json!({"v": 5})]);
        t.set_common_filter("row.v > 2", &reg).unwrap();
        assert_eq!(t.row_counts(), (1, 2));
        assert!(t.set_common_filter("row.v >", &reg).is_err());
        assert_eq!(t.common_filter(), Some("row.v > 2"));
        assert_eq!(t.row_counts(), (1, 2));
    }

    #[test]
    fn load_resets_state() {
        let reg = parsers();
        let mut t = table(vec![json!({"v": 1}), json!({"v": 5})]);
        t.sort("v");
        t.set_filter("v", "value > 2", &reg);
        t.load(vec!["v".into()], rows(vec![json!({"v": 9})]));
        assert!(t.sort_state().is_none());
        assert!(t.filters().is_empty());
        assert_eq!(t.row_counts(), (1, 1));
    }

    #[test]
    fn csv_quotes_special_fields() {
        let mut t = TableView::default();
        t.load(
            vec!["name".into(), "shape".into()],
            rows(vec![
                json!({"name": "say \"hi\"", "shape": [8, 384]}),
                json!({"name": "multi\nline"}),
            ]),
        );
        assert_eq!(
            t.to_csv(),
            "name,shape\n\"say \"\"hi\"\"\",\"[8,384]\"\n\"multi\nline\",\n"
        );
    }

    /// Minimal RFC 4180 reader: quoted fields, doubled quotes, `\n` records.
    fn read_csv(text: &str) -> Vec<Vec<String>> {
        let mut records = Vec::new();
        let mut record = Vec::new();
        let mut field = String::new();
        let mut quoted = false;
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match (quoted, c) {
                (true, '"') if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                (true, '"') => quoted = false,
                (true, c) => field.push(c),
                (false, '"') => quoted = true,
                (false, ',') => record.push(std::mem::take(&mut field)),
                (false, '\n') => {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                (false, c) => field.push(c),
            }
        }
        records
    }

    #[test]
    fn csv_reads_back_to_the_same_cells() {
        let columns = vec!["op, kind".to_string(), "note".into(), "shape".into()];
        let mut t = TableView::default();
        t.load(
            columns.clone(),
            rows(vec![
                json!({"op, kind": "a,b", "note": "say \"hi\"", "shape": [8, 384]}),
                json!({"op, kind": "multi\nline", "note": "cr\rhere"}),
                json!({"op, kind": "\"", "note": "", "shape": "plain"}),
            ]),
        );
        let records = read_csv(&t.to_csv());
        assert_eq!(records[0], columns);
        assert_eq!(
            records[1..],
            [
                vec!["a,b".to_string(), "say \"hi\"".into(), "[8,384]".into()],
                vec!["multi\nline".to_string(), "cr\rhere".into(), String::new()],
                vec!["\"".to_string(), String::new(), "plain".into()],
            ]
        );
    }

    #[test]
    fn csv_follows_visible_order_and_columns() {
        let reg = parsers();
        let mut t = table(vec![
            json!({"v": 3, "tag": "c"}),
            json!({"v": 1, "tag": "a"}),
            json!({"v": 2, "tag": "b"}),
        ]);
        t.sort("v");
        t.set_filter("v", "value != 2", &reg);
        t.move_column(1, -1);
        assert_eq!(t.to_csv(), "tag,v\na,1\nc,3\n");
    }

    #[test]
    fn export_writes_sanitized_file() {
        let dir = tempfile::tempdir().unwrap();
        let t = table(vec![json!({"v": 1})]);
        let path = t.export_visible_csv(dir.path(), "run 7/final.json").unwrap();
        assert_eq!(path, dir.path().join("run_7_final.csv"));
        assert_eq!(fs::read_to_string(path).unwrap(), "v,tag\n1,\n");
    }

    #[test]
    fn move_column_clamps_at_edges() {
        let mut t = table(vec![]);
        assert_eq!(t.move_column(0, -1), 0);
        assert_eq!(t.move_column(0, 5), 1);
        assert_eq!(t.columns(), &["tag".to_string(), "v".to_string()]);
    }
}
