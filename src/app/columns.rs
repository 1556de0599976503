use std::collections::BTreeSet;

use crate::model::{Event, GROUP_KEYS};

pub const PRIMARY_COLUMN: &str = "operation";

fn is_group_column(key: &str) -> bool {
    GROUP_KEYS
        .iter()
        .any(|k| key == *k || key.strip_prefix('_') == Some(*k))
        || key.starts_with("upload_")
        || key.starts_with("_upload_")
}

/// Numeric suffix of an `arg<N>` column.
fn arg_index(key: &str) -> Option<u64> {
    let digits = key.strip_prefix("arg")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Every key present in at least one event, minus `id` (and upload metadata
/// when the rows came from several groups), in display order.
pub fn project_columns(rows: &[Event], multi_group: bool) -> Vec<String> {
    let keys: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .filter(|key| *key != "id")
        .filter(|key| !(multi_group && is_group_column(key)))
        .collect();

    let mut args: Vec<(u64, &str)> = keys
        .iter()
        .filter_map(|key| arg_index(key).map(|n| (n, *key)))
        .collect();
    args.sort();

    let mut columns = Vec::with_capacity(keys.len());
    if keys.contains(PRIMARY_COLUMN) {
        columns.push(PRIMARY_COLUMN.to_string());
    }
    columns.extend(args.iter().map(|(_, key)| key.to_string()));
    columns.extend(
        keys.iter()
            .filter(|key| **key != PRIMARY_COLUMN && arg_index(key).is_none())
            .map(|key| key.to_string()),
    );
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn operation_then_args_then_rest() {
        let rows = rows(vec![
            json!({"id": 1, "zeta": 0, "arg10": "x", "operation": "matmul"}),
            json!({"arg2": "y", "alpha": 1, "arg0": "z"}),
        ]);
        assert_eq!(
            project_columns(&rows, false),
            vec!["operation", "arg0", "arg2", "arg10", "alpha", "zeta"]
        );
    }

    #[test]
    fn upload_metadata_hidden_only_for_multi_group() {
        let rows = rows(vec![json!({
            "op": "a",
            "upload_id": 1,
            "_upload_name": "n",
            "upload_extra": true,
            "uploader": "kept"
        })]);
        assert_eq!(project_columns(&rows, true), vec!["op", "uploader"]);
        assert_eq!(
            project_columns(&rows, false),
            vec!["_upload_name", "op", "upload_extra", "upload_id", "uploader"]
        );
    }

    #[test]
    fn argument_lookalikes_sort_with_the_rest() {
        let rows = rows(vec![json!({"args": 1, "arg1": 2, "argx": 3})]);
        assert_eq!(project_columns(&rows, false), vec!["arg1", "args", "argx"]);
    }

    #[test]
    fn empty_input_has_no_columns() {
        assert!(project_columns(&[], true).is_empty());
    }
}
