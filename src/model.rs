use serde_json::{Map, Value};

use crate::error::DataShapeError;

/// One trace record. The field set varies from event to event.
pub type Event = Map<String, Value>;

/// Upload metadata keys copied onto every event of a group.
pub const GROUP_KEYS: [&str; 3] = ["upload_id", "upload_name", "upload_time"];

#[derive(Clone, Debug, PartialEq)]
pub struct GroupSummary {
    pub id: Value,
    pub name: String,
    pub timestamp: String,
}

/// A batch of events that arrived together (an upload, or one file in
/// consolidated mode).
#[derive(Clone, Debug, Default)]
pub struct EventGroup {
    pub id: Value,
    pub name: Option<String>,
    pub timestamp: Option<String>,
    pub events: Vec<Value>,
}

/// The accepted payload shapes, decided once at the boundary.
#[derive(Clone, Debug)]
pub enum TracePayload {
    Events(Vec<Value>),
    Wrapped {
        name: Option<String>,
        filename: Option<String>,
        events: Vec<Value>,
        uploads: Option<Vec<EventGroup>>,
    },
    Uploads(Vec<EventGroup>),
    Traces(Vec<EventGroup>),
}

impl TracePayload {
    pub fn from_json(value: Value) -> Result<Self, DataShapeError> {
        let mut obj = match value {
            Value::Array(events) => return Ok(TracePayload::Events(events)),
            Value::Object(obj) => obj,
            other => return Err(DataShapeError::UnexpectedRoot(json_kind(&other))),
        };
        let uploads = match obj.remove("uploads") {
            Some(Value::Array(groups)) => Some(groups.into_iter().map(upload_group).collect()),
            _ => None,
        };
        if let Some(Value::Array(events)) = obj.remove("events") {
            return Ok(TracePayload::Wrapped {
                name: string_field(&obj, "name"),
                filename: string_field(&obj, "filename"),
                events,
                uploads,
            });
        }
        if let Some(groups) = uploads {
            return Ok(TracePayload::Uploads(groups));
        }
        match obj.remove("traces") {
            Some(Value::Array(traces)) => Ok(TracePayload::Traces(
                traces.into_iter().map(trace_group).collect(),
            )),
            _ => Err(DataShapeError::NoEvents),
        }
    }

    /// Whether the payload carries per-upload metadata.
    pub fn is_multi_group(&self) -> bool {
        match self {
            TracePayload::Uploads(_) | TracePayload::Traces(_) => true,
            TracePayload::Wrapped { uploads, .. } => uploads.is_some(),
            TracePayload::Events(_) => false,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            TracePayload::Wrapped { name, filename, .. } => {
                name.as_deref().or(filename.as_deref())
            }
            _ => None,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn string_field(obj: &Event, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn events_of(obj: &mut Event) -> Vec<Value> {
    match obj.remove("events") {
        Some(Value::Array(events)) => events,
        _ => Vec::new(),
    }
}

fn upload_group(value: Value) -> EventGroup {
    let Value::Object(mut obj) = value else {
        return EventGroup::default();
    };
    EventGroup {
        id: obj.get("id").cloned().unwrap_or(Value::Null),
        name: string_field(&obj, "name"),
        timestamp: string_field(&obj, "timestamp"),
        events: events_of(&mut obj),
    }
}

fn trace_group(value: Value) -> EventGroup {
    let Value::Object(mut obj) = value else {
        return EventGroup::default();
    };
    EventGroup {
        id: obj.get("upload_id").cloned().unwrap_or(Value::Null),
        name: string_field(&obj, "upload_name"),
        timestamp: string_field(&obj, "upload_time"),
        events: events_of(&mut obj),
    }
}

/// A payload flattened into rows ready for the table.
#[derive(Clone, Debug, Default)]
pub struct TraceSet {
    pub name: String,
    pub rows: Vec<Event>,
    pub groups: Vec<GroupSummary>,
    pub multi_group: bool,
}

impl TraceSet {
    pub fn from_payload(payload: TracePayload, fallback_name: &str) -> Self {
        let multi_group = payload.is_multi_group();
        let name = payload.name().unwrap_or(fallback_name).to_string();
        let rows = match payload {
            TracePayload::Events(events) => events.into_iter().filter_map(into_event).collect(),
            TracePayload::Wrapped {
                events, uploads, ..
            } => {
                let mut rows: Vec<Event> = events.into_iter().filter_map(into_event).collect();
                if let Some(uploads) = uploads {
                    backfill_group_names(&mut rows, &uploads);
                }
                rows
            }
            TracePayload::Uploads(groups) | TracePayload::Traces(groups) => merge_groups(groups),
        };
        let multi_group = multi_group || rows.iter().any(has_group_marker);
        let groups = if multi_group {
            summarize_groups(&rows)
        } else {
            Vec::new()
        };
        Self {
            name,
            rows,
            groups,
            multi_group,
        }
    }
}

fn into_event(value: Value) -> Option<Event> {
    match value {
        Value::Object(map) => Some(map),
        other => {
            tracing::debug!(kind = json_kind(&other), "skipping non-object event");
            None
        }
    }
}

fn has_group_marker(event: &Event) -> bool {
    ["upload_id", "upload_name"]
        .iter()
        .any(|key| event.get(*key).is_some_and(is_present))
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => true,
    }
}

/// Flattens groups into one sequence, tagging each event with its group
/// unless the event already carries that key.
pub fn merge_groups(groups: Vec<EventGroup>) -> Vec<Event> {
    let mut rows = Vec::new();
    for group in groups {
        let tags = [
            group.id.clone(),
            Value::String(group.name.clone().unwrap_or_else(|| "Unknown".to_string())),
            Value::String(group.timestamp.clone().unwrap_or_default()),
        ];
        for event in group.events.into_iter().filter_map(into_event) {
            let mut event = event;
            for (key, tag) in GROUP_KEYS.iter().zip(&tags) {
                if !event.contains_key(*key) {
                    event.insert((*key).to_string(), tag.clone());
                }
            }
            rows.push(event);
        }
    }
    rows
}

fn backfill_group_names(rows: &mut [Event], uploads: &[EventGroup]) {
    for event in rows {
        if event.get("upload_name").is_some_and(is_present) {
            continue;
        }
        let Some(id) = event.get("upload_id").filter(|v| is_present(v)).cloned() else {
            continue;
        };
        if let Some(group) = uploads.iter().find(|g| g.id == id) {
            event.insert(
                "upload_name".into(),
                Value::String(group.name.clone().unwrap_or_else(|| "Unknown".to_string())),
            );
            event.insert(
                "upload_time".into(),
                Value::String(group.timestamp.clone().unwrap_or_default()),
            );
        }
    }
}

/// One summary per distinct group id, in first-seen order.
pub fn summarize_groups(rows: &[Event]) -> Vec<GroupSummary> {
    let mut seen: Vec<GroupSummary> = Vec::new();
    for event in rows {
        let pick = |keys: [&str; 2]| {
            keys.iter()
                .filter_map(|k| event.get(*k))
                .find(|v| is_present(v))
                .cloned()
        };
        let Some(id) = pick(["_upload_id", "upload_id"]) else {
            continue;
        };
        if seen.iter().any(|g| g.id == id) {
            continue;
        }
        let text = |v: Option<Value>| v.map(|v| cell_text(Some(&v))).unwrap_or_default();
        let name = pick(["_upload_name", "upload_name"]);
        seen.push(GroupSummary {
            id,
            name: if name.is_some() {
                text(name)
            } else {
                "Unknown".to_string()
            },
            timestamp: text(pick(["_upload_time", "upload_time"])),
        });
    }
    seen
}

/// Display text of a cell: missing and null are empty, compound values are
/// rendered as compact JSON.
pub fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Some(other) => other.to_string(),
    }
}

/// Row count (or failure) of one loaded source, shown in the trace picker.
#[derive(Clone, Debug)]
pub struct TraceSummary {
    pub label: String,
    pub row_count: usize,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn load(value: Value) -> TraceSet {
        TraceSet::from_payload(TracePayload::from_json(value).unwrap(), "fallback")
    }

    #[test]
    fn bare_array_is_single_group() {
        let set = load(json!([{"operation": "matmul"}, {"operation": "add"}]));
        assert_eq!(set.rows.len(), 2);
        assert!(!set.multi_group);
        assert!(set.groups.is_empty());
        assert_eq!(set.name, "fallback");
    }

    #[test]
    fn wrapper_takes_its_name() {
        let set = load(json!({"name": "run-7", "filename": "run-7.json", "events": [{"a": 1}]}));
        assert_eq!(set.name, "run-7");
        assert_eq!(set.rows.len(), 1);
    }

    #[test]
    fn uploads_are_merged_and_tagged() {
        let set = load(json!({"uploads": [
            {"id": 1, "name": "first", "timestamp": "2024-01-01", "events": [{"op": "a"}]},
            {"id": 2, "name": "second", "events": [{"op": "b", "upload_name": "kept"}]},
        ]}));
        assert!(set.multi_group);
        assert_eq!(set.rows[0]["upload_id"], json!(1));
        assert_eq!(set.rows[0]["upload_time"], json!("2024-01-01"));
        assert_eq!(set.rows[1]["upload_name"], json!("kept"));
        assert_eq!(set.groups.len(), 2);
        assert_eq!(set.groups[0].name, "first");
    }

    #[test]
    fn traces_shape_uses_upload_fields() {
        let set = load(json!({"traces": [
            {"upload_id": 9, "upload_name": "nightly", "events": [{"op": "a"}, {"op": "b"}]},
        ]}));
        assert_eq!(set.rows.len(), 2);
        assert_eq!(set.rows[1]["upload_name"], json!("nightly"));
        assert_eq!(set.groups.len(), 1);
    }

    #[test]
    fn group_summaries_dedupe_on_first_seen_id() {
        let rows: Vec<Event> = [
            json!({"_upload_id": 3, "_upload_name": "x"}),
            json!({"upload_id": 3, "upload_name": "y"}),
            json!({"upload_id": 4}),
        ]
        .into_iter()
        .filter_map(into_event)
        .collect();
        let groups = summarize_groups(&rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "x");
        assert_eq!(groups[1].name, "Unknown");
    }

    #[test]
    fn event_markers_make_a_flat_array_multi_group() {
        let set = load(json!([{"op": "a", "upload_id": 5}]));
        assert!(set.multi_group);
    }

    #[test]
    fn scalar_root_is_rejected() {
        assert_eq!(
            TracePayload::from_json(json!(42)).unwrap_err(),
            DataShapeError::UnexpectedRoot("a number")
        );
        assert_eq!(
            TracePayload::from_json(json!({"name": "x"})).unwrap_err(),
            DataShapeError::NoEvents
        );
    }

    #[test]
    fn cell_text_renders_like_the_table() {
        assert_eq!(cell_text(None), "");
        assert_eq!(cell_text(Some(&json!(null))), "");
        assert_eq!(cell_text(Some(&json!(8))), "8");
        assert_eq!(cell_text(Some(&json!(true))), "true");
        assert_eq!(cell_text(Some(&json!([8, 384]))), "[8,384]");
    }
}
