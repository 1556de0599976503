use std::{
    fs,
    io::{self, IsTerminal, Read},
    path::PathBuf,
    sync::{Arc, mpsc},
    thread,
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::{
    app::columns::project_columns,
    args::Args,
    error::TransportError,
    model::{EventGroup, TracePayload, TraceSet, TraceSummary, merge_groups, summarize_groups},
};

#[derive(Clone, Debug)]
pub enum TraceSource {
    File(PathBuf),
    Inline { label: String, text: String },
}

impl TraceSource {
    pub fn label(&self) -> String {
        match self {
            TraceSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            TraceSource::Inline { label, .. } => label.clone(),
        }
    }

    fn stem(&self) -> String {
        match self {
            TraceSource::File(path) => path
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.label()),
            TraceSource::Inline { label, .. } => label.clone(),
        }
    }

    fn read(&self) -> Result<String, TransportError> {
        match self {
            TraceSource::File(path) => fs::read_to_string(path).map_err(|source| {
                TransportError::Read {
                    path: path.clone(),
                    source,
                }
            }),
            TraceSource::Inline { text, .. } => Ok(text.clone()),
        }
    }

    fn decode(&self) -> Result<Value, TransportError> {
        serde_json::from_str(&self.read()?).map_err(|source| TransportError::Decode {
            origin: self.label(),
            source,
        })
    }

    /// Modification time as RFC 3339, empty when unknown.
    fn modified(&self) -> String {
        let TraceSource::File(path) = self else {
            return String::new();
        };
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map(|time| DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default()
    }
}

/// Files from the command line, else the whole of a piped stdin.
pub fn resolve_sources(args: &Args) -> Result<Vec<TraceSource>> {
    if !args.files.is_empty() {
        return Ok(args.files.iter().cloned().map(TraceSource::File).collect());
    }
    if io::stdin().is_terminal() {
        bail!("no trace files given and stdin is a terminal");
    }
    let mut text = String::new();
    io::stdin()
        .read_to_string(&mut text)
        .context("reading trace from stdin")?;
    Ok(vec![TraceSource::Inline {
        label: "stdin".into(),
        text,
    }])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewMode {
    ByUpload,
    Consolidated,
}

impl ViewMode {
    pub fn toggled(self) -> Self {
        match self {
            ViewMode::ByUpload => ViewMode::Consolidated,
            ViewMode::Consolidated => ViewMode::ByUpload,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ViewMode::ByUpload => "by upload",
            ViewMode::Consolidated => "consolidated",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadRequest {
    pub generation: u64,
    pub mode: ViewMode,
    pub selected: usize,
}

/// A load result ready to hand to the table.
#[derive(Debug)]
pub struct LoadedTrace {
    pub set: TraceSet,
    pub columns: Vec<String>,
    pub summaries: Vec<(usize, TraceSummary)>,
}

#[derive(Debug)]
pub struct LoadResponse {
    pub request: LoadRequest,
    pub outcome: Result<LoadedTrace, TransportError>,
}

pub fn spawn_load(
    sources: Arc<[TraceSource]>,
    request: LoadRequest,
    tx: mpsc::Sender<LoadResponse>,
) {
    thread::spawn(move || {
        tracing::debug!(generation = request.generation, mode = request.mode.label(), "load started");
        let outcome = load_trace(&sources, request.mode, request.selected);
        if tx.send(LoadResponse { request, outcome }).is_err() {
            tracing::debug!(generation = request.generation, "load finished after ui exit");
        }
    });
}

pub fn load_trace(
    sources: &[TraceSource],
    mode: ViewMode,
    selected: usize,
) -> Result<LoadedTrace, TransportError> {
    let (set, summaries) = match mode {
        ViewMode::ByUpload => {
            let source = sources
                .get(selected)
                .ok_or(TransportError::MissingSource(selected))?;
            let set = single_source(source)?;
            let summary = TraceSummary {
                label: source.label(),
                row_count: set.rows.len(),
                error: None,
            };
            (set, vec![(selected, summary)])
        }
        ViewMode::Consolidated => consolidated(sources),
    };
    let columns = project_columns(&set.rows, set.multi_group);
    Ok(LoadedTrace {
        set,
        columns,
        summaries,
    })
}

fn payload_or_empty(source: &TraceSource, value: Value) -> Option<TracePayload> {
    match TracePayload::from_json(value) {
        Ok(payload) => Some(payload),
        Err(err) => {
            tracing::warn!(source = %source.label(), error = %err, "unrecognised trace shape");
            None
        }
    }
}

fn single_source(source: &TraceSource) -> Result<TraceSet, TransportError> {
    let value = source.decode()?;
    Ok(match payload_or_empty(source, value) {
        Some(payload) => TraceSet::from_payload(payload, &source.label()),
        None => TraceSet {
            name: source.label(),
            ..TraceSet::default()
        },
    })
}

/// Every source becomes one upload group; unreadable sources are reported in
/// their summary and skipped.
fn consolidated(sources: &[TraceSource]) -> (TraceSet, Vec<(usize, TraceSummary)>) {
    let mut groups = Vec::with_capacity(sources.len());
    let mut summaries = Vec::with_capacity(sources.len());
    for (idx, source) in sources.iter().enumerate() {
        let mut summary = TraceSummary {
            label: source.label(),
            row_count: 0,
            error: None,
        };
        match single_source(source) {
            Ok(set) => {
                summary.row_count = set.rows.len();
                groups.push(EventGroup {
                    id: Value::from(idx as u64 + 1),
                    name: Some(source.stem()),
                    timestamp: Some(source.modified()),
                    events: set.rows.into_iter().map(Value::Object).collect(),
                });
            }
            Err(err) => {
                tracing::warn!(source = %source.label(), error = %err, "skipping source");
                summary.error = Some(err.to_string());
            }
        }
        summaries.push((idx, summary));
    }
    let rows = merge_groups(groups);
    let set = TraceSet {
        name: "consolidated".into(),
        groups: summarize_groups(&rows),
        rows,
        multi_group: true,
    };
    (set, summaries)
}
