use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParserRecord {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Flat JSON file holding parser sources by name. Without a path the store
/// lives in memory only.
#[derive(Debug, Default)]
pub struct ParserStore {
    path: Option<PathBuf>,
    records: Vec<ParserRecord>,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl ParserStore {
    /// A missing file is an empty store.
    pub fn load(path: Option<&Path>) -> Result<Self, TransportError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let records = match fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Vec::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|source| TransportError::Decode {
                origin: path.display().to_string(),
                source,
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(TransportError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            records,
        })
    }

    /// Store for `path` with no records, used when loading fails.
    pub fn empty_at(path: Option<&Path>) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
            records: Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn records(&self) -> &[ParserRecord] {
        &self.records
    }

    pub fn id_of(&self, name: &str) -> Option<i64> {
        self.records.iter().find(|r| r.name == name).map(|r| r.id)
    }

    /// Creates the record for `name` or updates its code, then saves.
    pub fn upsert(&mut self, name: &str, code: &str) -> Result<i64, TransportError> {
        let stamp = now();
        let id = match self.records.iter_mut().find(|r| r.name == name) {
            Some(record) => {
                record.code = code.to_string();
                record.updated_at = stamp;
                record.id
            }
            None => {
                let id = self.records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
                self.records.push(ParserRecord {
                    id,
                    name: name.to_string(),
                    code: code.to_string(),
                    created_at: stamp.clone(),
                    updated_at: stamp,
                });
                id
            }
        };
        self.save()?;
        Ok(id)
    }

    pub fn delete(&mut self, id: i64) -> Result<ParserRecord, TransportError> {
        let idx = self
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or(TransportError::UnknownParserId(id))?;
        let record = self.records.remove(idx);
        self.save()?;
        Ok(record)
    }

    fn save(&self) -> Result<(), TransportError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let write_err = |source| TransportError::Write {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let text = serde_json::to_string_pretty(&self.records).map_err(|source| {
            TransportError::Decode {
                origin: path.display().to_string(),
                source,
            }
        })?;
        fs::write(path, text).map_err(write_err)?;
        tracing::debug!(path = %path.display(), count = self.records.len(), "parser store saved");
        Ok(())
    }
}
