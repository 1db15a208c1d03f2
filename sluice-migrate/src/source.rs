//! Migration sources: the embedded payload store and filesystem paths.

use std::collections::BTreeMap;
use std::path::PathBuf;

use sluice_core::errors::MigrationError;

/// Where a database's migration scripts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationSource {
    /// Named file set in the virtual payload store.
    Payload(String),
    /// Directory on disk; its basename is the design name.
    Directory(PathBuf),
}

impl MigrationSource {
    /// Parse a config descriptor: `PAYLOAD:<name>` or a directory path.
    /// Empty payload names and empty/root-like paths are rejected.
    pub fn parse(value: &str) -> Result<MigrationSource, MigrationError> {
        if let Some(name) = value.strip_prefix("PAYLOAD:") {
            if name.is_empty() {
                return Err(MigrationError::Config {
                    message: "PAYLOAD source has an empty name".to_string(),
                });
            }
            return Ok(MigrationSource::Payload(name.to_string()));
        }
        if value.is_empty() || value.trim_end_matches('/').is_empty() {
            return Err(MigrationError::Config {
                message: format!("invalid migration path '{value}'"),
            });
        }
        Ok(MigrationSource::Directory(PathBuf::from(value)))
    }

    /// The design name: payload name, or the directory's basename.
    pub fn design_name(&self) -> Result<String, MigrationError> {
        match self {
            MigrationSource::Payload(name) => Ok(name.clone()),
            MigrationSource::Directory(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| MigrationError::Config {
                    message: format!("cannot derive design name from '{}'", path.display()),
                }),
        }
    }
}

/// One file from the payload store.
#[derive(Debug, Clone)]
pub struct PayloadFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// In-memory virtual file set, keyed by slash-separated names like
/// `accounts/accounts_01000.lua`. Iteration order is deterministic.
#[derive(Debug, Default)]
pub struct PayloadStore {
    files: BTreeMap<String, Vec<u8>>,
}

impl PayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), data.into());
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// All files whose name starts with `prefix`.
    pub fn files_by_prefix(&self, prefix: &str) -> Vec<PayloadFile> {
        self.files
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, data)| PayloadFile {
                name: name.clone(),
                data: data.clone(),
            })
            .collect()
    }
}
