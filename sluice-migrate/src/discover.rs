//! Migration file discovery and sequence sorting.
//!
//! Migration scripts are named `<design>_<NNNNN>.lua` with a 1–6 digit
//! sequence number. Discovery returns files sorted ascending by sequence;
//! an empty or failed discovery is a hard failure for that database's run.

use sluice_core::errors::MigrationError;

use crate::source::{MigrationSource, PayloadStore};

/// One discovered migration script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Payload key or filesystem path, usable with `read_migration_file`.
    pub path: String,
    pub sequence: u64,
}

/// Parse the sequence number out of `<design>_<NNNNN>.lua`. Returns None
/// for names that do not match the pattern.
pub fn parse_sequence(file_name: &str, design: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(design)?.strip_prefix('_')?;
    let digits = rest.strip_suffix(".lua")?;
    if digits.is_empty() || digits.len() > 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Discover migration files for a source, sorted ascending by sequence.
pub fn discover(
    source: &MigrationSource,
    store: &PayloadStore,
) -> Result<Vec<MigrationFile>, MigrationError> {
    let design = source.design_name()?;
    let mut files = match source {
        MigrationSource::Payload(name) => {
            let expected_prefix = format!("{name}/{name}_");
            store
                .files_by_prefix(name)
                .into_iter()
                .filter(|f| f.name.starts_with(&expected_prefix))
                .filter_map(|f| {
                    let base = f.name.rsplit('/').next().unwrap_or(&f.name);
                    parse_sequence(base, &design).map(|sequence| MigrationFile {
                        path: f.name.clone(),
                        sequence,
                    })
                })
                .collect::<Vec<_>>()
        }
        MigrationSource::Directory(dir) => {
            let entries = std::fs::read_dir(dir).map_err(|e| MigrationError::Discovery {
                message: format!("cannot open migration directory '{}': {e}", dir.display()),
            })?;
            let mut found = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| MigrationError::Discovery {
                    message: e.to_string(),
                })?;
                let file_name = entry.file_name().to_string_lossy().into_owned();
                if let Some(sequence) = parse_sequence(&file_name, &design) {
                    found.push(MigrationFile {
                        path: dir.join(&file_name).to_string_lossy().into_owned(),
                        sequence,
                    });
                }
            }
            found
        }
    };

    if files.is_empty() {
        return Err(MigrationError::Discovery {
            message: format!("no migration files found for design '{design}'"),
        });
    }
    // Sequence numbers are expected unique, so no stability concern.
    files.sort_by_key(|f| f.sequence);
    Ok(files)
}

/// Key/path of the shared schema module (`database.lua`) for a source.
pub fn database_module_path(source: &MigrationSource) -> Result<String, MigrationError> {
    match source {
        MigrationSource::Payload(name) => Ok(format!("{name}/database.lua")),
        MigrationSource::Directory(dir) => {
            Ok(dir.join("database.lua").to_string_lossy().into_owned())
        }
    }
}

/// Fetch one discovered file's content from its source.
pub fn read_migration_file(
    source: &MigrationSource,
    store: &PayloadStore,
    path: &str,
) -> Result<Vec<u8>, MigrationError> {
    match source {
        MigrationSource::Payload(_) => {
            store
                .get(path)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| MigrationError::Discovery {
                    message: format!("payload file '{path}' disappeared from the store"),
                })
        }
        MigrationSource::Directory(_) => {
            std::fs::read(path).map_err(|e| MigrationError::Discovery {
                message: format!("cannot read '{path}': {e}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_parsing() {
        assert_eq!(parse_sequence("app_01000.lua", "app"), Some(1000));
        assert_eq!(parse_sequence("app_1.lua", "app"), Some(1));
        assert_eq!(parse_sequence("app_123456.lua", "app"), Some(123456));
        // Too many digits, wrong design, wrong extension, no digits.
        assert_eq!(parse_sequence("app_1234567.lua", "app"), None);
        assert_eq!(parse_sequence("other_01000.lua", "app"), None);
        assert_eq!(parse_sequence("app_01000.sql", "app"), None);
        assert_eq!(parse_sequence("app_.lua", "app"), None);
        assert_eq!(parse_sequence("app_10a0.lua", "app"), None);
    }

    #[test]
    fn payload_discovery_sorts_by_sequence() {
        let mut store = PayloadStore::new();
        store.insert("app/app_01002.lua", "b");
        store.insert("app/app_01000.lua", "a");
        store.insert("app/app_01001.lua", "c");
        store.insert("app/database.lua", "schema");
        store.insert("app/README.md", "docs");

        let source = MigrationSource::parse("PAYLOAD:app").unwrap();
        let files = discover(&source, &store).unwrap();
        let sequences: Vec<u64> = files.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![1000, 1001, 1002]);
        assert_eq!(files[0].path, "app/app_01000.lua");
    }

    #[test]
    fn empty_discovery_is_a_hard_failure() {
        let store = PayloadStore::new();
        let source = MigrationSource::parse("PAYLOAD:app").unwrap();
        assert!(matches!(
            discover(&source, &store),
            Err(MigrationError::Discovery { .. })
        ));
    }

    #[test]
    fn directory_discovery_reads_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let design_dir = dir.path().join("app");
        std::fs::create_dir(&design_dir).unwrap();
        std::fs::write(design_dir.join("app_01001.lua"), "one").unwrap();
        std::fs::write(design_dir.join("app_01000.lua"), "zero").unwrap();
        std::fs::write(design_dir.join("database.lua"), "schema").unwrap();
        std::fs::write(design_dir.join("notes.txt"), "skip").unwrap();

        let source = MigrationSource::parse(&design_dir.to_string_lossy()).unwrap();
        let files = discover(&source, &PayloadStore::new()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].sequence, 1000);
        let content = read_migration_file(&source, &PayloadStore::new(), &files[0].path).unwrap();
        assert_eq!(content, b"zero");
    }
}
