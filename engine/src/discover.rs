//! Migration file discovery.

use std::path::Path;

use schema_boot_core::MigrationFile;
use tracing::{debug, warn};

use crate::error::Result;

pub const SCRIPT_EXTENSION: &str = "sql";
pub const PROCEDURAL_EXTENSION: &str = "proc";

/// Lists `.sql` and `.proc` files in `dir`, sorted by file name.
///
/// A missing directory yields no migrations. Other files are ignored.
///
/// # Errors
///
/// Returns [`EngineError::IoError`](crate::EngineError::IoError) if the
/// directory exists but cannot be read, or a script cannot be read.
pub fn discover_migrations(dir: &Path) -> Result<Vec<MigrationFile>> {
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "migrations directory not found");
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let name = name.to_string();
        match path.extension().and_then(|e| e.to_str()) {
            Some(SCRIPT_EXTENSION) => {
                let body = std::fs::read_to_string(&path)?;
                files.push(MigrationFile::script(name, body));
            }
            Some(PROCEDURAL_EXTENSION) => files.push(MigrationFile::procedural(name)),
            _ => debug!(file = %name, "ignoring non-migration file"),
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use schema_boot_core::MigrationKind;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_lexicographic_order_and_kinds() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("0010_later.sql"), "SELECT 10;").unwrap();
        std::fs::write(dir.path().join("0002_second.sql"), "SELECT 2;").unwrap();
        std::fs::write(dir.path().join("0009_refresh_statistics.proc"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "notes").unwrap();

        let files = discover_migrations(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["0002_second.sql", "0009_refresh_statistics.proc", "0010_later.sql"]
        );
        assert_eq!(files[0].body, "SELECT 2;");
        assert_eq!(files[1].kind, MigrationKind::Procedural);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let files = discover_migrations(&dir.path().join("nope")).unwrap();
        assert!(files.is_empty());
    }
}
