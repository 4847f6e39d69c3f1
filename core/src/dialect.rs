//! Dialect capability filtering.
//!
//! Some migrations use constructs only the server dialect understands
//! (vector columns, full-text search, GIN indexes, `jsonb`, ...). Rather than
//! letting those fail on the embedded dialect, the executor asks
//! [`should_skip`] first and records the file as skipped.
//!
//! Separately, [`requires_autocommit`] flags statements that cannot run
//! inside a transaction block at all.

use std::sync::LazyLock;

use regex::Regex;

use crate::split::strip_comments;
use crate::types::Dialect;

/// A construct that only some dialects support.
#[derive(Debug)]
pub struct DialectMarker {
    /// Short name used in log output.
    pub name: &'static str,
    pattern: Regex,
    supported_by: &'static [Dialect],
}

impl DialectMarker {
    fn new(name: &'static str, pattern: &str, supported_by: &'static [Dialect]) -> Self {
        let pattern = Regex::new(&format!("(?i){pattern}")).expect("static regex must compile");
        Self {
            name,
            pattern,
            supported_by,
        }
    }

    /// Returns true if the dialect understands this construct.
    pub fn supported_by(&self, dialect: Dialect) -> bool {
        self.supported_by.contains(&dialect)
    }

    fn matches(&self, sql: &str) -> bool {
        self.pattern.is_match(sql)
    }
}

const SERVER_ONLY: &[Dialect] = &[Dialect::Server];

static MARKERS: LazyLock<Vec<DialectMarker>> = LazyLock::new(|| {
    vec![
        DialectMarker::new("vector", r"\bvector\s*\(", SERVER_ONLY),
        DialectMarker::new("tsvector", r"\btsvector\b", SERVER_ONLY),
        DialectMarker::new("tsquery", r"\btsquery\b", SERVER_ONLY),
        DialectMarker::new(
            "full-text function",
            r"\b(to_tsvector|to_tsquery|plainto_tsquery|phraseto_tsquery|websearch_to_tsquery|ts_rank|ts_rank_cd|ts_headline)\s*\(",
            SERVER_ONLY,
        ),
        DialectMarker::new(
            "index method",
            r"\busing\s+(gin|gist|brin|ivfflat|hnsw|spgist)\b",
            SERVER_ONLY,
        ),
        DialectMarker::new("jsonb", r"\bjsonb\b", SERVER_ONLY),
        DialectMarker::new(
            "timestamptz",
            r"(::\s*timestamptz\b|\btimestamptz\b|\btimestamp\s+with\s+time\s+zone\b)",
            SERVER_ONLY,
        ),
        DialectMarker::new("concurrently", r"\bconcurrently\b", SERVER_ONLY),
        DialectMarker::new("extension", r"\bcreate\s+extension\b", SERVER_ONLY),
    ]
});

static AUTOCOMMIT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^\s*create\s+(unique\s+)?index\s+concurrently\b",
        r"^\s*drop\s+index\s+concurrently\b",
        r"^\s*reindex\b.*\bconcurrently\b",
        r"^\s*vacuum\b",
        r"^\s*alter\s+type\b.*\badd\s+value\b",
    ]
    .iter()
    .map(|pattern| Regex::new(&format!("(?is){pattern}")).expect("static regex must compile"))
    .collect()
});

/// Returns the markers in `script` that `dialect` does not support.
///
/// Comments are ignored, so a note such as `-- no jsonb here` does not veto
/// a migration.
pub fn unsupported_markers(script: &str, dialect: Dialect) -> Vec<&'static DialectMarker> {
    let code = strip_comments(script);
    MARKERS
        .iter()
        .filter(|marker| !marker.supported_by(dialect) && marker.matches(&code))
        .collect()
}

/// Returns true when the whole migration must be skipped on `dialect`.
///
/// # Examples
///
/// ```
/// use schema_boot_core::{Dialect, should_skip};
///
/// let script = "CREATE INDEX idx_body ON notes USING gin (to_tsvector('english', body));";
/// assert!(should_skip(script, Dialect::Embedded));
/// assert!(!should_skip(script, Dialect::Server));
/// ```
pub fn should_skip(script: &str, dialect: Dialect) -> bool {
    !unsupported_markers(script, dialect).is_empty()
}

/// Returns true when a single statement cannot run inside a transaction.
pub fn requires_autocommit(sql: &str) -> bool {
    let code = strip_comments(sql);
    AUTOCOMMIT_PATTERNS.iter().any(|pattern| pattern.is_match(&code))
}
