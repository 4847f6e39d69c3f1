//! Driver error classification.
//!
//! Drivers report schema drift and lock contention only through message
//! text, and every dialect words it differently. All of that string matching
//! lives here; the rest of the engine branches on [`ErrorClass`].

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::store::StoreError;

/// What kind of failure a store error represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Anything not recognized below. Treated as fatal by the executor.
    Unrecognized,
    /// A referenced column does not exist. The table is absent when the
    /// driver message does not name it.
    MissingColumn {
        table: Option<String>,
        column: String,
    },
    /// A referenced table does not exist.
    MissingTable { table: String },
    /// The store's write lock is held by someone else.
    LockContention,
}

enum Signature {
    Column,
    Table,
}

/// Identifier, optionally wrapped in `"`, `'`, `` ` `` or `[]`.
const Q: &str = r#"["'`\[]?"#;
const QE: &str = r#"["'`\]]?"#;

static SIGNATURES: LazyLock<Vec<(Regex, Signature)>> = LazyLock::new(|| {
    let column_patterns = [
        // SQLite INSERT/UPDATE against a missing column.
        format!(r"table {Q}(?P<table>\w+){QE} has no column named {Q}(?P<column>\w+){QE}"),
        // PostgreSQL ALTER/INSERT wording.
        format!(r"column {Q}(?P<column>\w+){QE} of relation {Q}(?P<table>\w+){QE} does not exist"),
        format!(r"no such column: {Q}(?P<table>\w+){QE}\.{Q}(?P<column>\w+){QE}"),
        format!(r"column {Q}(?P<table>\w+){QE}\.{Q}(?P<column>\w+){QE} does not exist"),
        // MySQL.
        format!(r"unknown column '(?:(?P<table>\w+)\.)?(?P<column>\w+)'"),
        format!(r"no such column: {Q}(?P<column>\w+){QE}"),
        format!(r"column {Q}(?P<column>\w+){QE} does not exist"),
    ];
    let table_patterns = [
        format!(r"no such table: (?:\w+\.)?{Q}(?P<table>\w+){QE}"),
        format!(r"relation {Q}(?:\w+\.)?(?P<table>\w+){QE} does not exist"),
        format!(r"table '(?:\w+\.)?(?P<table>\w+)' doesn't exist"),
    ];

    column_patterns
        .iter()
        .map(|p| (p.as_str(), Signature::Column))
        .chain(table_patterns.iter().map(|p| (p.as_str(), Signature::Table)))
        .map(|(pattern, kind)| {
            let re = Regex::new(&format!("(?i){pattern}")).expect("static regex must compile");
            (re, kind)
        })
        .collect()
});

static LOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(database is locked|database table is locked|database is busy|sqlite_busy|sqlite_locked)")
        .expect("static regex must compile")
});

static DUPLICATE_COLUMN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(duplicate column name|column .+ already exists)")
        .expect("static regex must compile")
});

static TARGET_TABLE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"\balter\s+table\s+(?:if\s+exists\s+)?(?:only\s+)?(?:\w+\.)?{Q}(\w+){QE}"),
        format!(r"\binsert\s+(?:or\s+\w+\s+)?into\s+(?:\w+\.)?{Q}(\w+){QE}"),
        format!(r"\bupdate\s+(?:or\s+\w+\s+)?(?:\w+\.)?{Q}(\w+){QE}\s+set\b"),
        format!(r"\bon\s+(?:\w+\.)?{Q}(\w+){QE}\s*\("),
        format!(r"\bdelete\s+from\s+(?:\w+\.)?{Q}(\w+){QE}"),
        format!(r"\bfrom\s+(?:\w+\.)?{Q}(\w+){QE}"),
    ]
    .iter()
    .map(|pattern| Regex::new(&format!("(?is){pattern}")).expect("static regex must compile"))
    .collect()
});

fn capture(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name).map(|m| m.as_str().to_string())
}

/// Classifies a store error into an [`ErrorClass`].
///
/// # Examples
///
/// ```
/// use schema_boot_core::{ErrorClass, StoreError, classify_error};
///
/// let err = StoreError::Statement("table places has no column named kind".into());
/// assert_eq!(
///     classify_error(&err),
///     ErrorClass::MissingColumn { table: Some("places".into()), column: "kind".into() }
/// );
/// ```
pub fn classify_error(err: &StoreError) -> ErrorClass {
    if matches!(err, StoreError::Busy(_)) {
        return ErrorClass::LockContention;
    }
    classify_message(err.message())
}

/// Classifies raw driver message text.
pub fn classify_message(message: &str) -> ErrorClass {
    if LOCK_RE.is_match(message) {
        return ErrorClass::LockContention;
    }

    for (re, kind) in SIGNATURES.iter() {
        let Some(caps) = re.captures(message) else {
            continue;
        };
        match kind {
            Signature::Column => {
                if let Some(column) = capture(&caps, "column") {
                    return ErrorClass::MissingColumn {
                        table: capture(&caps, "table"),
                        column,
                    };
                }
            }
            Signature::Table => {
                if let Some(table) = capture(&caps, "table") {
                    return ErrorClass::MissingTable { table };
                }
            }
        }
    }

    ErrorClass::Unrecognized
}

/// Returns true when an `ADD COLUMN` failed only because the column is
/// already there.
pub fn is_duplicate_column(err: &StoreError) -> bool {
    DUPLICATE_COLUMN_RE.is_match(err.message())
}

/// Best-effort guess at the table a statement writes to or reads from.
///
/// Used when a driver reports a missing column without naming its table.
pub fn statement_target_table(sql: &str) -> Option<String> {
    TARGET_TABLE_RES
        .iter()
        .find_map(|re| re.captures(sql))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
