//! Splitting multi-statement SQL scripts.
//!
//! A single left-to-right scan tracks quotes, comments and dollar-quoted
//! bodies so that only a top-level `;` ends a statement:
//!
//! - `'...'` and `"..."` with doubled-quote escapes (`''`, `""`)
//! - `-- ...` line comments up to the newline
//! - `/* ... */` block comments
//! - `$tag$ ... $tag$` dollar quotes, where the tag is ASCII alphanumerics
//!   or underscores and may be empty (`$$`)
//!
//! `$1`-style positional parameters never open a dollar quote because a tag
//! cannot start with a digit.
//!
//! # Example
//!
//! ```
//! use schema_boot_core::split_statements;
//!
//! let script = "CREATE TABLE t (note TEXT DEFAULT 'a;b');\n\
//!               -- trailing; comment\n\
//!               INSERT INTO t VALUES ('x')";
//! let statements = split_statements(script);
//! assert_eq!(statements.len(), 2);
//! assert!(statements[1].ends_with("VALUES ('x')"));
//! ```

/// A lexical run produced by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece<'a> {
    /// Code, quoted strings and dollar-quoted bodies, copied verbatim.
    Text(&'a str),
    /// A line or block comment, including its delimiters.
    Comment(&'a str),
    /// A top-level `;`.
    Terminator,
}

fn scan(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i = skip_quoted(bytes, i + 1, quote);
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                push_text(&mut pieces, sql, start, i);
                let end = sql[i..].find('\n').map(|pos| i + pos).unwrap_or(bytes.len());
                pieces.push(Piece::Comment(&sql[i..end]));
                i = end;
                start = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                push_text(&mut pieces, sql, start, i);
                let end = sql[i + 2..]
                    .find("*/")
                    .map(|pos| i + 2 + pos + 2)
                    .unwrap_or(bytes.len());
                pieces.push(Piece::Comment(&sql[i..end]));
                i = end;
                start = end;
            }
            b'$' => match dollar_tag_end(bytes, i) {
                Some(tag_end) => {
                    let tag = &sql[i..=tag_end];
                    let body_start = tag_end + 1;
                    i = sql[body_start..]
                        .find(tag)
                        .map(|pos| body_start + pos + tag.len())
                        .unwrap_or(bytes.len());
                }
                None => i += 1,
            },
            b';' => {
                push_text(&mut pieces, sql, start, i);
                pieces.push(Piece::Terminator);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    push_text(&mut pieces, sql, start, bytes.len());
    pieces
}

fn push_text<'a>(pieces: &mut Vec<Piece<'a>>, sql: &'a str, from: usize, to: usize) {
    if from < to {
        pieces.push(Piece::Text(&sql[from..to]));
    }
}

/// Returns the index just past the closing quote, honoring doubled-quote
/// escapes. An unterminated quote runs to the end of input.
fn skip_quoted(bytes: &[u8], mut i: usize, quote: u8) -> usize {
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// If a dollar-quote tag opens at `start`, returns the index of its closing `$`.
fn dollar_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if bytes.get(j).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
        j += 1;
    }
    (bytes.get(j) == Some(&b'$')).then_some(j)
}

/// Splits a script into individually executable statements.
///
/// Statements are trimmed and keep their comments; empty segments (`;;`) are
/// dropped. A trailing remainder without a final `;` becomes the last
/// statement.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for piece in scan(sql) {
        match piece {
            Piece::Text(text) | Piece::Comment(text) => current.push_str(text),
            Piece::Terminator => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    statements.push(trimmed.to_string());
                }
                current.clear();
            }
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    statements
}

/// Removes comments outside of quoted text, replacing each with a space.
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in scan(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Comment(_) => out.push(' '),
            Piece::Terminator => out.push(';'),
        }
    }
    out
}

/// Returns true when a statement holds nothing but comments and whitespace.
pub fn is_comment_only(sql: &str) -> bool {
    scan(sql).iter().all(|piece| match piece {
        Piece::Text(text) => text.trim().is_empty(),
        Piece::Comment(_) => true,
        Piece::Terminator => false,
    })
}
