//! Scripture reference ranges.
//!
//! References use OSIS book ids (`Gen`, `1Cor`, `Rev`, ...) with dotted
//! chapter and verse numbers. Each endpoint maps to a sortable ordinal
//! `book × 1 000 000 + chapter × 1 000 + verse`, so overlap queries reduce to
//! integer comparisons.
//!
//! Accepted forms:
//!
//! | form | meaning |
//! |---|---|
//! | `Gen.1.1` | one verse |
//! | `Gen.1` | a whole chapter (verses 0..=999) |
//! | `Gen.1.1-Gen.1.5` | explicit range, books may differ |
//! | `Gen.1.1-5` | verse range within one chapter |
//! | `Gen.1.1-2.4` | range across chapters of one book |
//! | `Gen.1-3` | whole chapters 1 through 3 |
//!
//! # Example
//!
//! ```
//! use schema_boot_seed::{VerseRange, parse_range};
//!
//! let range = parse_range("Gen.1.1-5").unwrap();
//! assert_eq!(range, VerseRange { start: 1_001_001, end: 1_001_005 });
//! assert!(parse_range("Nope.1.1").is_none());
//! ```

use std::sync::LazyLock;

use regex::Regex;

/// OSIS book ids in canonical order. A book's number is its index plus one.
pub const BOOKS: [&str; 66] = [
    "Gen", "Exod", "Lev", "Num", "Deut", "Josh", "Judg", "Ruth", "1Sam", "2Sam", "1Kgs", "2Kgs",
    "1Chr", "2Chr", "Ezra", "Neh", "Esth", "Job", "Ps", "Prov", "Eccl", "Song", "Isa", "Jer",
    "Lam", "Ezek", "Dan", "Hos", "Joel", "Amos", "Obad", "Jonah", "Mic", "Nah", "Hab", "Zeph",
    "Hag", "Zech", "Mal", "Matt", "Mark", "Luke", "John", "Acts", "Rom", "1Cor", "2Cor", "Gal",
    "Eph", "Phil", "Col", "1Thess", "2Thess", "1Tim", "2Tim", "Titus", "Phlm", "Heb", "Jas",
    "1Pet", "2Pet", "1John", "2John", "3John", "Jude", "Rev",
];

const LAST_VERSE: i64 = 999;

static POINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([1-3]?[A-Za-z]+)\.(\d{1,3})(?:\.(\d{1,3}))?$")
        .expect("static regex must compile")
});

static SHORT_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3})(?:\.(\d{1,3}))?$").expect("static regex must compile")
});

/// Inclusive ordinal bounds of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerseRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Copy)]
struct Point {
    book: i64,
    chapter: i64,
    verse: Option<i64>,
}

impl Point {
    fn first(self) -> i64 {
        ordinal(self.book, self.chapter, self.verse.unwrap_or(0))
    }

    fn last(self) -> i64 {
        ordinal(self.book, self.chapter, self.verse.unwrap_or(LAST_VERSE))
    }
}

/// Returns the 1-based number of an OSIS book id, ignoring case.
pub fn book_number(id: &str) -> Option<i64> {
    BOOKS
        .iter()
        .position(|book| book.eq_ignore_ascii_case(id))
        .map(|index| index as i64 + 1)
}

/// Computes the sortable ordinal for one verse.
pub fn ordinal(book: i64, chapter: i64, verse: i64) -> i64 {
    book * 1_000_000 + chapter * 1_000 + verse
}

fn parse_point(text: &str) -> Option<Point> {
    let caps = POINT_RE.captures(text)?;
    let book = book_number(&caps[1])?;
    let chapter: i64 = caps[2].parse().ok()?;
    if chapter == 0 {
        return None;
    }
    let verse = match caps.get(3) {
        Some(m) => Some(m.as_str().parse().ok()?),
        None => None,
    };
    Some(Point {
        book,
        chapter,
        verse,
    })
}

/// Parses the right-hand side of a range relative to its start point.
fn parse_end(start: Point, text: &str) -> Option<Point> {
    if let Some(point) = parse_point(text) {
        return Some(point);
    }
    let caps = SHORT_END_RE.captures(text)?;
    let first: i64 = caps[1].parse().ok()?;
    let second = match caps.get(2) {
        Some(m) => Some(m.as_str().parse::<i64>().ok()?),
        None => None,
    };

    let point = match (start.verse, second) {
        // Gen.1.1-2.4
        (_, Some(verse)) => Point {
            chapter: first,
            verse: Some(verse),
            ..start
        },
        // Gen.1.1-5
        (Some(_), None) => Point {
            verse: Some(first),
            ..start
        },
        // Gen.1-3
        (None, None) => Point {
            chapter: first,
            verse: None,
            ..start
        },
    };
    (point.chapter > 0).then_some(point)
}

/// Parses a reference into ordinal bounds, or `None` when it is not a
/// recognizable reference.
pub fn parse_range(text: &str) -> Option<VerseRange> {
    let text = text.trim();
    let (left, right) = match text.split_once('-') {
        Some((left, right)) => (left.trim(), Some(right.trim())),
        None => (text, None),
    };

    let start = parse_point(left)?;
    let end = match right {
        Some(right) => parse_end(start, right)?,
        None => start,
    };

    let (a, b) = (start.first(), end.last());
    Some(VerseRange {
        start: a.min(b),
        end: a.max(b),
    })
}
