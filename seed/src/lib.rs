//! Reference-data seeds for the boot-time schema engine.
//!
//! Reference tables (cross references, parallel passages, places) are owned
//! by declarative seed files rather than by migrations. This crate reads
//! those files and turns each entry into a record with a deterministic id:
//!
//! - [`SeedSource`]: loads raw entries for a dataset ([`FileSeedSource`],
//!   [`StaticSeedSource`]).
//! - [`DatasetSpec`]: field mapping, natural key and canonical table for one
//!   dataset; [`builtin_datasets`] lists the bundled ones.
//! - [`parse_range`]: scripture references to sortable ordinal bounds.
//!
//! # Example
//!
//! ```
//! use schema_boot_seed::*;
//!
//! let source = StaticSeedSource::new().with_document(
//!     "cross_references",
//!     serde_json::json!([{"a": "Gen.1.1", "b": "John.1.1", "source": "tsk"}]),
//! );
//!
//! let dataset = cross_references();
//! let entries = source.load_entries(&dataset).unwrap();
//! let record = dataset.derive(&entries[0]).unwrap();
//! assert_eq!(record.key, "gen.1.1|john.1.1|tsk|neutral");
//! ```

mod dataset;
mod error;
mod reference;
mod source;

pub use dataset::{
    CROSS_REFERENCES_NAMESPACE, DatasetSpec, FieldKind, FieldSpec, KEY_SEPARATOR,
    PARALLEL_PASSAGES_NAMESPACE, PLACES_NAMESPACE, RangeSpec, SeedRecord, builtin_dataset,
    builtin_datasets, cross_references, parallel_passages, places,
};
pub use error::{Result, SeedError};
pub use reference::{BOOKS, VerseRange, book_number, ordinal, parse_range};
pub use source::{FileSeedSource, SeedEntry, SeedSource, StaticSeedSource, normalize_document};
