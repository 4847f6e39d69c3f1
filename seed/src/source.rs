//! Where seed entries come from.
//!
//! [`SeedSource`] is the single seam between the reconciler and the outside
//! world. [`FileSeedSource`] reads the dataset's files from a directory on
//! every call; [`StaticSeedSource`] serves documents held in memory.
//!
//! A seed document is either a list of entry objects or a map whose values
//! are entry objects. In the map form the key is injected into the dataset's
//! map-key field (for example a place's `name`) unless the entry already has
//! one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::dataset::DatasetSpec;
use crate::error::{Result, SeedError};

/// One raw entry read from a seed document.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedEntry {
    pub fields: Map<String, Value>,
    /// Where the entry came from, e.g. `places.yaml#Bethel`. Used in logs.
    pub origin: String,
}

impl SeedEntry {
    /// Wraps a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError::InvalidEntry`] if `value` is not an object.
    pub fn from_value(value: Value, origin: impl Into<String>) -> Result<Self> {
        let origin = origin.into();
        match value {
            Value::Object(fields) => Ok(Self { fields, origin }),
            other => Err(SeedError::InvalidEntry {
                origin,
                reason: format!("expected an object, got {other}"),
            }),
        }
    }
}

/// Supplies the raw entries for a dataset.
pub trait SeedSource {
    /// Returns every entry for `dataset`, merged across its files in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a document exists but cannot be read or parsed.
    fn load_entries(&self, dataset: &DatasetSpec) -> Result<Vec<SeedEntry>>;
}

/// Normalizes a parsed document into entries.
///
/// `null` yields no entries. Non-object list items are logged and dropped.
///
/// # Errors
///
/// Returns [`SeedError::InvalidShape`] for scalars, or for a map document
/// when the dataset has no map-key field, or a map value that is not an
/// object.
pub fn normalize_document(
    document: Value,
    map_key_field: Option<&str>,
    origin: &str,
) -> Result<Vec<SeedEntry>> {
    match document {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let item_origin = format!("{origin}#{index}");
                match SeedEntry::from_value(item, item_origin) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(error = %e, "dropping seed entry");
                        None
                    }
                }
            })
            .collect()),
        Value::Object(map) => {
            let Some(key_field) = map_key_field else {
                return Err(shape(origin, "keyed maps are not supported for this dataset"));
            };
            map.into_iter()
                .map(|(key, value)| {
                    let item_origin = format!("{origin}#{key}");
                    let Value::Object(mut fields) = value else {
                        return Err(shape(&item_origin, "map values must be objects"));
                    };
                    fields
                        .entry(key_field.to_string())
                        .or_insert_with(|| Value::String(key.clone()));
                    Ok(SeedEntry {
                        fields,
                        origin: item_origin,
                    })
                })
                .collect()
        }
        other => Err(shape(origin, &format!("expected a list or map, got {other}"))),
    }
}

fn shape(origin: &str, reason: &str) -> SeedError {
    SeedError::InvalidShape {
        origin: origin.to_string(),
        reason: reason.to_string(),
    }
}

/// Reads seed files from a directory. Files are re-read on every call.
#[derive(Debug, Clone)]
pub struct FileSeedSource {
    root: PathBuf,
}

impl FileSeedSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn load_file(&self, path: &Path, map_key_field: Option<&str>) -> Result<Vec<SeedEntry>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "seed file not present");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let document: Value = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_str(&text)?,
            _ => serde_json::from_str(&text)?,
        };
        let origin = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("seed");
        normalize_document(document, map_key_field, origin)
    }
}

impl SeedSource for FileSeedSource {
    fn load_entries(&self, dataset: &DatasetSpec) -> Result<Vec<SeedEntry>> {
        let mut entries = Vec::new();
        for file in &dataset.files {
            let path = self.root.join(file);
            entries.extend(self.load_file(&path, dataset.map_key_field.as_deref())?);
        }
        debug!(dataset = %dataset.name, entries = entries.len(), "loaded seed entries");
        Ok(entries)
    }
}

/// Seed documents held in memory, keyed by dataset name.
///
/// # Examples
///
/// ```
/// use schema_boot_seed::{SeedSource, StaticSeedSource, places};
///
/// let source = StaticSeedSource::new()
///     .with_document("places", serde_json::json!({"Bethel": {"kind": "settlement"}}));
/// let entries = source.load_entries(&places()).unwrap();
/// assert_eq!(entries[0].fields["name"], "Bethel");
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticSeedSource {
    documents: HashMap<String, Vec<Value>>,
}

impl StaticSeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document for `dataset`. Several documents merge in insertion
    /// order.
    pub fn with_document(mut self, dataset: &str, document: Value) -> Self {
        self.push_document(dataset, document);
        self
    }

    pub fn push_document(&mut self, dataset: &str, document: Value) {
        self.documents
            .entry(dataset.to_string())
            .or_default()
            .push(document);
    }

    /// Replaces every document for `dataset`.
    pub fn set_documents(&mut self, dataset: &str, documents: Vec<Value>) {
        self.documents.insert(dataset.to_string(), documents);
    }
}

impl SeedSource for StaticSeedSource {
    fn load_entries(&self, dataset: &DatasetSpec) -> Result<Vec<SeedEntry>> {
        let mut entries = Vec::new();
        for (index, document) in self
            .documents
            .get(&dataset.name)
            .into_iter()
            .flatten()
            .enumerate()
        {
            let origin = format!("{}[{index}]", dataset.name);
            entries.extend(normalize_document(
                document.clone(),
                dataset.map_key_field.as_deref(),
                &origin,
            )?);
        }
        Ok(entries)
    }
}
