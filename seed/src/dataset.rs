//! Dataset definitions and record derivation.
//!
//! A [`DatasetSpec`] ties a set of seed files to one table: which seed
//! fields map to which columns, which of them form the natural key, and which
//! columns are computed from scripture references. [`DatasetSpec::derive`]
//! turns one [`SeedEntry`] into a [`SeedRecord`] whose id is a name-based
//! UUID of the normalized key, so the same entry always lands on the same row.
//!
//! # Example
//!
//! ```
//! use schema_boot_seed::{SeedEntry, cross_references};
//!
//! let dataset = cross_references();
//! let entry = SeedEntry::from_value(
//!     serde_json::json!({"a": "Gen.1.1", "b": "Gen.1.2", "source": "t", "weight": 1.0}),
//!     "inline",
//! )
//! .unwrap();
//!
//! let record = dataset.derive(&entry).unwrap();
//! assert_eq!(record.key, "gen.1.1|gen.1.2|t|neutral");
//! ```

use serde_json::Value;
use uuid::Uuid;

use schema_boot_core::{ColumnDef, ColumnType, SqlValue, TableDef};

use crate::error::{Result, SeedError};
use crate::reference::parse_range;
use crate::source::SeedEntry;

pub const CROSS_REFERENCES_NAMESPACE: Uuid = Uuid::from_u128(0x3c5e_91a2_6b1f_4d0e_9a47_1f2b_8c6d_0e01);
pub const PARALLEL_PASSAGES_NAMESPACE: Uuid = Uuid::from_u128(0x3c5e_91a2_6b1f_4d0e_9a47_1f2b_8c6d_0e02);
pub const PLACES_NAMESPACE: Uuid = Uuid::from_u128(0x3c5e_91a2_6b1f_4d0e_9a47_1f2b_8c6d_0e03);

/// Separator between normalized key parts.
pub const KEY_SEPARATOR: &str = "|";

/// How a seed value is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Real,
    Integer,
    /// Any JSON value, stored as its serialized text.
    Json,
}

impl FieldKind {
    fn column_type(self) -> ColumnType {
        match self {
            FieldKind::Text | FieldKind::Json => ColumnType::Text,
            FieldKind::Real => ColumnType::Real,
            FieldKind::Integer => ColumnType::Integer,
        }
    }
}

/// Mapping of one seed field to one column.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub field: String,
    pub column: String,
    pub kind: FieldKind,
    pub default: Option<Value>,
    pub required: bool,
}

impl FieldSpec {
    pub fn new(field: &str, column: &str, kind: FieldKind) -> Self {
        Self {
            field: field.to_string(),
            column: column.to_string(),
            kind,
            default: None,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    fn column_def(&self) -> ColumnDef {
        let mut column = ColumnDef::new(&self.column, self.kind.column_type());
        if self.required || self.default.is_some() {
            column = column.not_null();
        }
        if let Some(default) = &self.default {
            column = column.default_sql(default_literal(default));
        }
        column
    }
}

fn default_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Number(n) if n.is_f64() => {
            let f = n.as_f64().unwrap_or_default();
            if f.fract() == 0.0 {
                format!("{f:.1}")
            } else {
                f.to_string()
            }
        }
        Value::Number(n) => n.to_string(),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// A pair of ordinal columns computed from a reference field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpec {
    pub field: String,
    pub start_column: String,
    pub end_column: String,
}

impl RangeSpec {
    pub fn new(field: &str, start_column: &str, end_column: &str) -> Self {
        Self {
            field: field.to_string(),
            start_column: start_column.to_string(),
            end_column: end_column.to_string(),
        }
    }
}

/// Declarative description of one reference dataset.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub name: String,
    pub table: TableDef,
    pub namespace: Uuid,
    /// Seed file names, relative to the seed root, merged in this order.
    pub files: Vec<String>,
    /// Seed field that receives the map key when a file is a map of entries.
    pub map_key_field: Option<String>,
    /// Seed fields forming the natural key, in order.
    pub key: Vec<String>,
    pub fields: Vec<FieldSpec>,
    pub ranges: Vec<RangeSpec>,
}

/// A record ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedRecord {
    pub id: String,
    pub key: String,
    /// Column values in [`DatasetSpec::value_columns`] order.
    pub values: Vec<SqlValue>,
}

impl DatasetSpec {
    /// Builds a dataset and its canonical, reseedable table definition.
    pub fn new(
        name: &str,
        namespace: Uuid,
        files: &[&str],
        key: &[&str],
        fields: Vec<FieldSpec>,
        ranges: Vec<RangeSpec>,
    ) -> Self {
        let mut table =
            TableDef::new(name).column(ColumnDef::new("id", ColumnType::Text).primary_key());
        for field in &fields {
            table = table.column(field.column_def());
        }
        for range in &ranges {
            table = table
                .column(ColumnDef::new(&range.start_column, ColumnType::Integer))
                .column(ColumnDef::new(&range.end_column, ColumnType::Integer));
        }
        table = table
            .column(ColumnDef::new("created_at", ColumnType::Text).not_null())
            .column(ColumnDef::new("updated_at", ColumnType::Text).not_null())
            .reseedable();

        Self {
            name: name.to_string(),
            table,
            namespace,
            files: files.iter().map(|f| f.to_string()).collect(),
            map_key_field: None,
            key: key.iter().map(|k| k.to_string()).collect(),
            fields,
            ranges,
        }
    }

    pub fn with_map_key_field(mut self, field: &str) -> Self {
        self.map_key_field = Some(field.to_string());
        self
    }

    /// Columns written from seed data, excluding `id` and the timestamps.
    pub fn value_columns(&self) -> Vec<&str> {
        self.fields
            .iter()
            .map(|f| f.column.as_str())
            .chain(
                self.ranges
                    .iter()
                    .flat_map(|r| [r.start_column.as_str(), r.end_column.as_str()]),
            )
            .collect()
    }

    /// Every column a reconciliation pass touches.
    pub fn required_columns(&self) -> Vec<&str> {
        let mut columns = vec!["id"];
        columns.extend(self.value_columns());
        columns.extend(["created_at", "updated_at"]);
        columns
    }

    /// Derives the persisted record for one entry.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError::InvalidEntry`] when a required field is missing,
    /// a value has the wrong type, or a key part resolves to nothing.
    pub fn derive(&self, entry: &SeedEntry) -> Result<SeedRecord> {
        let mut resolved: Vec<Option<Value>> = Vec::with_capacity(self.fields.len());
        let mut values = Vec::with_capacity(self.fields.len() + self.ranges.len() * 2);

        for spec in &self.fields {
            let value = entry
                .fields
                .get(&spec.field)
                .filter(|v| !v.is_null())
                .cloned()
                .or_else(|| spec.default.clone());
            if value.is_none() && spec.required {
                return Err(invalid(entry, format!("missing required field '{}'", spec.field)));
            }
            values.push(match &value {
                Some(v) => convert(entry, spec, v)?,
                None => SqlValue::Null,
            });
            resolved.push(value);
        }

        for range in &self.ranges {
            let bounds = entry
                .fields
                .get(&range.field)
                .and_then(Value::as_str)
                .and_then(parse_range);
            values.push(bounds.map(|b| b.start).into());
            values.push(bounds.map(|b| b.end).into());
        }

        let mut parts = Vec::with_capacity(self.key.len());
        for key_field in &self.key {
            let part = self
                .fields
                .iter()
                .position(|f| &f.field == key_field)
                .and_then(|index| resolved[index].as_ref())
                .and_then(key_part)
                .ok_or_else(|| invalid(entry, format!("key field '{key_field}' is empty")))?;
            parts.push(part);
        }
        let key = parts.join(KEY_SEPARATOR);
        let id = Uuid::new_v5(&self.namespace, key.as_bytes()).to_string();

        Ok(SeedRecord { id, key, values })
    }
}

fn invalid(entry: &SeedEntry, reason: String) -> SeedError {
    SeedError::InvalidEntry {
        origin: entry.origin.clone(),
        reason,
    }
}

fn key_part(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_lowercase(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn convert(entry: &SeedEntry, spec: &FieldSpec, value: &Value) -> Result<SqlValue> {
    let converted = match spec.kind {
        FieldKind::Text => value.as_str().map(|s| SqlValue::Text(s.trim().to_string())),
        FieldKind::Real => value.as_f64().map(SqlValue::Real),
        FieldKind::Integer => value.as_i64().map(SqlValue::Integer),
        FieldKind::Json => Some(SqlValue::Text(value.to_string())),
    };
    converted.ok_or_else(|| {
        invalid(
            entry,
            format!("field '{}' expected {:?}, got {value}", spec.field, spec.kind),
        )
    })
}

/// Cross references between two passages, weighted and attributed.
pub fn cross_references() -> DatasetSpec {
    DatasetSpec::new(
        "cross_references",
        CROSS_REFERENCES_NAMESPACE,
        &["cross_references.json", "cross_references.yaml"],
        &["a", "b", "source", "perspective"],
        vec![
            FieldSpec::new("a", "from_ref", FieldKind::Text).required(),
            FieldSpec::new("b", "to_ref", FieldKind::Text).required(),
            FieldSpec::new("source", "source", FieldKind::Text).required(),
            FieldSpec::new("weight", "weight", FieldKind::Real).with_default(1.0),
            FieldSpec::new("perspective", "perspective", FieldKind::Text).with_default("neutral"),
        ],
        vec![
            RangeSpec::new("a", "from_start", "from_end"),
            RangeSpec::new("b", "to_start", "to_end"),
        ],
    )
}

/// Passages that tell the same event, such as synoptic parallels.
pub fn parallel_passages() -> DatasetSpec {
    DatasetSpec::new(
        "parallel_passages",
        PARALLEL_PASSAGES_NAMESPACE,
        &["parallel_passages.json", "parallel_passages.yaml"],
        &["passage", "parallel", "relation", "source"],
        vec![
            FieldSpec::new("passage", "passage_ref", FieldKind::Text).required(),
            FieldSpec::new("parallel", "parallel_ref", FieldKind::Text).required(),
            FieldSpec::new("relation", "relation", FieldKind::Text).with_default("parallel"),
            FieldSpec::new("source", "source", FieldKind::Text).required(),
            FieldSpec::new("note", "note", FieldKind::Text),
        ],
        vec![
            RangeSpec::new("passage", "passage_start", "passage_end"),
            RangeSpec::new("parallel", "parallel_start", "parallel_end"),
        ],
    )
}

/// Gazetteer of places, usually keyed by name in YAML.
pub fn places() -> DatasetSpec {
    DatasetSpec::new(
        "places",
        PLACES_NAMESPACE,
        &["places.yaml", "places.json"],
        &["name", "kind"],
        vec![
            FieldSpec::new("name", "name", FieldKind::Text).required(),
            FieldSpec::new("kind", "kind", FieldKind::Text).with_default("settlement"),
            FieldSpec::new("latitude", "latitude", FieldKind::Real),
            FieldSpec::new("longitude", "longitude", FieldKind::Real),
            FieldSpec::new("references", "scripture_refs", FieldKind::Json),
        ],
        Vec::new(),
    )
    .with_map_key_field("name")
}

/// The bundled datasets in reconciliation order.
pub fn builtin_datasets() -> Vec<DatasetSpec> {
    vec![cross_references(), parallel_passages(), places()]
}

/// Looks up a bundled dataset by name.
pub fn builtin_dataset(name: &str) -> Option<DatasetSpec> {
    builtin_datasets().into_iter().find(|d| d.name == name)
}
