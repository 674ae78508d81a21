use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::enums::{DriverType, ScanKind};
use crate::query_ast::errors::SlqError;

static HANDLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A@[a-zA-Z][a-zA-Z0-9_]*\z").expect("valid handle regex"));

/// Returns an error if `handle` is not an acceptable source handle, e.g. `@my_db1`.
pub fn check_handle(handle: &str) -> Result<(), SlqError> {
    if HANDLE_PATTERN.is_match(handle) {
        Ok(())
    } else {
        Err(SlqError::Structure(format!(
            "invalid data source handle {:?}: must begin with @, followed by a letter, \
             followed by zero or more letters, digits, or underscores, e.g. \"@my_db1\"",
            handle
        )))
    }
}

/// A data source: something a driver can open and query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub handle: String,
    pub location: String,
    #[serde(rename = "type")]
    pub driver: DriverType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl Source {
    pub fn new(handle: impl Into<String>, location: impl Into<String>, driver: DriverType) -> Self {
        Self {
            handle: handle.into(),
            location: location.into(),
            driver,
            options: BTreeMap::new(),
        }
    }

    /// Like [`Source::new`], but infers the driver from the location.
    pub fn from_location(handle: impl Into<String>, location: impl Into<String>) -> Result<Self, SlqError> {
        let handle = handle.into();
        let location = location.into();
        check_handle(&handle)?;
        let driver = DriverType::from_location(&location).ok_or_else(|| {
            SlqError::Structure(format!("unable to determine driver for source {}: {}", handle, location))
        })?;
        Ok(Self::new(handle, location, driver))
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.handle, self.location)
    }
}

/// The set of configured sources. Read-only from the engine's point of view.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
    #[serde(default)]
    pub items: Vec<Source>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, src: Source) -> Result<(), SlqError> {
        check_handle(&src.handle)?;
        if self.index_of(&src.handle).is_some() {
            return Err(SlqError::Structure(format!(
                "data source {:?} already exists",
                src.handle
            )));
        }
        self.items.push(src);
        Ok(())
    }

    fn index_of(&self, handle: &str) -> Option<usize> {
        self.items.iter().position(|s| s.handle == handle)
    }

    /// Looks up a source by handle; the leading `@` is optional.
    pub fn get(&self, handle: &str) -> Result<&Source, SlqError> {
        let canonical = canonical_handle(handle);
        debug!("looking up data source {:?}", canonical);
        self.index_of(&canonical)
            .map(|i| &self.items[i])
            .ok_or_else(|| unknown_source(&canonical))
    }

    pub fn active(&self) -> Option<&Source> {
        let handle = self.active.as_deref()?;
        self.index_of(handle).map(|i| &self.items[i])
    }

    pub fn set_active(&mut self, handle: &str) -> Result<&Source, SlqError> {
        let canonical = canonical_handle(handle);
        let i = self.index_of(&canonical).ok_or_else(|| unknown_source(&canonical))?;
        self.active = Some(canonical);
        Ok(&self.items[i])
    }

    pub fn remove(&mut self, handle: &str) -> Result<Source, SlqError> {
        let canonical = canonical_handle(handle);
        let i = self.index_of(&canonical).ok_or_else(|| unknown_source(&canonical))?;
        if self.active.as_deref() == Some(canonical.as_str()) {
            self.active = None;
        }
        Ok(self.items.remove(i))
    }
}

fn canonical_handle(handle: &str) -> String {
    if handle.starts_with('@') {
        handle.to_string()
    } else {
        format!("@{}", handle)
    }
}

fn unknown_source(handle: &str) -> SlqError {
    SlqError::Structure(format!("unknown data source {:?}", handle))
}

/// A single scanned cell. NULL is kept distinct from every typed value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The kind this value was scanned as; NULL reports [`ScanKind::Null`].
    pub fn kind(&self) -> ScanKind {
        match self {
            Value::Null => ScanKind::Null,
            Value::Int(_) => ScanKind::Int,
            Value::Float(_) => ScanKind::Float,
            Value::Bool(_) => ScanKind::Bool,
            Value::Text(_) => ScanKind::Text,
            Value::Bytes(_) => ScanKind::Bytes,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
            Value::Bytes(v) => f.write_str(&hex::encode(v)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Alias used in output when the same name appears more than once (e.g. `uid_1`).
    pub aliased_name: String,
    pub kind: ScanKind,
}

/// One result row. `values` is aligned 1:1 with `fields`.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub fields: Arc<[ColumnDescriptor]>,
    pub values: Vec<Value>,
}

impl Record {
    /// Returns the value for a column name or alias.
    pub fn named_value(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .position(|f| f.aliased_name == name || f.name == name)
            .map(|i| &self.values[i])
    }
}

/// Buffered result of running one statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryRows {
    pub fields: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn into_records(self) -> Vec<Record> {
        let fields: Arc<[ColumnDescriptor]> = self.fields.into();
        self.rows
            .into_iter()
            .map(|values| Record { fields: Arc::clone(&fields), values })
            .collect()
    }
}

/// Builds descriptors for `names`, aliasing repeated names as `name_1`, `name_2`, ...
pub fn column_descriptors(names: &[String], kinds: &[ScanKind]) -> Vec<ColumnDescriptor> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    names
        .iter()
        .zip(kinds)
        .map(|(name, kind)| {
            let count = seen.entry(name.as_str()).or_insert(0);
            let aliased_name = if *count == 0 {
                name.clone()
            } else {
                format!("{}_{}", name, count)
            };
            *count += 1;
            ColumnDescriptor { name: name.clone(), aliased_name, kind: *kind }
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub position: usize,
    pub data_type: String,
    pub kind: ScanKind,
    pub nullable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableMetadata {
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceMetadata {
    pub handle: String,
    pub location: String,
    pub driver: DriverType,
    pub name: String,
    pub tables: Vec<TableMetadata>,
}
