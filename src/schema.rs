//! Ordered column schemas.
//!
//! A [Schema] is immutable: every mutation-like operation returns a new
//! value. Column ids are unique within a schema; an id→index map is cached
//! at construction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::types::ColumnType;

/// Per-column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub display_name: String,
    pub column_type: ColumnType,
    /// Opaque summary statistics, carried through but never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
}

impl ColumnMetadata {
    pub fn new(display_name: impl Into<String>, column_type: ColumnType) -> ColumnMetadata {
        ColumnMetadata {
            display_name: display_name.into(),
            column_type,
            stats: None,
        }
    }
}

/// Deserialization goes through [crate::json], which rebuilds the cached
/// index; hence no derived `Deserialize` here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub dialect: Dialect,
    columns: Vec<String>,
    column_metadata: HashMap<String, ColumnMetadata>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.dialect == other.dialect
            && self.columns == other.columns
            && self.column_metadata == other.column_metadata
    }
}

impl Schema {
    pub fn new(
        dialect: Dialect,
        columns: Vec<(String, ColumnMetadata)>,
    ) -> Result<Schema> {
        let mut ids = Vec::with_capacity(columns.len());
        let mut metadata = HashMap::with_capacity(columns.len());
        for (id, meta) in columns {
            if metadata.insert(id.clone(), meta).is_some() {
                return Err(Error::DuplicateColumn(id));
            }
            ids.push(id);
        }
        let index = build_index(&ids);
        Ok(Schema {
            dialect,
            columns: ids,
            column_metadata: metadata,
            index,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn column_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn column_metadata(&self, id: &str) -> Option<&ColumnMetadata> {
        self.column_metadata.get(id)
    }

    pub fn column_type(&self, id: &str) -> Option<&ColumnType> {
        self.column_metadata.get(id).map(|m| &m.column_type)
    }

    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.column_metadata
            .get(id)
            .map(|m| m.display_name.as_str())
            .unwrap_or(id)
    }

    /// Column ids ordered by display name; useful for pickers.
    pub fn sorted_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = self.columns.iter().map(|s| s.as_str()).collect();
        cols.sort_by_key(|c| self.display_name(c));
        cols
    }

    /// New schema with one column appended.
    pub fn extend(&self, id: impl Into<String>, meta: ColumnMetadata) -> Result<Schema> {
        let id = id.into();
        if self.contains(&id) {
            return Err(Error::DuplicateColumn(id));
        }
        let mut columns = self.columns.clone();
        columns.push(id.clone());
        let mut column_metadata = self.column_metadata.clone();
        column_metadata.insert(id, meta);
        let index = build_index(&columns);
        Ok(Schema {
            dialect: self.dialect,
            columns,
            column_metadata,
            index,
        })
    }

    /// Verify that `other` lines up with `self` column-for-column.
    ///
    /// `concat` does not call this; execution layers that want the check may.
    pub fn check_compat(&self, other: &Schema) -> Result<()> {
        let mismatch = |reason: String| Error::SchemaMismatch {
            reason,
            left: Box::new(self.clone()),
            right: Box::new(other.clone()),
        };
        if self.columns.len() != other.columns.len() {
            return Err(mismatch(format!(
                "column count {} vs {}",
                self.columns.len(),
                other.columns.len()
            )));
        }
        for (a, b) in self.columns.iter().zip(other.columns.iter()) {
            if a != b {
                return Err(mismatch(format!("column id \"{a}\" vs \"{b}\"")));
            }
            if self.column_type(a) != other.column_type(b) {
                return Err(mismatch(format!("column \"{a}\" differs in type")));
            }
        }
        Ok(())
    }
}

fn build_index(columns: &[String]) -> HashMap<String, usize> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.clone(), i))
        .collect()
}
