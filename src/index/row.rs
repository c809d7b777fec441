// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Rows and column descriptions.

use crate::storage::Value;

use super::IndexError;

/// A table row: column values plus the row id.
///
/// Row id 0 means the primary index has not assigned one yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: i64,
    pub values: Vec<Value>,
}

impl Row {
    /// Creates a row without a row id.
    pub fn new(values: Vec<Value>) -> Self {
        Self { key: 0, values }
    }

    /// Creates a row with the given row id.
    pub fn with_key(key: i64, values: Vec<Value>) -> Self {
        Self { key, values }
    }

    /// Returns the value of column `index`.
    #[inline]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of columns.
    #[inline]
    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    /// Stored form of the row's columns.
    pub(crate) fn to_value(&self) -> Value {
        Value::Array(self.values.clone())
    }

    /// Rebuilds a row from its stored form.
    pub(crate) fn from_stored(index: &str, key: i64, stored: Value) -> Result<Self, IndexError> {
        match stored.into_array() {
            Some(values) => Ok(Self { key, values }),
            None => Err(IndexError::Internal(format!(
                "{index}: row {key} is not stored as an array"
            ))),
        }
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Position of the column in the row.
    pub id: usize,
    pub name: String,
    /// Estimated percentage (0-100) of distinct values.
    pub selectivity: u32,
}

impl Column {
    /// Default selectivity used when nothing better is known.
    pub const DEFAULT_SELECTIVITY: u32 = 50;

    /// Creates a column with default selectivity.
    pub fn new(id: usize, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            selectivity: Self::DEFAULT_SELECTIVITY,
        }
    }

    /// Sets the selectivity, clamped to 0-100.
    pub fn with_selectivity(mut self, selectivity: u32) -> Self {
        self.selectivity = selectivity.min(100);
        self
    }
}
