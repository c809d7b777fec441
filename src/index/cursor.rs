// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Row cursors returned by index lookups.

use std::sync::Arc;

use crate::storage::Value;
use crate::txn::EntryIter;

use super::{IndexError, Row};

enum Source {
    Entries(EntryIter),
    Single(Option<Row>),
}

/// Forward-only cursor over the rows an index lookup found.
///
/// Rows are produced lazily from the transaction's map view; a cursor is not
/// restartable.
pub struct Cursor {
    index: Arc<str>,
    source: Source,
}

impl Cursor {
    pub(crate) fn entries(index: &str, entries: EntryIter) -> Self {
        Self {
            index: Arc::from(index),
            source: Source::Entries(entries),
        }
    }

    pub(crate) fn single(index: &str, row: Option<Row>) -> Self {
        Self {
            index: Arc::from(index),
            source: Source::Single(row),
        }
    }

    /// Returns an empty cursor.
    pub fn empty(index: &str) -> Self {
        Self::single(index, None)
    }
}

fn decode(index: &str, key: Value, stored: Value) -> Result<Row, IndexError> {
    let key = key
        .to_long()
        .ok_or_else(|| IndexError::Internal(format!("{index}: row id {key} is not an integer")))?;
    Row::from_stored(index, key, stored)
}

impl Iterator for Cursor {
    type Item = Result<Row, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Single(row) => row.take().map(Ok),
            Source::Entries(entries) => {
                let entry = entries.next()?;
                Some(
                    entry
                        .map_err(IndexError::from)
                        .and_then(|(key, stored)| decode(&self.index, key, stored)),
                )
            }
        }
    }
}
