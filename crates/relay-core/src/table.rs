//! In-memory keyed-record storage.
//!
//! Tables are addressed by `(code, scope, table)` and hold records ordered by
//! a `u64` primary key. The store is plain data and cheap enough to clone, so
//! a transaction works against its own copy and the chain swaps it in only
//! when the whole transaction succeeds.

use crate::error::{RelayError, Result};
use crate::name::Name;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// TableId / Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    /// Contract that owns the table.
    pub code: Name,
    pub scope: Name,
    pub table: Name,
}

impl TableId {
    pub fn new(code: Name, scope: Name, table: Name) -> Self {
        Self { code, scope, table }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.code, self.scope, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub primary_key: u64,
    pub payer: Name,
    pub value: Vec<u8>,
}

impl Record {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.value)?)
    }
}

// ---------------------------------------------------------------------------
// TableStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableStore {
    tables: BTreeMap<TableId, BTreeMap<u64, Record>>,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &TableId, key: u64) -> Option<&Record> {
        self.tables.get(id).and_then(|rows| rows.get(&key))
    }

    /// Insert a new record. Fails if `key` is already present.
    pub fn insert(&mut self, id: &TableId, key: u64, payer: Name, value: Vec<u8>) -> Result<()> {
        let rows = self.tables.entry(id.clone()).or_default();
        if rows.contains_key(&key) {
            return Err(RelayError::DuplicateKey {
                table: id.to_string(),
                key,
            });
        }
        rows.insert(
            key,
            Record {
                primary_key: key,
                payer,
                value,
            },
        );
        Ok(())
    }

    /// Replace the value of an existing record, optionally moving it to a
    /// new payer.
    pub fn modify(
        &mut self,
        id: &TableId,
        key: u64,
        payer: Option<Name>,
        value: Vec<u8>,
    ) -> Result<()> {
        let record = self
            .tables
            .get_mut(id)
            .and_then(|rows| rows.get_mut(&key))
            .ok_or_else(|| RelayError::RecordNotFound {
                table: id.to_string(),
                key,
            })?;
        if let Some(payer) = payer {
            record.payer = payer;
        }
        record.value = value;
        Ok(())
    }

    /// Remove a record and return it. A table left empty is dropped.
    pub fn erase(&mut self, id: &TableId, key: u64) -> Result<Record> {
        let not_found = || RelayError::RecordNotFound {
            table: id.to_string(),
            key,
        };
        let rows = self.tables.get_mut(id).ok_or_else(not_found)?;
        let record = rows.remove(&key).ok_or_else(not_found)?;
        if rows.is_empty() {
            self.tables.remove(id);
        }
        Ok(record)
    }

    /// First record with a primary key `>= key`.
    pub fn lower_bound(&self, id: &TableId, key: u64) -> Option<&Record> {
        self.tables
            .get(id)
            .and_then(|rows| rows.range(key..).next().map(|(_, r)| r))
    }

    /// First record with a primary key `> key`.
    pub fn upper_bound(&self, id: &TableId, key: u64) -> Option<&Record> {
        let start = key.checked_add(1)?;
        self.lower_bound(id, start)
    }

    /// All records of a table in primary-key order.
    pub fn rows(&self, id: &TableId) -> Vec<&Record> {
        self.tables
            .get(id)
            .map(|rows| rows.values().collect())
            .unwrap_or_default()
    }

    pub fn table_ids(&self) -> impl Iterator<Item = &TableId> {
        self.tables.keys()
    }

    /// Total number of records across all tables.
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn insert_json<T: Serialize>(
        &mut self,
        id: &TableId,
        key: u64,
        payer: Name,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.insert(id, key, payer, bytes)
    }

    pub fn get_json<T: DeserializeOwned>(&self, id: &TableId, key: u64) -> Result<Option<T>> {
        self.get(id, key).map(Record::json).transpose()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
