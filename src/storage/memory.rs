use super::{filter_value, RecordStore, Table};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Process-local record store for dry runs and tests.
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<HashMap<Table, Vec<Value>>>,
    next_id: AtomicU64,
    rejected_tables: HashSet<Table>,
}

fn matches(row: &Value, filters: &[(&str, &str)]) -> bool {
    filters.iter().all(|(column, expected)| {
        row.get(*column)
            .and_then(filter_value)
            .map_or(false, |actual| actual == *expected)
    })
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a table, e.g. with the filing rows a run expects to find.
    pub fn with_rows(self, table: Table, rows: Vec<Value>) -> Self {
        if let Ok(mut tables) = self.tables.write() {
            tables.entry(table).or_default().extend(rows);
        }
        self
    }

    /// Makes every insert into `table` fail.
    pub fn rejecting_inserts(mut self, table: Table) -> Self {
        self.rejected_tables.insert(table);
        self
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.get(&table).cloned().unwrap_or_default()
    }

    /// Every table with at least one row, keyed by table name.
    pub fn snapshot(&self) -> Value {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let map: Map<String, Value> = tables
            .iter()
            .map(|(table, rows)| (table.to_string(), Value::Array(rows.clone())))
            .collect();
        Value::Object(map)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn select(&self, table: Table, filters: &[(&str, &str)]) -> Result<Vec<Value>> {
        let tables = self
            .tables
            .read()
            .map_err(|_| anyhow!("record store lock poisoned"))?;
        Ok(tables
            .get(&table)
            .map(|rows| rows.iter().filter(|row| matches(row, filters)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, table: Table, mut row: Value) -> Result<Value> {
        if self.rejected_tables.contains(&table) {
            return Err(anyhow!("insert into {} rejected", table));
        }
        let object = row
            .as_object_mut()
            .ok_or_else(|| anyhow!("{} rows must be JSON objects", table))?;
        if !object.contains_key("id") {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            object.insert("id".to_string(), Value::from(id));
        }

        let mut tables = self
            .tables
            .write()
            .map_err(|_| anyhow!("record store lock poisoned"))?;
        tables.entry(table).or_default().push(row.clone());
        log::debug!("Inserted into {}: {}", table, row);
        Ok(row)
    }

    async fn update(&self, table: Table, filters: &[(&str, &str)], patch: Value) -> Result<()> {
        let patch = patch
            .as_object()
            .ok_or_else(|| anyhow!("patch for {} must be a JSON object", table))?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| anyhow!("record store lock poisoned"))?;
        for row in tables.entry(table).or_default().iter_mut() {
            if !matches(row, filters) {
                continue;
            }
            if let Some(object) = row.as_object_mut() {
                for (key, value) in patch {
                    object.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }
}
