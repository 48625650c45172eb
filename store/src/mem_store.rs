/*!
The in-memory back-end: a `BTreeMap` per table. Nothing survives the
process; the metatable is the table map itself.
*/

use super::config::Config;
use super::storage::*;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

type TableData = Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>;

pub(crate) fn new(_config: &Config) -> Result<Box<dyn StoreImpl>> {
    Ok(Box::new(MemStore {
        tables: Mutex::new(HashMap::new()),
    }))
}

struct MemStore {
    tables: Mutex<HashMap<String, TableData>>,
}

impl StoreImpl for MemStore {
    fn get_table(&self, name: &str, flags: &TableFlags) -> Result<Box<dyn TableImpl>> {
        let mut tables = self.tables.lock();
        let data = match tables.get(name) {
            Some(data) => {
                if flags.create && flags.exclusive {
                    return Err(StoreError::Exists);
                }
                data.clone()
            }
            None => {
                if !flags.create {
                    return Err(StoreError::NotFound);
                }
                let data: TableData = Arc::new(Mutex::new(BTreeMap::new()));
                tables.insert(name.to_string(), data.clone());
                data
            }
        };
        Ok(Box::new(MemTable { data }))
    }

    fn del_table(&self, name: &str) -> Result<()> {
        self.tables
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    fn get_table_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

struct MemTable {
    data: TableData,
}

impl TableImpl for MemTable {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.data.lock().get(key).cloned().ok_or(StoreError::NotFound)
    }

    fn put(&self, key: &[u8], value: &[u8], flags: &PutFlags) -> Result<()> {
        let mut data = self.data.lock();
        if data.contains_key(key) {
            if flags.create && flags.exclusive {
                return Err(StoreError::Exists);
            }
        } else if !flags.create {
            return Err(StoreError::NotFound);
        }
        data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn del(&self, key: &[u8]) -> Result<()> {
        self.data
            .lock()
            .remove(key)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    fn size(&self) -> Result<usize> {
        Ok(self.data.lock().len())
    }

    fn iter(&self) -> Result<Box<dyn TableIterImpl>> {
        // The guard pins the table for the cursor's whole lifetime,
        // excluding structural changes mid-iteration
        Ok(Box::new(MemTableIter {
            guard: self.data.lock_arc(),
            cursor: None,
        }))
    }
}

struct MemTableIter {
    guard: parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, BTreeMap<Vec<u8>, Vec<u8>>>,
    cursor: Option<Vec<u8>>,
}

impl TableIterImpl for MemTableIter {
    fn next_key(&mut self) -> Result<Option<Vec<u8>>> {
        let lower = match &self.cursor {
            Some(last) => Bound::Excluded(last.clone()),
            None => Bound::Unbounded,
        };
        let next = self
            .guard
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone());
        self.cursor = next.clone();
        Ok(next)
    }
}
