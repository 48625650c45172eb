/*!
The embedded B-tree back-end.

Tables live inside a single shared database file as named trees, with
the reserved `___META_TABLE___` tree enumerating the tables this store
manages. Writes batch in the engine's page cache; a durable
transaction close forces a flush to disk. The engine retries internal
conflicts itself, so there is no deadlock detector to run.
*/

use drift_store::config::Config;
use drift_store::storage::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Bound;
use std::sync::Arc;
use tracing::{error, info};

const META_TABLE: &str = "___META_TABLE___";

pub fn new(config: &Config) -> Result<Box<dyn StoreImpl>> {
    let path = config.db_dir.join(&config.db_name);
    if !path.exists() && !config.init {
        error!("Datastore {} does not exist", path.display());
        return Err(StoreError::NotFound);
    }

    let mut builder = sled::Config::new().path(&path);
    if let Some(cache) = config.sled.cache_capacity {
        builder = builder.cache_capacity(cache);
    }
    builder = builder.flush_every_ms(config.sled.flush_every_ms);

    let db = builder.open().map_err(|e| {
        error!("Failed to open datastore {}: {e}", path.display());
        StoreError::Err
    })?;
    info!("Opened datastore {}", path.display());

    Ok(Box::new(SledStore {
        db,
        iter_locks: Mutex::new(HashMap::new()),
    }))
}

struct SledStore {
    db: sled::Db,
    iter_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SledStore {
    fn meta(&self) -> Result<sled::Tree> {
        self.db.open_tree(META_TABLE).map_err(|e| {
            error!("Failed to open metatable: {e}");
            StoreError::Err
        })
    }

    fn iter_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.iter_locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl StoreImpl for SledStore {
    fn get_table(&self, name: &str, flags: &TableFlags) -> Result<Box<dyn TableImpl>> {
        if name == META_TABLE {
            error!("Table name '{name}' is reserved");
            return Err(StoreError::Err);
        }

        let meta = self.meta()?;
        let known = meta
            .contains_key(name)
            .map_err(|e| {
                error!("Metatable read failure: {e}");
                StoreError::Err
            })?;
        if known {
            if flags.create && flags.exclusive {
                return Err(StoreError::Exists);
            }
        } else {
            if !flags.create {
                return Err(StoreError::NotFound);
            }
            meta.insert(name, b"".as_slice()).map_err(|e| {
                error!("Metatable update failure: {e}");
                StoreError::Err
            })?;
        }

        let tree = self.db.open_tree(name).map_err(|e| {
            error!("Failed to open table '{name}': {e}");
            StoreError::Err
        })?;
        Ok(Box::new(SledTable {
            tree,
            iter_lock: self.iter_lock(name),
        }))
    }

    fn del_table(&self, name: &str) -> Result<()> {
        let meta = self.meta()?;
        if meta
            .remove(name)
            .map_err(|e| {
                error!("Metatable update failure: {e}");
                StoreError::Err
            })?
            .is_none()
        {
            return Err(StoreError::NotFound);
        }
        self.db.drop_tree(name).map(|_| ()).map_err(|e| {
            error!("Failed to drop table '{name}': {e}");
            StoreError::Err
        })
    }

    fn get_table_names(&self) -> Result<Vec<String>> {
        let meta = self.meta()?;
        let mut names = Vec::new();
        for entry in meta.iter() {
            let (key, _) = entry.map_err(|e| {
                error!("Metatable scan failure: {e}");
                StoreError::Err
            })?;
            names.push(String::from_utf8_lossy(&key).to_string());
        }
        names.sort();
        Ok(names)
    }

    fn end_transaction(&self, durable: bool) -> Result<()> {
        if durable {
            self.db.flush().map(|_| ()).map_err(|e| {
                error!("Datastore flush failure: {e}");
                StoreError::Err
            })?;
        }
        Ok(())
    }
}

struct SledTable {
    tree: sled::Tree,
    iter_lock: Arc<Mutex<()>>,
}

impl TableImpl for SledTable {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        match self.tree.get(key) {
            Ok(Some(value)) => Ok(value.to_vec()),
            Ok(None) => Err(StoreError::NotFound),
            Err(e) => {
                error!("Read failure: {e}");
                Err(StoreError::Err)
            }
        }
    }

    fn put(&self, key: &[u8], value: &[u8], flags: &PutFlags) -> Result<()> {
        let exists = self.tree.contains_key(key).map_err(|e| {
            error!("Read failure: {e}");
            StoreError::Err
        })?;
        if exists {
            if flags.create && flags.exclusive {
                return Err(StoreError::Exists);
            }
        } else if !flags.create {
            return Err(StoreError::NotFound);
        }
        self.tree.insert(key, value).map(|_| ()).map_err(|e| {
            error!("Write failure: {e}");
            StoreError::Err
        })
    }

    fn del(&self, key: &[u8]) -> Result<()> {
        match self.tree.remove(key) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(StoreError::NotFound),
            Err(e) => {
                error!("Delete failure: {e}");
                Err(StoreError::Err)
            }
        }
    }

    fn size(&self) -> Result<usize> {
        Ok(self.tree.len())
    }

    fn key_exists(&self, key: &[u8]) -> Result<bool> {
        self.tree.contains_key(key).map_err(|e| {
            error!("Read failure: {e}");
            StoreError::Err
        })
    }

    fn iter(&self) -> Result<Box<dyn TableIterImpl>> {
        // Hold the table's iteration lock for the cursor's lifetime
        Ok(Box::new(SledTableIter {
            _guard: self.iter_lock.lock_arc(),
            tree: self.tree.clone(),
            cursor: None,
        }))
    }
}

struct SledTableIter {
    _guard: parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, ()>,
    tree: sled::Tree,
    cursor: Option<Vec<u8>>,
}

impl TableIterImpl for SledTableIter {
    fn next_key(&mut self) -> Result<Option<Vec<u8>>> {
        let lower = match &self.cursor {
            Some(last) => Bound::Excluded(last.clone()),
            None => Bound::Unbounded,
        };
        let next = match self.tree.range((lower, Bound::<Vec<u8>>::Unbounded)).next() {
            Some(Ok((key, _))) => Some(key.to_vec()),
            Some(Err(e)) => {
                error!("Cursor failure: {e}");
                return Err(StoreError::Err);
            }
            None => None,
        };
        self.cursor = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_store::DurableStore;

    fn sled_config(dir: &std::path::Path) -> Config {
        Config {
            type_: "sled".to_string(),
            db_dir: dir.to_path_buf(),
            init: true,
            auto_commit: false,
            max_nondurable_transactions: 10,
            leave_clean_file: false,
            ..Default::default()
        }
    }

    #[test]
    fn round_trip() {
        crate::register();
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = DurableStore::create(&sled_config(dir.path())).unwrap();
        let table = store.get_table("t", &TableFlags::create()).unwrap();

        table.put(b"k", b"v1", &PutFlags::upsert()).unwrap();
        assert_eq!(table.get(b"k").unwrap(), b"v1");
        table.put(b"k", b"v2", &PutFlags::upsert()).unwrap();
        assert_eq!(table.get(b"k").unwrap(), b"v2");
        table.del(b"k").unwrap();
        assert_eq!(table.get(b"k"), Err(StoreError::NotFound));
    }

    #[test]
    fn metatable_lists_tables() {
        crate::register();
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = DurableStore::create(&sled_config(dir.path())).unwrap();
        let _a = store.get_table("alpha", &TableFlags::create()).unwrap();
        let _b = store.get_table("beta", &TableFlags::create()).unwrap();
        assert_eq!(
            store.get_table_names().unwrap(),
            vec!["alpha".to_string(), "beta".to_string()]
        );

        drop(_a);
        store.del_table("alpha").unwrap();
        assert_eq!(store.get_table_names().unwrap(), vec!["beta".to_string()]);
    }

    #[test]
    fn reserved_metatable_name_rejected() {
        crate::register();
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = DurableStore::create(&sled_config(dir.path())).unwrap();
        assert!(store.get_table(META_TABLE, &TableFlags::create()).is_err());
    }

    #[test]
    fn ten_thousand_keys_survive_reopen_in_order() {
        crate::register();
        let dir = tempfile::tempdir().unwrap();
        let config = sled_config(dir.path());
        {
            let (store, _) = DurableStore::create(&config).unwrap();
            let table = store.get_table("bulk", &TableFlags::create()).unwrap();

            store.begin_transaction().unwrap();
            for i in 0..10_000u32 {
                table
                    .put(&i.to_be_bytes(), &i.to_le_bytes(), &PutFlags::upsert())
                    .unwrap();
            }
            store.make_transaction_durable();
            store.end_transaction().unwrap();
        }

        // Reopen and walk the whole table
        let (store, _) = DurableStore::create(&config).unwrap();
        let table = store.get_table("bulk", &TableFlags::default()).unwrap();
        assert_eq!(table.size().unwrap(), 10_000);

        let mut iter = table.iter().unwrap();
        let mut count = 0u32;
        while let Some(key) = iter.next_key().unwrap() {
            assert_eq!(key, count.to_be_bytes());
            count += 1;
        }
        assert_eq!(count, 10_000);
    }
}
