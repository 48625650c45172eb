/*!
The filesystem back-end: one directory per table, one file per key
(hex-encoded file names), tmp-file-and-rename writes so a crash never
leaves a half-written value behind.
*/

use super::config::Config;
use super::storage::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

pub(crate) fn new(config: &Config) -> Result<Box<dyn StoreImpl>> {
    let root = config.db_dir.join(&config.db_name);
    if !root.exists() {
        if !config.init {
            error!("Datastore directory {} does not exist", root.display());
            return Err(StoreError::NotFound);
        }
        std::fs::create_dir_all(&root).map_err(|e| {
            error!("Failed to create datastore directory {}: {e}", root.display());
            StoreError::Err
        })?;
        info!("Created datastore directory {}", root.display());
    }
    Ok(Box::new(FsStore {
        root,
        iter_locks: Mutex::new(HashMap::new()),
    }))
}

fn hex_name(key: &[u8]) -> String {
    let mut s = String::with_capacity(key.len() * 2);
    for b in key {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

fn unhex_name(name: &str) -> Option<Vec<u8>> {
    if name.len() % 2 != 0 {
        return None;
    }
    (0..name.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&name[i..i + 2], 16).ok())
        .collect()
}

struct FsStore {
    root: PathBuf,
    iter_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FsStore {
    fn iter_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.iter_locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl StoreImpl for FsStore {
    fn get_table(&self, name: &str, flags: &TableFlags) -> Result<Box<dyn TableImpl>> {
        let dir = self.root.join(name);
        if dir.exists() {
            if flags.create && flags.exclusive {
                return Err(StoreError::Exists);
            }
        } else {
            if !flags.create {
                return Err(StoreError::NotFound);
            }
            std::fs::create_dir_all(&dir).map_err(|e| {
                error!("Failed to create table directory {}: {e}", dir.display());
                StoreError::Err
            })?;
        }
        Ok(Box::new(FsTable {
            dir,
            iter_lock: self.iter_lock(name),
        }))
    }

    fn del_table(&self, name: &str) -> Result<()> {
        let dir = self.root.join(name);
        if !dir.exists() {
            return Err(StoreError::NotFound);
        }
        std::fs::remove_dir_all(&dir).map_err(|e| {
            error!("Failed to remove table directory {}: {e}", dir.display());
            StoreError::Err
        })
    }

    fn get_table_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.root).map_err(|e| {
            error!("Failed to list {}: {e}", self.root.display());
            StoreError::Err
        })?;
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

struct FsTable {
    dir: PathBuf,
    iter_lock: Arc<Mutex<()>>,
}

impl FsTable {
    fn key_path(&self, key: &[u8]) -> PathBuf {
        self.dir.join(hex_name(key))
    }
}

impl TableImpl for FsTable {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        match std::fs::read(self.key_path(key)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => {
                error!("Read failure in {}: {e}", self.dir.display());
                Err(StoreError::Err)
            }
        }
    }

    fn put(&self, key: &[u8], value: &[u8], flags: &PutFlags) -> Result<()> {
        let path = self.key_path(key);
        if path.exists() {
            if flags.create && flags.exclusive {
                return Err(StoreError::Exists);
            }
        } else if !flags.create {
            return Err(StoreError::NotFound);
        }

        // Write a sibling tmp file, sync it, rename over the target
        let mut tmp = path.clone();
        tmp.set_extension("tmp");
        let result = (|| {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &path)
        })();
        result.map_err(|e| {
            _ = std::fs::remove_file(&tmp);
            error!("Write failure in {}: {e}", self.dir.display());
            StoreError::Err
        })
    }

    fn del(&self, key: &[u8]) -> Result<()> {
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => {
                error!("Delete failure in {}: {e}", self.dir.display());
                Err(StoreError::Err)
            }
        }
    }

    fn size(&self) -> Result<usize> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            error!("Failed to list {}: {e}", self.dir.display());
            StoreError::Err
        })?;
        Ok(entries
            .flatten()
            .filter(|e| unhex_name(&e.file_name().to_string_lossy()).is_some())
            .count())
    }

    fn iter(&self) -> Result<Box<dyn TableIterImpl>> {
        // Take the table's iteration lock for the cursor's lifetime,
        // then snapshot the sorted key set
        let guard = self.iter_lock.lock_arc();
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            error!("Failed to list {}: {e}", self.dir.display());
            StoreError::Err
        })?;
        let mut keys: Vec<Vec<u8>> = entries
            .flatten()
            .filter_map(|e| unhex_name(&e.file_name().to_string_lossy()))
            .collect();
        keys.sort();
        Ok(Box::new(FsTableIter {
            _guard: guard,
            keys: keys.into_iter(),
        }))
    }
}

struct FsTableIter {
    _guard: parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, ()>,
    keys: std::vec::IntoIter<Vec<u8>>,
}

impl TableIterImpl for FsTableIter {
    fn next_key(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.keys.next())
    }
}
