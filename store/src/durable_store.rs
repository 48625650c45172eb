/*!
The durable store façade.

One process-wide `DurableStore` owns a single back-end implementation
and the outer transaction batching policy. Back-ends register a
factory keyed by the config `type` string; `memory` and `filesystem`
are built in, the embedded engines live in their own crates and
register themselves at startup.

Transaction state is intentionally not concurrency-safe across
callers: the surrounding business logic owns transactions from a
single thread, and the internal mutex only keeps the counters
coherent. Interleaving `begin`/`end` pairs from multiple threads is
not supported.
*/

use super::config::Config;
use super::storage::*;
use super::table::Table;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

const CLEAN_FILE_NAME: &str = ".ds_clean";

fn factories() -> &'static Mutex<HashMap<&'static str, BackendFactory>> {
    static FACTORIES: OnceLock<Mutex<HashMap<&'static str, BackendFactory>>> = OnceLock::new();
    FACTORIES.get_or_init(|| {
        let mut map: HashMap<&'static str, BackendFactory> = HashMap::new();
        map.insert("memory", super::mem_store::new);
        map.insert("filesystem", super::fs_store::new);
        map.into()
    })
}

/// Registers a back-end factory under a `type` name. Called during
/// startup, before any store is created; re-registering the same
/// factory is harmless, a conflicting one is a programming error.
pub fn register_backend(name: &'static str, factory: BackendFactory) {
    let existing = *factories().lock().entry(name).or_insert(factory);
    if existing != factory {
        panic!("Conflicting storage back-end registration for '{name}'");
    }
}

#[derive(Default)]
struct TxState {
    open: bool,
    tx_counter: u32,
    num_nondurable: u32,
    durably_close_next: bool,
}

pub struct DurableStore {
    backend: Box<dyn StoreImpl>,
    refs: Arc<Mutex<HashMap<String, usize>>>,
    tx: Mutex<TxState>,
    max_nondurable_transactions: u32,
    auto_commit: bool,
    clean_shutdown_file: Option<PathBuf>,
}

impl DurableStore {
    /// Creates the store selected by `config.type_`.
    ///
    /// Returns the store and, when `leave_clean_file` is set, whether
    /// the previous run shut down cleanly.
    pub fn create(config: &Config) -> Result<(Self, Option<bool>)> {
        if config.tidy {
            Self::tidy(config);
        }

        let factory = *factories().lock().get(config.type_.as_str()).ok_or_else(|| {
            warn!("Configured storage type '{}' not available", config.type_);
            StoreError::Err
        })?;
        let backend = factory(config)?;

        let mut clean_shutdown_file = None;
        let mut was_clean = None;
        if config.leave_clean_file {
            let marker = config.db_dir.join(CLEAN_FILE_NAME);
            match std::fs::remove_file(&marker) {
                Ok(()) => {
                    info!("Datastore {} was cleanly shut down", config.db_dir.display());
                    was_clean = Some(true);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && config.init => {
                    // First run: no marker expected
                    was_clean = Some(true);
                }
                Err(_) => {
                    info!(
                        "Datastore {} was not cleanly shut down",
                        config.db_dir.display()
                    );
                    was_clean = Some(false);
                }
            }
            clean_shutdown_file = Some(marker);
        }

        Ok((
            Self {
                backend,
                refs: Arc::new(Mutex::new(HashMap::new())),
                tx: Mutex::new(TxState::default()),
                max_nondurable_transactions: config.max_nondurable_transactions,
                auto_commit: config.auto_commit,
                clean_shutdown_file,
            },
            was_clean,
        ))
    }

    fn tidy(config: &Config) {
        if !config.db_dir.exists() {
            return;
        }
        if config.tidy_wait > 0 {
            warn!(
                "Tidying datastore {} in {} seconds",
                config.db_dir.display(),
                config.tidy_wait
            );
            std::thread::sleep(std::time::Duration::from_secs(config.tidy_wait as u64));
        }
        if let Err(e) = std::fs::remove_dir_all(&config.db_dir) {
            warn!("Failed to tidy datastore {}: {e}", config.db_dir.display());
        }
    }

    /// Opens or creates a table, incrementing its reference count.
    pub fn get_table(&self, name: &str, flags: &TableFlags) -> Result<Table> {
        let inner = self.backend.get_table(name, flags)?;
        *self.refs.lock().entry(name.to_string()).or_insert(0) += 1;
        Ok(Table::new(
            name.to_string(),
            inner,
            flags.clone(),
            self.refs.clone(),
        ))
    }

    /// Deletes a table. Fails with `Busy` while any handle is open.
    pub fn del_table(&self, name: &str) -> Result<()> {
        if self.refs.lock().get(name).copied().unwrap_or(0) > 0 {
            return Err(StoreError::Busy);
        }
        self.backend.del_table(name)
    }

    /// Names of all managed tables.
    pub fn get_table_names(&self) -> Result<Vec<String>> {
        self.backend.get_table_names()
    }

    pub fn aux_tables_available(&self) -> bool {
        self.backend.aux_tables_available()
    }

    /// Opens a transaction; idempotent while one is already open.
    pub fn begin_transaction(&self) -> Result<()> {
        if self.auto_commit {
            return Ok(());
        }
        let mut tx = self.tx.lock();
        if tx.open {
            return Ok(());
        }
        tx.tx_counter = tx.tx_counter.wrapping_add(1);
        self.backend.begin_transaction()?;
        tx.open = true;
        Ok(())
    }

    /// Closes the open transaction. Every
    /// `max_nondurable_transactions` closes, one commit is flagged
    /// durable and the count resets.
    pub fn end_transaction(&self) -> Result<()> {
        if self.auto_commit {
            return Ok(());
        }
        let mut tx = self.tx.lock();
        if !tx.open {
            return Ok(());
        }

        tx.num_nondurable += 1;
        if tx.num_nondurable > self.max_nondurable_transactions {
            tx.durably_close_next = true;
        }

        let durable = tx.durably_close_next;
        let result = self.backend.end_transaction(durable);
        tx.open = false;
        if durable {
            tx.durably_close_next = false;
            tx.num_nondurable = 0;
        }
        result.map_err(|_| StoreError::Busy)
    }

    /// Forces the next commit to be durable.
    pub fn make_transaction_durable(&self) {
        self.tx.lock().durably_close_next = true;
    }

    pub fn is_transaction_open(&self) -> bool {
        self.tx.lock().open
    }
}

impl Drop for DurableStore {
    fn drop(&mut self) {
        // Leaked handles are logged but do not block teardown
        for (name, count) in self.refs.lock().iter() {
            if *count > 0 {
                warn!("Table '{name}' still referenced at shutdown ({count} handles)");
            }
        }

        if let Some(marker) = &self.clean_shutdown_file {
            _ = std::fs::remove_file(marker);
            if let Err(e) = std::fs::write(marker, b"") {
                warn!("Error creating shutdown file '{}': {e}", marker.display());
            }
        }
    }
}
