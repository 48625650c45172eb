/*!
Storage configuration.
*/

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Back-end selector: "memory", "filesystem", "sled", "sqlite" or
    /// "external".
    #[serde(rename = "type")]
    pub type_: String,

    /// Database name; file-backed back-ends derive file names from it.
    pub db_name: String,

    /// Directory holding the store.
    pub db_dir: PathBuf,

    /// Create the store on first run.
    pub init: bool,

    /// Wipe the entire store before starting.
    pub tidy: bool,

    /// Grace delay in seconds before `tidy` wipes anything.
    pub tidy_wait: u32,

    /// Maintain the `.ds_clean` marker file so the next start can tell
    /// a clean shutdown from a crash.
    pub leave_clean_file: bool,

    /// Commit every operation immediately; transaction batching calls
    /// become no-ops.
    pub auto_commit: bool,

    /// How many batched transactions may close non-durably before one
    /// is forced to disk.
    pub max_nondurable_transactions: u32,

    pub sled: SledConfig,

    pub sqlite: SqliteConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            type_: "memory".to_string(),
            db_name: "drift".to_string(),
            db_dir: PathBuf::from("/var/spool/drift"),
            init: false,
            tidy: false,
            tidy_wait: 3,
            leave_clean_file: true,
            auto_commit: true,
            max_nondurable_transactions: 0,
            sled: SledConfig::default(),
            sqlite: SqliteConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SledConfig {
    /// Page cache size in bytes.
    pub cache_capacity: Option<u64>,

    /// Background flush interval; `None` leaves the engine default.
    pub flush_every_ms: Option<u64>,
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            cache_capacity: None,
            flush_every_ms: Some(500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Enable schema-projected auxiliary tables.
    pub use_aux_tables: bool,

    /// SQL script run before the standard schema is created.
    pub schema_pre_creation: Option<PathBuf>,

    /// SQL script run after the standard schema is created; installs
    /// the triggers that populate auxiliary tables.
    pub schema_post_creation: Option<PathBuf>,

    /// Idle keep-alive period in minutes; accepted for configuration
    /// parity, no-op for an embedded engine.
    pub keep_alive_interval_mins: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            use_aux_tables: false,
            schema_pre_creation: None,
            schema_post_creation: None,
            keep_alive_interval_mins: 10,
        }
    }
}
