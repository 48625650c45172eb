/*!
The abstract storage contract every back-end implements: named tables
mapping serialized keys to serialized values, with optional
transaction batching. One error enumeration classifies outcomes across
all back-ends.
*/

use super::config::Config;
use thiserror::Error;

/// Longest permitted variable-length key.
pub const MAX_VARIABLE_KEY_LEN: usize = 255;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// Unspecified failure; the back-end has logged the details.
    #[error("Unspecified storage failure")]
    Err,

    /// No such key or table.
    #[error("Not found")]
    NotFound,

    /// The key or table already exists.
    #[error("Already exists")]
    Exists,

    /// The table is in use or a lock is not yet available.
    #[error("Busy")]
    Busy,
}

pub type Result<T> = core::result::Result<T, StoreError>;

/// Options for opening a table.
#[derive(Debug, Default, Clone)]
pub struct TableFlags {
    /// Create the table if it does not exist.
    pub create: bool,
    /// With `create`: fail with `Exists` if the table already exists.
    pub exclusive: bool,
    /// Values carry a type-code tag ahead of the serialized object.
    pub multitype: bool,
    /// The table projects fields into typed SQL columns.
    pub aux_table: bool,
    /// `Some(n)` keys are fixed-width binary of exactly `n` bytes;
    /// `None` keys are variable-length up to [`MAX_VARIABLE_KEY_LEN`].
    pub key_width: Option<usize>,
}

impl TableFlags {
    pub fn create() -> Self {
        Self {
            create: true,
            ..Default::default()
        }
    }
}

/// Options for a put.
#[derive(Debug, Default, Clone, Copy)]
pub struct PutFlags {
    /// Create the entry if it does not exist.
    pub create: bool,
    /// With `create`: fail with `Exists` if the key is already present.
    pub exclusive: bool,
}

impl PutFlags {
    pub fn upsert() -> Self {
        Self {
            create: true,
            exclusive: false,
        }
    }
}

/// A storage back-end. Construction performs `init`; the factory in
/// [`crate::durable_store`] selects the implementation from
/// `config.type_`.
pub trait StoreImpl: Send + Sync {
    /// Opens or creates a table.
    fn get_table(&self, name: &str, flags: &TableFlags) -> Result<Box<dyn TableImpl>>;

    /// Deletes a table outright. The façade refuses while references
    /// are held.
    fn del_table(&self, name: &str) -> Result<()>;

    /// Names of all managed tables, from the metatable where the
    /// back-end keeps one.
    fn get_table_names(&self) -> Result<Vec<String>>;

    /// Opens a batch; a no-op for auto-commit back-ends.
    fn begin_transaction(&self) -> Result<()> {
        Ok(())
    }

    /// Closes the batch; `durable` requests synchronous persistence.
    fn end_transaction(&self, _durable: bool) -> Result<()> {
        Ok(())
    }

    /// True for back-ends that support schema-projected auxiliary
    /// tables.
    fn aux_tables_available(&self) -> bool {
        false
    }
}

/// One open table.
pub trait TableImpl: Send {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    fn put(&self, key: &[u8], value: &[u8], flags: &PutFlags) -> Result<()>;

    fn del(&self, key: &[u8]) -> Result<()>;

    fn size(&self) -> Result<usize>;

    fn key_exists(&self, key: &[u8]) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// An iterator over keys in sort order. The iterator holds the
    /// table's iteration lock for its entire lifetime, so structural
    /// changes to the table block until it is dropped.
    fn iter(&self) -> Result<Box<dyn TableIterImpl>>;
}

/// A key cursor.
pub trait TableIterImpl: Send {
    /// The next key in sort order, or `None` at the end.
    fn next_key(&mut self) -> Result<Option<Vec<u8>>>;
}

/// A constructor for a back-end, keyed by `config.type_`.
pub type BackendFactory = fn(&Config) -> Result<Box<dyn StoreImpl>>;
