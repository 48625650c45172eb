/*!
Table handles.

[`Table`] wraps a back-end table with key validation and the
reference counting that protects `del_table`. On top of it sit the two
value disciplines: [`TypedTable`] for single-type tables (one
serialized object per value) and [`MultiTypeTable`] for tables whose
values carry an SDNV type code ahead of the serialized object,
dispatched through a caller-supplied allocator.
*/

use super::storage::*;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

/// An open table handle. Dropping it releases the reference that
/// blocks `del_table`.
pub struct Table {
    name: String,
    inner: Box<dyn TableImpl>,
    flags: TableFlags,
    refs: Arc<Mutex<HashMap<String, usize>>>,
}

impl Table {
    pub(crate) fn new(
        name: String,
        inner: Box<dyn TableImpl>,
        flags: TableFlags,
        refs: Arc<Mutex<HashMap<String, usize>>>,
    ) -> Self {
        Self {
            name,
            inner,
            flags,
            refs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        let ok = match self.flags.key_width {
            Some(width) => key.len() == width,
            None => !key.is_empty() && key.len() <= MAX_VARIABLE_KEY_LEN,
        };
        if !ok {
            error!(
                "Invalid key length {} for table '{}'",
                key.len(),
                self.name
            );
            return Err(StoreError::Err);
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_key(key)?;
        self.inner.get(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8], flags: &PutFlags) -> Result<()> {
        self.check_key(key)?;
        self.inner.put(key, value, flags)
    }

    pub fn del(&self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.inner.del(key)
    }

    pub fn size(&self) -> Result<usize> {
        self.inner.size()
    }

    pub fn key_exists(&self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        self.inner.key_exists(key)
    }

    pub fn iter(&self) -> Result<Box<dyn TableIterImpl>> {
        self.inner.iter()
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        let mut refs = self.refs.lock();
        match refs.get_mut(&self.name) {
            Some(count) if *count > 0 => *count -= 1,
            _ => error!("Reference underflow closing table '{}'", self.name),
        }
    }
}

/// A single-type table: every value is one serialized object.
pub struct TypedTable<T> {
    table: Table,
    _marker: core::marker::PhantomData<T>,
}

impl<T> TypedTable<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(table: Table) -> Self {
        Self {
            table,
            _marker: core::marker::PhantomData,
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn get(&self, key: &[u8]) -> Result<T> {
        let raw = self.table.get(key)?;
        serde_json::from_slice(&raw).map_err(|e| {
            error!("Corrupt object under key in table '{}': {e}", self.table.name());
            StoreError::Err
        })
    }

    pub fn put(&self, key: &[u8], value: &T, flags: &PutFlags) -> Result<()> {
        let raw = serde_json::to_vec(value).map_err(|e| {
            error!("Serialization failure for table '{}': {e}", self.table.name());
            StoreError::Err
        })?;
        self.table.put(key, &raw, flags)
    }

    pub fn del(&self, key: &[u8]) -> Result<()> {
        self.table.del(key)
    }

    pub fn size(&self) -> Result<usize> {
        self.table.size()
    }
}

/// A multi-type table: values carry an SDNV type code followed by the
/// serialized object. Reads dispatch through an allocator that maps
/// the code to a concrete deserialization.
pub struct MultiTypeTable {
    table: Table,
}

impl MultiTypeTable {
    pub fn new(table: Table) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn put<T: Serialize>(
        &self,
        key: &[u8],
        type_code: u64,
        value: &T,
        flags: &PutFlags,
    ) -> Result<()> {
        let mut raw = Vec::new();
        drift_codec::sdnv::encode(type_code, &mut raw);
        serde_json::to_vec(value)
            .map(|body| raw.extend_from_slice(&body))
            .map_err(|e| {
                error!("Serialization failure for table '{}': {e}", self.table.name());
                StoreError::Err
            })?;
        self.table.put(key, &raw, flags)
    }

    /// Reads the value under `key`, handing its type code and
    /// serialized body to `allocate`.
    pub fn get_with<T, F>(&self, key: &[u8], allocate: F) -> Result<T>
    where
        F: FnOnce(u64, &[u8]) -> Result<T>,
    {
        let raw = self.table.get(key)?;
        let (type_code, consumed) = drift_codec::sdnv::decode(&raw).map_err(|e| {
            error!("Corrupt type code in table '{}': {e}", self.table.name());
            StoreError::Err
        })?;
        allocate(type_code, &raw[consumed..])
    }

    /// The common allocator body: deserialize as `T` if the stored
    /// code matches `expected`.
    pub fn get_typed<T: DeserializeOwned>(&self, key: &[u8], expected: u64) -> Result<T> {
        self.get_with(key, |code, body| {
            if code != expected {
                error!(
                    "Type code mismatch in table '{}': stored {code}, wanted {expected}",
                    self.table.name()
                );
                return Err(StoreError::Err);
            }
            serde_json::from_slice(body).map_err(|e| {
                error!("Corrupt object in table '{}': {e}", self.table.name());
                StoreError::Err
            })
        })
    }
}
