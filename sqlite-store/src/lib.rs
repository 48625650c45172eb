mod storage;

pub use storage::{DetailItem, DetailKind, DetailValue, Storage, new, open};

/// Makes the back-end selectable as `type = "sqlite"` in the storage
/// configuration. Call once during startup.
pub fn register() {
    drift_store::durable_store::register_backend("sqlite", storage::new);
}
