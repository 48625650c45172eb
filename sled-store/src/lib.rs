mod storage;

pub use storage::new;

/// Makes the back-end selectable as `type = "sled"` in the storage
/// configuration. Call once during startup.
pub fn register() {
    drift_store::durable_store::register_backend("sled", storage::new);
}
