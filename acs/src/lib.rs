pub mod engine;
pub mod pending;
pub mod signal;

pub use engine::{AcsEngine, AcsParams, AcsSink};
pub use pending::PendingAcs;
