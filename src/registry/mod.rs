//! The persisted, concurrency-safe service registry (§5).

pub mod store;

pub use store::ServiceRegistry;
