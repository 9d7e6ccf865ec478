//! Core traits for credential persistence.

mod storage;

pub use storage::KeyValueStorage;
