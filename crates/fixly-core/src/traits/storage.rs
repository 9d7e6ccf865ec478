//! Durable key-value storage trait.

use async_trait::async_trait;

use crate::error::StorageError;

/// A durable string key-value store.
///
/// Each key is independently present or absent. There is no multi-key
/// transaction: callers persist fields one at a time.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    /// Read a value. Returns `Ok(None)` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a key. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}
