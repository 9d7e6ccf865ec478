//! fixly-core - Core types and traits for the Fixly API client.

pub mod config;
pub mod credential;
pub mod error;
pub mod storage;
pub mod tokens;
pub mod traits;
pub mod types;

pub use config::ClientConfig;
pub use credential::Credential;
pub use error::{ApiError, CODE_SESSION_EXPIRED, Error, StorageError};
pub use storage::MemoryStorage;
pub use tokens::{AccessToken, DEFAULT_TOKEN_TYPE, RefreshToken};
pub use traits::KeyValueStorage;
pub use types::ApiUrl;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;
