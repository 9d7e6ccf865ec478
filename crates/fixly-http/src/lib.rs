//! fixly-http - Authenticated HTTP client for the Fixly API.
//!
//! All requests flow through an [`ApiClient`], which attaches the stored
//! credential and recovers from expired access tokens by renewing them once,
//! no matter how many requests noticed the expiry at the same time.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fixly_core::{ClientConfig, MemoryStorage};
//! use fixly_http::{ApiClient, AuthApi, Credentials};
//!
//! # async fn example() -> Result<(), fixly_core::Error> {
//! let config = ClientConfig::from_env()?;
//! let client = ApiClient::new(config, Arc::new(MemoryStorage::new()))?;
//!
//! let auth = AuthApi::new(client.clone());
//! auth.login(&Credentials::new("ada@example.com", "hunter2")).await?;
//!
//! let addresses: serde_json::Value = client.get("/addresses").await?;
//! println!("{}", addresses);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod credential_store;
pub mod endpoints;
pub mod normalize;
pub mod refresh;
pub mod single_flight;

pub use auth::{AuthApi, Credentials};
pub use client::{ApiClient, ApiRequest, ApiResponse, MultipartBody, RequestBody};
pub use credential_store::{ClearReport, CredentialStore, HEADER_CACHE_TTL};
pub use endpoints::LoginResponse;
pub use refresh::RefreshCoordinator;
pub use reqwest::Method;
pub use single_flight::SingleFlight;
