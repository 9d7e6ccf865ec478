//! Client construction and credential file location.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use directories::ProjectDirs;

use fixly_core::ClientConfig;
use fixly_core::config::ENV_API_URL;
use fixly_file::FileStorage;
use fixly_http::ApiClient;

/// Path of the credential file in the platform data directory.
pub fn credentials_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "fixly").context("Could not determine data directory")?;
    Ok(dirs.data_dir().join("credentials.json"))
}

/// Build a client backed by the credential file.
///
/// `api_url` overrides the base URL from the environment.
pub fn open_client(api_url: Option<&str>) -> Result<ApiClient> {
    let config = ClientConfig::from_lookup(|key| {
        if key == ENV_API_URL && api_url.is_some() {
            return api_url.map(str::to_string);
        }
        std::env::var(key).ok()
    })
    .context("Invalid configuration")?;

    let path = credentials_path()?;
    tracing::debug!(path = %path.display(), base_url = %config.base_url, "Opening client");

    let storage = Arc::new(FileStorage::new(path));
    ApiClient::new(config, storage).context("Failed to create API client")
}
