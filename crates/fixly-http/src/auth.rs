//! Login, logout and the signed-in user's profile.

use std::fmt;

use serde_json::Value;
use tracing::{info, instrument, warn};

use fixly_core::{ApiError, Error};

use crate::client::{ApiClient, ApiRequest};
use crate::credential_store::ClearReport;
use crate::endpoints::{LoginRequest, LoginResponse};

/// Email and password for the login endpoint.
///
/// The password is never shown in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    email: String,
    password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Session lifecycle operations on top of an [`ApiClient`].
#[derive(Debug, Clone)]
pub struct AuthApi {
    client: ApiClient,
}

impl AuthApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Exchange credentials for a session and store it.
    ///
    /// # Errors
    ///
    /// [`Error::Api`] if the server rejects the login, [`Error::Storage`] if
    /// the session could not be persisted. In the latter case the session is
    /// still usable for the lifetime of this process.
    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, Error> {
        let request = ApiRequest::post(self.client.config().login_path.as_str()).json(&LoginRequest {
            email: &credentials.email,
            password: &credentials.password,
        })?;
        let response: LoginResponse = self.client.send_json(request).await?;

        let store = self.client.credentials();
        store
            .set_tokens(
                Some(&response.access_token),
                response.refresh_token.as_deref(),
                response.token_type.as_deref(),
            )
            .await?;
        store.set_user_type(response.user_type.as_deref()).await?;
        if let Some(user) = &response.user {
            store.set_user_profile(Some(user)).await?;
        }

        info!(user_type = ?response.user_type, "Logged in");
        Ok(response)
    }

    /// End the session.
    ///
    /// The server is told on a best-effort basis; local credentials are
    /// cleared whatever it answers.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> ClearReport {
        let store = self.client.credentials();

        if let Some(header) = store.auth_header().await {
            let request = ApiRequest::post(self.client.config().logout_path.as_str());
            if let Err(e) = self.client.dispatch(&request, Some(header.as_str())).await {
                warn!(error = %e, "Server-side logout failed");
            }
        }

        let report = store.clear().await;
        info!("Logged out");
        report
    }

    /// Fetch the signed-in user's profile and cache it.
    #[instrument(skip(self))]
    pub async fn current_user(&self) -> Result<Value, ApiError> {
        let profile: Value = self.client.get(&self.client.config().profile_path).await?;

        let store = self.client.credentials();
        if let Err(e) = store.set_user_profile(Some(&profile)).await {
            warn!(error = %e, "Failed to cache user profile");
        }
        if let Some(user_type) = profile.get("user_type").and_then(Value::as_str)
            && let Err(e) = store.set_user_type(Some(user_type)).await
        {
            warn!(error = %e, "Failed to cache user type");
        }

        Ok(profile)
    }

    /// The cached profile, without a network call.
    pub async fn cached_user(&self) -> Option<Value> {
        self.client.credentials().user_profile().await
    }
}
