//! Single-flight credential renewal.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use fixly_core::{ApiError, CODE_SESSION_EXPIRED, ClientConfig, RefreshToken};

use crate::credential_store::CredentialStore;
use crate::endpoints::{RefreshRequest, TokenResponse};
use crate::normalize::{self, CODE_INVALID_RESPONSE};
use crate::single_flight::SingleFlight;

const SESSION_EXPIRED_MESSAGE: &str = "Session expired, please log in again";

/// Renews the credential on behalf of every request that saw a 401.
///
/// At most one renewal call is in flight at a time; callers that arrive
/// while it runs receive the same outcome. A failed renewal ends the
/// session: the credential store is cleared and every caller receives the
/// same 401 `SESSION_EXPIRED` error, whatever the renewal call itself answered.
pub struct RefreshCoordinator {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    store: Arc<CredentialStore>,
    flight: SingleFlight<Result<String, ApiError>>,
}

impl RefreshCoordinator {
    pub fn new(http: reqwest::Client, config: Arc<ClientConfig>, store: Arc<CredentialStore>) -> Self {
        Self {
            http,
            config,
            store,
            flight: SingleFlight::new(),
        }
    }

    /// Obtain a renewed access token.
    ///
    /// `stale_header` is the `Authorization` value the failed request was
    /// sent with. If the store has already moved on to a different
    /// credential, that credential is returned without calling the server.
    #[instrument(skip_all)]
    pub async fn renew(&self, stale_header: Option<&str>) -> Result<String, ApiError> {
        if let Some(stale) = stale_header {
            let current = self.store.snapshot().await;
            if let (Some(header), Some(token)) = (current.authorization(), current.access_token)
                && header != stale
            {
                debug!("Credential already renewed by another request");
                return Ok(token.as_str().to_string());
            }
        }

        let http = self.http.clone();
        let config = Arc::clone(&self.config);
        let store = Arc::clone(&self.store);
        self.flight
            .run(move || renew_session(http, config, store))
            .await
    }

    /// True while a renewal call is pending.
    pub fn is_refreshing(&self) -> bool {
        self.flight.is_in_flight()
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_path", &self.config.refresh_path)
            .field("flight", &self.flight)
            .finish()
    }
}

async fn renew_session(
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    store: Arc<CredentialStore>,
) -> Result<String, ApiError> {
    let Some(refresh_token) = store.refresh_token().await else {
        info!("No refresh token stored, ending session");
        store.clear().await;
        return Err(session_expired(None));
    };

    let url = config.url_for(&config.refresh_path);
    debug!(%url, "Renewing credentials");

    match request_tokens(&http, &url, &refresh_token).await {
        Ok(tokens) => {
            if let Err(e) = store
                .set_tokens(
                    Some(&tokens.access_token),
                    tokens.refresh_token.as_deref(),
                    tokens.token_type.as_deref(),
                )
                .await
            {
                warn!(error = %e, "Renewed credential could not be persisted");
            }
            info!("Credentials renewed");
            Ok(tokens.access_token)
        }
        Err(err) => {
            warn!(error = %err, "Credential renewal failed, ending session");
            store.clear().await;
            Err(session_expired(Some(&err)))
        }
    }
}

/// The terminal error for a session that could not be renewed.
///
/// The renewal call's own failure is kept under `data.cause`.
fn session_expired(cause: Option<&ApiError>) -> ApiError {
    let error = ApiError::new(SESSION_EXPIRED_MESSAGE)
        .with_status(401)
        .with_code(CODE_SESSION_EXPIRED);
    match cause {
        Some(cause) => error.with_data(json!({
            "cause": {
                "message": cause.message,
                "status": cause.status,
                "code": cause.code,
                "data": cause.data.clone().unwrap_or(Value::Null),
            }
        })),
        None => error,
    }
}

/// The renewal call itself. Sent without an `Authorization` header and never
/// routed through the request pipeline.
async fn request_tokens(
    http: &reqwest::Client,
    url: &str,
    refresh_token: &RefreshToken,
) -> Result<TokenResponse, ApiError> {
    let response = http
        .post(url)
        .json(&RefreshRequest {
            refresh_token: refresh_token.as_str(),
        })
        .send()
        .await
        .map_err(|e| normalize::from_transport(&e))?;

    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|e| normalize::from_transport(&e))?;

    if !(200..300).contains(&status) {
        return Err(normalize::from_response(status, &body));
    }

    let tokens: TokenResponse =
        serde_json::from_slice(&body).map_err(|e| normalize::from_decode(status, &e))?;
    if tokens.access_token.is_empty() {
        return Err(ApiError::new("Renewal response did not include an access token")
            .with_status(status)
            .with_code(CODE_INVALID_RESPONSE));
    }

    Ok(tokens)
}
