//! The credential held by a session.

use crate::tokens::{AccessToken, DEFAULT_TOKEN_TYPE, RefreshToken};

/// Access/refresh token pair and its type.
///
/// The two tokens are independently optional. A missing access token means
/// the session is unauthenticated, whatever the refresh token says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: Option<AccessToken>,
    pub refresh_token: Option<RefreshToken>,
    pub token_type: String,
}

impl Credential {
    /// An empty credential with the default token type.
    pub fn empty() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
        }
    }

    /// True if an access token is present. Presence only; expiry is never inspected.
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Formats the `Authorization` header value, or `None` when unauthenticated.
    pub fn authorization(&self) -> Option<String> {
        self.access_token
            .as_ref()
            .map(|token| format!("{} {}", self.token_type, token.as_str()))
    }
}

impl Default for Credential {
    fn default() -> Self {
        Self::empty()
    }
}
