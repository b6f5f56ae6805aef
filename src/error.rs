//! Error taxonomy shared by all provider adapters

use thiserror::Error;

/// Terminal outcomes of a provider fetch.
///
/// Adapters map every failure into one of these kinds; the orchestrator
/// converts them to per-provider error messages without ever letting one
/// provider's failure touch another.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No credential found in any of the adapter's sources.
    #[error("{0}")]
    NotLoggedIn(String),

    /// Refresh was attempted and the provider still rejects us, or an auth
    /// failure happened with no refresh token to fall back on.
    #[error("{0}")]
    AuthExpired(String),

    #[error("No refresh token available")]
    NoRefreshToken,

    /// Refresh endpoint reachable but the response was rejected or malformed.
    #[error("Token refresh failed")]
    RefreshFailed,

    /// Non-2xx, non-auth HTTP status from the usage endpoint.
    #[error("HTTP error {0}")]
    Http(u16),

    /// 2xx response that could not be parsed or is missing required fields.
    #[error("Invalid response from server")]
    InvalidResponse,

    /// Reachable and parseable but semantically empty (e.g. no subscription).
    #[error("{0}")]
    NoData(String),

    /// DNS / connect / timeout from the HTTP collaborator.
    #[error("Network error: {0}")]
    Transport(String),
}

impl ProviderError {
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ProviderError::AuthExpired(_) | ProviderError::NoRefreshToken
        )
    }
}
