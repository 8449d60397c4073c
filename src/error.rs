//! Error types shared by the catalog clients, the pool builder and config loading.

use thiserror::Error;

/// Failure talking to either catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// 401 from the primary catalog. Never retried.
    #[error("Unauthorized: credential rejected by catalog")]
    Unauthorized,

    #[error("API error {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Source not served by this catalog: {0}")]
    UnsupportedSource(String),
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CatalogError::Timeout
        } else if e.is_decode() {
            CatalogError::Parse(e.to_string())
        } else {
            CatalogError::Network(e.to_string())
        }
    }
}

/// Failure building a track pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("No access token available; cannot load tracks")]
    MissingCredential,

    /// Auth-error signal for the session layer (re-auth flow).
    #[error("Access token rejected; re-authentication required")]
    Unauthorized,

    #[error("Unknown guest playlist: {0}")]
    UnknownGuestPlaylist(String),

    #[error(transparent)]
    Catalog(CatalogError),
}

impl From<CatalogError> for PoolError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::Unauthorized => PoolError::Unauthorized,
            other => PoolError::Catalog(other),
        }
    }
}

/// Failure starting snippet playback.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Failed to load preview audio: {0}")]
    Load(String),

    #[error("No preview URL available for this track")]
    MissingUrl,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
