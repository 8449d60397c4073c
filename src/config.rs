//! Configuration for the catalogs, matcher, pool builder and game session.
//!
//! Every field has a default, so an empty (or absent) TOML file yields the
//! stock behaviour. Binaries layer CLI flags on top of the loaded file.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::normalize::ComparisonStrategy;

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
pub const ITUNES_SEARCH_URL: &str = "https://itunes.apple.com/search";
const USER_AGENT: &str = concat!("snippet-guess/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub matching: MatchConfig,
    pub pool: PoolConfig,
    pub game: GameConfig,
}

impl Config {
    /// Load from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml(&text)
            }
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub spotify_api_base: String,
    pub itunes_search_url: String,
    /// Per-request bound for both catalogs.
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl CatalogConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            spotify_api_base: SPOTIFY_API_BASE.to_string(),
            itunes_search_url: ITUNES_SEARCH_URL.to_string(),
            http_timeout_secs: 10,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// Heuristic constants of the preview matcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Result page size requested from the secondary catalog.
    pub search_limit: u32,
    /// Containment matches must exceed this length similarity.
    pub min_length_ratio: f64,
    /// Qualifiers a candidate title may only carry if the target does too.
    pub banned_terms: Vec<String>,
    pub exact_title_score: u32,
    pub partial_title_score: u32,
    pub album_exact_bonus: u32,
    pub album_partial_bonus: u32,
    /// Upper bound on one resolution (search + scoring).
    pub lookup_timeout_ms: u64,
    pub comparison: ComparisonStrategy,
}

impl MatchConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms.max(1))
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            search_limit: 50,
            min_length_ratio: 0.7,
            banned_terms: ["remix", "mix", "live", "instrumental", "club", "edit"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exact_title_score: 10,
            partial_title_score: 5,
            album_exact_bonus: 3,
            album_partial_bonus: 1,
            lookup_timeout_ms: 15_000,
            comparison: ComparisonStrategy::AsciiStrict,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub playlist_page_size: u32,
    pub library_page_size: u32,
    /// Concurrent page requests per background batch.
    pub batch_width: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            playlist_page_size: 100,
            library_page_size: 50,
            batch_width: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub initial_snippet_ms: u32,
    pub snippet_step_ms: u32,
    pub max_snippet_ms: u32,
    /// Absolute cap on the recency history.
    pub recent_cap: usize,
    /// Recency history relative to pool size (rounded up).
    pub recent_ratio: f64,
    /// Resolver calls allowed per round start.
    pub max_attempts_per_round: usize,
}

impl GameConfig {
    /// `min(recent_cap, ceil(pool_size * recent_ratio))`
    pub fn recent_limit(&self, pool_size: usize) -> usize {
        let relative = (pool_size as f64 * self.recent_ratio).ceil() as usize;
        self.recent_cap.min(relative)
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            initial_snippet_ms: 2_000,
            snippet_step_ms: 2_000,
            max_snippet_ms: 30_000,
            recent_cap: 50,
            recent_ratio: 0.5,
            max_attempts_per_round: 25,
        }
    }
}
