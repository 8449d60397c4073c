//! Secondary catalog (public song search) client.
//!
//! `GET /search?term=<q>&media=music&entity=song&limit=<n>` returns
//! `{resultCount, results: [...]}`. No credential is required.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::future::Future;
use tracing::debug;

use crate::config::CatalogConfig;
use crate::error::CatalogError;
use crate::models::CatalogCandidate;

/// Search seam used by the resolver. Implemented over HTTP by [`ItunesClient`].
pub trait CandidateSearch {
    /// Candidates in catalog result order.
    fn search(
        &self,
        term: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<CatalogCandidate>, CatalogError>> + Send;
}

/// Low-resolution artwork marker, e.g. ".../100x100bb.jpg".
static ARTWORK_SIZE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d{2,3}x\d{2,3}bb\.").unwrap());

const ARTWORK_UPSCALED: &str = "/600x600bb.";

/// Best-effort higher-resolution artwork URL. Unknown patterns pass through.
pub fn upscale_artwork(url: &str) -> String {
    ARTWORK_SIZE.replace(url, ARTWORK_UPSCALED).into_owned()
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "resultCount", default)]
    result_count: u32,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(rename = "trackName")]
    track_name: Option<String>,
    #[serde(rename = "artistName")]
    artist_name: Option<String>,
    #[serde(rename = "collectionName")]
    collection_name: Option<String>,
    #[serde(rename = "previewUrl")]
    preview_url: Option<String>,
    #[serde(rename = "artworkUrl100")]
    artwork_url_100: Option<String>,
}

impl SearchResult {
    fn into_candidate(self) -> Option<CatalogCandidate> {
        Some(CatalogCandidate {
            title: self.track_name?,
            artist: self.artist_name.unwrap_or_default(),
            album: self.collection_name,
            preview_url: self.preview_url,
            artwork_url: self.artwork_url_100,
        })
    }
}

/// Parses a search response body, dropping results without a track name.
pub fn parse_search_response(body: &str) -> Result<Vec<CatalogCandidate>, CatalogError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| CatalogError::Parse(e.to_string()))?;
    debug!(
        result_count = response.result_count,
        returned = response.results.len(),
        "Parsed search response"
    );
    Ok(response
        .results
        .into_iter()
        .filter_map(SearchResult::into_candidate)
        .collect())
}

pub struct ItunesClient {
    http_client: reqwest::Client,
    search_url: String,
}

impl ItunesClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            search_url: config.itunes_search_url.clone(),
        })
    }
}

impl CandidateSearch for ItunesClient {
    async fn search(&self, term: &str, limit: u32) -> Result<Vec<CatalogCandidate>, CatalogError> {
        debug!(term = %term, limit, "Querying song search");

        let limit = limit.to_string();
        let response = self
            .http_client
            .get(&self.search_url)
            .query(&[
                ("term", term),
                ("media", "music"),
                ("entity", "song"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        parse_search_response(&body)
    }
}
