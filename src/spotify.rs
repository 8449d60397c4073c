//! Primary catalog (streaming provider) client.
//!
//! Paginated collections come back as `{items, next, total}` pages and every
//! request carries `Authorization: Bearer <token>`. The token is always passed
//! in by the caller.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::future::Future;
use tracing::{debug, warn};

use crate::config::CatalogConfig;
use crate::error::CatalogError;
use crate::models::{AlbumInfo, ArtworkImage, PlaylistSummary, PoolSource, Track};

/// One page of a track collection, in provider order.
#[derive(Clone, Debug, Default)]
pub struct TrackPage {
    /// Every item that carried a track object, including local and id-less ones.
    pub tracks: Vec<Track>,
    /// Raw item count, used to advance offsets.
    pub item_count: usize,
    pub next: Option<String>,
    pub total: u32,
}

/// Page-fetching seam used by the pool builder.
pub trait PrimaryCatalog {
    fn fetch_tracks(
        &self,
        token: &str,
        source: &PoolSource,
        offset: u32,
        limit: u32,
    ) -> impl Future<Output = Result<TrackPage, CatalogError>> + Send;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Debug, Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<Option<T>>,
    next: Option<String>,
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct TrackItem {
    #[serde(default)]
    is_local: bool,
    track: Option<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    artists: Vec<ArtistObject>,
    album: Option<AlbumObject>,
    #[serde(default)]
    is_local: bool,
}

#[derive(Debug, Deserialize)]
struct ArtistObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumObject {
    name: Option<String>,
    #[serde(default)]
    images: Vec<ImageObject>,
}

#[derive(Debug, Deserialize)]
struct ImageObject {
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

impl From<ImageObject> for ArtworkImage {
    fn from(img: ImageObject) -> Self {
        ArtworkImage {
            url: img.url,
            width: img.width,
            height: img.height,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistObject {
    id: String,
    name: String,
    images: Option<Vec<ImageObject>>,
    tracks: Option<TracksRef>,
}

#[derive(Debug, Deserialize)]
struct TracksRef {
    total: u32,
}

#[derive(Debug, Deserialize)]
struct UserObject {
    id: String,
    display_name: Option<String>,
}

impl TrackItem {
    fn into_track(self) -> Option<Track> {
        let track = self.track?;
        Some(Track {
            id: track.id.unwrap_or_default(),
            title: track.name.unwrap_or_default(),
            artists: track.artists.into_iter().map(|a| a.name).collect(),
            album: track.album.map(|album| AlbumInfo {
                name: album.name.unwrap_or_default(),
                images: album.images.into_iter().map(ArtworkImage::from).collect(),
            }),
            is_local: self.is_local || track.is_local,
        })
    }
}

impl PlaylistObject {
    fn into_summary(self) -> PlaylistSummary {
        PlaylistSummary {
            image_url: self
                .images
                .and_then(|images| images.into_iter().next())
                .map(|img| img.url),
            track_total: self.tracks.map(|t| t.total),
            source: PoolSource::Playlist(self.id),
            name: self.name,
        }
    }
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, CatalogError> {
    serde_json::from_str(body).map_err(|e| CatalogError::Parse(e.to_string()))
}

/// Parses a playlist-tracks or saved-tracks page.
pub fn parse_track_page(body: &str) -> Result<TrackPage, CatalogError> {
    let page: Paging<TrackItem> = parse_json(body)?;
    let item_count = page.items.len();
    Ok(TrackPage {
        tracks: page
            .items
            .into_iter()
            .flatten()
            .filter_map(TrackItem::into_track)
            .collect(),
        item_count,
        next: page.next,
        total: page.total,
    })
}

fn parse_playlist_page(body: &str) -> Result<(Vec<PlaylistSummary>, Option<String>), CatalogError> {
    let page: Paging<PlaylistObject> = parse_json(body)?;
    let playlists = page
        .items
        .into_iter()
        .flatten()
        .map(PlaylistObject::into_summary)
        .collect();
    Ok((playlists, page.next))
}

// ============================================================================
// HTTP Client
// ============================================================================

pub struct SpotifyClient {
    http_client: reqwest::Client,
    api_base: String,
}

impl SpotifyClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_base: config.spotify_api_base.trim_end_matches('/').to_string(),
        })
    }

    fn tracks_endpoint(&self, source: &PoolSource) -> Result<String, CatalogError> {
        match source {
            PoolSource::Playlist(id) => Ok(format!("{}/playlists/{}/tracks", self.api_base, id)),
            PoolSource::LikedSongs => Ok(format!("{}/me/tracks", self.api_base)),
            PoolSource::Guest(id) => Err(CatalogError::UnsupportedSource(id.clone())),
        }
    }

    async fn get_body(
        &self,
        token: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<String, CatalogError> {
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CatalogError::Unauthorized);
        }
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }

        Ok(response.text().await?)
    }

    /// "Liked Songs" followed by the user's playlists, following `next` links
    /// until exhausted.
    ///
    /// A 401 anywhere aborts with [`CatalogError::Unauthorized`]. Other failures
    /// after the first page keep what was already collected.
    pub async fn playlists(&self, token: &str) -> Result<Vec<PlaylistSummary>, CatalogError> {
        let mut all = Vec::new();
        let mut next_url = Some(format!("{}/me/playlists?limit=50", self.api_base));

        while let Some(url) = next_url.take() {
            debug!(url = %url, "Fetching playlists page");
            let page = self
                .get_body(token, self.http_client.get(&url))
                .await
                .and_then(|body| parse_playlist_page(&body));

            match page {
                Ok((mut playlists, next)) => {
                    all.append(&mut playlists);
                    next_url = next;
                }
                Err(CatalogError::Unauthorized) => return Err(CatalogError::Unauthorized),
                Err(e) if all.is_empty() => return Err(e),
                Err(e) => {
                    warn!(error = %e, collected = all.len(), "Playlist listing truncated");
                    break;
                }
            }
        }

        all.insert(0, PlaylistSummary::liked_songs());
        Ok(all)
    }

    /// `GET /me`, used to validate a credential.
    pub async fn current_user(&self, token: &str) -> Result<UserProfile, CatalogError> {
        let url = format!("{}/me", self.api_base);
        let body = self.get_body(token, self.http_client.get(&url)).await?;
        let user: UserObject = parse_json(&body)?;
        Ok(UserProfile {
            id: user.id,
            display_name: user.display_name,
        })
    }
}

impl PrimaryCatalog for SpotifyClient {
    async fn fetch_tracks(
        &self,
        token: &str,
        source: &PoolSource,
        offset: u32,
        limit: u32,
    ) -> Result<TrackPage, CatalogError> {
        let endpoint = self.tracks_endpoint(source)?;
        debug!(source = %source, offset, limit, "Fetching track page");

        let (offset, limit) = (offset.to_string(), limit.to_string());
        let request = self.http_client.get(&endpoint).query(&[
            ("market", "from_token"),
            ("limit", limit.as_str()),
            ("offset", offset.as_str()),
        ]);

        let body = self.get_body(token, request).await?;
        parse_track_page(&body)
    }
}
