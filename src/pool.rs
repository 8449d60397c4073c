//! Track pool construction from paginated primary-catalog collections.
//!
//! The first page is returned as soon as it arrives so a round can start
//! immediately. Remaining pages are fetched in the background, a few at a time,
//! and appended to the shared pool in offset order.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{CatalogError, PoolError};
use crate::guest::guest_tracks;
use crate::models::{PoolSource, Track};
use crate::spotify::PrimaryCatalog;

/// Credential context supplied by the (external) session layer.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    pub access_token: Option<String>,
    pub guest: bool,
}

impl AuthContext {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
            guest: false,
        }
    }

    pub fn guest() -> Self {
        Self {
            access_token: None,
            guest: true,
        }
    }
}

/// Append-only, shared list of playable tracks.
#[derive(Clone, Debug, Default)]
pub struct TrackPool {
    tracks: Arc<RwLock<Vec<Arc<Track>>>>,
}

impl TrackPool {
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        Self {
            tracks: Arc::new(RwLock::new(tracks.into_iter().map(Arc::new).collect())),
        }
    }

    pub async fn snapshot(&self) -> Vec<Arc<Track>> {
        self.tracks.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.tracks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn append(&self, tracks: Vec<Track>) {
        if tracks.is_empty() {
            return;
        }
        let mut guard = self.tracks.write().await;
        guard.extend(tracks.into_iter().map(Arc::new));
    }
}

/// Outcome of the background page fetches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolLoadReport {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub tracks_added: usize,
    /// A 401 stopped pagination; the session layer should re-authenticate.
    pub unauthorized: bool,
}

/// A pool whose first page is ready, plus the still-running background fetch.
pub struct PoolLoad {
    pub pool: TrackPool,
    /// Item total reported by the provider.
    pub total: u32,
    pub initial_count: usize,
    pub background: Option<JoinHandle<PoolLoadReport>>,
}

impl PoolLoad {
    /// Waits for background pages. A panicked task counts as an empty report.
    pub async fn finish(self) -> (TrackPool, PoolLoadReport) {
        let report = match self.background {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                warn!(error = %e, "Background pool fetch aborted");
                PoolLoadReport::default()
            }),
            None => PoolLoadReport::default(),
        };
        (self.pool, report)
    }
}

/// Drops local files and entries without a stable id.
fn playable(tracks: Vec<Track>) -> Vec<Track> {
    tracks.into_iter().filter(Track::is_playable_entry).collect()
}

pub struct TrackPoolBuilder<C> {
    catalog: Arc<C>,
    config: PoolConfig,
}

impl<C> TrackPoolBuilder<C>
where
    C: PrimaryCatalog + Send + Sync + 'static,
{
    pub fn new(catalog: Arc<C>, config: PoolConfig) -> Self {
        Self { catalog, config }
    }

    fn page_size(&self, source: &PoolSource) -> u32 {
        let size = match source {
            PoolSource::LikedSongs => self.config.library_page_size,
            _ => self.config.playlist_page_size,
        };
        size.max(1)
    }

    /// Loads the first page and schedules the rest.
    pub async fn load_tracks(
        &self,
        auth: &AuthContext,
        source: &PoolSource,
    ) -> Result<PoolLoad, PoolError> {
        if let PoolSource::Guest(id) = source {
            return self.load_guest(id);
        }
        if auth.guest {
            return Err(PoolError::UnknownGuestPlaylist(source.to_string()));
        }
        let token = auth
            .access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(PoolError::MissingCredential)?;

        let limit = self.page_size(source);
        let first = self.catalog.fetch_tracks(token, source, 0, limit).await?;
        let total = first.total;
        let item_count = first.item_count as u32;
        let initial = playable(first.tracks);
        info!(
            source = %source,
            fetched = item_count,
            valid = initial.len(),
            total,
            "Initial track page"
        );

        let pool = TrackPool::from_tracks(initial);
        let initial_count = pool.len().await;

        let offsets: Vec<u32> = if item_count == 0 {
            Vec::new()
        } else {
            (item_count..total).step_by(limit as usize).collect()
        };

        let background = if offsets.is_empty() {
            None
        } else {
            debug!(pages = offsets.len(), "Scheduling background page fetch");
            Some(tokio::spawn(fetch_remaining(
                Arc::clone(&self.catalog),
                token.to_string(),
                source.clone(),
                offsets,
                limit,
                self.config.batch_width.max(1),
                pool.clone(),
            )))
        };

        Ok(PoolLoad {
            pool,
            total,
            initial_count,
            background,
        })
    }

    fn load_guest(&self, id: &str) -> Result<PoolLoad, PoolError> {
        let tracks =
            guest_tracks(id).ok_or_else(|| PoolError::UnknownGuestPlaylist(id.to_string()))?;
        let total = tracks.len() as u32;
        let initial_count = tracks.len();
        Ok(PoolLoad {
            pool: TrackPool::from_tracks(tracks),
            total,
            initial_count,
            background: None,
        })
    }
}

async fn fetch_remaining<C>(
    catalog: Arc<C>,
    token: String,
    source: PoolSource,
    offsets: Vec<u32>,
    limit: u32,
    batch_width: usize,
    pool: TrackPool,
) -> PoolLoadReport
where
    C: PrimaryCatalog + Send + Sync + 'static,
{
    let mut report = PoolLoadReport::default();

    for (batch_no, batch) in offsets.chunks(batch_width).enumerate() {
        let results = join_all(
            batch
                .iter()
                .map(|&offset| catalog.fetch_tracks(&token, &source, offset, limit)),
        )
        .await;

        // join_all preserves request order, so pages land in offset order.
        let mut batch_tracks = Vec::new();
        for (offset, result) in batch.iter().zip(results) {
            match result {
                Ok(page) => {
                    report.pages_fetched += 1;
                    batch_tracks.extend(playable(page.tracks));
                }
                Err(CatalogError::Unauthorized) => {
                    report.unauthorized = true;
                }
                Err(e) => {
                    report.pages_failed += 1;
                    warn!(source = %source, offset, error = %e, "Track page failed; skipping");
                }
            }
        }

        report.tracks_added += batch_tracks.len();
        pool.append(batch_tracks).await;
        let pool_size = pool.len().await;
        info!(source = %source, batch = batch_no + 1, pool_size, "Background batch fetched");

        if report.unauthorized {
            warn!(source = %source, "Access token rejected; stopping pagination");
            break;
        }
    }

    report
}
