//! Preview resolution: find a playable preview for a primary-catalog track in
//! the secondary catalog.
//!
//! A wrong preview breaks the game, so every failure mode collapses to "no
//! match": transport errors, timeouts and malformed responses are logged and
//! reported as `None`, never raised to the caller.

use tracing::{debug, info, warn};

use crate::config::MatchConfig;
use crate::itunes::{upscale_artwork, CandidateSearch};
use crate::models::{CatalogCandidate, MatchScore, ResolvedPreview, Track};
use crate::scoring::{BestMatch, Matcher, TrackQuery};

/// Everything one resolution saw, for callers that want more than the answer.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub query: TrackQuery,
    pub candidates: Vec<CatalogCandidate>,
    /// Parallel to `candidates`.
    pub scores: Vec<MatchScore>,
    pub best: Option<BestMatch>,
    /// Set when the lookup itself failed (network, status, parse, timeout).
    pub lookup_error: Option<String>,
}

impl Resolution {
    pub fn preview(&self) -> Option<ResolvedPreview> {
        let best = self.best.as_ref()?;
        let winner = self.candidates.get(best.index)?;
        Some(ResolvedPreview {
            preview_url: winner.preview_url.clone()?,
            artwork_url: winner.artwork_url.as_deref().map(upscale_artwork),
        })
    }

    pub fn best_candidate(&self) -> Option<&CatalogCandidate> {
        self.best.as_ref().and_then(|b| self.candidates.get(b.index))
    }
}

pub struct PreviewResolver<S> {
    search: S,
    matcher: Matcher,
}

impl<S: CandidateSearch> PreviewResolver<S> {
    pub fn new(search: S, config: MatchConfig) -> Self {
        Self {
            search,
            matcher: Matcher::new(config),
        }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn search_backend(&self) -> &S {
        &self.search
    }

    /// Preview URL and artwork for `title` by `artist`, or `None` when no
    /// candidate passes the gate. `None` is definitive, not transient.
    pub async fn resolve(
        &self,
        title: &str,
        artist: &str,
        album: Option<&str>,
    ) -> Option<ResolvedPreview> {
        self.resolve_detailed(TrackQuery::new(title, artist, album))
            .await
            .preview()
    }

    /// Resolves using the track's primary artist and album name.
    pub async fn resolve_track(&self, track: &Track) -> Option<ResolvedPreview> {
        self.resolve(&track.title, track.primary_artist(), track.album_name())
            .await
    }

    pub async fn resolve_detailed(&self, query: TrackQuery) -> Resolution {
        let config = self.matcher.config();
        let term = query.search_term();

        let lookup = tokio::time::timeout(
            config.lookup_timeout(),
            self.search.search(&term, config.search_limit),
        )
        .await;

        let (candidates, lookup_error) = match lookup {
            Ok(Ok(candidates)) => (candidates, None),
            Ok(Err(e)) => {
                warn!(term = %term, error = %e, "Preview search failed; treating as no match");
                (Vec::new(), Some(e.to_string()))
            }
            Err(_) => {
                warn!(
                    term = %term,
                    timeout = ?config.lookup_timeout(),
                    "Preview search timed out; treating as no match"
                );
                (Vec::new(), Some("lookup timed out".to_string()))
            }
        };

        let scores = self.matcher.score_all(&query, &candidates);
        for (candidate, score) in candidates.iter().zip(&scores) {
            if let MatchScore::Rejected(reason) = score {
                debug!(
                    candidate_title = %candidate.title,
                    candidate_artist = %candidate.artist,
                    reason = reason.label(),
                    "Rejected candidate"
                );
            }
        }

        let best = Matcher::select_best(&scores);
        match best.as_ref().and_then(|b| candidates.get(b.index).map(|c| (b, c))) {
            Some((b, winner)) => info!(
                title = %query.title,
                artist = %query.artist,
                matched = %winner.title,
                score = b.score,
                "Resolved preview"
            ),
            None => info!(
                title = %query.title,
                artist = %query.artist,
                candidates = candidates.len(),
                "No acceptable preview"
            ),
        }

        Resolution {
            query,
            candidates,
            scores,
            best,
            lookup_error,
        }
    }
}
