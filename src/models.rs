//! Core data models for the guessing game.
//!
//! This module contains the track, candidate and preview types shared by the
//! catalog clients, the resolver and the game session, plus the statistics
//! collected by the resolution report.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Primary Catalog Models
// ============================================================================

/// Album artwork reference from the primary catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtworkImage {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlbumInfo {
    pub name: String,
    pub images: Vec<ArtworkImage>,
}

/// A track from the primary catalog. Immutable once fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub title: String,
    /// Credited order; the first entry is the primary artist.
    pub artists: Vec<String>,
    pub album: Option<AlbumInfo>,
    pub is_local: bool,
}

impl Track {
    pub fn primary_artist(&self) -> &str {
        self.artists.first().map(String::as_str).unwrap_or("")
    }

    pub fn album_name(&self) -> Option<&str> {
        self.album
            .as_ref()
            .map(|a| a.name.as_str())
            .filter(|name| !name.trim().is_empty())
    }

    /// First album image, if the primary catalog supplied any.
    pub fn artwork_url(&self) -> Option<&str> {
        self.album
            .as_ref()
            .and_then(|a| a.images.first())
            .map(|img| img.url.as_str())
    }

    /// Local files and id-less entries cannot be resolved or tracked.
    pub fn is_playable_entry(&self) -> bool {
        !self.is_local && !self.id.trim().is_empty()
    }
}

/// Where a track pool comes from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PoolSource {
    Playlist(String),
    /// The user's saved-tracks library.
    LikedSongs,
    /// A fixed in-memory playlist for guest mode.
    Guest(String),
}

pub const LIKED_SONGS_ID: &str = "LIKED_SONGS";
pub const GUEST_PREFIX: &str = "guest_";

impl FromStr for PoolSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(if s == LIKED_SONGS_ID {
            PoolSource::LikedSongs
        } else if s.starts_with(GUEST_PREFIX) {
            PoolSource::Guest(s.to_string())
        } else {
            PoolSource::Playlist(s.to_string())
        })
    }
}

impl fmt::Display for PoolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolSource::Playlist(id) | PoolSource::Guest(id) => f.write_str(id),
            PoolSource::LikedSongs => f.write_str(LIKED_SONGS_ID),
        }
    }
}

/// Entry in the playlist picker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub source: PoolSource,
    pub name: String,
    pub track_total: Option<u32>,
    pub image_url: Option<String>,
}

impl PlaylistSummary {
    /// Synthetic entry for the saved-tracks library, listed first.
    pub fn liked_songs() -> Self {
        Self {
            source: PoolSource::LikedSongs,
            name: "Liked Songs".to_string(),
            track_total: None,
            image_url: None,
        }
    }
}

// ============================================================================
// Secondary Catalog Models
// ============================================================================

/// One search result from the secondary catalog. Lives for a single resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogCandidate {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub preview_url: Option<String>,
    pub artwork_url: Option<String>,
}

/// Why a candidate was refused. Any of these makes the candidate unselectable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingPreview,
    ArtistMismatch,
    /// Candidate carries a qualifier ("live", "remix", ...) the target lacks.
    BannedQualifier(String),
    /// Normalized title is empty, so no comparison is trustworthy.
    EmptyTitleKey,
    TitleMismatch,
}

impl RejectReason {
    /// Stable label for stats keys.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::MissingPreview => "missing_preview",
            RejectReason::ArtistMismatch => "artist_mismatch",
            RejectReason::BannedQualifier(_) => "banned_qualifier",
            RejectReason::EmptyTitleKey => "empty_title_key",
            RejectReason::TitleMismatch => "title_mismatch",
        }
    }
}

/// Score of a candidate relative to one query. Only `Accepted` is selectable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchScore {
    Rejected(RejectReason),
    Accepted(u32),
}

impl MatchScore {
    pub fn value(&self) -> Option<u32> {
        match self {
            MatchScore::Accepted(v) if *v > 0 => Some(*v),
            _ => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.value().is_some()
    }
}

/// A playable preview for one track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPreview {
    pub preview_url: String,
    /// Higher-resolution artwork from the secondary catalog, when available.
    pub artwork_url: Option<String>,
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Resolution statistics for a whole pool, written by `resolve-report`.
#[derive(Default, Debug, Clone, Serialize)]
pub struct ResolveStats {
    pub total_tracks: usize,
    pub resolved: usize,
    pub unresolved: usize,

    // Winning score classes
    pub exact_title_matches: usize,
    pub partial_title_matches: usize,
    pub album_bonus_applied: usize,

    // Candidate-level rejections across all queries
    pub rejected_missing_preview: usize,
    pub rejected_artist_mismatch: usize,
    pub rejected_banned_qualifier: usize,
    pub rejected_empty_title_key: usize,
    pub rejected_title_mismatch: usize,

    /// Unresolved tracks whose closest rejected title was still >= 0.8 similar.
    pub near_misses: usize,
    pub queries_without_results: usize,

    pub elapsed_seconds: f64,
}

impl ResolveStats {
    /// Calculate match rate as a percentage
    pub fn match_rate(&self) -> f64 {
        if self.total_tracks == 0 {
            0.0
        } else {
            100.0 * self.resolved as f64 / self.total_tracks as f64
        }
    }

    pub fn record_rejection(&mut self, reason: &RejectReason) {
        match reason {
            RejectReason::MissingPreview => self.rejected_missing_preview += 1,
            RejectReason::ArtistMismatch => self.rejected_artist_mismatch += 1,
            RejectReason::BannedQualifier(_) => self.rejected_banned_qualifier += 1,
            RejectReason::EmptyTitleKey => self.rejected_empty_title_key += 1,
            RejectReason::TitleMismatch => self.rejected_title_mismatch += 1,
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, is_local: bool) -> Track {
        Track {
            id: id.to_string(),
            title: "Song".to_string(),
            artists: vec!["Artist".to_string(), "Guest".to_string()],
            album: None,
            is_local,
        }
    }

    #[test]
    fn test_pool_source_parsing() {
        assert_eq!("LIKED_SONGS".parse::<PoolSource>().unwrap(), PoolSource::LikedSongs);
        assert_eq!(
            "guest_top_hits".parse::<PoolSource>().unwrap(),
            PoolSource::Guest("guest_top_hits".to_string())
        );
        assert_eq!(
            "37i9dQZF1DXcBWIGoYBM5M".parse::<PoolSource>().unwrap(),
            PoolSource::Playlist("37i9dQZF1DXcBWIGoYBM5M".to_string())
        );
        assert_eq!(PoolSource::LikedSongs.to_string(), "LIKED_SONGS");
    }

    #[test]
    fn test_playable_entry() {
        assert!(track("abc", false).is_playable_entry());
        assert!(!track("abc", true).is_playable_entry());
        assert!(!track("", false).is_playable_entry());
        assert_eq!(track("abc", false).primary_artist(), "Artist");
    }

    #[test]
    fn test_zero_score_is_not_selectable() {
        assert_eq!(MatchScore::Accepted(10).value(), Some(10));
        assert_eq!(MatchScore::Accepted(0).value(), None);
        assert!(!MatchScore::Rejected(RejectReason::TitleMismatch).is_accepted());
    }

    #[test]
    fn test_match_rate() {
        let stats = ResolveStats {
            total_tracks: 4,
            resolved: 3,
            ..Default::default()
        };
        assert!((stats.match_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(ResolveStats::default().match_rate(), 0.0);
    }
}
