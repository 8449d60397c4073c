//! Candidate scoring for preview resolution.
//!
//! This module contains the accept/reject gate and ranking applied to every
//! secondary-catalog result, independently of how results are fetched:
//! - Acceptance gate (preview present, artist overlap, banned qualifiers)
//! - Title scoring (exact key match, or containment with length similarity)
//! - Album bonus
//! - Best-candidate selection (highest score, first result wins ties)

use crate::config::MatchConfig;
use crate::models::{CatalogCandidate, MatchScore, RejectReason};
use crate::normalize::clean_for_query;

/// The primary-catalog track a resolution is looking for.
#[derive(Clone, Debug)]
pub struct TrackQuery {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
}

impl TrackQuery {
    pub fn new(title: &str, artist: &str, album: Option<&str>) -> Self {
        Self {
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.map(str::to_string),
        }
    }

    /// Outbound search term: cleaned title plus artist.
    pub fn search_term(&self) -> String {
        let cleaned = clean_for_query(&self.title);
        let title = if cleaned.is_empty() {
            self.title.trim()
        } else {
            cleaned.as_str()
        };
        format!("{} {}", title, self.artist.trim()).trim().to_string()
    }
}

/// Best surviving candidate of one search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BestMatch {
    pub index: usize,
    pub score: u32,
}

// ============================================================================
// Gate Helpers
// ============================================================================

/// Case-insensitive substring test in either direction. Blank artists never pass.
pub fn artists_overlap(candidate_artist: &str, target_artist: &str) -> bool {
    let candidate = candidate_artist.trim().to_lowercase();
    let target = target_artist.trim().to_lowercase();
    if candidate.is_empty() || target.is_empty() {
        return false;
    }
    candidate.contains(&target) || target.contains(&candidate)
}

/// `1 - |len(a) - len(b)| / max(len(a), len(b))`, 1.0 for two empty strings.
pub fn length_ratio(a: &str, b: &str) -> f64 {
    let (la, lb) = (a.chars().count(), b.chars().count());
    let max_len = la.max(lb);
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (la.abs_diff(lb) as f64 / max_len as f64)
}

// ============================================================================
// Matcher
// ============================================================================

/// Scores candidates against a [`TrackQuery`] using a [`MatchConfig`].
#[derive(Debug, Clone)]
pub struct Matcher {
    config: MatchConfig,
    banned: Vec<String>,
}

impl Matcher {
    pub fn new(config: MatchConfig) -> Self {
        let banned = config
            .banned_terms
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { config, banned }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Comparison key of a title or album: cleaned, then normalized.
    pub fn key(&self, text: &str) -> String {
        self.config.comparison.key(&clean_for_query(text))
    }

    /// First banned qualifier contained in the candidate title but absent from
    /// the target title. Substring match, so "Remixed" and "Megamix" count.
    pub fn banned_qualifier(&self, candidate_title: &str, target_title: &str) -> Option<&str> {
        let candidate = candidate_title.to_lowercase();
        let target = target_title.to_lowercase();
        self.banned
            .iter()
            .find(|term| candidate.contains(term.as_str()) && !target.contains(term.as_str()))
            .map(String::as_str)
    }

    /// Title score for two comparison keys, `None` when the titles do not match.
    pub fn title_score(&self, candidate_key: &str, target_key: &str) -> Option<u32> {
        if candidate_key == target_key {
            return Some(self.config.exact_title_score);
        }
        let contained =
            candidate_key.contains(target_key) || target_key.contains(candidate_key);
        if contained && length_ratio(candidate_key, target_key) > self.config.min_length_ratio {
            Some(self.config.partial_title_score)
        } else {
            None
        }
    }

    /// Exact album key beats containment; missing album info is neutral.
    pub fn album_bonus(&self, candidate_album: Option<&str>, target_album: Option<&str>) -> u32 {
        let (Some(candidate), Some(target)) = (candidate_album, target_album) else {
            return 0;
        };
        let (ck, tk) = (self.key(candidate), self.key(target));
        if ck.is_empty() || tk.is_empty() {
            0
        } else if ck == tk {
            self.config.album_exact_bonus
        } else if ck.contains(&tk) || tk.contains(&ck) {
            self.config.album_partial_bonus
        } else {
            0
        }
    }

    pub fn score(&self, query: &TrackQuery, candidate: &CatalogCandidate) -> MatchScore {
        if candidate
            .preview_url
            .as_deref()
            .map_or(true, |u| u.trim().is_empty())
        {
            return MatchScore::Rejected(RejectReason::MissingPreview);
        }
        if !artists_overlap(&candidate.artist, &query.artist) {
            return MatchScore::Rejected(RejectReason::ArtistMismatch);
        }
        if let Some(term) = self.banned_qualifier(&candidate.title, &query.title) {
            return MatchScore::Rejected(RejectReason::BannedQualifier(term.to_string()));
        }

        let candidate_key = self.key(&candidate.title);
        let target_key = self.key(&query.title);
        if candidate_key.is_empty() || target_key.is_empty() {
            return MatchScore::Rejected(RejectReason::EmptyTitleKey);
        }

        match self.title_score(&candidate_key, &target_key) {
            Some(title) => MatchScore::Accepted(
                title + self.album_bonus(candidate.album.as_deref(), query.album.as_deref()),
            ),
            None => MatchScore::Rejected(RejectReason::TitleMismatch),
        }
    }

    /// Scores every candidate in catalog order.
    pub fn score_all(
        &self,
        query: &TrackQuery,
        candidates: &[CatalogCandidate],
    ) -> Vec<MatchScore> {
        candidates.iter().map(|c| self.score(query, c)).collect()
    }

    /// Highest accepted score; ties go to the earliest result.
    pub fn select_best(scores: &[MatchScore]) -> Option<BestMatch> {
        let mut best: Option<BestMatch> = None;
        for (index, score) in scores.iter().enumerate() {
            let Some(value) = score.value() else { continue };
            if best.as_ref().map_or(true, |b| value > b.score) {
                best = Some(BestMatch { index, score: value });
            }
        }
        best
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(MatchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(title: &str, artist: &str) -> CatalogCandidate {
        CatalogCandidate {
            title: title.to_string(),
            artist: artist.to_string(),
            album: None,
            preview_url: Some(format!("http://preview.url/{}", title.len())),
            artwork_url: None,
        }
    }

    fn with_album(mut c: CatalogCandidate, album: &str) -> CatalogCandidate {
        c.album = Some(album.to_string());
        c
    }

    #[test]
    fn test_artists_overlap() {
        assert!(artists_overlap("Green Day", "green day"));
        assert!(artists_overlap("Rema & Selena Gomez", "Rema"));
        assert!(artists_overlap("Queen", "Queen & David Bowie"));
        assert!(!artists_overlap("5 Seconds of Summer", "Green Day"));
        assert!(!artists_overlap("", "Green Day"));
        assert!(!artists_overlap("Green Day", "  "));
    }

    #[test]
    fn test_length_ratio() {
        assert_eq!(length_ratio("abc", "abc"), 1.0);
        assert!((length_ratio("me", "meyoutogethersong") - 2.0 / 17.0).abs() < 1e-9);
        assert_eq!(length_ratio("", ""), 1.0);
    }

    #[test]
    fn test_wrong_artist_same_title_rejected() {
        let m = Matcher::default();
        let q = TrackQuery::new("American Idiot", "Green Day", None);
        assert_eq!(
            m.score(&q, &cand("American Idiot", "5 Seconds of Summer")),
            MatchScore::Rejected(RejectReason::ArtistMismatch)
        );
    }

    #[test]
    fn test_live_version_rejected() {
        let m = Matcher::default();
        let q = TrackQuery::new("American Idiot", "Green Day", None);
        assert_eq!(
            m.score(&q, &cand("American Idiot (Live at Irving Plaza)", "Green Day")),
            MatchScore::Rejected(RejectReason::BannedQualifier("live".to_string()))
        );
    }

    #[test]
    fn test_qualifier_allowed_when_target_has_it() {
        let m = Matcher::default();
        let q = TrackQuery::new("Dancing Queen - Live", "ABBA", None);
        assert!(m.score(&q, &cand("Dancing Queen (Live)", "ABBA")).is_accepted());
    }

    #[test]
    fn test_qualifier_matches_inside_words() {
        let m = Matcher::default();
        let q = TrackQuery::new("Flowers", "Miley Cyrus", None);
        assert_eq!(
            m.score(&q, &cand("Flowers (Remixed)", "Miley Cyrus")),
            MatchScore::Rejected(RejectReason::BannedQualifier("remix".to_string()))
        );
        assert_eq!(
            m.score(&q, &cand("Flowers - Edited", "Miley Cyrus")),
            MatchScore::Rejected(RejectReason::BannedQualifier("edit".to_string()))
        );
        let q = TrackQuery::new("Dancing Queen", "ABBA", None);
        assert_eq!(
            m.score(&q, &cand("Dancing Queen (Megamix)", "ABBA")),
            MatchScore::Rejected(RejectReason::BannedQualifier("mix".to_string()))
        );
    }

    #[test]
    fn test_qualifier_in_target_title_is_allowed() {
        let m = Matcher::default();
        // Target and candidate both contain "live" inside "Alive".
        let q = TrackQuery::new("Alive", "Pearl Jam", None);
        assert!(m.score(&q, &cand("Alive", "Pearl Jam")).is_accepted());
    }

    #[test]
    fn test_remix_rejected() {
        let m = Matcher::default();
        let q = TrackQuery::new("Flowers", "Miley Cyrus", None);
        assert!(matches!(
            m.score(&q, &cand("Flowers (Club Remix)", "Miley Cyrus")),
            MatchScore::Rejected(RejectReason::BannedQualifier(_))
        ));
    }

    #[test]
    fn test_short_title_collision_rejected() {
        let m = Matcher::default();
        let q = TrackQuery::new("Me & You Together Song", "The 1975", None);
        assert_eq!(
            m.score(&q, &cand("Me", "The 1975")),
            MatchScore::Rejected(RejectReason::TitleMismatch)
        );
    }

    #[test]
    fn test_exact_and_partial_scores() {
        let m = Matcher::default();
        let q = TrackQuery::new("Rio - 2009 Remaster", "Duran Duran", None);
        assert_eq!(
            m.score(&q, &cand("Rio [2009 Remaster]", "Duran Duran")),
            MatchScore::Accepted(10)
        );

        // "dontstopbelievin" inside "dontstopbelieving": ratio 16/17 > 0.7
        let q = TrackQuery::new("Don't Stop Believin'", "Journey", None);
        assert_eq!(m.score(&q, &cand("Don't Stop Believing", "Journey")), MatchScore::Accepted(5));
    }

    #[test]
    fn test_missing_preview_rejected() {
        let m = Matcher::default();
        let q = TrackQuery::new("Rio", "Duran Duran", None);
        let mut c = cand("Rio", "Duran Duran");
        c.preview_url = None;
        assert_eq!(m.score(&q, &c), MatchScore::Rejected(RejectReason::MissingPreview));
    }

    #[test]
    fn test_empty_title_key_rejected() {
        let m = Matcher::default();
        let q = TrackQuery::new("夜に駆ける", "YOASOBI", None);
        assert_eq!(
            m.score(&q, &cand("群青", "YOASOBI")),
            MatchScore::Rejected(RejectReason::EmptyTitleKey)
        );
    }

    #[test]
    fn test_album_bonus() {
        let m = Matcher::default();
        let q = TrackQuery::new("Rio", "Duran Duran", Some("Rio (Collector's Edition)"));
        let exact = with_album(cand("Rio", "Duran Duran"), "Rio");
        let partial = with_album(cand("Rio", "Duran Duran"), "Rio Remastered");
        let other = with_album(cand("Rio", "Duran Duran"), "Greatest");
        assert_eq!(m.score(&q, &exact), MatchScore::Accepted(13));
        assert_eq!(m.score(&q, &partial), MatchScore::Accepted(11));
        assert_eq!(m.score(&q, &other), MatchScore::Accepted(10));
        assert_eq!(m.score(&q, &cand("Rio", "Duran Duran")), MatchScore::Accepted(10));
    }

    #[test]
    fn test_select_best_prefers_first_on_tie() {
        let scores = vec![
            MatchScore::Rejected(RejectReason::TitleMismatch),
            MatchScore::Accepted(10),
            MatchScore::Accepted(10),
            MatchScore::Accepted(5),
        ];
        assert_eq!(Matcher::select_best(&scores), Some(BestMatch { index: 1, score: 10 }));
    }

    #[test]
    fn test_select_best_skips_holiday() {
        let m = Matcher::default();
        let q = TrackQuery::new("American Idiot", "Green Day", None);
        let candidates = vec![cand("Holiday", "Green Day"), cand("American Idiot", "Green Day")];
        let scores = m.score_all(&q, &candidates);
        assert_eq!(Matcher::select_best(&scores).map(|b| b.index), Some(1));
    }

    #[test]
    fn test_select_best_nothing_accepted() {
        let scores = vec![
            MatchScore::Rejected(RejectReason::ArtistMismatch),
            MatchScore::Accepted(0),
        ];
        assert_eq!(Matcher::select_best(&scores), None);
    }

    #[test]
    fn test_search_term() {
        let q = TrackQuery::new("Rio - 2009 Remaster", "Duran Duran", None);
        assert_eq!(q.search_term(), "Rio Duran Duran");
        let q = TrackQuery::new("(Untitled)", "Sigur Rós", None);
        assert_eq!(q.search_term(), "(Untitled) Sigur Rós");
    }

    #[test]
    fn test_configurable_threshold() {
        let config = MatchConfig {
            min_length_ratio: 0.0,
            ..MatchConfig::default()
        };
        let m = Matcher::new(config);
        let q = TrackQuery::new("Me & You Together Song", "The 1975", None);
        assert!(m.score(&q, &cand("Me", "The 1975")).is_accepted());
    }
}
