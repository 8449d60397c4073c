//! The guessing game state machine.
//!
//! `Idle` (no pool) -> `Playing` (round active) -> `Ended` (revealed) and back
//! to `Playing` via play-again, or to `Idle` via a new playlist.
//!
//! Round starts are serialized by a lock: a second `start_round` while one is
//! resolving returns [`RoundStart::Busy`] instead of interleaving updates to
//! the recency and failure sets. Selecting a playlist waits its turn instead.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::error::PlayerError;
use crate::itunes::CandidateSearch;
use crate::models::{ResolvedPreview, Track};
use crate::normalize::ComparisonStrategy;
use crate::player::SnippetPlayer;
use crate::pool::TrackPool;
use crate::resolver::PreviewResolver;

pub const NO_PLAYABLE_TRACKS: &str = "No playable tracks found in this playlist.";
pub const NO_SONG_SELECTED: &str = "No song selected.";
pub const LOADING_TRACKS: &str = "Loading tracks...";
const INCORRECT: &str = "Incorrect. Increasing snippet length!";
const PLAYBACK_FAILED: &str = "Failed to load preview audio.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Playing,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundStart {
    Started { track: Arc<Track>, attempts: usize },
    /// Another round start is in flight.
    Busy,
    /// No pool has been selected.
    NoPool,
    /// Every eligible track failed to resolve. The session is back to `Idle`.
    NoPlayableTracks,
    /// The per-round attempt bound was hit with untried tracks left.
    AttemptsExhausted { attempts: usize },
    /// A new playlist was selected while this round was resolving.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuessOutcome {
    Correct { snippet_ms: u32 },
    Incorrect { snippet_ms: u32 },
    /// Wrong guess at the maximum snippet length; the round ended.
    OutOfGuesses,
    NoActiveRound,
}

#[derive(Debug)]
pub enum SnippetOutcome {
    Started { duration_ms: u32 },
    NoSongSelected,
    Failed(PlayerError),
}

/// What the UI may show about the target. Only present once the round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealedTrack {
    pub title: String,
    pub artists: Vec<String>,
    pub artwork_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSnapshot {
    pub phase: Phase,
    pub playlist_name: Option<String>,
    pub snippet_ms: Option<u32>,
    pub feedback: String,
    pub reveal: Option<RevealedTrack>,
    pub recently_played: usize,
    pub failed: usize,
}

/// Correct iff the guess key is a substring longer than two characters, or an
/// exact non-empty match (so very short titles can still be guessed).
pub fn is_correct_guess(title: &str, guess: &str, strategy: ComparisonStrategy) -> bool {
    let title_key = strategy.key(title);
    let guess_key = strategy.key(guess);
    if guess_key.is_empty() {
        return false;
    }
    title_key == guess_key || (guess_key.len() > 2 && title_key.contains(&guess_key))
}

fn seconds(ms: u32) -> String {
    format!("{}", f64::from(ms) / 1000.0)
}

// ============================================================================
// Session State
// ============================================================================

/// Insertion-ordered, bounded set of recently played track ids.
#[derive(Debug, Default)]
struct RecentHistory {
    order: VecDeque<String>,
    members: FxHashSet<String>,
}

impl RecentHistory {
    fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    /// Records `id` as most recent, evicting the oldest beyond `limit`.
    fn push(&mut self, id: &str, limit: usize) {
        if self.members.contains(id) {
            self.order.retain(|existing| existing != id);
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());
        while self.order.len() > limit {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
    }
}

#[derive(Debug)]
struct ActiveRound {
    target: Arc<Track>,
    preview: ResolvedPreview,
    snippet_ms: u32,
}

struct SessionState {
    phase: Phase,
    pool: Option<TrackPool>,
    playlist_name: Option<String>,
    round: Option<ActiveRound>,
    recent: RecentHistory,
    failed: FxHashSet<String>,
    feedback: String,
    rng: StdRng,
}

impl SessionState {
    /// Pool minus failures and `exclude`, then minus recent plays. Falls back
    /// to the failure-filtered set (recency amnesty) when nothing is left.
    fn candidates(&mut self, tracks: &[Arc<Track>], exclude: Option<&str>) -> Vec<Arc<Track>> {
        let eligible: Vec<&Arc<Track>> = tracks
            .iter()
            .filter(|t| !self.failed.contains(&t.id) && exclude != Some(t.id.as_str()))
            .collect();

        let mut candidates: Vec<Arc<Track>> = eligible
            .iter()
            .filter(|t| !self.recent.contains(&t.id))
            .map(|t| Arc::clone(t))
            .collect();

        if candidates.is_empty() && !tracks.is_empty() && !self.recent.is_empty() {
            info!(cleared = self.recent.len(), "All tracks played recently; resetting history");
            self.recent.clear();
            candidates = eligible.into_iter().cloned().collect();
        }

        candidates.shuffle(&mut self.rng);
        candidates
    }

    fn reset_playlist(&mut self) {
        self.phase = Phase::Idle;
        self.pool = None;
        self.playlist_name = None;
        self.round = None;
        self.recent.clear();
        self.failed.clear();
        self.feedback.clear();
    }
}

// ============================================================================
// Game Session
// ============================================================================

pub struct GameSession<S, P> {
    resolver: PreviewResolver<S>,
    player: P,
    config: GameConfig,
    state: Mutex<SessionState>,
    /// Held for the whole of a round start.
    round_start: Mutex<()>,
    /// Bumped on every playlist change; stale round starts compare against it.
    epoch: AtomicU64,
}

impl<S: CandidateSearch, P: SnippetPlayer> GameSession<S, P> {
    pub fn new(resolver: PreviewResolver<S>, player: P, config: GameConfig) -> Self {
        Self::with_rng(resolver, player, config, StdRng::from_entropy())
    }

    /// Reproducible track order, for tests and replays.
    pub fn with_seed(
        resolver: PreviewResolver<S>,
        player: P,
        config: GameConfig,
        seed: u64,
    ) -> Self {
        Self::with_rng(resolver, player, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(resolver: PreviewResolver<S>, player: P, config: GameConfig, rng: StdRng) -> Self {
        Self {
            resolver,
            player,
            config,
            state: Mutex::new(SessionState {
                phase: Phase::Idle,
                pool: None,
                playlist_name: None,
                round: None,
                recent: RecentHistory::default(),
                failed: FxHashSet::default(),
                feedback: String::new(),
                rng,
            }),
            round_start: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    fn comparison(&self) -> ComparisonStrategy {
        self.resolver.matcher().config().comparison
    }

    /// Starts a fresh playlist session over `pool` and begins the first round.
    pub async fn select_pool(&self, name: &str, pool: TrackPool) -> RoundStart {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.player.stop();
        {
            let mut state = self.state.lock().await;
            state.reset_playlist();
            state.pool = Some(pool);
            state.playlist_name = Some(name.to_string());
            state.feedback = LOADING_TRACKS.to_string();
        }
        info!(playlist = %name, "Playlist selected");

        // A start still resolving for the old playlist sees the new epoch and
        // bails out; the first round of this playlist must not be dropped.
        let _turn = self.round_start.lock().await;
        self.run_round_start(None).await
    }

    /// Discards the round, the pool and both exclusion sets.
    pub async fn select_new_playlist(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.player.stop();
        self.state.lock().await.reset_playlist();
        debug!("Returned to playlist selection");
    }

    pub async fn play_again(&self) -> RoundStart {
        self.start_round().await
    }

    pub async fn start_round(&self) -> RoundStart {
        self.start_round_excluding(None).await
    }

    /// Picks a random eligible track and resolves its preview, skipping (and
    /// permanently excluding) tracks that have none.
    pub async fn start_round_excluding(&self, exclude: Option<&str>) -> RoundStart {
        let Ok(_turn) = self.round_start.try_lock() else {
            debug!("Round start already in flight; ignoring");
            return RoundStart::Busy;
        };
        self.run_round_start(exclude).await
    }

    /// Body of a round start. Callers hold `round_start`.
    async fn run_round_start(&self, exclude: Option<&str>) -> RoundStart {
        let epoch = self.epoch.load(Ordering::Acquire);

        let (candidates, recent_limit) = {
            let mut state = self.state.lock().await;
            let Some(pool) = state.pool.clone() else {
                return RoundStart::NoPool;
            };
            self.player.stop();
            let tracks = pool.snapshot().await;
            let candidates = state.candidates(&tracks, exclude);
            (candidates, self.config.recent_limit(tracks.len()))
        };

        let max_attempts = self.config.max_attempts_per_round.max(1);
        let mut attempts = 0;

        for track in candidates.iter().take(max_attempts) {
            attempts += 1;
            let resolved = self.resolver.resolve_track(track).await;

            let mut state = self.state.lock().await;
            if self.epoch.load(Ordering::Acquire) != epoch {
                return RoundStart::Superseded;
            }

            let Some(preview) = resolved else {
                info!(
                    track = %track.title,
                    artist = %track.primary_artist(),
                    "No preview; skipping track"
                );
                state.failed.insert(track.id.clone());
                continue;
            };

            state.recent.push(&track.id, recent_limit);
            state.round = Some(ActiveRound {
                target: Arc::clone(track),
                preview,
                snippet_ms: self.config.initial_snippet_ms,
            });
            state.phase = Phase::Playing;
            state.feedback.clear();
            info!(track = %track.title, attempts, "Round started");
            return RoundStart::Started {
                track: Arc::clone(track),
                attempts,
            };
        }

        let mut state = self.state.lock().await;
        if self.epoch.load(Ordering::Acquire) != epoch {
            return RoundStart::Superseded;
        }
        state.round = None;

        if attempts < candidates.len() {
            warn!(
                attempts,
                remaining = candidates.len() - attempts,
                "Attempt limit reached without a playable preview"
            );
            state.phase = Phase::Ended;
            state.feedback =
                format!("No playable preview found after {} tries. Try again.", attempts);
            RoundStart::AttemptsExhausted { attempts }
        } else {
            warn!(attempts, failed = state.failed.len(), "No playable tracks left in pool");
            state.phase = Phase::Idle;
            state.feedback = NO_PLAYABLE_TRACKS.to_string();
            RoundStart::NoPlayableTracks
        }
    }

    pub async fn submit_guess(&self, guess: &str) -> GuessOutcome {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.phase != Phase::Playing {
            return GuessOutcome::NoActiveRound;
        }
        let Some(round) = state.round.as_mut() else {
            return GuessOutcome::NoActiveRound;
        };

        if is_correct_guess(&round.target.title, guess, self.comparison()) {
            let snippet_ms = round.snippet_ms;
            self.player.stop();
            state.phase = Phase::Ended;
            state.feedback = format!(
                "Correct! You won! Guessed the song in {} seconds.",
                seconds(snippet_ms)
            );
            info!(snippet_ms, "Correct guess");
            return GuessOutcome::Correct { snippet_ms };
        }

        if round.snippet_ms >= self.config.max_snippet_ms {
            let title = round.target.title.clone();
            self.player.stop();
            state.phase = Phase::Ended;
            state.feedback = format!("Game Over! You didn't get it. The song was: {}", title);
            return GuessOutcome::OutOfGuesses;
        }

        round.snippet_ms =
            (round.snippet_ms + self.config.snippet_step_ms).min(self.config.max_snippet_ms);
        let snippet_ms = round.snippet_ms;
        state.feedback = INCORRECT.to_string();
        GuessOutcome::Incorrect { snippet_ms }
    }

    /// Reveals the title. Returns `false` when no round is active.
    pub async fn give_up(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Playing {
            return false;
        }
        let Some(title) = state.round.as_ref().map(|r| r.target.title.clone()) else {
            return false;
        };
        self.player.stop();
        state.phase = Phase::Ended;
        state.feedback = format!("The song was: {}", title);
        true
    }

    /// Plays the current preview for the current snippet length.
    pub async fn play_snippet(&self) -> SnippetOutcome {
        let mut state = self.state.lock().await;
        let current = state
            .round
            .as_ref()
            .map(|r| (r.preview.preview_url.clone(), r.snippet_ms));
        let Some((url, duration_ms)) = current else {
            state.feedback = NO_SONG_SELECTED.to_string();
            return SnippetOutcome::NoSongSelected;
        };

        match self.player.play(&url, Duration::from_millis(u64::from(duration_ms))) {
            Ok(()) => {
                state.feedback.clear();
                SnippetOutcome::Started { duration_ms }
            }
            Err(e) => {
                state.feedback = PLAYBACK_FAILED.to_string();
                SnippetOutcome::Failed(e)
            }
        }
    }

    /// Marks the current target unplayable and moves on to another track.
    /// `None` when there is no round to skip.
    pub async fn report_playback_failure(&self) -> Option<RoundStart> {
        let failed_id = {
            let mut state = self.state.lock().await;
            let id = state.round.as_ref().map(|r| r.target.id.clone())?;
            warn!(track_id = %id, "Preview failed to play; excluding track");
            state.failed.insert(id.clone());
            id
        };
        Some(self.start_round_excluding(Some(&failed_id)).await)
    }

    pub async fn snapshot(&self) -> GameSnapshot {
        let state = self.state.lock().await;
        let reveal = match (&state.round, state.phase) {
            (Some(round), Phase::Ended) => Some(RevealedTrack {
                title: round.target.title.clone(),
                artists: round.target.artists.clone(),
                artwork_url: round
                    .target
                    .artwork_url()
                    .map(str::to_string)
                    .or_else(|| round.preview.artwork_url.clone()),
            }),
            _ => None,
        };

        GameSnapshot {
            phase: state.phase,
            playlist_name: state.playlist_name.clone(),
            snippet_ms: state.round.as_ref().map(|r| r.snippet_ms),
            feedback: state.feedback.clone(),
            reveal,
            recently_played: state.recent.len(),
            failed: state.failed.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchConfig;
    use crate::error::CatalogError;
    use crate::models::{AlbumInfo, ArtworkImage, CatalogCandidate};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::watch;

    // ------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------

    /// A secondary catalog that knows previews for a fixed set of tracks and
    /// returns all of them for every query; the real matcher picks.
    struct FakeCatalog {
        entries: Vec<CatalogCandidate>,
        terms: StdMutex<Vec<String>>,
        yield_first: bool,
    }

    impl FakeCatalog {
        fn new(playable: &[&Track]) -> Self {
            Self {
                entries: playable
                    .iter()
                    .map(|t| CatalogCandidate {
                        title: t.title.clone(),
                        artist: t.primary_artist().to_string(),
                        album: None,
                        preview_url: Some(format!("http://preview/{}", t.id)),
                        artwork_url: Some(format!("http://art/{}/100x100bb.jpg", t.id)),
                    })
                    .collect(),
                terms: StdMutex::new(Vec::new()),
                yield_first: false,
            }
        }

        fn queried(&self, title: &str) -> usize {
            self.terms.lock().unwrap().iter().filter(|t| t.starts_with(title)).count()
        }

        fn total_queries(&self) -> usize {
            self.terms.lock().unwrap().len()
        }
    }

    impl CandidateSearch for FakeCatalog {
        async fn search(
            &self,
            term: &str,
            _limit: u32,
        ) -> Result<Vec<CatalogCandidate>, CatalogError> {
            self.terms.lock().unwrap().push(term.to_string());
            if self.yield_first {
                tokio::task::yield_now().await;
            }
            Ok(self.entries.clone())
        }
    }

    struct FakePlayer {
        plays: StdMutex<Vec<(String, Duration)>>,
        stops: AtomicUsize,
        fail: bool,
        playing: watch::Sender<bool>,
    }

    impl FakePlayer {
        fn new(fail: bool) -> Self {
            Self {
                plays: StdMutex::new(Vec::new()),
                stops: AtomicUsize::new(0),
                fail,
                playing: watch::channel(false).0,
            }
        }
    }

    impl SnippetPlayer for FakePlayer {
        fn play(&self, url: &str, duration: Duration) -> Result<(), PlayerError> {
            if self.fail {
                return Err(PlayerError::Load(url.to_string()));
            }
            self.plays.lock().unwrap().push((url.to_string(), duration));
            self.playing.send_replace(true);
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.playing.send_replace(false);
        }

        fn volume(&self) -> f32 {
            1.0
        }

        fn set_volume(&self, _volume: f32) {}

        fn is_playing(&self) -> bool {
            *self.playing.borrow()
        }

        fn subscribe(&self) -> watch::Receiver<bool> {
            self.playing.subscribe()
        }
    }

    fn track(id: &str, title: &str) -> Track {
        Track {
            id: id.to_string(),
            title: title.to_string(),
            artists: vec!["The Band".to_string()],
            album: None,
            is_local: false,
        }
    }

    fn numbered(n: usize) -> Vec<Track> {
        (0..n).map(|i| track(&format!("id{}", i), &format!("Tune {} Z", i))).collect()
    }

    type Session = GameSession<FakeCatalog, FakePlayer>;

    fn session_with(catalog: FakeCatalog, config: GameConfig, seed: u64) -> Session {
        let resolver = PreviewResolver::new(catalog, MatchConfig::default());
        GameSession::with_seed(resolver, FakePlayer::new(false), config, seed)
    }

    fn session(tracks: &[Track], playable: &[&Track], seed: u64) -> (Session, TrackPool) {
        (
            session_with(FakeCatalog::new(playable), GameConfig::default(), seed),
            TrackPool::from_tracks(tracks.to_vec()),
        )
    }

    fn catalog(s: &Session) -> &FakeCatalog {
        s.resolver.search_backend()
    }

    fn started(outcome: RoundStart) -> Arc<Track> {
        match outcome {
            RoundStart::Started { track, .. } => track,
            other => panic!("expected a started round, got {:?}", other),
        }
    }

    // ------------------------------------------------------------------
    // Guess judging
    // ------------------------------------------------------------------

    #[test]
    fn test_guess_judging() {
        let strict = ComparisonStrategy::AsciiStrict;
        assert!(is_correct_guess("Go", "Go", strict));
        assert!(is_correct_guess("Go", "go!", strict));
        assert!(!is_correct_guess("Go Now", "Go", strict));
        assert!(is_correct_guess("Go Now", "go now", strict));
        assert!(is_correct_guess("Bohemian Rhapsody", "bohemian", strict));
        assert!(!is_correct_guess("Bohemian Rhapsody", "", strict));
        assert!(!is_correct_guess("Bohemian Rhapsody", "?!", strict));
        assert!(!is_correct_guess("Hotel California", "Hotel Californication", strict));
    }

    #[test]
    fn test_guess_with_empty_key_never_wins() {
        assert!(!is_correct_guess("東京", "東京", ComparisonStrategy::AsciiStrict));
        let (title, guess) = ("Café del Mar", "cafe del mar");
        assert!(is_correct_guess(title, guess, ComparisonStrategy::Transliterate));
        assert!(!is_correct_guess(title, guess, ComparisonStrategy::AsciiStrict));
    }

    #[test]
    fn test_recent_history_evicts_oldest() {
        let mut recent = RecentHistory::default();
        recent.push("a", 2);
        recent.push("b", 2);
        recent.push("c", 2);
        assert_eq!(recent.len(), 2);
        assert!(!recent.contains("a"));
        assert!(recent.contains("b") && recent.contains("c"));

        recent.push("b", 2);
        recent.push("d", 2);
        assert!(!recent.contains("c"));
        assert!(recent.contains("b") && recent.contains("d"));
    }

    // ------------------------------------------------------------------
    // Round selection
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_failed_track_skipped_and_never_retried() {
        let unplayable = track("a", "Alpha Song");
        let playable = track("b", "Bravo Song");
        let mut saw_unplayable_first = false;

        // The shuffle order depends on the seed; cover both orders.
        for seed in 0..32 {
            let (s, pool) = session(&[unplayable.clone(), playable.clone()], &[&playable], seed);
            let chosen = started(s.select_pool("Mix", pool).await);
            assert_eq!(chosen.id, "b");

            let snap = s.snapshot().await;
            assert_eq!(snap.phase, Phase::Playing);
            if catalog(&s).queried("Alpha Song") == 0 {
                continue;
            }
            saw_unplayable_first = true;
            assert_eq!(snap.failed, 1);

            for _ in 0..3 {
                assert!(s.give_up().await);
                let again = started(s.play_again().await);
                assert_eq!(again.id, "b");
            }
            assert_eq!(catalog(&s).queried("Alpha Song"), 1);
        }
        assert!(saw_unplayable_first);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_to_idle() {
        let tracks = numbered(3);
        let (s, pool) = session(&tracks, &[], 7);

        assert_eq!(s.select_pool("Dead", pool).await, RoundStart::NoPlayableTracks);
        let snap = s.snapshot().await;
        assert_eq!(snap.phase, Phase::Idle);
        assert_eq!(snap.failed, 3);
        assert_eq!(snap.feedback, NO_PLAYABLE_TRACKS);
        assert!(snap.reveal.is_none());

        // Failures are remembered: nothing is queried again.
        assert_eq!(s.start_round().await, RoundStart::NoPlayableTracks);
        assert_eq!(catalog(&s).total_queries(), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let tracks = numbered(6);
        let config = GameConfig {
            max_attempts_per_round: 2,
            ..GameConfig::default()
        };
        let s = session_with(FakeCatalog::new(&[]), config, 1);

        let outcome = s.select_pool("Dead", TrackPool::from_tracks(tracks)).await;
        assert_eq!(outcome, RoundStart::AttemptsExhausted { attempts: 2 });
        assert_eq!(catalog(&s).total_queries(), 2);

        let snap = s.snapshot().await;
        assert_eq!(snap.phase, Phase::Ended);
        assert_eq!(snap.failed, 2);
    }

    #[tokio::test]
    async fn test_no_pool_is_noop() {
        let (s, _) = session(&[], &[], 0);
        assert_eq!(s.start_round().await, RoundStart::NoPool);
        assert_eq!(s.submit_guess("anything").await, GuessOutcome::NoActiveRound);
        assert!(!s.give_up().await);
        assert!(matches!(s.play_snippet().await, SnippetOutcome::NoSongSelected));
        assert_eq!(s.snapshot().await.feedback, NO_SONG_SELECTED);
        assert!(s.report_playback_failure().await.is_none());
    }

    #[tokio::test]
    async fn test_recency_history_is_bounded() {
        for size in [1usize, 2, 3, 7, 10, 120] {
            let tracks = numbered(size);
            let refs: Vec<&Track> = tracks.iter().collect();
            let (s, pool) = session(&tracks, &refs, size as u64);
            let limit = GameConfig::default().recent_limit(size);

            let mut previous = started(s.select_pool("P", pool).await);
            for _ in 0..(size + 10) {
                let next = started(s.play_again().await);
                let snap = s.snapshot().await;
                assert!(
                    snap.recently_played <= limit,
                    "size {} history {}",
                    size,
                    snap.recently_played
                );
                if size >= 2 {
                    assert_ne!(next.id, previous.id);
                }
                previous = next;
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_round_start_is_ignored() {
        let tracks = numbered(4);
        let refs: Vec<&Track> = tracks.iter().collect();
        let mut search = FakeCatalog::new(&refs);
        search.yield_first = true;
        let s = session_with(search, GameConfig::default(), 3);
        {
            let mut state = s.state.lock().await;
            state.pool = Some(TrackPool::from_tracks(tracks.clone()));
        }

        let (first, second) = tokio::join!(s.start_round(), s.start_round());
        assert!(matches!(first, RoundStart::Started { .. }));
        assert_eq!(second, RoundStart::Busy);
        assert_eq!(s.snapshot().await.recently_played, 1);

        // The lock is released afterwards.
        assert!(matches!(s.start_round().await, RoundStart::Started { .. }));
    }

    #[tokio::test]
    async fn test_playlist_selected_during_round_start_gets_a_round() {
        let old_tracks = numbered(3);
        let new_tracks = vec![track("n1", "Night Drive"), track("n2", "Neon Lights")];
        let refs: Vec<&Track> = old_tracks.iter().chain(new_tracks.iter()).collect();
        let mut search = FakeCatalog::new(&refs);
        search.yield_first = true;
        let s = session_with(search, GameConfig::default(), 5);
        {
            let mut state = s.state.lock().await;
            state.pool = Some(TrackPool::from_tracks(old_tracks.clone()));
            state.playlist_name = Some("One".to_string());
        }

        let (old, new) = tokio::join!(
            s.play_again(),
            s.select_pool("Two", TrackPool::from_tracks(new_tracks.clone()))
        );
        assert_eq!(old, RoundStart::Superseded);
        let chosen = started(new);
        assert!(chosen.id.starts_with('n'));

        let snap = s.snapshot().await;
        assert_eq!(snap.phase, Phase::Playing);
        assert_eq!(snap.playlist_name.as_deref(), Some("Two"));
        assert!(snap.feedback.is_empty());
        assert_eq!(snap.recently_played, 1);
    }

    #[tokio::test]
    async fn test_new_playlist_clears_exclusions() {
        let unplayable = track("a", "Alpha Song");
        let playable = track("b", "Bravo Song");
        let tracks = vec![unplayable.clone(), playable.clone()];
        let (s, pool) = session(&tracks, &[&playable], 11);

        started(s.select_pool("One", pool).await);
        s.select_new_playlist().await;

        let snap = s.snapshot().await;
        assert_eq!(snap.phase, Phase::Idle);
        assert_eq!(snap.failed, 0);
        assert_eq!(snap.recently_played, 0);
        assert_eq!(snap.playlist_name, None);
        assert_eq!(s.start_round().await, RoundStart::NoPool);

        // With only the unplayable track left, it is tried again.
        let before = catalog(&s).queried("Alpha Song");
        let outcome = s
            .select_pool("Two", TrackPool::from_tracks(vec![unplayable]))
            .await;
        assert_eq!(outcome, RoundStart::NoPlayableTracks);
        assert_eq!(catalog(&s).queried("Alpha Song"), before + 1);
    }

    // ------------------------------------------------------------------
    // Guessing
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_wrong_guesses_escalate_to_game_over() {
        let target = track("x", "Mr. Brightside");
        let (s, pool) = session(&[target.clone()], &[&target], 5);
        started(s.select_pool("P", pool).await);

        let mut last = 0;
        for _ in 0..14 {
            match s.submit_guess("Somebody Told Me").await {
                GuessOutcome::Incorrect { snippet_ms } => last = snippet_ms,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(last, 30_000);
        assert_eq!(s.snapshot().await.feedback, INCORRECT);

        assert_eq!(s.submit_guess("Somebody Told Me").await, GuessOutcome::OutOfGuesses);
        let snap = s.snapshot().await;
        assert_eq!(snap.phase, Phase::Ended);
        assert_eq!(snap.snippet_ms, Some(30_000));
        assert_eq!(snap.feedback, "Game Over! You didn't get it. The song was: Mr. Brightside");
        assert_eq!(s.submit_guess("Mr. Brightside").await, GuessOutcome::NoActiveRound);
    }

    #[tokio::test]
    async fn test_correct_guess_wins() {
        let target = track("x", "Mr. Brightside");
        let (s, pool) = session(&[target.clone()], &[&target], 5);
        started(s.select_pool("P", pool).await);

        assert_eq!(
            s.submit_guess("brightside").await,
            GuessOutcome::Correct { snippet_ms: 2_000 }
        );
        let snap = s.snapshot().await;
        assert_eq!(snap.phase, Phase::Ended);
        assert_eq!(snap.feedback, "Correct! You won! Guessed the song in 2 seconds.");
        assert_eq!(snap.reveal.map(|r| r.title), Some("Mr. Brightside".to_string()));
    }

    #[tokio::test]
    async fn test_give_up_reveals_with_fallback_artwork() {
        let target = track("x", "Mr. Brightside");
        let (s, pool) = session(&[target.clone()], &[&target], 5);
        started(s.select_pool("P", pool).await);
        assert!(s.snapshot().await.reveal.is_none());

        assert!(s.give_up().await);
        let snap = s.snapshot().await;
        assert_eq!(snap.feedback, "The song was: Mr. Brightside");
        let reveal = snap.reveal.unwrap();
        assert_eq!(reveal.artists, vec!["The Band".to_string()]);
        assert_eq!(reveal.artwork_url.as_deref(), Some("http://art/x/600x600bb.jpg"));
        assert!(!s.give_up().await);
    }

    #[tokio::test]
    async fn test_reveal_prefers_primary_artwork() {
        let mut target = track("x", "Mr. Brightside");
        target.album = Some(AlbumInfo {
            name: "Hot Fuss".to_string(),
            images: vec![ArtworkImage {
                url: "http://primary/hotfuss.jpg".to_string(),
                width: Some(640),
                height: Some(640),
            }],
        });
        let (s, pool) = session(&[target.clone()], &[&target], 5);
        started(s.select_pool("P", pool).await);
        s.give_up().await;
        let reveal = s.snapshot().await.reveal.unwrap();
        assert_eq!(reveal.artwork_url.as_deref(), Some("http://primary/hotfuss.jpg"));
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_snippet_uses_current_length() {
        let target = track("x", "Mr. Brightside");
        let (s, pool) = session(&[target.clone()], &[&target], 5);
        started(s.select_pool("P", pool).await);

        assert!(matches!(s.play_snippet().await, SnippetOutcome::Started { duration_ms: 2_000 }));
        s.submit_guess("nope").await;
        assert!(matches!(s.play_snippet().await, SnippetOutcome::Started { duration_ms: 4_000 }));

        let plays = s.player().plays.lock().unwrap().clone();
        assert_eq!(
            plays,
            vec![
                ("http://preview/x".to_string(), Duration::from_millis(2_000)),
                ("http://preview/x".to_string(), Duration::from_millis(4_000)),
            ]
        );
    }

    #[tokio::test]
    async fn test_playback_failure_moves_to_another_track() {
        let tracks = vec![track("a", "Alpha Song"), track("b", "Bravo Song")];
        let refs: Vec<&Track> = tracks.iter().collect();
        let resolver = PreviewResolver::new(FakeCatalog::new(&refs), MatchConfig::default());
        let s = GameSession::with_seed(resolver, FakePlayer::new(true), GameConfig::default(), 9);

        let first = started(s.select_pool("P", TrackPool::from_tracks(tracks.clone())).await);
        assert!(matches!(s.play_snippet().await, SnippetOutcome::Failed(_)));
        assert_eq!(s.snapshot().await.feedback, PLAYBACK_FAILED);

        let second = started(s.report_playback_failure().await.unwrap());
        assert_ne!(second.id, first.id);
        assert_eq!(s.snapshot().await.failed, 1);

        // Both tracks are now excluded.
        assert_eq!(
            s.report_playback_failure().await,
            Some(RoundStart::NoPlayableTracks)
        );
    }
}
