//! Resolve every track of a pool and report how well previews match.
//!
//! Usage: resolve-report <source> [--output stats.json] [--limit N]

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use snippet_guess::config::Config;
use snippet_guess::itunes::ItunesClient;
use snippet_guess::models::{MatchScore, PoolSource, ResolveStats};
use snippet_guess::pool::{AuthContext, TrackPoolBuilder};
use snippet_guess::progress::{
    create_progress_bar, create_spinner, format_duration, init_logging, log_progress, set_log_only,
};
use snippet_guess::resolver::{PreviewResolver, Resolution};
use snippet_guess::scoring::{Matcher, TrackQuery};
use snippet_guess::spotify::SpotifyClient;

/// Unresolved tracks whose closest candidate title is at least this similar.
const NEAR_MISS_SIMILARITY: f64 = 0.8;

#[derive(Parser)]
#[command(name = "resolve-report")]
#[command(about = "Measure preview resolution over a playlist, liked songs, or a guest playlist")]
struct Args {
    source: String,

    /// Where to write the JSON stats
    #[arg(long, default_value = "resolve-report.json")]
    output: PathBuf,

    /// Only resolve the first N tracks
    #[arg(long)]
    limit: Option<usize>,

    /// Pause between searches, to stay under the search rate limit
    #[arg(long, default_value = "300")]
    delay_ms: u64,

    /// Skip background pages and resolve the first page only
    #[arg(long)]
    first_page_only: bool,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "SPOTIFY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long)]
    guest: bool,

    #[arg(long)]
    log_only: bool,
}

struct NearMiss {
    title: String,
    artist: String,
    closest: String,
    similarity: f64,
}

/// Closest rejected candidate title by normalized Levenshtein similarity.
fn closest_candidate(matcher: &Matcher, resolution: &Resolution) -> Option<(String, f64)> {
    let target = matcher.key(&resolution.query.title);
    resolution
        .candidates
        .iter()
        .map(|c| (c.title.clone(), strsim::normalized_levenshtein(&target, &matcher.key(&c.title))))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

fn record(
    stats: &mut ResolveStats,
    near_misses: &mut Vec<NearMiss>,
    matcher: &Matcher,
    resolution: &Resolution,
) {
    stats.total_tracks += 1;
    if resolution.candidates.is_empty() {
        stats.queries_without_results += 1;
    }
    for score in &resolution.scores {
        if let MatchScore::Rejected(reason) = score {
            stats.record_rejection(reason);
        }
    }

    match (&resolution.best, resolution.best_candidate()) {
        (Some(best), Some(winner)) => {
            stats.resolved += 1;
            let bonus =
                matcher.album_bonus(winner.album.as_deref(), resolution.query.album.as_deref());
            if bonus > 0 {
                stats.album_bonus_applied += 1;
            }
            if best.score - bonus >= matcher.config().exact_title_score {
                stats.exact_title_matches += 1;
            } else {
                stats.partial_title_matches += 1;
            }
        }
        _ => {
            stats.unresolved += 1;
            if let Some((closest, similarity)) = closest_candidate(matcher, resolution) {
                if similarity >= NEAR_MISS_SIMILARITY {
                    stats.near_misses += 1;
                    near_misses.push(NearMiss {
                        title: resolution.query.title.clone(),
                        artist: resolution.query.artist.clone(),
                        closest,
                        similarity,
                    });
                }
            }
        }
    }
}

fn print_summary(stats: &ResolveStats, near_misses: &[NearMiss]) {
    println!("\n{:=<60}", "");
    println!("Resolution complete!");
    println!("  Tracks:            {}", stats.total_tracks);
    println!("  Resolved:          {} ({:.1}%)", stats.resolved, stats.match_rate());
    println!("    exact title:     {}", stats.exact_title_matches);
    println!("    partial title:   {}", stats.partial_title_matches);
    println!("    album bonus:     {}", stats.album_bonus_applied);
    println!("  Unresolved:        {}", stats.unresolved);
    println!("    no results:      {}", stats.queries_without_results);
    println!("    near misses:     {}", stats.near_misses);
    println!("  Rejected candidates:");
    println!("    missing preview: {}", stats.rejected_missing_preview);
    println!("    artist mismatch: {}", stats.rejected_artist_mismatch);
    println!("    banned term:     {}", stats.rejected_banned_qualifier);
    println!("    empty key:       {}", stats.rejected_empty_title_key);
    println!("    title mismatch:  {}", stats.rejected_title_mismatch);
    println!("  Elapsed: {:.2}s", stats.elapsed_seconds);
    println!("{:=<60}", "");

    if !near_misses.is_empty() {
        println!("\nNear misses (closest rejected title):");
        for miss in near_misses.iter().take(20) {
            println!(
                "  {:.2}  {} / {}  ->  {}",
                miss.similarity, miss.title, miss.artist, miss.closest
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);
    init_logging("info");

    let config = Config::load(args.config.as_deref()).context("Failed to load config")?;
    let auth = AuthContext {
        access_token: args.token.clone().filter(|t| !t.trim().is_empty()),
        guest: args.guest,
    };
    let source: PoolSource = args.source.parse()?;
    let start = Instant::now();

    let catalog = Arc::new(SpotifyClient::new(&config.catalog)?);
    let builder = TrackPoolBuilder::new(catalog, config.pool.clone());
    let spinner = create_spinner("Loading tracks...");
    let load = builder
        .load_tracks(&auth, &source)
        .await
        .with_context(|| format!("Failed to load {}", source))?;

    let pool = if args.first_page_only {
        load.pool
    } else {
        let (pool, report) = load.finish().await;
        if report.unauthorized {
            println!("Access token expired during loading; reporting on a partial pool");
        }
        pool
    };
    spinner.finish_and_clear();
    if pool.is_empty().await {
        bail!("{} has no playable tracks", source);
    }

    let mut tracks = pool.snapshot().await;
    if let Some(limit) = args.limit {
        tracks.truncate(limit);
    }
    println!("Resolving {} tracks from {}", tracks.len(), source);

    let search = ItunesClient::new(&config.catalog)?;
    let resolver = PreviewResolver::new(search, config.matching.clone());
    let mut stats = ResolveStats::default();
    let mut near_misses = Vec::new();

    let pb = create_progress_bar(tracks.len() as u64, "Resolving");
    for (i, track) in tracks.iter().enumerate() {
        let query = TrackQuery::new(&track.title, track.primary_artist(), track.album_name());
        let resolution = resolver.resolve_detailed(query).await;
        record(&mut stats, &mut near_misses, resolver.matcher(), &resolution);

        pb.inc(1);
        log_progress("resolve", i as u64 + 1, tracks.len() as u64, 25);
        if args.delay_ms > 0 && i + 1 < tracks.len() {
            tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
        }
    }
    pb.finish_and_clear();

    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    near_misses.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    print_summary(&stats, &near_misses);

    stats
        .write_to_file(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!("\nStats written to {} ({})", args.output.display(), format_duration(start.elapsed()));

    Ok(())
}
