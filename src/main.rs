use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

use snippet_guess::config::Config;
use snippet_guess::error::PoolError;
use snippet_guess::guest::guest_playlists;
use snippet_guess::itunes::ItunesClient;
use snippet_guess::models::{MatchScore, PoolSource};
use snippet_guess::player::{ConsoleOutput, ScheduledPlayer, SnippetPlayer};
use snippet_guess::pool::{AuthContext, PoolLoad, TrackPoolBuilder};
use snippet_guess::progress::{create_spinner, format_duration, init_logging, set_log_only};
use snippet_guess::resolver::PreviewResolver;
use snippet_guess::scoring::TrackQuery;
use snippet_guess::session::{GameSession, GameSnapshot, GuessOutcome, RoundStart, SnippetOutcome};
use snippet_guess::spotify::SpotifyClient;

#[derive(Parser)]
#[command(name = "snippet-guess")]
#[command(about = "Guess songs from your playlists by ear, one short preview at a time")]
struct Args {
    /// TOML config file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bearer token for the streaming provider
    #[arg(long, env = "SPOTIFY_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Use the built-in guest playlists instead of the provider
    #[arg(long, global = true)]
    guest: bool,

    /// Hide spinners (for tail-friendly output)
    #[arg(long, global = true)]
    log_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List playable sources (Liked Songs first)
    Playlists,

    /// Resolve one track's preview and show how every candidate scored
    Resolve {
        title: String,
        artist: String,
        #[arg(long)]
        album: Option<String>,
    },

    /// Play the game over a playlist id, LIKED_SONGS, or a guest_* playlist
    Play {
        source: String,
        /// Fix the track order for a reproducible session
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        volume: Option<f32>,
    },
}

fn auth_context(args: &Args) -> AuthContext {
    AuthContext {
        access_token: args.token.clone().filter(|t| !t.trim().is_empty()),
        guest: args.guest,
    }
}

async fn list_playlists(config: &Config, auth: &AuthContext) -> Result<()> {
    let playlists = if auth.guest {
        guest_playlists()
    } else {
        let Some(token) = auth.access_token.as_deref() else {
            bail!("No access token: pass --token, set SPOTIFY_TOKEN, or use --guest");
        };
        let client = SpotifyClient::new(&config.catalog)?;

        let spinner = create_spinner("Fetching playlists...");
        let user = client.current_user(token).await.context("Failed to validate access token")?;
        let playlists = client.playlists(token).await.context("Failed to list playlists")?;
        spinner.finish_and_clear();

        println!("Signed in as {}", user.display_name.as_deref().unwrap_or(&user.id));
        playlists
    };

    println!("{:<26} {:>6}  {}", "ID", "TRACKS", "NAME");
    for playlist in &playlists {
        let total = playlist
            .track_total
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<26} {:>6}  {}", playlist.source.to_string(), total, playlist.name);
    }
    Ok(())
}

async fn resolve_one(
    config: &Config,
    title: &str,
    artist: &str,
    album: Option<&str>,
) -> Result<()> {
    let search = ItunesClient::new(&config.catalog)?;
    let resolver = PreviewResolver::new(search, config.matching.clone());

    let query = TrackQuery::new(title, artist, album);
    println!("Search term: {}", query.search_term());
    let resolution = resolver.resolve_detailed(query).await;

    if let Some(error) = &resolution.lookup_error {
        println!("Lookup failed: {}", error);
    }
    let scored = resolution.candidates.iter().zip(&resolution.scores);
    for (i, (candidate, score)) in scored.enumerate() {
        let verdict = match score {
            MatchScore::Accepted(value) => format!("score {}", value),
            MatchScore::Rejected(reason) => format!("rejected ({})", reason.label()),
        };
        println!("{:>3}. {:<40} {:<28} {}", i + 1, candidate.title, candidate.artist, verdict);
    }

    match resolution.preview() {
        Some(preview) => {
            println!("\nPreview: {}", preview.preview_url);
            if let Some(artwork) = preview.artwork_url {
                println!("Artwork: {}", artwork);
            }
        }
        None => println!("\nNo acceptable preview"),
    }
    Ok(())
}

type Session = GameSession<ItunesClient, ScheduledPlayer<ConsoleOutput>>;

/// Loads `source` and hands its pool to the session. Remaining pages keep
/// arriving in the background.
async fn load_source(
    builder: &TrackPoolBuilder<SpotifyClient>,
    auth: &AuthContext,
    session: &Session,
    source: &PoolSource,
) -> Result<()> {
    let spinner = create_spinner("Loading tracks...");
    let load = builder.load_tracks(auth, source).await;
    spinner.finish_and_clear();

    let PoolLoad {
        pool,
        total,
        initial_count,
        background,
    } = match load {
        Ok(load) => load,
        Err(PoolError::Unauthorized) => bail!("Access token rejected; sign in again and retry"),
        Err(e) => return Err(e).context("Failed to load tracks"),
    };
    println!("Loaded {} of {} tracks", initial_count, total);

    if let Some(handle) = background {
        tokio::spawn(async move {
            match handle.await {
                Ok(report) if report.unauthorized => warn!(
                    tracks_added = report.tracks_added,
                    "Access token rejected during background load"
                ),
                Ok(report) => info!(
                    pages = report.pages_fetched,
                    failed = report.pages_failed,
                    tracks_added = report.tracks_added,
                    "Background load complete"
                ),
                Err(e) => warn!(error = %e, "Background load aborted"),
            }
        });
    }

    let outcome = session.select_pool(&source.to_string(), pool).await;
    report_round(session, outcome).await;
    Ok(())
}

async fn report_round(session: &Session, outcome: RoundStart) {
    match outcome {
        RoundStart::Started { attempts, .. } => {
            if attempts > 1 {
                println!("(skipped {} tracks without a preview)", attempts - 1);
            }
            println!("New round! Type :play to hear the snippet, then guess the title.");
        }
        RoundStart::Busy => println!("Still picking a track..."),
        _ => print_snapshot(&session.snapshot().await),
    }
}

fn print_snapshot(snapshot: &GameSnapshot) {
    if !snapshot.feedback.is_empty() {
        println!("{}", snapshot.feedback);
    }
    if let Some(reveal) = &snapshot.reveal {
        println!("  {} by {}", reveal.title, reveal.artists.join(", "));
        if let Some(artwork) = &reveal.artwork_url {
            println!("  {}", artwork);
        }
        println!("Type :again for another song or :new for a different playlist.");
    }
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    Ok(lines
        .next_line()
        .await
        .context("Failed to read stdin")?
        .map(|l| l.trim().to_string()))
}

async fn play(
    config: &Config,
    auth: &AuthContext,
    source: &str,
    seed: Option<u64>,
    volume: Option<f32>,
) -> Result<()> {
    let catalog = Arc::new(SpotifyClient::new(&config.catalog)?);
    let builder = TrackPoolBuilder::new(catalog, config.pool.clone());
    let search = ItunesClient::new(&config.catalog)?;
    let resolver = PreviewResolver::new(search, config.matching.clone());
    let player = ScheduledPlayer::new(ConsoleOutput);
    if let Some(volume) = volume {
        player.set_volume(volume);
    }

    let session = match seed {
        Some(seed) => GameSession::with_seed(resolver, player, config.game.clone(), seed),
        None => GameSession::new(resolver, player, config.game.clone()),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    load_source(&builder, auth, &session, &source.parse::<PoolSource>()?).await?;

    loop {
        prompt("> ");
        let Some(line) = read_line(&mut lines).await? else {
            break;
        };

        match line.as_str() {
            "" => continue,
            ":quit" => break,
            ":play" => match session.play_snippet().await {
                SnippetOutcome::Started { duration_ms } => {
                    let duration = Duration::from_millis(u64::from(duration_ms));
                    println!("Playing {}", format_duration(duration))
                }
                SnippetOutcome::NoSongSelected => print_snapshot(&session.snapshot().await),
                SnippetOutcome::Failed(e) => {
                    println!("{}; skipping to another track", e);
                    if let Some(outcome) = session.report_playback_failure().await {
                        report_round(&session, outcome).await;
                    }
                }
            },
            ":give-up" => {
                session.give_up().await;
                print_snapshot(&session.snapshot().await);
            }
            ":again" => {
                let outcome = session.play_again().await;
                report_round(&session, outcome).await;
            }
            ":new" => {
                session.select_new_playlist().await;
                prompt("Playlist id (LIKED_SONGS, guest_top_hits, ...): ");
                let Some(next) = read_line(&mut lines).await? else {
                    break;
                };
                let source = next.parse::<PoolSource>()?;
                if let Err(e) = load_source(&builder, auth, &session, &source).await {
                    println!("{:#}", e);
                }
            }
            guess => {
                let outcome = session.submit_guess(guess).await;
                if outcome == GuessOutcome::NoActiveRound {
                    println!("No round in progress. Type :again to start one.");
                } else {
                    print_snapshot(&session.snapshot().await);
                }
            }
        }
    }

    session.player().stop();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);
    init_logging("warn");

    let config = Config::load(args.config.as_deref()).context("Failed to load config")?;
    let auth = auth_context(&args);

    match &args.command {
        Command::Playlists => list_playlists(&config, &auth).await,
        Command::Resolve { title, artist, album } => {
            resolve_one(&config, title, artist, album.as_deref()).await
        }
        Command::Play { source, seed, volume } => {
            play(&config, &auth, source, *seed, *volume).await
        }
    }
}
