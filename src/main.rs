// ToneDeck - headless player for the playback core
// Reads commands from stdin, prints what is playing, nothing fancier

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tonedeck::audio::backend::AudioBackend;
use tonedeck::audio::scanner::ScanProgress;
use tonedeck::audio::MusicScanner;
use tonedeck::history::{HistoryDatabase, HistoryTracker, MemoryHistory, PlayHistory};
use tonedeck::queue::library::{LIBRARY_KEY, LIBRARY_VERSION};
use tonedeck::queue::{Library, QueueStore};
use tonedeck::storage::DurableSlot;
use tonedeck::{AudioEngine, Config, NowPlaying, PlaybackState, Session, SessionCommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tonedeck")]
#[command(about = "A headless music player with an effects chain and a play queue")]
struct Args {
    /// Files, directories or http(s) URLs to queue, in order
    inputs: Vec<String>,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable developer logging (stderr + debug output)
    #[arg(long)]
    dev: bool,

    /// Keep play history in memory only
    #[arg(long)]
    no_history: bool,
}

const HELP: &str = "commands: p (play/pause)  n  b  s <secs>  eq low|mid|high <db>  \
comp on|off  3d on|off  vol <0-1>  rm <i>  j <i>  q";

fn init_logging(dev: bool, log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(log_dir, "tonedeck.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Base filter: info level for general logs, debug for tonedeck
    let base_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tonedeck=debug"));

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false);
    let stderr_layer = dev.then(|| fmt::layer().with_writer(std::io::stderr).with_target(true));

    tracing_subscriber::registry()
        .with(base_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    if dev {
        eprintln!("🔧 Dev mode: Debug output enabled to stderr + file");
    }

    Ok(guard)
}

fn open_history(config: &Config, no_history: bool) -> Box<dyn PlayHistory> {
    if no_history {
        return Box::new(MemoryHistory::new());
    }
    match HistoryDatabase::new(&config.storage.history_path) {
        Ok(database) => Box::new(HistoryTracker::new(database)),
        Err(e) => {
            warn!("play history unavailable, keeping it in memory: {}", e);
            Box::new(MemoryHistory::new())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config - falls back to defaults if missing
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let _guard = init_logging(args.dev, &config.logging.log_dir)?;
    info!("tonedeck starting with {} inputs", args.inputs.len());

    #[cfg(feature = "audio")]
    let scanner = MusicScanner::new();
    #[cfg(not(feature = "audio"))]
    let scanner = MusicScanner::new().with_extension("pcm");

    println!("🎵 Scanning {} inputs...", args.inputs.len());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let tracks = scanner.resolve_with_progress(&args.inputs, tx).await;
    while let Ok(progress) = rx.try_recv() {
        match progress {
            ScanProgress::TrackFound { .. } => {}
            ScanProgress::Error { input, error } => println!("⚠️  Skipping {}: {}", input, error),
            ScanProgress::Completed { total_tracks } => println!("✅ Found {} tracks", total_tracks),
        }
    }

    let library = Library::new(DurableSlot::open_or_memory(
        &config.storage.state_path,
        LIBRARY_KEY,
        LIBRARY_VERSION,
    ));
    if library.is_degraded() {
        println!("⚠️  Library state is in memory only this run");
    }
    let mut queue = QueueStore::new(library);
    queue.set_queue(tracks);

    let history = open_history(&config, args.no_history);

    #[cfg(feature = "audio")]
    let backend = tonedeck::audio::backend::RodioBackend::new()?;
    #[cfg(not(feature = "audio"))]
    let backend = headless_backend();

    let engine = AudioEngine::new(backend, config.engine.clone()).with_history(history);
    #[cfg(feature = "remote")]
    let engine = engine.with_fetcher(Box::new(tonedeck::audio::loader::HttpFetcher::new(
        std::time::Duration::from_secs(config.remote.timeout_secs),
    )?));

    run(Session::new(engine, queue)).await?;

    println!("👋 Bye");
    Ok(())
}

/// NullBackend on a clock that follows wall time
#[cfg(not(feature = "audio"))]
fn headless_backend() -> tonedeck::NullBackend {
    let backend = tonedeck::NullBackend::default();
    let clock = backend.probe().clock().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(10));
        let mut last = tokio::time::Instant::now();
        loop {
            interval.tick().await;
            let now = tokio::time::Instant::now();
            clock.advance((now - last).as_secs_f64());
            last = now;
        }
    });
    backend
}

async fn run<B: AudioBackend>(session: Session<B>) -> Result<()> {
    let (commands, command_rx) = mpsc::unbounded_channel();
    println!("{}", HELP);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match SessionCommand::parse(&line) {
                Ok(Some(command)) => {
                    let quit = command == SessionCommand::Quit;
                    if commands.send(command).is_err() || quit {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => println!("❓ {}\n{}", e, HELP),
            }
        }
    });

    tokio::spawn(print_status(session.now_playing()));

    session.run(command_rx).await
}

/// One line per change of track, state or whole second
async fn print_status(mut rx: watch::Receiver<NowPlaying>) {
    let mut last: Option<(Option<String>, PlaybackState, u64)> = None;
    while rx.changed().await.is_ok() {
        let now = rx.borrow_and_update().clone();
        let key = (now.title.clone(), now.state, now.position as u64);
        if last.as_ref() == Some(&key) {
            continue;
        }
        last = Some(key);

        let icon = match now.state {
            PlaybackState::Playing => "▶️ ",
            PlaybackState::Paused => "⏸️ ",
            PlaybackState::Loading => "⏳",
            PlaybackState::Ended => "⏹️ ",
            PlaybackState::Stopped => "⏹️ ",
        };
        if let Some(loading) = &now.loading {
            println!("⏳ loading {}", loading);
            continue;
        }
        match (&now.title, now.index) {
            (Some(title), Some(index)) => println!(
                "{} [{}/{}] {} - {}  {}/{}",
                icon,
                index + 1,
                now.queue_len,
                now.artist.as_deref().unwrap_or("Unknown Artist"),
                title,
                format_time(now.position),
                format_time(now.duration),
            ),
            _ => println!("{} nothing playing ({} queued)", icon, now.queue_len),
        }
    }
}

fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
