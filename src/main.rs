//! photo-swipe - terminal front-end
//!
//! Walks a random batch of photos from a folder one card at a time.
//! Decisions are printed, not applied to the files.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use photo_swipe::library::FolderLibrary;
use photo_swipe::stack::AdvanceOutcome;
use photo_swipe::state::data::{CardImage, SwipeDirection};
use photo_swipe::state::settings::SessionSettings;
use photo_swipe::{Error, SessionSnapshot, SessionState, SwipeSession};

/// Command-line arguments for photo-swipe
#[derive(Parser, Debug)]
#[command(name = "photo-swipe")]
#[command(about = "Swipe through a random batch of photos to keep or archive them")]
#[command(version)]
struct Args {
    /// Folder to review (defaults to your pictures directory)
    folder: Option<PathBuf>,

    /// Photos per batch (overrides the settings file)
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Settings file (defaults to <config dir>/photo-swipe/settings.json)
    #[arg(short, long)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; stdout is the UI, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "photo_swipe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut settings = load_settings(args.settings.as_deref())?;
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = batch_size;
    }

    let folder = match args.folder.or_else(FolderLibrary::default_root) {
        Some(folder) => folder,
        None => bail!("No folder given and no pictures directory found"),
    };
    info!("Reviewing {}", folder.display());

    let session = SwipeSession::new(Arc::new(FolderLibrary::new(folder)), settings)
        .context("Invalid settings")?;

    if let Err(e) = session.request_permission_and_start().await {
        bail!("Could not start session: {}", e);
    }
    render(&session.snapshot());
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "k" | "→" => swipe(&session, SwipeDirection::Right).await,
            "a" | "←" => swipe(&session, SwipeDirection::Left).await,
            "n" => {
                if let Err(e) = session.start_new_batch().await {
                    println!("Could not start a new batch: {}", e);
                }
                render(&session.snapshot());
            }
            "q" => break,
            "" => {
                session.refresh_visible().await;
                render(&session.snapshot());
            }
            _ => print_help(),
        }
    }

    let stats = session.cache().stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        coalesced = stats.coalesced,
        fetches = stats.fetches_started,
        "Session finished"
    );
    Ok(())
}

fn load_settings(path: Option<&std::path::Path>) -> Result<SessionSettings> {
    match path {
        Some(path) => SessionSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => match SessionSettings::default_path() {
            Some(path) if path.exists() => SessionSettings::load(&path)
                .with_context(|| format!("Failed to load settings from {}", path.display())),
            _ => Ok(SessionSettings::default()),
        },
    }
}

async fn swipe(session: &SwipeSession, direction: SwipeDirection) {
    let top = session
        .snapshot()
        .visible_stack
        .first()
        .map(|card| card.asset.id.clone());

    match session.advance(direction).await {
        Ok(outcome) => {
            if let Some(id) = top {
                println!("{} → {}", id, direction.decision());
            }
            if outcome == AdvanceOutcome::BatchComplete {
                println!("Batch complete. Press n for a new batch or q to quit.");
                return;
            }
            render(&session.snapshot());
        }
        Err(Error::AdvanceInProgress) => println!("Still loading, try again"),
        Err(e) => {
            warn!(error = %e, "Swipe failed");
            println!("{}", e);
        }
    }
}

fn render(snapshot: &SessionSnapshot) {
    match &snapshot.state {
        SessionState::NoPhotos => {
            println!("No photos found. Add some and press n to retry.");
            return;
        }
        SessionState::Error(message) => {
            println!("Error: {}", message);
            return;
        }
        SessionState::BatchComplete => {
            println!("Batch complete.");
            return;
        }
        _ => {}
    }

    let Some(top) = snapshot.visible_stack.first() else {
        return;
    };
    let shown = match &top.image {
        CardImage::Ready(image) => format!("{} {}x{}", image.tier(), image.width(), image.height()),
        CardImage::Placeholder => "unavailable".to_string(),
    };
    println!(
        "[{}] {} ({}, {})",
        snapshot.progress,
        top.asset.id,
        top.asset.created_at.format("%Y-%m-%d"),
        shown
    );
}

fn print_help() {
    println!("k/→ keep   a/← archive   n new batch   q quit   enter refresh");
}
