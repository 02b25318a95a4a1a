//! CLI command handlers

use anyhow::{Context, Result};
use chrono::Local;
use clap::CommandFactory;
use clap_complete::generate;
use colored::Colorize;
use indicatif::MultiProgress;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::progress::ProgressBoard;
use crate::catalog::{CatalogClient, Song};
use crate::config::Settings;
use crate::scheduler::{JobEvent, JobSnapshot, JobStatus, Scheduler};
use crate::storage::DirectorySink;

/// How often bars are refreshed between events, so ETAs keep moving
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Catalog client, scheduler and output directory for one run
struct Session {
    client: Arc<CatalogClient>,
    scheduler: Scheduler,
    settings: Settings,
}

impl Session {
    async fn start(settings: Settings) -> Result<Self> {
        let client = Arc::new(CatalogClient::new(&settings.api_url)?);

        let sink = DirectorySink::new(settings.output_dir.clone());
        sink.init().await?;

        let scheduler = Scheduler::new(settings.scheduler_config(), client.clone(), Arc::new(sink));
        Ok(Self {
            client,
            scheduler,
            settings,
        })
    }

    /// Show progress until every job is done, then print a summary
    async fn finish(self, multi: &MultiProgress) -> Result<()> {
        let snapshots = watch_jobs(&self.scheduler, multi).await?;

        // Cancelled jobs may still have songs being written
        debug!("Waiting for in-flight songs");
        self.scheduler.drain().await;
        print_summary(&snapshots, &self.settings);

        let failed: usize = snapshots.iter().map(|s| s.failed_units.len()).sum();
        if failed > 0 {
            anyhow::bail!("{} song(s) could not be downloaded", failed);
        }
        if snapshots.iter().any(|s| s.status == JobStatus::Cancelled) {
            anyhow::bail!("Downloads cancelled");
        }
        Ok(())
    }
}

/// Handle the `song` command
pub async fn song(settings: Settings, id: String, multi: &MultiProgress) -> Result<()> {
    let session = Session::start(settings).await?;
    session
        .scheduler
        .submit_single(Song::from_id(id), session.settings.quality);
    session.finish(multi).await
}

/// Handle the `batch` command
pub async fn batch(
    settings: Settings,
    ids: Vec<String>,
    title: Option<String>,
    multi: &MultiProgress,
) -> Result<()> {
    let session = Session::start(settings).await?;
    let title = title.unwrap_or_else(|| format!("{} songs", ids.len()));
    let songs = ids.into_iter().map(Song::from_id).collect();

    session
        .scheduler
        .submit_batch(songs, title, session.settings.quality);
    session.finish(multi).await
}

/// Handle the `playlist` command
pub async fn playlist(settings: Settings, id: String, multi: &MultiProgress) -> Result<()> {
    let session = Session::start(settings).await?;

    println!("{}", "Fetching playlist...".cyan());
    let playlist = session
        .client
        .playlist(&id)
        .await
        .with_context(|| format!("Failed to fetch playlist {}", id))?;

    if playlist.tracks.is_empty() {
        println!("{}", "Playlist has no tracks.".yellow());
        return Ok(());
    }
    println!(
        "{} ({} tracks)",
        playlist.name.green().bold(),
        playlist.tracks.len()
    );

    session
        .scheduler
        .submit_batch(playlist.tracks, playlist.name, session.settings.quality);
    session.finish(multi).await
}

/// Handle the `album` command
pub async fn album(settings: Settings, id: String, multi: &MultiProgress) -> Result<()> {
    let session = Session::start(settings).await?;

    println!("{}", "Fetching album...".cyan());
    let album = session
        .client
        .album(&id)
        .await
        .with_context(|| format!("Failed to fetch album {}", id))?;

    if album.songs.is_empty() {
        println!("{}", "Album has no songs.".yellow());
        return Ok(());
    }

    let title = match album.artist.as_deref() {
        Some(artist) if !artist.is_empty() => format!("{} - {}", artist, album.name),
        _ => album.name.clone(),
    };
    println!("{} ({} songs)", title.green().bold(), album.songs.len());

    session
        .scheduler
        .submit_batch(album.songs, title, session.settings.quality);
    session.finish(multi).await
}

/// Handle the `config` command
pub fn config(settings: &Settings, save: bool) -> Result<()> {
    let path = Settings::config_path()?;
    println!("{} {}", "Settings file:".bold(), path.display());
    println!(
        "{}",
        serde_json::to_string_pretty(settings).context("Failed to serialize settings")?
    );

    if save {
        let path = settings.save()?;
        println!();
        println!("{} {}", "Saved to".green(), path.display());
    }
    Ok(())
}

/// Handle the `completion` command
pub fn completion(shell: clap_complete::Shell) {
    let mut cmd = super::Cli::command();
    generate(shell, &mut cmd, "tunegrab", &mut io::stdout());
}

/// Render scheduler events until no job is left running
///
/// Ctrl-C cancels every outstanding job; songs already downloading stop at
/// their next network call.
async fn watch_jobs(scheduler: &Scheduler, multi: &MultiProgress) -> Result<Vec<JobSnapshot>> {
    let mut events = scheduler.subscribe();
    let mut board = ProgressBoard::new(multi.clone());
    for snapshot in scheduler.list() {
        board.update(&snapshot);
    }

    let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
    let mut interrupted = false;

    while scheduler.has_incomplete() {
        tokio::select! {
            event = events.recv() => match event {
                Ok(JobEvent::Updated(snapshot)) => board.update(&snapshot),
                Ok(JobEvent::Removed(id)) => board.remove(id),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Progress display skipped {} events", skipped);
                    for snapshot in scheduler.list() {
                        board.update(&snapshot);
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = refresh.tick() => {
                for snapshot in scheduler.list() {
                    board.update(&snapshot);
                }
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("Failed to listen for Ctrl-C")?;
                interrupted = true;
                warn!("Interrupted, cancelling downloads");
                let cancelled = scheduler.cancel_all();
                info!("Cancelled {} job(s)", cancelled);
            }
        }
    }

    let snapshots = scheduler.list();
    for snapshot in &snapshots {
        board.update(snapshot);
    }
    Ok(snapshots)
}

fn print_summary(snapshots: &[JobSnapshot], settings: &Settings) {
    println!();
    println!("{}", "Downloads finished".green().bold());

    for snapshot in snapshots {
        let status = match snapshot.status {
            JobStatus::Completed => "done".green(),
            JobStatus::Failed => "failed".red(),
            JobStatus::Cancelled => "cancelled".yellow(),
            other => other.to_string().normal(),
        };
        println!(
            "  {} {} ({}/{} saved, queued {})",
            status,
            snapshot.title,
            snapshot.succeeded,
            snapshot.total,
            snapshot
                .submitted_at
                .with_timezone(&Local)
                .format("%H:%M:%S")
                .to_string()
                .dimmed()
        );
        for unit in &snapshot.failed_units {
            println!("    {} {} [{}]", "✗".red(), unit.label(), unit.id);
        }
    }

    println!("  Output: {}", settings.output_dir.display());
}
