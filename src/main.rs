//! tunegrab - Download fully tagged tracks from a music catalog

use anyhow::Result;
use clap::Parser;
use indicatif::MultiProgress;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunegrab::cli::{self, Cli, Commands};
use tunegrab::config::Settings;
use tunegrab::utils::ProgressLogWriter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Log lines are printed around the progress bars
    let multi = MultiProgress::new();

    // Initialize logging
    let filter = if cli.verbose {
        "tunegrab=debug,reqwest=debug"
    } else {
        "tunegrab=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(ProgressLogWriter::new(multi.clone())),
        )
        .init();

    let mut settings = Settings::load()?;
    cli.apply_overrides(&mut settings);

    match cli.command {
        Commands::Song { id } => {
            cli::commands::song(settings, id, &multi).await?;
        }
        Commands::Batch { ids, title } => {
            cli::commands::batch(settings, ids, title, &multi).await?;
        }
        Commands::Playlist { id } => {
            cli::commands::playlist(settings, id, &multi).await?;
        }
        Commands::Album { id } => {
            cli::commands::album(settings, id, &multi).await?;
        }
        Commands::Config { save } => {
            cli::commands::config(&settings, save)?;
        }
        Commands::Completion { shell } => {
            cli::commands::completion(shell);
        }
    }

    Ok(())
}
