//! CLI module for tunegrab

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;
mod progress;

use crate::catalog::QualityTier;
use crate::config::Settings;

#[derive(Parser, Debug)]
#[command(name = "tunegrab", about = "Download fully tagged tracks from a music catalog")]
#[command(version, author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Catalog API base URL
    #[arg(long, env = "TUNEGRAB_API", global = true)]
    pub api: Option<String>,

    /// Directory finished tracks are written to
    #[arg(short, long, env = "TUNEGRAB_OUTPUT", global = true)]
    pub output: Option<PathBuf>,

    /// Songs downloaded in parallel within a batch (1-10)
    #[arg(short = 'j', long, global = true, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub concurrency: Option<u8>,

    /// Attempts per song in a batch
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    pub rounds: Option<u32>,

    /// Quality level to request
    #[arg(short, long, value_enum, global = true)]
    pub quality: Option<QualityTier>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    /// Layer command-line and environment values over the saved settings
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(api) = &self.api {
            settings.api_url = api.clone();
        }
        if let Some(output) = &self.output {
            settings.output_dir = output.clone();
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = usize::from(concurrency);
        }
        if let Some(rounds) = self.rounds {
            settings.max_rounds = rounds;
        }
        if let Some(quality) = self.quality {
            settings.quality = quality;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download a single song
    Song {
        /// Catalog song id
        id: String,
    },

    /// Download several songs as one batch
    Batch {
        /// Catalog song ids
        #[arg(required = true, num_args = 1..)]
        ids: Vec<String>,

        /// Name shown for the batch
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Download every song of a playlist
    Playlist {
        /// Catalog playlist id
        id: String,
    },

    /// Download every song of an album
    Album {
        /// Catalog album id
        id: String,
    },

    /// Show the effective settings
    Config {
        /// Write the effective settings (including overrides) to the settings file
        #[arg(long)]
        save: bool,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
