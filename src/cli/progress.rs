//! Live job progress bars

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

use crate::scheduler::{Eta, JobId, JobSnapshot, JobStatus};

/// One progress bar per job, driven by scheduler snapshots
pub struct ProgressBoard {
    multi: MultiProgress,
    bars: HashMap<JobId, ProgressBar>,
}

impl ProgressBoard {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: HashMap::new(),
        }
    }

    pub fn update(&mut self, snapshot: &JobSnapshot) {
        let bar = self.bars.entry(snapshot.id).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(snapshot.total as u64));
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });

        if bar.is_finished() {
            return;
        }

        bar.set_length(snapshot.total as u64);
        bar.set_position(snapshot.completed as u64);

        let message = format!(
            "{} {} {} {}",
            snapshot.title,
            format!("✓{}", snapshot.succeeded).green(),
            format!("✗{}", snapshot.failed).red(),
            status_text(snapshot)
        );

        if snapshot.status.is_terminal() {
            bar.finish_with_message(message);
        } else {
            bar.set_message(message);
        }
    }

    pub fn remove(&mut self, id: JobId) {
        if let Some(bar) = self.bars.remove(&id) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }
}

fn status_text(snapshot: &JobSnapshot) -> String {
    match (snapshot.status, snapshot.eta) {
        (JobStatus::Active, Some(Eta::Remaining(d))) => format!("ETA {}", format_duration(d)),
        (JobStatus::Active, _) => "estimating...".dimmed().to_string(),
        (JobStatus::Waiting, _) => "waiting".dimmed().to_string(),
        (JobStatus::Paused, _) => "paused".yellow().to_string(),
        (JobStatus::Completed, _) => "done".green().bold().to_string(),
        (JobStatus::Failed, _) => "failed".red().bold().to_string(),
        (JobStatus::Cancelled, _) => "cancelled".yellow().to_string(),
    }
}

/// `75s` -> `1:15`, `3725s` -> `1:02:05`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
