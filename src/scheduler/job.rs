//! Job state and the transitions the scheduler drives

use chrono::{DateTime, Utc};
use std::fmt;

use super::eta::{Eta, ThroughputEstimator};
use crate::catalog::{QualityTier, Song};

/// Identifier handed out on submission, increasing in submission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Single,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Waiting,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the job occupies an admission slot
    pub fn holds_slot(&self) -> bool {
        matches!(self, JobStatus::Active | JobStatus::Paused)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One track to download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongUnit {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub cover_url: Option<String>,
    pub quality: QualityTier,
}

impl SongUnit {
    pub fn from_song(song: &Song, quality: QualityTier) -> Self {
        Self {
            id: song.id.clone(),
            title: song.name.clone(),
            artist: song.artists.clone(),
            album: song.album.clone(),
            cover_url: Some(song.pic_url.clone()).filter(|u| !u.is_empty()),
            quality,
        }
    }

    /// Title for display, falling back to the catalog id
    pub fn label(&self) -> String {
        if self.title.is_empty() {
            format!("song {}", self.id)
        } else if self.artist.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artist, self.title)
        }
    }
}

/// Read-only view of a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub title: String,
    pub quality: QualityTier,
    pub status: JobStatus,
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// completed / total, 1.0 for an empty job
    pub progress: f64,
    /// Only reported while the job is active
    pub eta: Option<Eta>,
    pub failed_units: Vec<SongUnit>,
    pub submitted_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn eta_seconds(&self) -> Option<u64> {
        match self.eta {
            Some(Eta::Remaining(d)) => Some(d.as_secs()),
            _ => None,
        }
    }
}

/// A submitted job; only the scheduler mutates it, under its table lock
#[derive(Debug)]
pub(crate) struct Job {
    id: JobId,
    kind: JobKind,
    title: String,
    quality: QualityTier,
    units: Vec<SongUnit>,
    status: JobStatus,
    completed: usize,
    succeeded: usize,
    failed: usize,
    failed_units: Vec<SongUnit>,
    submitted_at: DateTime<Utc>,
    started_ms: Option<u64>,
    paused_ms: Option<u64>,
    throughput: ThroughputEstimator,
}

impl Job {
    pub fn new(
        id: JobId,
        kind: JobKind,
        title: String,
        quality: QualityTier,
        units: Vec<SongUnit>,
    ) -> Self {
        Self {
            id,
            kind,
            title,
            quality,
            units,
            status: JobStatus::Waiting,
            completed: 0,
            succeeded: 0,
            failed: 0,
            failed_units: Vec::new(),
            submitted_at: Utc::now(),
            started_ms: None,
            paused_ms: None,
            throughput: ThroughputEstimator::new(),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn units(&self) -> &[SongUnit] {
        &self.units
    }

    pub fn total(&self) -> usize {
        self.units.len()
    }

    /// WAITING -> ACTIVE
    pub fn start(&mut self, now_ms: u64) -> bool {
        if self.status != JobStatus::Waiting {
            return false;
        }
        self.status = JobStatus::Active;
        self.started_ms = Some(now_ms);
        true
    }

    /// ACTIVE -> PAUSED
    pub fn pause(&mut self, now_ms: u64) -> bool {
        if self.status != JobStatus::Active {
            return false;
        }
        self.status = JobStatus::Paused;
        self.paused_ms = Some(now_ms);
        true
    }

    /// PAUSED -> ACTIVE, moving the clock forward past the pause
    pub fn resume(&mut self, now_ms: u64) -> bool {
        if self.status != JobStatus::Paused {
            return false;
        }
        self.status = JobStatus::Active;

        if let Some(paused_at) = self.paused_ms.take() {
            let paused_for = now_ms.saturating_sub(paused_at);
            if let Some(started) = self.started_ms.as_mut() {
                *started += paused_for;
            }
            self.throughput.shift(paused_for);
        }
        true
    }

    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.paused_ms = None;
        true
    }

    /// Units re-queued for another round are pending again
    pub fn begin_retry_round(&mut self, pending: usize) {
        self.completed = self.completed.saturating_sub(pending);
        self.failed = self.failed.saturating_sub(pending);
    }

    /// Count one finished unit; ignored once the job is terminal
    pub fn record_outcome(&mut self, success: bool, now_ms: u64) -> bool {
        if self.status.is_terminal() || self.completed >= self.total() {
            return false;
        }
        self.completed += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }

        if let Some(started) = self.started_ms {
            self.throughput.record(now_ms, self.completed, started);
        }
        true
    }

    /// ACTIVE -> COMPLETED or FAILED once rounds are exhausted
    ///
    /// A paused job must be resumed first; a cancelled job stays cancelled.
    pub fn finish(&mut self, failed_units: Vec<SongUnit>) -> bool {
        if self.status != JobStatus::Active {
            return false;
        }
        self.status = if failed_units.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.failed_units = failed_units;
        self.paused_ms = None;
        true
    }

    /// Milliseconds of active time covered by the throughput history
    #[cfg(test)]
    pub fn history_span_ms(&self) -> u64 {
        self.throughput.history_span_ms()
    }

    pub fn snapshot(&self, now_ms: u64) -> JobSnapshot {
        let total = self.total();
        let progress = if total == 0 {
            1.0
        } else {
            self.completed as f64 / total as f64
        };

        let eta = match (self.status, self.started_ms) {
            (JobStatus::Active, Some(started)) => Some(self.throughput.estimate(
                now_ms,
                started,
                self.completed,
                total,
            )),
            _ => None,
        };

        JobSnapshot {
            id: self.id,
            kind: self.kind,
            title: self.title.clone(),
            quality: self.quality,
            status: self.status,
            total,
            completed: self.completed,
            succeeded: self.succeeded,
            failed: self.failed,
            progress,
            eta,
            failed_units: self.failed_units.clone(),
            submitted_at: self.submitted_at,
        }
    }
}
