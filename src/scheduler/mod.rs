//! Download job scheduler
//!
//! Jobs are admitted in submission order, at most `max_active_jobs` at a
//! time. Each admitted job gets a coordinating task that walks its songs in
//! chunks of `concurrency`, joining every chunk before starting the next.
//! Songs that fail are retried in later rounds, up to `max_rounds` attempts.
//!
//! All job state lives in one table behind a mutex; every change is
//! broadcast as a [`JobEvent`] while the lock is held, so subscribers see
//! changes in the order they happened.

mod control;
mod eta;
mod job;
mod worker;

pub use eta::Eta;
pub use job::{JobId, JobKind, JobSnapshot, JobStatus, SongUnit};
pub use worker::{UnitContext, UnitError};

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, QualityTier, Song};
use crate::storage::TrackSink;
use control::{JobControl, PauseGate};
use job::Job;

/// Buffered events per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 256;

/// Upper bound for per-batch parallelism
pub const MAX_CONCURRENCY: usize = 10;

/// Scheduling limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Jobs allowed to be active (or paused) at once
    pub max_active_jobs: usize,
    /// Songs processed in parallel within a batch
    pub concurrency: usize,
    /// Attempts per song in a batch
    pub max_rounds: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_active_jobs: 1,
            concurrency: 3,
            max_rounds: 5,
        }
    }
}

impl SchedulerConfig {
    /// Pull every limit into its valid range
    pub fn clamped(self) -> Self {
        Self {
            max_active_jobs: self.max_active_jobs.max(1),
            concurrency: self.concurrency.clamp(1, MAX_CONCURRENCY),
            max_rounds: self.max_rounds.max(1),
        }
    }
}

/// State change notification
#[derive(Debug, Clone)]
pub enum JobEvent {
    Updated(JobSnapshot),
    Removed(JobId),
}

struct JobEntry {
    job: Job,
    control: JobControl,
}

#[derive(Default)]
struct JobTable {
    next_id: u64,
    /// Ordered by id, which is submission order
    jobs: BTreeMap<JobId, JobEntry>,
}

struct Inner {
    config: SchedulerConfig,
    table: Mutex<JobTable>,
    wake: Notify,
    shutdown: CancellationToken,
    /// Job tasks and song workers
    tasks: TaskTracker,
    events: broadcast::Sender<JobEvent>,
    ctx: UnitContext,
    epoch: Instant,
}

/// Owns all jobs for the lifetime of the process
///
/// Must be created inside a tokio runtime. Dropping the scheduler cancels
/// every job still running.
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        catalog: Arc<dyn Catalog>,
        sink: Arc<dyn TrackSink>,
    ) -> Self {
        let config = config.clamped();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(Inner {
            config,
            table: Mutex::new(JobTable::default()),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            events,
            ctx: UnitContext { catalog, sink },
            epoch: Instant::now(),
        });

        tokio::spawn(admission_loop(inner.clone()));
        debug!(
            "Scheduler started: {} active job(s), concurrency {}, {} round(s)",
            config.max_active_jobs, config.concurrency, config.max_rounds
        );

        Self { inner }
    }

    /// Queue one song; it gets a single attempt
    pub fn submit_single(&self, song: Song, quality: QualityTier) -> JobId {
        let unit = SongUnit::from_song(&song, quality);
        let title = unit.label();
        self.inner.submit(JobKind::Single, title, quality, vec![unit])
    }

    /// Queue a list of songs; a list of exactly one becomes a single job
    pub fn submit_batch(
        &self,
        songs: Vec<Song>,
        title: impl Into<String>,
        quality: QualityTier,
    ) -> JobId {
        if let [song] = songs.as_slice() {
            return self.submit_single(song.clone(), quality);
        }

        let units = songs
            .iter()
            .map(|song| SongUnit::from_song(song, quality))
            .collect();
        self.inner.submit(JobKind::Batch, title.into(), quality, units)
    }

    /// Stop starting new songs; songs already running finish
    pub fn pause(&self, id: JobId) -> bool {
        self.inner.with_job(id, |inner, entry| {
            if !entry.job.pause(inner.now_ms()) {
                return false;
            }
            entry.control.set_paused(true);
            info!(job = %id, "Paused");
            true
        })
    }

    pub fn resume(&self, id: JobId) -> bool {
        self.inner.with_job(id, |inner, entry| {
            if !entry.job.resume(inner.now_ms()) {
                return false;
            }
            entry.control.set_paused(false);
            info!(job = %id, "Resumed");
            true
        })
    }

    /// Pause an active job or resume a paused one
    pub fn toggle_pause(&self, id: JobId) -> bool {
        match self.state(id).map(|s| s.status) {
            Some(JobStatus::Active) => self.pause(id),
            Some(JobStatus::Paused) => self.resume(id),
            _ => false,
        }
    }

    pub fn cancel(&self, id: JobId) -> bool {
        let cancelled = self.inner.with_job(id, |_, entry| {
            if !entry.job.cancel() {
                return false;
            }
            entry.control.cancel();
            info!(job = %id, "Cancelled");
            true
        });
        if cancelled {
            // Frees the slot for the next waiting job
            self.inner.wake.notify_one();
        }
        cancelled
    }

    /// Cancel every job that has not finished; returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<JobId> = self
            .list()
            .into_iter()
            .filter(|s| !s.status.is_terminal())
            .map(|s| s.id)
            .collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn state(&self, id: JobId) -> Option<JobSnapshot> {
        let now = self.inner.now_ms();
        let table = self.inner.lock();
        table.jobs.get(&id).map(|entry| entry.job.snapshot(now))
    }

    /// Every job in submission order
    pub fn list(&self) -> Vec<JobSnapshot> {
        let now = self.inner.now_ms();
        let table = self.inner.lock();
        table
            .jobs
            .values()
            .map(|entry| entry.job.snapshot(now))
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Forget a finished job
    pub fn remove(&self, id: JobId) -> bool {
        let mut table = self.inner.lock();
        let finished = table
            .jobs
            .get(&id)
            .is_some_and(|entry| entry.job.status().is_terminal());
        if finished {
            table.jobs.remove(&id);
            let _ = self.inner.events.send(JobEvent::Removed(id));
        }
        finished
    }

    /// Forget every finished job; returns how many were removed
    pub fn clear_finished(&self) -> usize {
        let mut table = self.inner.lock();
        let finished: Vec<JobId> = table
            .jobs
            .iter()
            .filter(|(_, entry)| entry.job.status().is_terminal())
            .map(|(id, _)| *id)
            .collect();

        for id in &finished {
            table.jobs.remove(id);
            let _ = self.inner.events.send(JobEvent::Removed(*id));
        }
        finished.len()
    }

    /// Whether any job is waiting, active or paused
    pub fn has_incomplete(&self) -> bool {
        self.inner
            .lock()
            .jobs
            .values()
            .any(|entry| !entry.job.status().is_terminal())
    }

    /// Wait until a job reaches a terminal status
    ///
    /// Returns `None` if the job is unknown or was removed.
    pub async fn wait_for(&self, id: JobId) -> Option<JobSnapshot> {
        let mut events = self.subscribe();
        loop {
            let snapshot = self.state(id)?;
            if snapshot.status.is_terminal() {
                return Some(snapshot);
            }
            if let Err(broadcast::error::RecvError::Closed) = events.recv().await {
                return self.state(id);
            }
        }
    }

    /// Wait until no job is waiting, active or paused
    pub async fn wait_until_idle(&self) {
        let mut events = self.subscribe();
        while self.has_incomplete() {
            if let Err(broadcast::error::RecvError::Closed) = events.recv().await {
                return;
            }
        }
    }

    /// Wait for every job task and song worker to return
    ///
    /// A cancelled job is terminal as soon as it is cancelled, but songs that
    /// were already being written keep going until the file is complete.
    pub async fn drain(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn emit(&self, entry: &JobEntry) {
        let _ = self
            .events
            .send(JobEvent::Updated(entry.job.snapshot(self.now_ms())));
    }

    fn submit(
        &self,
        kind: JobKind,
        title: String,
        quality: QualityTier,
        units: Vec<SongUnit>,
    ) -> JobId {
        let count = units.len();
        let id = {
            let mut table = self.lock();
            table.next_id += 1;
            let id = JobId(table.next_id);

            let entry = JobEntry {
                job: Job::new(id, kind, title.clone(), quality, units),
                control: JobControl::new(&self.shutdown),
            };
            self.emit(&entry);
            table.jobs.insert(id, entry);
            id
        };

        info!(job = %id, "Queued \"{}\" ({} song(s), {})", title, count, quality);
        self.wake.notify_one();
        id
    }

    /// Run `f` on a job under the table lock, broadcasting if it reports a change
    fn with_job(&self, id: JobId, f: impl FnOnce(&Self, &mut JobEntry) -> bool) -> bool {
        let mut table = self.lock();
        let Some(entry) = table.jobs.get_mut(&id) else {
            return false;
        };
        let changed = f(self, entry);
        if changed {
            self.emit(entry);
        }
        changed
    }

    /// Promote the oldest waiting jobs while admission slots are free
    fn admit(self: &Arc<Self>) {
        let now = self.now_ms();
        let mut table = self.lock();

        let mut occupied = table
            .jobs
            .values()
            .filter(|entry| entry.job.status().holds_slot())
            .count();

        for (id, entry) in table.jobs.iter_mut() {
            if occupied >= self.config.max_active_jobs {
                break;
            }
            if entry.job.status() != JobStatus::Waiting || !entry.job.start(now) {
                continue;
            }
            occupied += 1;
            self.emit(entry);
            info!(job = %id, "Started");

            self.tasks.spawn(run_job(
                self.clone(),
                *id,
                entry.job.kind(),
                entry.job.units().to_vec(),
                entry.control.gate(),
            ));
        }
    }

    fn record_outcome(&self, id: JobId, success: bool) {
        self.with_job(id, |inner, entry| {
            entry.job.record_outcome(success, inner.now_ms())
        });
    }

    fn begin_retry_round(&self, id: JobId, pending: usize) {
        self.with_job(id, |_, entry| {
            if entry.job.status().is_terminal() {
                return false;
            }
            entry.job.begin_retry_round(pending);
            true
        });
    }

    /// Settle a job whose rounds are done
    ///
    /// Returns `false` if the job is paused; it settles only after a resume.
    fn finish(&self, id: JobId, failed_units: &[SongUnit]) -> bool {
        let mut paused = false;
        let finished = self.with_job(id, |_, entry| {
            if entry.job.status() == JobStatus::Paused {
                paused = true;
                return false;
            }
            entry.job.finish(failed_units.to_vec())
        });

        if finished {
            if failed_units.is_empty() {
                info!(job = %id, "Completed");
            } else {
                warn!(job = %id, "Finished with {} failed song(s)", failed_units.len());
            }
        }
        !paused
    }
}

async fn admission_loop(inner: Arc<Inner>) {
    loop {
        inner.admit();
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = inner.wake.notified() => {}
        }
    }
    debug!("Scheduler stopped");
}

/// Drive one admitted job through its rounds
async fn run_job(
    inner: Arc<Inner>,
    id: JobId,
    kind: JobKind,
    units: Vec<SongUnit>,
    mut gate: PauseGate,
) {
    let rounds = match kind {
        JobKind::Single => 1,
        JobKind::Batch => inner.config.max_rounds,
    };

    let mut queue = units;
    let mut round = 0;

    while !queue.is_empty() && round < rounds {
        round += 1;
        if round > 1 {
            info!(job = %id, "Retrying {} song(s), round {}/{}", queue.len(), round, rounds);
            inner.begin_retry_round(id, queue.len());
        }

        let mut failures = Vec::new();
        for chunk in queue.chunks(inner.config.concurrency) {
            if !gate.wait_until_runnable().await {
                debug!(job = %id, "Stopping after cancellation");
                inner.wake.notify_one();
                return;
            }
            failures.extend(run_chunk(&inner, id, chunk, &gate).await);
        }
        queue = failures;
    }

    // A job paused during its last chunk stays paused until resumed
    loop {
        if !gate.wait_until_runnable().await {
            debug!(job = %id, "Stopping after cancellation");
            break;
        }
        if inner.finish(id, &queue) {
            break;
        }
    }
    inner.wake.notify_one();
}

/// Process one chunk concurrently, returning the songs that failed
async fn run_chunk(
    inner: &Arc<Inner>,
    id: JobId,
    chunk: &[SongUnit],
    gate: &PauseGate,
) -> Vec<SongUnit> {
    let mut workers: FuturesUnordered<_> = chunk
        .iter()
        .cloned()
        .enumerate()
        .map(|(index, unit)| {
            let ctx = inner.ctx.clone();
            let gate = gate.clone();
            let task_unit = unit.clone();
            let handle = inner
                .tasks
                .spawn(async move { worker::process_unit(&ctx, &task_unit, gate).await });
            async move { (index, unit, handle.await) }
        })
        .collect();

    let mut failures = Vec::new();
    while let Some((index, unit, joined)) = workers.next().await {
        let outcome = joined.unwrap_or_else(|e| Err(UnitError::Panicked(e.to_string())));

        match outcome {
            Ok(path) => {
                debug!(job = %id, song = %unit.id, "Saved {}", path.display());
                inner.record_outcome(id, true);
            }
            Err(UnitError::Cancelled) => {
                debug!(job = %id, song = %unit.id, "Cancelled");
            }
            Err(e) => {
                warn!(job = %id, song = %unit.id, "{} failed: {}", unit.label(), e);
                inner.record_outcome(id, false);
                failures.push((index, unit));
            }
        }
    }

    // Keep submission order for the next round
    failures.sort_by_key(|(index, _)| *index);
    failures.into_iter().map(|(_, unit)| unit).collect()
}
