//! Throughput smoothing and ETA estimation
//!
//! All timestamps are milliseconds on the scheduler's monotonic clock, passed
//! in explicitly so the math can be exercised without sleeping.

use std::collections::VecDeque;
use std::time::Duration;

/// Speed is measured against a sample at least this old
const SPEED_WINDOW_MS: u64 = 5_000;

/// Samples older than this are discarded
const HISTORY_MS: u64 = 30_000;

/// Job start is used as reference only after this much time has passed
const MIN_FALLBACK_MS: u64 = 1_000;

/// Smoothing factor for a sample spanning a full window
const MAX_ALPHA: f64 = 0.2;

/// Share of the smoothed speed in the reported speed; the rest is the overall average
const EMA_WEIGHT: f64 = 0.8;

/// Remaining time for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    /// Not enough progress yet to say
    Estimating,
    Remaining(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpeedSample {
    at_ms: u64,
    completed: usize,
}

/// EMA of completed units per millisecond
#[derive(Debug, Clone, Default)]
pub struct ThroughputEstimator {
    ema: Option<f64>,
    history: VecDeque<SpeedSample>,
}

impl ThroughputEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `completed` units are done at `now_ms`
    pub fn record(&mut self, now_ms: u64, completed: usize, started_ms: u64) {
        self.history.push_back(SpeedSample {
            at_ms: now_ms,
            completed,
        });

        let horizon = now_ms.saturating_sub(HISTORY_MS);
        while self.history.front().is_some_and(|s| s.at_ms < horizon) {
            self.history.pop_front();
        }

        let reference = self
            .history
            .iter()
            .find(|s| now_ms.saturating_sub(s.at_ms) >= SPEED_WINDOW_MS)
            .copied()
            .or_else(|| {
                (now_ms.saturating_sub(started_ms) >= MIN_FALLBACK_MS).then_some(SpeedSample {
                    at_ms: started_ms,
                    completed: 0,
                })
            });

        let Some(reference) = reference else {
            return;
        };
        if completed < reference.completed || now_ms <= reference.at_ms {
            return;
        }

        let elapsed = (now_ms - reference.at_ms) as f64;
        let speed = (completed - reference.completed) as f64 / elapsed;
        let alpha = MAX_ALPHA * (elapsed / SPEED_WINDOW_MS as f64).min(1.0);

        self.ema = Some(match self.ema {
            None => speed,
            Some(ema) => alpha * speed + (1.0 - alpha) * ema,
        });
    }

    /// Move every sample forward, excluding a pause from the speed math
    pub fn shift(&mut self, by_ms: u64) {
        for sample in self.history.iter_mut() {
            sample.at_ms += by_ms;
        }
    }

    /// Smoothed speed in units per millisecond, if any sample has been taken
    #[cfg(test)]
    pub fn smoothed_speed(&self) -> Option<f64> {
        self.ema
    }

    /// Time span covered by the retained samples
    #[cfg(test)]
    pub fn history_span_ms(&self) -> u64 {
        match (self.history.front(), self.history.back()) {
            (Some(first), Some(last)) => last.at_ms - first.at_ms,
            _ => 0,
        }
    }

    pub fn estimate(&self, now_ms: u64, started_ms: u64, completed: usize, total: usize) -> Eta {
        if completed == 0 {
            return Eta::Estimating;
        }
        if completed >= total {
            return Eta::Remaining(Duration::ZERO);
        }

        let elapsed = now_ms.saturating_sub(started_ms);
        if elapsed == 0 {
            return Eta::Estimating;
        }
        let overall = completed as f64 / elapsed as f64;
        let speed = match self.ema {
            Some(ema) => EMA_WEIGHT * ema + (1.0 - EMA_WEIGHT) * overall,
            None => overall,
        };
        if !speed.is_finite() || speed <= 0.0 {
            return Eta::Estimating;
        }

        let remaining_ms = (total - completed) as f64 / speed;
        Eta::Remaining(Duration::from_millis(remaining_ms.round() as u64))
    }
}
