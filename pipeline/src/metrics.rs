use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Counters for one pipeline run. Shared across workers behind an Arc,
/// every counter is atomic so no lock is held on the hot path.
#[derive(Debug)]
pub struct RunMetrics {
    pub run_id: Uuid,
    started_at: Instant,
    total_users: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    followed: AtomicU64,
    skipped: AtomicU64,
    already_following: AtomicU64,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Instant::now(),
            total_users: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            followed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            already_following: AtomicU64::new(0),
        }
    }

    pub fn set_total_users(&self, total: u64) {
        self.total_users.store(total, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_followed(&self) {
        self.followed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_already_following(&self) {
        self.already_following.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_users(&self) -> u64 {
        self.total_users.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn followed(&self) -> u64 {
        self.followed.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Users handled per second since the run started.
    pub fn processing_rate(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (self.processed() + self.failed()) as f64 / elapsed
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            total_users: self.total_users.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            followed: self.followed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            already_following: self.already_following.load(Ordering::Relaxed),
            elapsed_seconds: self.elapsed().as_secs_f64(),
            processing_rate: self.processing_rate(),
        }
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the counters, printable at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub total_users: u64,
    pub processed: u64,
    pub failed: u64,
    pub followed: u64,
    pub skipped: u64,
    pub already_following: u64,
    pub elapsed_seconds: f64,
    pub processing_rate: f64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Run {} finished in {:.1}s", self.run_id, self.elapsed_seconds)?;
        writeln!(
            f,
            "  users: {} total, {} processed, {} failed",
            self.total_users, self.processed, self.failed
        )?;
        writeln!(
            f,
            "  follows: {} followed, {} skipped, {} already following",
            self.followed, self.skipped, self.already_following
        )?;
        write!(f, "  rate: {:.2} users/s", self.processing_rate)
    }
}
