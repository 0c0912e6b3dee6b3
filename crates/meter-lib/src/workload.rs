//! Synthetic CPU and memory workload
//!
//! Gives the meter something to measure. A new computation is spawned on
//! every tick without waiting for the previous ones; each computation
//! allocates a square matrix and sums `sqrt(v + 1)` over it, yielding after
//! every row so the sampling loop keeps getting scheduled.

use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the synthetic workload
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Side length of the matrix each computation allocates
    pub matrix_size: usize,
    /// Pause after each matrix row
    pub row_yield: Duration,
    /// Time between computation spawns
    pub spawn_interval: Duration,
    /// Spawns are skipped while this many computations are running
    pub max_in_flight: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            matrix_size: 1500,
            row_yield: Duration::from_millis(1),
            spawn_interval: Duration::from_millis(100),
            max_in_flight: 16,
        }
    }
}

/// Counters reported when the workload stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadStats {
    pub spawned: u64,
    pub completed: u64,
    pub skipped: u64,
}

/// One memory- and CPU-heavy computation
pub async fn heavy_computation(size: usize, row_yield: Duration) -> f64 {
    let matrix: Vec<Vec<u32>> = (0..size)
        .map(|i| (0..size).map(|j| ((i * j) % 1000) as u32).collect())
        .collect();

    let mut total = 0.0;
    for row in &matrix {
        if row_yield.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(row_yield).await;
        }
        for &value in row {
            total += f64::from(value + 1).sqrt();
        }
    }
    total
}

/// Background workload generator
pub struct Workload {
    config: WorkloadConfig,
    result_tx: mpsc::Sender<f64>,
}

impl Workload {
    /// Create a workload and the channel its results are reported on
    pub fn new(config: WorkloadConfig) -> (Self, mpsc::Receiver<f64>) {
        let (result_tx, result_rx) = mpsc::channel(config.max_in_flight.max(1));
        (Self { config, result_tx }, result_rx)
    }

    /// Spawn computations until shutdown, then abort the ones in flight
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> WorkloadStats {
        info!(
            matrix_size = self.config.matrix_size,
            spawn_interval_ms = self.config.spawn_interval.as_millis() as u64,
            max_in_flight = self.config.max_in_flight,
            "Starting synthetic workload"
        );

        let mut tasks: JoinSet<f64> = JoinSet::new();
        let mut stats = WorkloadStats::default();
        let mut ticker = interval_at(Instant::now(), self.config.spawn_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if tasks.len() >= self.config.max_in_flight {
                        stats.skipped += 1;
                        continue;
                    }
                    tasks.spawn(heavy_computation(self.config.matrix_size, self.config.row_yield));
                    stats.spawned += 1;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(total) => {
                            stats.completed += 1;
                            // Nobody listening is fine
                            let _ = self.result_tx.try_send(total);
                        }
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => warn!(error = %e, "Workload computation failed"),
                    }
                }
                _ = shutdown.recv() => {
                    tasks.abort_all();
                    info!(
                        spawned = stats.spawned,
                        completed = stats.completed,
                        skipped = stats.skipped,
                        "Stopping synthetic workload"
                    );
                    return stats;
                }
            }
        }
    }
}

/// Log workload results as they arrive
pub async fn report_results(mut results: mpsc::Receiver<f64>) {
    while let Some(total) = results.recv().await {
        debug!(result = total, "Heavy computation result: {:.2}", total);
    }
}
