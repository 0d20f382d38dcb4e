//! Per-tick performance counters: a plain atomic counter bag updated by the
//! tick driver and logged at `debug!` only when the `perf_stats` feature is
//! enabled, so the hot path pays nothing by default.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct GridStats {
    pub cells_reset: AtomicU64,
    pub agents_registered: AtomicU64,
    pub sphere_obstacles_registered: AtomicU64,
    pub box_obstacles_registered: AtomicU64,
    pub orca_lp3_fallbacks: AtomicU64,
    pub ticks_run: AtomicU64,
}

impl GridStats {
    pub fn record_tick(&self, agents: u64, sphere_obstacles: u64, box_obstacles: u64, lp3_fallbacks: u64) {
        self.agents_registered.fetch_add(agents, Ordering::Relaxed);
        self.sphere_obstacles_registered.fetch_add(sphere_obstacles, Ordering::Relaxed);
        self.box_obstacles_registered.fetch_add(box_obstacles, Ordering::Relaxed);
        self.orca_lp3_fallbacks.fetch_add(lp3_fallbacks, Ordering::Relaxed);
        self.ticks_run.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "perf_stats")]
        tracing::debug!(
            agents,
            sphere_obstacles,
            box_obstacles,
            lp3_fallbacks,
            ticks = self.ticks_run.load(Ordering::Relaxed),
            "tick stats"
        );
    }

    pub fn snapshot(&self) -> GridStatsSnapshot {
        GridStatsSnapshot {
            agents_registered: self.agents_registered.load(Ordering::Relaxed),
            sphere_obstacles_registered: self.sphere_obstacles_registered.load(Ordering::Relaxed),
            box_obstacles_registered: self.box_obstacles_registered.load(Ordering::Relaxed),
            orca_lp3_fallbacks: self.orca_lp3_fallbacks.load(Ordering::Relaxed),
            ticks_run: self.ticks_run.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridStatsSnapshot {
    pub agents_registered: u64,
    pub sphere_obstacles_registered: u64,
    pub box_obstacles_registered: u64,
    pub orca_lp3_fallbacks: u64,
    pub ticks_run: u64,
}
