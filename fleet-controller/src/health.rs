use serde::Serialize;
use std::time::Instant;
use crate::cache::StatusCache;
use crate::sync::{CycleReport, SyncMonitor, SyncState};

#[derive(Debug, Serialize)]
pub struct ControllerHealth {
    pub uptime_seconds: u64,
    pub units_registered: usize,
    pub cached_statuses: usize,
    pub sync: SyncState,
    pub last_cycle: Option<CycleReport>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    sync: SyncMonitor,
}

impl HealthTracker {
    pub fn new(sync: SyncMonitor) -> Self {
        Self {
            start_time: Instant::now(),
            sync,
        }
    }

    pub fn get_health(&self, units_registered: usize, cache: &StatusCache) -> ControllerHealth {
        ControllerHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            units_registered,
            cached_statuses: cache.len(),
            sync: self.sync.state(),
            last_cycle: self.sync.last_cycle(),
        }
    }

    /// false si la boucle de sync est arrêtée (Halted/Stopped)
    pub fn sync_alive(&self) -> bool {
        matches!(self.sync.state(), SyncState::Idle | SyncState::Running)
    }
}
