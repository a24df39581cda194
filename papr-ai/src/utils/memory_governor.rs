//! Resident memory sampling and pressure response
//!
//! The governor is not a background loop. Callers invoke
//! [`MemoryGovernor::check_and_react`] after memory-heavy work (each buffered
//! download) and the governor evicts or reclaims registered state when the
//! process is close to its configured ceiling.

use async_trait::async_trait;
use parking_lot::RwLock;
use papr_common::config::MemoryConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Process, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
}

/// Point-in-time memory reading; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryState {
    pub resident_bytes: u64,
    pub ceiling_bytes: u64,
    pub pressure: PressureLevel,
}

impl MemoryState {
    pub fn usage_ratio(&self) -> f64 {
        if self.ceiling_bytes == 0 {
            0.0
        } else {
            self.resident_bytes as f64 / self.ceiling_bytes as f64
        }
    }
}

/// Source of the resident set size
#[async_trait]
pub trait MemoryProbe: Send + Sync {
    async fn resident_bytes(&self) -> u64;
}

/// Reads this process's resident memory through sysinfo
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemoryProbe;

#[async_trait]
impl MemoryProbe for ProcessMemoryProbe {
    async fn resident_bytes(&self) -> u64 {
        let start = Instant::now();
        let join = tokio::task::spawn_blocking(|| {
            let pid = sysinfo::get_current_pid().ok()?;

            let mut system = System::new_with_specifics(RefreshKind::nothing());
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                false,
                ProcessRefreshKind::nothing().with_memory(),
            );

            system.process(pid).map(Process::memory)
        });

        let bytes = match join.await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => 0,
            Err(e) => {
                tracing::debug!(error = %e, "Process memory probe join failed");
                0
            }
        };

        let elapsed = start.elapsed();
        if elapsed > Duration::from_millis(25) {
            tracing::debug!(elapsed_ms = elapsed.as_millis(), "Process memory probe was slow");
        }

        bytes
    }
}

/// State the governor may drop under pressure
pub trait Reclaimable: Send + Sync {
    fn name(&self) -> &str;

    /// Drop all entries that can be recomputed; returns entries dropped
    fn evict_all(&self) -> usize;

    /// Release state that is no longer needed; returns entries dropped
    fn reclaim(&self) -> usize;
}

/// What one pressure response did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub evicted: usize,
    pub reclaimed: usize,
    pub freed_bytes: u64,
}

pub struct MemoryGovernor {
    probe: Arc<dyn MemoryProbe>,
    config: MemoryConfig,
    reclaimables: RwLock<Vec<Arc<dyn Reclaimable>>>,
}

impl MemoryGovernor {
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_probe(config, Arc::new(ProcessMemoryProbe))
    }

    pub fn with_probe(config: MemoryConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            probe,
            config,
            reclaimables: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, reclaimable: Arc<dyn Reclaimable>) {
        tracing::debug!(name = reclaimable.name(), "Registered reclaimable state");
        self.reclaimables.write().push(reclaimable);
    }

    pub fn classify(&self, resident_bytes: u64) -> PressureLevel {
        let ceiling = self.config.ceiling_bytes() as f64;
        let resident = resident_bytes as f64;
        if resident >= ceiling * self.config.critical_ratio {
            PressureLevel::Critical
        } else if resident >= ceiling * self.config.warning_ratio {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    pub async fn sample(&self) -> MemoryState {
        let resident_bytes = self.probe.resident_bytes().await;
        MemoryState {
            resident_bytes,
            ceiling_bytes: self.config.ceiling_bytes(),
            pressure: self.classify(resident_bytes),
        }
    }

    /// Evict at warning; evict and run reclamation rounds at critical
    pub async fn react_to_pressure(&self, state: &MemoryState) -> ReclaimReport {
        let mut report = ReclaimReport::default();
        if state.pressure == PressureLevel::Normal {
            return report;
        }

        let reclaimables: Vec<Arc<dyn Reclaimable>> = self.reclaimables.read().clone();

        tracing::warn!(
            resident_mb = state.resident_bytes / (1024 * 1024),
            ceiling_mb = state.ceiling_bytes / (1024 * 1024),
            pressure = ?state.pressure,
            "Memory pressure detected, evicting caches"
        );

        for r in &reclaimables {
            let dropped = r.evict_all();
            if dropped > 0 {
                tracing::info!(name = r.name(), dropped, "Evicted cached entries");
            }
            report.evicted += dropped;
        }

        if state.pressure == PressureLevel::Critical {
            for round in 1..=self.config.reclaim_rounds {
                let mut round_total = 0;
                for r in &reclaimables {
                    round_total += r.reclaim();
                }
                report.reclaimed += round_total;
                tracing::debug!(round, reclaimed = round_total, "Reclamation round finished");
                if round_total == 0 {
                    break;
                }
            }

            let after = self.probe.resident_bytes().await;
            report.freed_bytes = state.resident_bytes.saturating_sub(after);
            tracing::warn!(
                freed_mb = report.freed_bytes as f64 / (1024.0 * 1024.0),
                resident_mb = after / (1024 * 1024),
                reclaimed = report.reclaimed,
                "Critical memory pressure handled"
            );
        }

        report
    }

    /// Sample, react, and return the sampled state
    pub async fn check_and_react(&self) -> MemoryState {
        let state = self.sample().await;
        self.react_to_pressure(&state).await;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    struct FixedProbe(AtomicU64);

    #[async_trait]
    impl MemoryProbe for FixedProbe {
        async fn resident_bytes(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct Counter {
        evictions: AtomicUsize,
        reclaims: AtomicUsize,
    }

    impl Reclaimable for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn evict_all(&self) -> usize {
            self.evictions.fetch_add(1, Ordering::SeqCst);
            4
        }

        fn reclaim(&self) -> usize {
            self.reclaims.fetch_add(1, Ordering::SeqCst);
            1
        }
    }

    const MB: u64 = 1024 * 1024;

    fn governor(resident_mb: u64) -> (MemoryGovernor, Arc<Counter>) {
        let probe = Arc::new(FixedProbe(AtomicU64::new(resident_mb * MB)));
        let governor = MemoryGovernor::with_probe(MemoryConfig::default(), probe);
        let counter = Arc::new(Counter::default());
        governor.register(counter.clone());
        (governor, counter)
    }

    #[tokio::test]
    async fn test_thresholds_classify_against_ceiling() {
        let (governor, _) = governor(0);
        assert_eq!(governor.classify(100 * MB), PressureLevel::Normal);
        assert_eq!(governor.classify(320 * MB), PressureLevel::Warning);
        assert_eq!(governor.classify(380 * MB), PressureLevel::Critical);
    }

    #[tokio::test]
    async fn test_normal_pressure_touches_nothing() {
        let (governor, counter) = governor(50);
        let state = governor.check_and_react().await;
        assert_eq!(state.pressure, PressureLevel::Normal);
        assert_eq!(counter.evictions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_warning_evicts_without_reclaiming() {
        let (governor, counter) = governor(330);
        let state = governor.sample().await;
        let report = governor.react_to_pressure(&state).await;

        assert_eq!(report.evicted, 4);
        assert_eq!(report.reclaimed, 0);
        assert_eq!(counter.reclaims.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_critical_runs_configured_rounds() {
        let (governor, counter) = governor(399);
        let state = governor.sample().await;
        let report = governor.react_to_pressure(&state).await;

        assert_eq!(counter.evictions.load(Ordering::SeqCst), 1);
        assert_eq!(counter.reclaims.load(Ordering::SeqCst), 3);
        assert_eq!(report.reclaimed, 3);
    }

    #[tokio::test]
    async fn test_process_probe_reports_nonzero() {
        let bytes = ProcessMemoryProbe.resident_bytes().await;
        assert!(bytes > 0);
    }
}
