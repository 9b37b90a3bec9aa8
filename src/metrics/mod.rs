mod types;

pub use types::{MetricsSnapshot, SystemMetrics, TickMetrics, TickOutcome};

use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

const MAX_RECENT_TICKS: usize = 20;

pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_ticks: Vec<TickMetrics>,
    tick_count: u64,
    analyzed_count: u64,
    risk_count: u64,
    skipped_count: u64,
    fault_count: u64,
    degraded_count: u64,
    system: System,
    pid: Pid,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // Initial refresh to establish baseline for CPU calculation
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_ticks: Vec::with_capacity(MAX_RECENT_TICKS),
                tick_count: 0,
                analyzed_count: 0,
                risk_count: 0,
                skipped_count: 0,
                fault_count: 0,
                degraded_count: 0,
                system,
                pid,
            })),
        }
    }

    /// Sample current CPU and memory usage of this process.
    /// CPU usage needs two refreshes over time to produce a delta.
    pub async fn sample_system_metrics(&self) -> SystemMetrics {
        let mut state = self.inner.lock().await;
        state.sample()
    }

    pub async fn record_tick(&self, metrics: TickMetrics) {
        let mut state = self.inner.lock().await;

        state.tick_count += 1;
        match metrics.outcome {
            TickOutcome::Safe => state.analyzed_count += 1,
            TickOutcome::Risk => {
                state.analyzed_count += 1;
                state.risk_count += 1;
            }
            TickOutcome::Skipped => state.skipped_count += 1,
            TickOutcome::SourceFault | TickOutcome::InferenceFailed => state.fault_count += 1,
        }
        if metrics.degraded {
            state.degraded_count += 1;
        }

        state.recent_ticks.push(metrics);
        if state.recent_ticks.len() > MAX_RECENT_TICKS {
            state.recent_ticks.remove(0);
        }
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let system = state.sample();

        MetricsSnapshot {
            system,
            recent_ticks: state.recent_ticks.clone(),
            tick_count: state.tick_count,
            analyzed_count: state.analyzed_count,
            risk_count: state.risk_count,
            skipped_count: state.skipped_count,
            fault_count: state.fault_count,
            degraded_count: state.degraded_count,
        }
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        state.recent_ticks.clear();
        state.tick_count = 0;
        state.analyzed_count = 0;
        state.risk_count = 0;
        state.skipped_count = 0;
        state.fault_count = 0;
        state.degraded_count = 0;
        // Re-establish baseline for CPU after reset
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    }
}

impl MetricsState {
    fn sample(&mut self) -> SystemMetrics {
        let pid = self.pid;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        match self.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics::default(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
