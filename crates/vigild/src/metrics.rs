//! Self resource monitoring for the daemon.
//!
//! Samples vigild's own CPU and memory on a slow interval and warns when
//! either grows past its threshold. Purely observational; nothing reacts
//! to the numbers.

use std::process;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often to sample our own usage.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Warn when the daemon's resident memory exceeds this.
pub const MEMORY_WARN_MB: u64 = 64;

/// Warn when the daemon's CPU share exceeds this.
pub const CPU_WARN_PERCENT: f32 = 50.0;

/// One sample of the daemon's own resource usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfUsage {
    /// Resident memory in megabytes
    pub memory_mb: u64,
    /// CPU share since the previous sample
    pub cpu_percent: f32,
}

impl SelfUsage {
    /// True when either figure is past its warn threshold.
    #[must_use]
    pub fn is_high(&self) -> bool {
        self.memory_mb > MEMORY_WARN_MB || self.cpu_percent > CPU_WARN_PERCENT
    }
}

/// Samples the current process via sysinfo.
///
/// CPU figures need a prior refresh as baseline; the first sample after
/// construction reads as zero.
pub struct SelfMonitor {
    system: System,
    pid: Pid,
}

impl SelfMonitor {
    /// Creates a monitor for the current process.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(process::id()),
        }
    }

    /// Refreshes and returns the current usage.
    pub fn sample(&mut self) -> SelfUsage {
        self.system.refresh_all();

        let (memory_bytes, cpu_percent) = self
            .system
            .process(self.pid)
            .map(|p| (p.memory(), p.cpu_usage()))
            .unwrap_or((0, 0.0));

        SelfUsage {
            memory_mb: memory_bytes / 1024 / 1024,
            cpu_percent,
        }
    }
}

impl Default for SelfMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the periodic self-monitoring task.
pub fn spawn_self_monitor(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut monitor = SelfMonitor::new();
        let mut ticker = interval(SAMPLE_INTERVAL);

        // Baseline refresh so the first reported CPU figure is real
        let _ = monitor.sample();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Self monitor shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    let usage = monitor.sample();
                    if usage.is_high() {
                        warn!(
                            memory_mb = usage.memory_mb,
                            cpu_percent = format!("{:.1}", usage.cpu_percent),
                            "Daemon resource usage above threshold"
                        );
                    } else {
                        info!(
                            memory_mb = usage.memory_mb,
                            cpu_percent = format!("{:.1}", usage.cpu_percent),
                            "Daemon resource usage"
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_usage_thresholds() {
        let quiet = SelfUsage {
            memory_mb: 10,
            cpu_percent: 1.0,
        };
        assert!(!quiet.is_high());

        let fat = SelfUsage {
            memory_mb: MEMORY_WARN_MB + 1,
            cpu_percent: 1.0,
        };
        assert!(fat.is_high());

        let busy = SelfUsage {
            memory_mb: 10,
            cpu_percent: CPU_WARN_PERCENT + 1.0,
        };
        assert!(busy.is_high());
    }

    #[test]
    fn test_sample_reports_own_memory() {
        let mut monitor = SelfMonitor::new();
        let usage = monitor.sample();
        assert!(usage.memory_mb > 0);
        assert!(usage.cpu_percent >= 0.0);
    }
}
