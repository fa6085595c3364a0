//! Process resource logging around batch steps.

use crate::domain::model::StepSummary;

#[cfg(feature = "cli")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "cli")]
use std::sync::Mutex;
#[cfg(feature = "cli")]
use std::time::Instant;
#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessesToUpdate, System};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_usage: f32,
    pub memory_mb: u64,
}

/// Comics written per second over the step's elapsed time.
pub fn throughput(summary: &StepSummary) -> f64 {
    let seconds = summary.elapsed.as_secs_f64();
    if seconds > 0.0 {
        summary.written as f64 / seconds
    } else {
        0.0
    }
}

#[cfg(feature = "cli")]
struct Probe {
    system: Mutex<System>,
    pid: Pid,
}

#[cfg(feature = "cli")]
pub struct SystemMonitor {
    probe: Option<Probe>,
    started: Instant,
    peak_memory_mb: AtomicU64,
}

#[cfg(feature = "cli")]
impl SystemMonitor {
    pub fn new(enabled: bool) -> Self {
        let probe = if enabled {
            match sysinfo::get_current_pid() {
                Ok(pid) => Some(Probe {
                    system: Mutex::new(System::new()),
                    pid,
                }),
                Err(e) => {
                    tracing::warn!("System monitoring unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            probe,
            started: Instant::now(),
            peak_memory_mb: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.probe.is_some()
    }

    pub fn sample(&self) -> Option<ResourceSample> {
        let probe = self.probe.as_ref()?;
        let mut system = probe.system.lock().ok()?;
        system.refresh_processes(ProcessesToUpdate::Some(&[probe.pid]), true);
        let process = system.process(probe.pid)?;

        let memory_mb = process.memory() / 1024 / 1024;
        self.peak_memory_mb.fetch_max(memory_mb, Ordering::Relaxed);
        Some(ResourceSample {
            cpu_usage: process.cpu_usage(),
            memory_mb,
        })
    }

    pub fn log_start(&self, steps: usize) {
        if let Some(sample) = self.sample() {
            tracing::info!(
                "📊 Starting {} steps - CPU: {:.1}%, Memory: {}MB",
                steps,
                sample.cpu_usage,
                sample.memory_mb
            );
        }
    }

    pub fn log_step(&self, summary: &StepSummary) {
        if let Some(sample) = self.sample() {
            tracing::info!(
                "📊 Step '{}' - {:.1} comics/s, CPU: {:.1}%, Memory: {}MB",
                summary.step,
                throughput(summary),
                sample.cpu_usage,
                sample.memory_mb
            );
        }
    }

    pub fn log_finish(&self) {
        if self.sample().is_some() {
            tracing::info!(
                "📊 Batch finished - Total Time: {:?}, Peak Memory: {}MB",
                self.started.elapsed(),
                self.peak_memory_mb.load(Ordering::Relaxed)
            );
        }
    }
}

// 非 CLI 建置時的空實作
#[cfg(not(feature = "cli"))]
pub struct SystemMonitor;

#[cfg(not(feature = "cli"))]
impl SystemMonitor {
    pub fn new(_enabled: bool) -> Self {
        Self
    }

    pub fn is_enabled(&self) -> bool {
        false
    }

    pub fn sample(&self) -> Option<ResourceSample> {
        None
    }

    pub fn log_start(&self, _steps: usize) {}

    pub fn log_step(&self, _summary: &StepSummary) {}

    pub fn log_finish(&self) {}
}
