//! Host sampling and the dynamic resource-unit budget.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use crate::config::ResourceConfig;
use crate::job::{DownloadOptions, Quality};

/// Upper bound of a single job's estimated cost.
pub const MAX_JOB_UNITS: u32 = 6;

/// One observation of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostSample {
    pub cpu_cores: u32,
    pub free_mem_mb: u64,
    pub total_mem_mb: u64,
}

pub trait HostSampler: Send + Sync {
    fn sample(&self) -> HostSample;
}

/// Reads core count and available memory from the running system.
pub struct SysinfoSampler {
    system: Mutex<sysinfo::System>,
    cores: u32,
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
            cores: num_cpus::get().max(1) as u32,
        }
    }
}

impl HostSampler for SysinfoSampler {
    fn sample(&self) -> HostSample {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        let available = match system.available_memory() {
            0 => system.free_memory(),
            n => n,
        };
        HostSample {
            cpu_cores: self.cores,
            free_mem_mb: available / (1024 * 1024),
            total_mem_mb: total / (1024 * 1024),
        }
    }
}

/// Constant sample, for tests and for hosts where sampling is unwanted.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub HostSample);

impl HostSampler for FixedSampler {
    fn sample(&self) -> HostSample {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeBudget {
    pub cpu_cores: u32,
    pub free_mem_mb: u64,
    pub total_mem_mb: u64,
    pub cpu_budget_units: u32,
    pub mem_budget_units: u32,
    pub dynamic_unit_budget: u32,
}

/// Samples the host on demand and turns the sample into a unit budget.
/// Holds no job state.
pub struct ResourceMonitor {
    sampler: Arc<dyn HostSampler>,
    min_free_mem_mb: u64,
    mem_per_unit_mb: u64,
    cpu_target: f64,
    max_units: u32,
    max_ffmpeg_threads: u32,
}

impl ResourceMonitor {
    /// `cfg` is expected to be normalized (both optional ceilings set).
    pub fn new(sampler: Arc<dyn HostSampler>, cfg: &ResourceConfig) -> Self {
        Self {
            sampler,
            min_free_mem_mb: cfg.min_free_mem_mb,
            mem_per_unit_mb: cfg.mem_per_unit_mb.max(1),
            cpu_target: cfg.cpu_utilization_target,
            max_units: cfg.max_resource_units.unwrap_or(2).max(1),
            max_ffmpeg_threads: cfg.max_ffmpeg_threads.unwrap_or(4).max(1),
        }
    }

    pub fn current_budget(&self) -> RuntimeBudget {
        self.budget_for(self.sampler.sample())
    }

    pub fn budget_for(&self, sample: HostSample) -> RuntimeBudget {
        let cpu_budget_units =
            ((sample.cpu_cores as f64 * self.cpu_target * 2.0).floor() as u32).max(1);
        let mem_budget_units =
            (sample.free_mem_mb.saturating_sub(self.min_free_mem_mb) / self.mem_per_unit_mb) as u32;
        RuntimeBudget {
            cpu_cores: sample.cpu_cores,
            free_mem_mb: sample.free_mem_mb,
            total_mem_mb: sample.total_mem_mb,
            cpu_budget_units,
            mem_budget_units,
            dynamic_unit_budget: self.max_units.min(cpu_budget_units).min(mem_budget_units),
        }
    }

    /// ffmpeg threads for a job starting while `active` others run.
    pub fn ffmpeg_threads(&self, active: usize) -> u32 {
        let cores = self.sampler.sample().cpu_cores;
        let cpu_budget = ((cores as f64 * self.cpu_target).floor() as u32).max(1);
        let share = cpu_budget / (active as u32 + 1);
        share.clamp(1, self.max_ffmpeg_threads)
    }

    /// Estimated cost clamped to what this host can ever grant.
    pub fn job_cost(&self, options: &DownloadOptions) -> u32 {
        estimate_units(options).min(self.max_units)
    }
}

/// Rough CPU/memory weight of a download from its options, in `[1, 6]`.
pub fn estimate_units(options: &DownloadOptions) -> u32 {
    let mut units = 1;
    units += match options.quality.unwrap_or_default() {
        Quality::Q2160 | Quality::Q1440 => 2,
        Quality::Q1080 | Quality::Q720 => 1,
        Quality::Best | Quality::Audio => 0,
    };
    if options.hdr {
        units += 1;
    }
    if options.split_chapters {
        units += 1;
    }
    if options.items_limit.is_some_and(|n| n > 20) {
        units += 1;
    }
    units.clamp(1, MAX_JOB_UNITS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(sample: HostSample, max_units: u32) -> ResourceMonitor {
        let cfg = ResourceConfig {
            max_resource_units: Some(max_units),
            max_ffmpeg_threads: Some(4),
            ..ResourceConfig::default()
        };
        ResourceMonitor::new(Arc::new(FixedSampler(sample)), &cfg)
    }

    #[test]
    fn budget_takes_minimum_of_cpu_mem_and_ceiling() {
        let m = monitor(
            HostSample {
                cpu_cores: 8,
                free_mem_mb: 384 + 320 * 5 + 100,
                total_mem_mb: 16_000,
            },
            16,
        );
        let b = m.current_budget();
        assert_eq!(b.cpu_budget_units, 12);
        assert_eq!(b.mem_budget_units, 5);
        assert_eq!(b.dynamic_unit_budget, 5);
    }

    #[test]
    fn low_memory_yields_zero_budget() {
        let m = monitor(
            HostSample {
                cpu_cores: 4,
                free_mem_mb: 200,
                total_mem_mb: 1_000,
            },
            8,
        );
        let b = m.current_budget();
        assert_eq!(b.mem_budget_units, 0);
        assert_eq!(b.dynamic_unit_budget, 0);
    }

    #[test]
    fn ceiling_caps_budget_and_cost() {
        let m = monitor(
            HostSample {
                cpu_cores: 64,
                free_mem_mb: 1_000_000,
                total_mem_mb: 1_000_000,
            },
            3,
        );
        assert_eq!(m.current_budget().dynamic_unit_budget, 3);
        let heavy = DownloadOptions {
            quality: Some(Quality::Q2160),
            hdr: true,
            split_chapters: true,
            ..Default::default()
        };
        assert_eq!(estimate_units(&heavy), 5);
        assert_eq!(m.job_cost(&heavy), 3);
    }

    #[test]
    fn unit_estimate() {
        assert_eq!(estimate_units(&DownloadOptions::default()), 1);
        let o = DownloadOptions {
            quality: Some(Quality::Q1080),
            items_limit: Some(21),
            ..Default::default()
        };
        assert_eq!(estimate_units(&o), 3);
        let o = DownloadOptions {
            quality: Some(Quality::Q1440),
            hdr: true,
            split_chapters: true,
            items_limit: Some(100),
            ..Default::default()
        };
        assert_eq!(estimate_units(&o), MAX_JOB_UNITS);
        let o = DownloadOptions {
            items_limit: Some(20),
            ..Default::default()
        };
        assert_eq!(estimate_units(&o), 1);
    }

    #[test]
    fn ffmpeg_threads_split_between_active_jobs() {
        let m = monitor(
            HostSample {
                cpu_cores: 8,
                free_mem_mb: 8_000,
                total_mem_mb: 8_000,
            },
            16,
        );
        assert_eq!(m.ffmpeg_threads(0), 4);
        assert_eq!(m.ffmpeg_threads(1), 3);
        assert_eq!(m.ffmpeg_threads(5), 1);
        assert_eq!(m.ffmpeg_threads(100), 1);
    }
}
