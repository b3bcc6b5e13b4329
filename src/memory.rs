//! Memory-budget profiling for the batch scheduler.
//!
//! [`MemoryProfiler::profile`] classifies a fire's input size against the
//! configured optimization thresholds and cross-checks the projection
//! against memory available at call time. It is a pure function of the two
//! byte counts it is given; sampling the OS is the [`MemorySignal`]
//! collaborator's job, so the "re-query per job" rule stays enforceable
//! and the profiler stays mockable in tests.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::BatchConfig;

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// On-disk inputs expand when decompressed and loaded as geometry; peak
/// usage is modeled as this fixed multiple of input size.
const PEAK_MEMORY_MULTIPLIER: f64 = 4.0;

/// Processing strategy for one job. Fixed once the job enters preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    None,
    Light,
    Moderate,
    Aggressive,
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationLevel::None => write!(f, "none"),
            OptimizationLevel::Light => write!(f, "light"),
            OptimizationLevel::Moderate => write!(f, "moderate"),
            OptimizationLevel::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Output of one profiling call. Computed fresh before each job's
/// preprocessing stage and discarded when that stage finishes; available
/// memory drifts over the batch's lifetime, so directives are never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDirective {
    pub available_gb: f64,
    pub input_size_mb: f64,
    pub level: OptimizationLevel,
    /// Max features per processing chunk. Set only when projected peak
    /// usage exceeds available memory even at the aggressive level.
    pub chunking_hint: Option<u32>,
}

/// Classifies input sizes into optimization directives.
#[derive(Debug, Clone)]
pub struct MemoryProfiler {
    light_threshold_mb: f64,
    moderate_threshold_mb: f64,
    aggressive_threshold_mb: f64,
    chunk_features: u32,
}

impl MemoryProfiler {
    pub fn new(
        light_threshold_mb: f64,
        moderate_threshold_mb: f64,
        aggressive_threshold_mb: f64,
        chunk_features: u32,
    ) -> Self {
        Self {
            light_threshold_mb,
            moderate_threshold_mb,
            aggressive_threshold_mb,
            chunk_features,
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(
            config.light_threshold_mb,
            config.moderate_threshold_mb,
            config.aggressive_threshold_mb,
            config.chunk_features,
        )
    }

    /// Produces the directive for one job.
    ///
    /// Pure and deterministic: identical byte counts yield identical
    /// directives. Zero-size input classifies as `None` rather than
    /// erroring.
    pub fn profile(&self, input_size_bytes: u64, available_memory_bytes: u64) -> MemoryDirective {
        let input_size_mb = input_size_bytes as f64 / MB;
        let available_gb = available_memory_bytes as f64 / GB;

        let mut level = if input_size_mb < self.light_threshold_mb {
            OptimizationLevel::None
        } else if input_size_mb < self.moderate_threshold_mb {
            OptimizationLevel::Light
        } else if input_size_mb < self.aggressive_threshold_mb {
            OptimizationLevel::Moderate
        } else {
            OptimizationLevel::Aggressive
        };

        // Even the aggressive level cannot help if the projected peak does
        // not fit in memory; force bounded-size chunks instead.
        let projected_peak = input_size_bytes as f64 * PEAK_MEMORY_MULTIPLIER;
        let chunking_hint = if projected_peak > available_memory_bytes as f64 {
            level = OptimizationLevel::Aggressive;
            Some(self.chunk_features)
        } else {
            None
        };

        MemoryDirective {
            available_gb,
            input_size_mb,
            level,
            chunking_hint,
        }
    }
}

/// Source of the free-memory reading. Injected so the profiler can be fed
/// fixed numbers in tests, and re-queried before every job.
pub trait MemorySignal: Send + Sync {
    fn current_available_memory_bytes(&self) -> u64;
}

/// Reads `MemAvailable` from `/proc/meminfo`.
pub struct ProcMeminfo;

impl MemorySignal for ProcMeminfo {
    fn current_available_memory_bytes(&self) -> u64 {
        let Ok(contents) = std::fs::read_to_string("/proc/meminfo") else {
            return 0;
        };
        parse_meminfo(&contents)
    }
}

/// Extracts the available-memory figure in bytes, falling back to
/// `MemFree` on kernels without `MemAvailable`.
fn parse_meminfo(contents: &str) -> u64 {
    let field = |key: &str| {
        contents.lines().find_map(|line| {
            let rest = line.strip_prefix(key)?;
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            Some(kb * 1024)
        })
    };
    field("MemAvailable:")
        .or_else(|| field("MemFree:"))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiler() -> MemoryProfiler {
        MemoryProfiler::new(10.0, 50.0, 100.0, 256)
    }

    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;

    #[test]
    fn profile_is_deterministic() {
        let p = profiler();
        let a = p.profile(75 * MIB, 8 * GIB);
        let b = p.profile(75 * MIB, 8 * GIB);
        assert_eq!(a, b);
    }

    #[test]
    fn zero_size_input_is_level_none() {
        let d = profiler().profile(0, 0);
        assert_eq!(d.level, OptimizationLevel::None);
        assert_eq!(d.chunking_hint, None);
        assert_eq!(d.input_size_mb, 0.0);
    }

    #[test]
    fn thresholds_classify_ascending() {
        let p = profiler();
        let plenty = 64 * GIB;
        assert_eq!(p.profile(5 * MIB, plenty).level, OptimizationLevel::None);
        assert_eq!(p.profile(25 * MIB, plenty).level, OptimizationLevel::Light);
        assert_eq!(p.profile(75 * MIB, plenty).level, OptimizationLevel::Moderate);
        assert_eq!(
            p.profile(150 * MIB, plenty).level,
            OptimizationLevel::Aggressive
        );
    }

    #[test]
    fn threshold_boundaries_are_half_open() {
        let p = profiler();
        let plenty = 64 * GIB;
        // Exactly 10 MB crosses into light; just under stays at none.
        assert_eq!(p.profile(10 * MIB, plenty).level, OptimizationLevel::Light);
        assert_eq!(
            p.profile(10 * MIB - 1, plenty).level,
            OptimizationLevel::None
        );
    }

    #[test]
    fn memory_pressure_forces_aggressive_chunking() {
        let p = profiler();
        // 30 MB input projects to 120 MB peak; only 64 MB available.
        let d = p.profile(30 * MIB, 64 * MIB);
        assert_eq!(d.level, OptimizationLevel::Aggressive);
        assert_eq!(d.chunking_hint, Some(256));
    }

    #[test]
    fn ample_memory_leaves_hint_unset() {
        let d = profiler().profile(150 * MIB, 32 * GIB);
        assert_eq!(d.level, OptimizationLevel::Aggressive);
        assert_eq!(d.chunking_hint, None);
    }

    #[test]
    fn parse_meminfo_prefers_mem_available() {
        let contents = "MemTotal:       16384000 kB\n\
                        MemFree:         1024000 kB\n\
                        MemAvailable:    8192000 kB\n";
        assert_eq!(parse_meminfo(contents), 8_192_000 * 1024);
    }

    #[test]
    fn parse_meminfo_falls_back_to_mem_free() {
        let contents = "MemTotal:       16384000 kB\nMemFree:         1024000 kB\n";
        assert_eq!(parse_meminfo(contents), 1_024_000 * 1024);
    }
}
