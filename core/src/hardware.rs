// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Hardware detection and the worker performance score.
//!
//! A worker's score is the sum of three independently-capped components —
//! CPU, RAM and GPU — clamped to 100. Detection degrades to documented
//! fallback constants on any platform where a signal can't be read, so the
//! score is always computable.

use serde::{Deserialize, Serialize};
use std::process::Command;
use sysinfo::System;

const FALLBACK_CPU_CORES: usize = 4;
const FALLBACK_CPU_GHZ: f64 = 2.5;
const FALLBACK_RAM_GB: f64 = 8.0;
const UNKNOWN_GPU: &str = "Unknown GPU";

/// Detected (or fallen-back) hardware facts for a single worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HardwareSpecs {
    /// Logical CPU core count.
    pub cpu_cores: usize,
    /// Base CPU clock speed in GHz.
    pub cpu_ghz: f64,
    /// Total system RAM in GB.
    pub ram_gb: f64,
    /// Human-readable GPU description, e.g. "NVIDIA GeForce RTX 4090".
    pub gpu_name: String,
    /// GPU memory in GB, 0.0 if undetectable or absent.
    pub gpu_memory_gb: f64,
    /// Human-readable OS descriptor.
    pub os_name: String,
}

impl HardwareSpecs {
    /// Detect the local machine's hardware, falling back to documented
    /// defaults for any signal that can't be read.
    pub fn detect() -> Self {
        Self {
            cpu_cores: detect_cpu_cores(),
            cpu_ghz: detect_cpu_ghz().unwrap_or(FALLBACK_CPU_GHZ),
            ram_gb: detect_ram_gb().unwrap_or(FALLBACK_RAM_GB),
            gpu_name: detect_gpu_name().unwrap_or_else(|| UNKNOWN_GPU.to_string()),
            gpu_memory_gb: detect_gpu_memory_gb().unwrap_or(0.0),
            os_name: detect_os_name(),
        }
    }

    /// The combined performance score, `cpu_score + ram_score + gpu_score`
    /// clamped to `[0, 100]`.
    pub fn score(&self) -> f64 {
        let cpu = cpu_score(self.cpu_cores, self.cpu_ghz);
        let ram = ram_score(self.ram_gb);
        let gpu = gpu_score(&self.gpu_name);
        (cpu + ram + gpu).clamp(0.0, 100.0)
    }
}

/// CPU contribution: `min(20, cores*1.5) + min(20, ghz*6)`, range 0-40.
fn cpu_score(cores: usize, ghz: f64) -> f64 {
    (cores as f64 * 1.5).min(20.0) + (ghz * 6.0).min(20.0)
}

/// RAM contribution: `min(30, ram_gb*1.5)`, range 0-30.
fn ram_score(ram_gb: f64) -> f64 {
    (ram_gb * 1.5).min(30.0)
}

/// GPU contribution, a substring ladder over the reported GPU name.
/// Ordered from most to least capable so the first match wins.
fn gpu_score(gpu_name: &str) -> f64 {
    let gpu = gpu_name.to_lowercase();
    if gpu.is_empty() {
        return 5.0;
    }
    if gpu.contains("rtx 40") || gpu.contains("a100") || gpu.contains("h100") {
        30.0
    } else if gpu.contains("rtx 30") || gpu.contains("v100") || gpu.contains("a40") {
        28.0
    } else if gpu.contains("rtx 20") || gpu.contains("gtx 16") || gpu.contains("quadro") {
        25.0
    } else if gpu.contains("rtx") {
        22.0
    } else if gpu.contains("gtx") {
        18.0
    } else if gpu.contains("nvidia") {
        15.0
    } else if gpu.contains("rx 7") || gpu.contains("rx 6") {
        25.0
    } else if gpu.contains("rx 5") || gpu.contains("vega") {
        20.0
    } else if gpu.contains("amd") || gpu.contains("radeon") {
        15.0
    } else if gpu.contains("arc") {
        20.0
    } else if gpu.contains("iris") {
        12.0
    } else if gpu.contains("intel") {
        8.0
    } else if gpu.contains("m3") {
        28.0
    } else if gpu.contains("m2") {
        25.0
    } else if gpu.contains("m1") {
        22.0
    } else if gpu.contains("apple") {
        20.0
    } else {
        5.0
    }
}

fn detect_cpu_cores() -> usize {
    let n = num_cpus::get();
    if n == 0 {
        FALLBACK_CPU_CORES
    } else {
        n
    }
}

#[cfg(target_os = "linux")]
fn detect_cpu_ghz() -> Option<f64> {
    let contents = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("cpu MHz") {
            let mhz: f64 = rest.trim_start_matches([':', ' ', '\t']).trim().parse().ok()?;
            return Some(mhz / 1000.0);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn detect_cpu_ghz() -> Option<f64> {
    None
}

fn detect_ram_gb() -> Option<f64> {
    let mut sys = System::new();
    sys.refresh_memory();
    let total_kb = sys.total_memory();
    if total_kb == 0 {
        None
    } else {
        Some(total_kb as f64 / 1024.0 / 1024.0)
    }
}

#[cfg(target_os = "linux")]
fn detect_gpu_name() -> Option<String> {
    let output = Command::new("lspci").arg("-nn").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .find(|line| {
            let lower = line.to_lowercase();
            lower.contains("vga") || lower.contains("3d controller")
        })
        .map(|line| line.to_string())
}

#[cfg(target_os = "macos")]
fn detect_gpu_name() -> Option<String> {
    let output = Command::new("system_profiler")
        .arg("SPDisplaysDataType")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .find(|line| line.trim_start().starts_with("Chipset Model"))
        .and_then(|line| line.split(':').nth(1))
        .map(|s| s.trim().to_string())
}

#[cfg(target_os = "windows")]
fn detect_gpu_name() -> Option<String> {
    let output = Command::new("wmic")
        .args(["path", "win32_VideoController", "get", "name"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines().nth(1).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn detect_gpu_name() -> Option<String> {
    None
}

#[cfg(target_os = "linux")]
fn detect_gpu_memory_gb() -> Option<f64> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=memory.total", "--format=csv,noheader,nounits"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let mib: f64 = text.lines().next()?.trim().parse().ok()?;
    Some(mib / 1024.0)
}

#[cfg(not(target_os = "linux"))]
fn detect_gpu_memory_gb() -> Option<f64> {
    None
}

fn detect_os_name() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(contents) = std::fs::read_to_string("/etc/os-release") {
            for line in contents.lines() {
                if let Some(rest) = line.strip_prefix("PRETTY_NAME=") {
                    return rest.trim_matches('"').to_string();
                }
            }
        }
    }
    std::env::consts::OS.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_gpu_scores_five() {
        assert_eq!(gpu_score(UNKNOWN_GPU), 5.0);
    }

    #[test]
    fn datacenter_gpu_scores_thirty() {
        assert_eq!(gpu_score("NVIDIA H100 80GB"), 30.0);
        assert_eq!(gpu_score("NVIDIA A100-SXM4"), 30.0);
    }

    #[test]
    fn apple_silicon_ladder() {
        assert_eq!(gpu_score("Apple M3 Pro"), 28.0);
        assert_eq!(gpu_score("Apple M2"), 25.0);
        assert_eq!(gpu_score("Apple M1"), 22.0);
    }

    #[test]
    fn fallback_trio_scores_thirty_eight() {
        // cpu: min(20, 4*1.5=6)=6 + min(20, 2.5*6=15)=15 -> 21
        // ram: min(30, 8*1.5=12) -> 12
        // gpu: unknown -> 5
        let specs = HardwareSpecs {
            cpu_cores: FALLBACK_CPU_CORES,
            cpu_ghz: FALLBACK_CPU_GHZ,
            ram_gb: FALLBACK_RAM_GB,
            gpu_name: UNKNOWN_GPU.to_string(),
            gpu_memory_gb: 0.0,
            os_name: "unknown".to_string(),
        };
        assert_eq!(specs.score(), 38.0);
    }

    #[test]
    fn score_is_clamped_to_one_hundred() {
        let specs = HardwareSpecs {
            cpu_cores: 128,
            cpu_ghz: 5.5,
            ram_gb: 512.0,
            gpu_name: "NVIDIA H100".to_string(),
            gpu_memory_gb: 80.0,
            os_name: "linux".to_string(),
        };
        assert_eq!(specs.score(), 100.0);
    }

    #[test]
    fn empty_gpu_string_scores_five() {
        assert_eq!(gpu_score(""), 5.0);
    }
}
