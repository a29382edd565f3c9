//! Platform detection for interpreting cross-core figures.
//!
//! Captures what matters for coherence measurements:
//! - CPU model and core counts
//! - Counter capabilities (`rdtscp`, `constant_tsc`, `nonstop_tsc`)
//! - OS, kernel, governor, and whether we run under a hypervisor

use serde::{Deserialize, Serialize};
#[cfg(target_os = "linux")]
use std::fs;

/// CPU flags relevant to cycle-counter timing
const TIMING_FLAGS: &[&str] = &["rdtscp", "constant_tsc", "nonstop_tsc", "tsc_known_freq"];

/// CPU information for benchmark context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuInfo {
    /// CPU model name (e.g., "AMD Ryzen 9 5900X")
    pub model: String,
    /// Number of physical cores
    pub physical_cores: usize,
    /// Number of logical cores (with hyperthreading)
    pub logical_cores: usize,
    /// Timing-related CPU flags present on this machine
    pub timing_flags: Vec<String>,
}

/// Complete platform information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub cpu: CpuInfo,
    /// Operating system
    pub os: String,
    /// Kernel version (Linux) or "unknown"
    pub kernel: String,
    /// Architecture (x86_64, aarch64, etc.)
    pub arch: String,
    /// Whether running in a VM
    pub virtualized: bool,
    /// CPU governor setting (Linux)
    pub cpu_governor: Option<String>,
}

/// Detect platform information
pub fn detect_platform() -> PlatformInfo {
    PlatformInfo {
        cpu: detect_cpu_info(),
        os: detect_os(),
        kernel: detect_kernel(),
        arch: std::env::consts::ARCH.to_string(),
        virtualized: detect_virtualization(),
        cpu_governor: detect_cpu_governor(),
    }
}

fn detect_cpu_info() -> CpuInfo {
    #[cfg(target_os = "linux")]
    {
        let cpuinfo = fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
        CpuInfo {
            model: parse_model(&cpuinfo),
            physical_cores: num_cpus::get_physical(),
            logical_cores: num_cpus::get(),
            timing_flags: parse_timing_flags(&cpuinfo),
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        CpuInfo {
            model: "Unknown".to_string(),
            physical_cores: num_cpus::get_physical(),
            logical_cores: num_cpus::get(),
            timing_flags: vec![],
        }
    }
}

fn parse_model(cpuinfo: &str) -> String {
    cpuinfo
        .lines()
        .find(|l| l.starts_with("model name"))
        .and_then(|l| l.split(':').nth(1))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn parse_timing_flags(cpuinfo: &str) -> Vec<String> {
    cpuinfo
        .lines()
        .find(|l| l.starts_with("flags"))
        .and_then(|l| l.split(':').nth(1))
        .map(|flags| {
            flags
                .split_whitespace()
                .filter(|f| TIMING_FLAGS.contains(f))
                .map(|f| f.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn detect_os() -> String {
    #[cfg(target_os = "linux")]
    {
        fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|s| {
                s.lines()
                    .find(|l| l.starts_with("PRETTY_NAME="))
                    .map(|l| l.trim_start_matches("PRETTY_NAME=").trim_matches('"').to_string())
            })
            .unwrap_or_else(|| "Linux".to_string())
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::consts::OS.to_string()
    }
}

fn detect_kernel() -> String {
    #[cfg(target_os = "linux")]
    {
        fs::read_to_string("/proc/version")
            .ok()
            .and_then(|s| s.split_whitespace().nth(2).map(|v| v.to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }
    #[cfg(not(target_os = "linux"))]
    {
        "unknown".to_string()
    }
}

fn detect_virtualization() -> bool {
    #[cfg(target_os = "linux")]
    {
        let cpuinfo = fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
        let dmi = fs::read_to_string("/sys/class/dmi/id/product_name")
            .unwrap_or_default()
            .to_lowercase();

        cpuinfo.contains("hypervisor")
            || ["virtual", "vmware", "kvm", "qemu"]
                .iter()
                .any(|marker| dmi.contains(marker))
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

fn detect_cpu_governor() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/scaling_governor")
            .ok()
            .map(|s| s.trim().to_string())
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

impl PlatformInfo {
    /// Whether `flag` appears among the detected timing flags
    pub fn has_flag(&self, flag: &str) -> bool {
        self.cpu.timing_flags.iter().any(|f| f == flag)
    }

    /// Whether an invariant TSC is advertised, judged from the detected flags
    fn constant_tsc(&self) -> bool {
        if cfg!(all(target_arch = "x86_64", target_os = "linux")) {
            self.has_flag("constant_tsc")
        } else {
            has_constant_tsc()
        }
    }

    /// Conditions that make cycle figures unreliable
    pub fn timing_hazards(&self) -> Vec<String> {
        let mut hazards = Vec::new();
        if !has_rdtscp() {
            hazards.push(
                "Serializing counter read (rdtscp) not available; intervals may be reordered"
                    .to_string(),
            );
        }
        if !self.constant_tsc() {
            hazards.push(
                "No invariant TSC advertised; cycle counts may drift with frequency changes"
                    .to_string(),
            );
        }
        if self.cpu.logical_cores < 2 {
            hazards.push(format!(
                "Only {} logical core available; cross-core figures will measure time slicing",
                self.cpu.logical_cores
            ));
        }
        if self.virtualized {
            hazards.push("Running under a hypervisor; counter reads may trap or be scaled".into());
        }
        if let Some(gov) = &self.cpu_governor {
            if gov != "performance" {
                hazards.push(format!(
                    "CPU governor is '{}'; 'performance' gives steadier results",
                    gov
                ));
            }
        }
        hazards
    }

    /// Log a warning for each timing hazard
    pub fn warn_on_timing_hazards(&self) {
        for hazard in self.timing_hazards() {
            log::warn!("{}", hazard);
        }
    }
}

/// Check if constant TSC is available (required for stable cycle timing)
#[cfg(target_arch = "x86_64")]
pub fn has_constant_tsc() -> bool {
    #[cfg(target_os = "linux")]
    {
        detect_platform().has_flag("constant_tsc")
    }
    #[cfg(not(target_os = "linux"))]
    {
        // Assume modern x86_64 has constant TSC
        true
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub fn has_constant_tsc() -> bool {
    false
}

/// Check whether the serializing RDTSCP instruction is supported
#[cfg(target_arch = "x86_64")]
pub fn has_rdtscp() -> bool {
    let ext_max = unsafe { core::arch::x86_64::__cpuid(0x8000_0000) }.eax;
    if ext_max < 0x8000_0001 {
        return false;
    }
    let leaf = unsafe { core::arch::x86_64::__cpuid(0x8000_0001) };
    leaf.edx & (1 << 27) != 0
}

#[cfg(not(target_arch = "x86_64"))]
pub fn has_rdtscp() -> bool {
    false
}

/// Pin the current thread to `core`
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(core: usize) -> Result<(), Box<dyn std::error::Error>> {
    use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_ZERO};
    use std::mem;

    unsafe {
        let mut cpu_set: cpu_set_t = mem::zeroed();
        CPU_ZERO(&mut cpu_set);
        CPU_SET(core, &mut cpu_set);

        let result = sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &cpu_set);
        if result != 0 {
            return Err(format!("Failed to set CPU affinity to core {}", core).into());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_cpu_affinity(_core: usize) -> Result<(), Box<dyn std::error::Error>> {
    Ok(()) // No-op on non-Linux
}

/// Pin to `core` when one is given; failures are logged, never fatal
pub(crate) fn pin_current_thread(core: Option<usize>) {
    if let Some(core) = core {
        if let Err(e) = set_cpu_affinity(core) {
            log::warn!("{}", e);
        }
    }
}
