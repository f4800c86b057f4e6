use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::Serialize;

use crate::telemetry::error::TelemetryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareDomain {
    Cpu,
    Gpu,
    Memory,
    Disk,
    Network,
}

impl HardwareDomain {
    pub const ALL: [HardwareDomain; 5] = [
        HardwareDomain::Cpu,
        HardwareDomain::Gpu,
        HardwareDomain::Memory,
        HardwareDomain::Disk,
        HardwareDomain::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HardwareDomain::Cpu => "cpu",
            HardwareDomain::Gpu => "gpu",
            HardwareDomain::Memory => "memory",
            HardwareDomain::Disk => "disk",
            HardwareDomain::Network => "network",
        }
    }
}

impl fmt::Display for HardwareDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HardwareDomain {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HardwareDomain::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TelemetryError::UnknownDomain(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuStats {
    pub usage_percent: f32,
    pub per_core_percent: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuAdapterStats {
    pub name: String,
    pub busy_percent: Option<f32>,
    pub vram_used_bytes: Option<u64>,
    pub vram_total_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuStats {
    pub adapters: Vec<GpuAdapterStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub usage_percent: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskDeviceStats {
    pub name: String,
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskStats {
    pub devices: Vec<DiskDeviceStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkInterfaceStats {
    pub name: String,
    pub rx_bytes_per_sec: f64,
    pub tx_bytes_per_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkStats {
    pub interfaces: Vec<NetworkInterfaceStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "domain", rename_all = "lowercase")]
pub enum DomainStats {
    Cpu(CpuStats),
    Gpu(GpuStats),
    Memory(MemoryStats),
    Disk(DiskStats),
    Network(NetworkStats),
}

impl DomainStats {
    pub fn domain(&self) -> HardwareDomain {
        match self {
            DomainStats::Cpu(_) => HardwareDomain::Cpu,
            DomainStats::Gpu(_) => HardwareDomain::Gpu,
            DomainStats::Memory(_) => HardwareDomain::Memory,
            DomainStats::Disk(_) => HardwareDomain::Disk,
            DomainStats::Network(_) => HardwareDomain::Network,
        }
    }
}

/// One published reading. `sequence` grows by one per successful refresh
/// of the domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainSample {
    pub sequence: u64,
    #[serde(skip)]
    pub taken_at: SystemTime,
    pub stats: DomainStats,
}

impl DomainSample {
    pub fn domain(&self) -> HardwareDomain {
        self.stats.domain()
    }
}
