//! [`HardwareMonitor`] reading Linux `/proc` and `/sys`.
//!
//! Rates (CPU usage, disk and network throughput) are computed from the
//! difference between two consecutive refreshes of the same domain. The
//! first CPU refresh reports usage since boot; the first disk and network
//! refreshes report zero rates.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::telemetry::error::TelemetryError;
use crate::telemetry::monitor::HardwareMonitor;
use crate::telemetry::stats::{
    CpuStats, DiskDeviceStats, DiskStats, DomainStats, GpuAdapterStats, GpuStats, HardwareDomain,
    MemoryStats, NetworkInterfaceStats, NetworkStats,
};

const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cpu: Option<Vec<CpuTimes>>,
    disk: Option<(Instant, HashMap<String, (u64, u64)>)>,
    net: Option<(Instant, HashMap<String, (u64, u64)>)>,
}

#[derive(Debug)]
pub struct ProcfsMonitor {
    proc_root: PathBuf,
    sys_root: PathBuf,
    counters: Mutex<Counters>,
}

impl Default for ProcfsMonitor {
    fn default() -> Self {
        Self::with_roots("/proc", "/sys")
    }
}

impl ProcfsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads from alternative roots instead of `/proc` and `/sys`.
    pub fn with_roots(proc_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            sys_root: sys_root.into(),
            counters: Mutex::new(Counters::default()),
        }
    }

    fn read(&self, domain: HardwareDomain, path: &Path) -> Result<String, TelemetryError> {
        fs::read_to_string(path).map_err(|source| TelemetryError::Read {
            domain,
            path: path.to_path_buf(),
            source,
        })
    }

    fn cpu(&self) -> Result<DomainStats, TelemetryError> {
        let path = self.proc_root.join("stat");
        let times = parse_cpu_times(&self.read(HardwareDomain::Cpu, &path)?);
        if times.is_empty() {
            return Err(TelemetryError::Parse {
                domain: HardwareDomain::Cpu,
                path,
                message: "no cpu lines".to_string(),
            });
        }

        let mut counters = self.counters.lock();
        let usage: Vec<f32> = match &counters.cpu {
            Some(previous) if previous.len() == times.len() => times
                .iter()
                .zip(previous)
                .map(|(now, before)| busy_percent(now.busy.saturating_sub(before.busy), now.total.saturating_sub(before.total)))
                .collect(),
            _ => times.iter().map(|t| busy_percent(t.busy, t.total)).collect(),
        };
        counters.cpu = Some(times);

        Ok(DomainStats::Cpu(CpuStats {
            usage_percent: usage[0],
            per_core_percent: usage[1..].to_vec(),
        }))
    }

    fn memory(&self) -> Result<DomainStats, TelemetryError> {
        let path = self.proc_root.join("meminfo");
        let content = self.read(HardwareDomain::Memory, &path)?;
        let (total_kb, available_kb) = parse_meminfo(&content).ok_or_else(|| TelemetryError::Parse {
            domain: HardwareDomain::Memory,
            path,
            message: "MemTotal or MemAvailable missing".to_string(),
        })?;
        let total_bytes = total_kb * 1024;
        let available_bytes = available_kb.min(total_kb) * 1024;
        let used_bytes = total_bytes - available_bytes;
        let usage_percent = if total_bytes == 0 {
            0.0
        } else {
            (used_bytes as f64 / total_bytes as f64 * 100.0) as f32
        };
        Ok(DomainStats::Memory(MemoryStats {
            total_bytes,
            available_bytes,
            used_bytes,
            usage_percent,
        }))
    }

    fn disk(&self) -> Result<DomainStats, TelemetryError> {
        let path = self.proc_root.join("diskstats");
        let now = Instant::now();
        let current = parse_diskstats(&self.read(HardwareDomain::Disk, &path)?);

        let mut counters = self.counters.lock();
        let devices = rates(counters.disk.as_ref(), now, &current)
            .into_iter()
            .map(|(name, read, write)| DiskDeviceStats {
                name,
                read_bytes_per_sec: read,
                write_bytes_per_sec: write,
            })
            .collect();
        counters.disk = Some((now, current));
        Ok(DomainStats::Disk(DiskStats { devices }))
    }

    fn network(&self) -> Result<DomainStats, TelemetryError> {
        let path = self.proc_root.join("net").join("dev");
        let now = Instant::now();
        let current = parse_net_dev(&self.read(HardwareDomain::Network, &path)?);

        let mut counters = self.counters.lock();
        let interfaces = rates(counters.net.as_ref(), now, &current)
            .into_iter()
            .map(|(name, rx, tx)| NetworkInterfaceStats {
                name,
                rx_bytes_per_sec: rx,
                tx_bytes_per_sec: tx,
            })
            .collect();
        counters.net = Some((now, current));
        Ok(DomainStats::Network(NetworkStats { interfaces }))
    }

    fn gpu(&self) -> Result<DomainStats, TelemetryError> {
        let drm = self.sys_root.join("class").join("drm");
        let entries = match fs::read_dir(&drm) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("No DRM devices under '{}': {}", drm.display(), e);
                return Ok(DomainStats::Gpu(GpuStats { adapters: Vec::new() }));
            }
        };

        let mut cards: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| is_card_name(name))
            .collect();
        cards.sort();

        let adapters = cards
            .into_iter()
            .map(|name| {
                let device = drm.join(&name).join("device");
                GpuAdapterStats {
                    busy_percent: read_number(&device.join("gpu_busy_percent")).map(|v| v as f32),
                    vram_used_bytes: read_number(&device.join("mem_info_vram_used")),
                    vram_total_bytes: read_number(&device.join("mem_info_vram_total")),
                    name,
                }
            })
            .collect();
        Ok(DomainStats::Gpu(GpuStats { adapters }))
    }
}

impl HardwareMonitor for ProcfsMonitor {
    fn refresh(&self, domain: HardwareDomain) -> Result<DomainStats, TelemetryError> {
        match domain {
            HardwareDomain::Cpu => self.cpu(),
            HardwareDomain::Gpu => self.gpu(),
            HardwareDomain::Memory => self.memory(),
            HardwareDomain::Disk => self.disk(),
            HardwareDomain::Network => self.network(),
        }
    }
}

fn busy_percent(busy: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0) as f32
    }
}

/// `cpu` aggregate line first, then one entry per `cpuN` line.
pub(crate) fn parse_cpu_times(content: &str) -> Vec<CpuTimes> {
    content
        .lines()
        .filter(|line| line.starts_with("cpu"))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            fields.next()?;
            let values: Vec<u64> = fields.take(8).filter_map(|v| v.parse().ok()).collect();
            if values.len() < 4 {
                warn!("Ignoring malformed cpu line: {}", line);
                return None;
            }
            let total: u64 = values.iter().sum();
            let idle = values[3] + values.get(4).copied().unwrap_or(0);
            Some(CpuTimes {
                busy: total.saturating_sub(idle),
                total,
            })
        })
        .collect()
}

/// `(MemTotal, MemAvailable)` in kB.
pub(crate) fn parse_meminfo(content: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut available = None;
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.split_whitespace().next().and_then(|v| v.parse::<u64>().ok());
        match key.trim() {
            "MemTotal" => total = value,
            "MemAvailable" => available = value,
            _ => {}
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }
    Some((total?, available?))
}

/// Bytes read and written per block device, virtual devices excluded.
pub(crate) fn parse_diskstats(content: &str) -> HashMap<String, (u64, u64)> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }
            let name = fields[2];
            if name.starts_with("loop") || name.starts_with("ram") || name.starts_with("zram") {
                return None;
            }
            let sectors_read: u64 = fields[5].parse().ok()?;
            let sectors_written: u64 = fields[9].parse().ok()?;
            Some((name.to_string(), (sectors_read * SECTOR_SIZE, sectors_written * SECTOR_SIZE)))
        })
        .collect()
}

/// Received and transmitted bytes per interface, loopback excluded.
pub(crate) fn parse_net_dev(content: &str) -> HashMap<String, (u64, u64)> {
    content
        .lines()
        .filter_map(|line| {
            let (name, counters) = line.split_once(':')?;
            let name = name.trim();
            if name == "lo" {
                return None;
            }
            let fields: Vec<u64> = counters
                .split_whitespace()
                .map(|v| v.parse::<u64>())
                .collect::<Result<_, _>>()
                .ok()?;
            if fields.len() < 9 {
                return None;
            }
            Some((name.to_string(), (fields[0], fields[8])))
        })
        .collect()
}

fn rates(
    previous: Option<&(Instant, HashMap<String, (u64, u64)>)>,
    now: Instant,
    current: &HashMap<String, (u64, u64)>,
) -> Vec<(String, f64, f64)> {
    let mut out: Vec<(String, f64, f64)> = current
        .iter()
        .map(|(name, (a, b))| {
            let rate = previous.and_then(|(at, before)| {
                let elapsed = now.duration_since(*at).as_secs_f64();
                let (pa, pb) = before.get(name)?;
                (elapsed > 0.0).then(|| {
                    (
                        a.saturating_sub(*pa) as f64 / elapsed,
                        b.saturating_sub(*pb) as f64 / elapsed,
                    )
                })
            });
            let (ra, rb) = rate.unwrap_or((0.0, 0.0));
            (name.clone(), ra, rb)
        })
        .collect();
    out.sort_by(|x, y| x.0.cmp(&y.0));
    out
}

fn is_card_name(name: &str) -> bool {
    name.strip_prefix("card")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

fn read_number(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}
