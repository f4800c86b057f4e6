//! # Perch Core Telemetry
//!
//! Hardware statistics shared by all widgets: a [`HardwareMonitor`] reads
//! the system, the [`TelemetryEngine`] samples it on one timer and fans the
//! readings out to subscribers.
pub mod engine;
pub mod error;
pub mod monitor;
pub mod procfs;
pub mod stats;

pub use engine::{SamplingIntervals, Subscription, TelemetryCallback, TelemetryEngine, TickOutcome};
pub use error::TelemetryError;
pub use monitor::HardwareMonitor;
pub use procfs::ProcfsMonitor;
pub use stats::{
    CpuStats, DiskDeviceStats, DiskStats, DomainSample, DomainStats, GpuAdapterStats, GpuStats,
    HardwareDomain, MemoryStats, NetworkInterfaceStats, NetworkStats,
};
