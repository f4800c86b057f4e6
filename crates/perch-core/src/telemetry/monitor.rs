use std::fmt::Debug;

use crate::telemetry::error::TelemetryError;
use crate::telemetry::stats::{DomainStats, HardwareDomain};

/// Source of hardware readings. `refresh` is called from a blocking worker
/// thread, at most once at a time per monitor.
pub trait HardwareMonitor: Send + Sync + Debug {
    fn refresh(&self, domain: HardwareDomain) -> Result<DomainStats, TelemetryError>;
}
