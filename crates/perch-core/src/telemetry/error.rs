use std::path::PathBuf;

use crate::telemetry::stats::HardwareDomain;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to read '{}' while sampling {domain}: {source}", path.display())]
    Read {
        domain: HardwareDomain,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed data in '{}' while sampling {domain}: {message}", path.display())]
    Parse {
        domain: HardwareDomain,
        path: PathBuf,
        message: String,
    },

    #[error("Sampling {domain} panicked: {message}")]
    Panicked { domain: HardwareDomain, message: String },

    #[error("No data available for {0}")]
    Unavailable(HardwareDomain),

    #[error("Unknown hardware domain '{0}'")]
    UnknownDomain(String),
}
