//! Process-wide log output.
//!
//! `perch-core` and the plugins log through the `log` facade; those records
//! are bridged into `tracing` and printed to stderr so command output on
//! stdout stays clean.
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "PERCH_LOG";

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return;
    }
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::warn!("log records will not be captured: {}", e);
    }
}
