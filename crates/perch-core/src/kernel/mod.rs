//! # Perch Core Kernel
//!
//! Composition root of the widget platform. [`Host`] wires the settings
//! store, telemetry engine, plugin manager and lifecycle controller
//! together and drives them through the [`KernelComponent`] lifecycle.
//!
//! - **[`bootstrap`]**: [`Host`] and [`HostBuilder`].
//! - **[`component`]**: The [`KernelComponent`] trait and
//!   [`DependencyRegistry`].
//! - **[`constants`]**: Application-wide names, file names and defaults.
//! - **[`error`]**: The top-level [`Error`] aggregating every subsystem error.
pub mod bootstrap;
pub mod component;
pub mod constants;
pub mod error;

pub use bootstrap::{Host, HostBuilder};
pub use component::{DependencyRegistry, KernelComponent};
pub use error::{Error, KernelLifecyclePhase, Result};

// Test module declaration
#[cfg(test)]
mod tests;
