//! # Perch Core Widget Lifecycle
//!
//! The per-instance state machine ([`WidgetState`]) and the
//! [`LifecycleController`] that drives it.
pub mod controller;
pub mod error;
pub mod state;

pub use controller::{AlwaysConfirm, DeleteConfirmation, DeleteOutcome, LifecycleController};
pub use error::LifecycleError;
pub use state::{LifecycleAction, WidgetState};
