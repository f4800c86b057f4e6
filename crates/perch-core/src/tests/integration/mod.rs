#![cfg(test)]

pub mod host_tests;
pub mod plugin_toggle_tests;
pub mod settings_flow_tests;
