pub mod config_tests;
pub mod local_tests;
