//! Shared test harness: mock provider backends and a test server wrapper

pub mod config;
pub mod mock_provider;
pub mod server;
