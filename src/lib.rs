// Library module for trench
// Re-exports modules for use in integration tests and the binary

pub mod app;
pub mod browser;
pub mod config;
pub mod delete;
pub mod events;
pub mod logging;
pub mod report;
pub mod retry;
pub mod scan;
pub mod store;
pub mod tree;
pub mod ui;
