// Test entry point for the scan, tree and deletion core
// All tests run against the in-memory store in support.rs


mod browser_tests;
mod delete_tests;
mod scan_tests;
