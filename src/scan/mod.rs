//! Scan orchestration: partition the namespace into listing tasks, run them
//! on a bounded worker pool and feed results into the shared tree.

pub mod coverage;
pub mod orchestrator;
pub mod progress;
pub mod queue;
pub mod task;

pub use coverage::Coverage;
pub use orchestrator::{ScanFailure, ScanHandle, ScanOptions, ScanSummary, Scanner, DEFAULT_SPLIT_ALPHABET};
pub use progress::{ScanProgress, ScanSnapshot, ScanState};
pub use queue::WorkQueue;
pub use task::{ScanTask, TaskState};
