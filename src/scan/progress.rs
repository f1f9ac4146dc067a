use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Running,
    Complete,
    Cancelled,
    CompletedWithErrors,
}

impl ScanState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ScanState::Complete,
            2 => ScanState::Cancelled,
            3 => ScanState::CompletedWithErrors,
            _ => ScanState::Running,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ScanState::Running => 0,
            ScanState::Complete => 1,
            ScanState::Cancelled => 2,
            ScanState::CompletedWithErrors => 3,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, ScanState::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScanState::Running => "scanning",
            ScanState::Complete => "complete",
            ScanState::Cancelled => "cancelled",
            ScanState::CompletedWithErrors => "completed with errors",
        }
    }
}

/// Live scan counters, shared between workers and whoever displays them.
///
/// `outstanding` is the queue's termination counter: tasks queued or in
/// flight. The scan is over when it reaches zero.
#[derive(Debug)]
pub struct ScanProgress {
    pub(crate) outstanding: AtomicUsize,
    objects: AtomicU64,
    bytes: AtomicU64,
    tasks_spawned: AtomicU64,
    tasks_done: AtomicU64,
    tasks_failed: AtomicU64,
    list_calls: AtomicU64,
    violations: AtomicU64,
    state: AtomicU8,
    started: Instant,
    elapsed: Mutex<Option<Duration>>,
}

/// Point-in-time copy of [`ScanProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSnapshot {
    pub outstanding: usize,
    pub objects: u64,
    pub bytes: u64,
    pub tasks_spawned: u64,
    pub tasks_done: u64,
    pub tasks_failed: u64,
    pub list_calls: u64,
    pub violations: u64,
    pub state: ScanState,
    pub elapsed: Duration,
}

impl ScanSnapshot {
    pub fn describe(&self) -> String {
        format!(
            "{}: {} objects, {} | tasks {} done, {} failed, {} outstanding | {:.1}s",
            self.state.label(),
            self.objects,
            humansize::format_size(self.bytes, humansize::BINARY),
            self.tasks_done,
            self.tasks_failed,
            self.outstanding,
            self.elapsed.as_secs_f64()
        )
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanProgress {
    pub fn new() -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            objects: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            tasks_spawned: AtomicU64::new(0),
            tasks_done: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            list_calls: AtomicU64::new(0),
            violations: AtomicU64::new(0),
            state: AtomicU8::new(ScanState::Running.as_u8()),
            started: Instant::now(),
            elapsed: Mutex::new(None),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub(crate) fn add_objects(&self, created: u64, bytes_delta: i64) {
        self.objects.fetch_add(created, Ordering::Relaxed);
        if bytes_delta >= 0 {
            self.bytes.fetch_add(bytes_delta as u64, Ordering::Relaxed);
        } else {
            let _ = self.bytes.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| {
                Some(b.saturating_sub(bytes_delta.unsigned_abs()))
            });
        }
    }

    pub(crate) fn task_spawned(&self) {
        self.tasks_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn task_done(&self) {
        self.tasks_done.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn list_call(&self) {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn finish(&self, state: ScanState) {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) = Some(self.started.elapsed());
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub fn state(&self) -> ScanState {
        ScanState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        let elapsed = self
            .elapsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or_else(|| self.started.elapsed());
        ScanSnapshot {
            outstanding: self.outstanding(),
            objects: self.objects.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            tasks_spawned: self.tasks_spawned.load(Ordering::Relaxed),
            tasks_done: self.tasks_done.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            list_calls: self.list_calls.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            state: self.state(),
            elapsed,
        }
    }
}
