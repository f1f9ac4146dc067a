#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// One unit of listing work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTask {
    pub prefix: String,
    pub continuation_token: Option<String>,
    pub state: TaskState,
    /// Only the task a scan starts from, or the single directory it leads
    /// to, may fall back to character splitting.
    pub partition_root: bool,
    /// Covers only keys whose first character after the prefix is not ASCII.
    pub tail: bool,
}

/// Listing starts after this character for a tail task; everything below
/// it is covered by character tasks.
const TAIL_START: char = '\u{7f}';

impl ScanTask {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            continuation_token: None,
            state: TaskState::Pending,
            partition_root: false,
            tail: false,
        }
    }

    /// The part of a split prefix that per-character tasks do not reach.
    pub fn tail(prefix: impl Into<String>) -> Self {
        Self {
            tail: true,
            ..Self::new(prefix)
        }
    }

    pub fn start_after(&self) -> Option<String> {
        self.tail.then(|| format!("{}{}", self.prefix, TAIL_START))
    }

    /// Whether a listed key or common prefix belongs to this task.
    pub fn owns(&self, name: &str) -> bool {
        if !self.tail {
            return true;
        }
        name.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| !c.is_ascii())
    }

    pub fn partition_root(prefix: impl Into<String>) -> Self {
        Self {
            partition_root: true,
            ..Self::new(prefix)
        }
    }
}
