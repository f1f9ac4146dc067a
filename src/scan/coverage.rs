use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

#[derive(Default)]
struct CoverageState {
    /// Prefixes a scan was started from.
    roots: HashSet<String>,
    /// Listing prefixes not yet fully drained: pending, in flight, failed or
    /// abandoned by cancellation. Counted, since the same prefix can be queued twice.
    unsettled: HashMap<String, usize>,
}

/// Which parts of the namespace the tree knows completely.
///
/// The deletion engine trusts the in-memory subtree only where coverage says
/// it is complete and lists the store otherwise.
#[derive(Default)]
pub struct Coverage {
    state: Mutex<CoverageState>,
}

impl Coverage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoverageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a scan from `root`, forgetting older state beneath it.
    pub fn begin(&self, root: &str) {
        let mut state = self.lock();
        state.unsettled.retain(|prefix, _| !prefix.starts_with(root));
        state.roots.insert(root.to_string());
    }

    pub fn pending(&self, prefix: &str) {
        *self.lock().unsettled.entry(prefix.to_string()).or_insert(0) += 1;
    }

    /// The prefix was listed to exhaustion.
    pub fn settle(&self, prefix: &str) {
        let mut state = self.lock();
        if let Some(count) = state.unsettled.get_mut(prefix) {
            *count -= 1;
            if *count == 0 {
                state.unsettled.remove(prefix);
            }
        }
    }

    /// Whether everything under `prefix` has been listed successfully.
    ///
    /// An unsettled prefix that is an ancestor of `prefix` may still deliver
    /// keys under it, and one beneath it means a hole, so both count.
    pub fn is_complete(&self, prefix: &str) -> bool {
        let state = self.lock();
        let scanned = state.roots.iter().any(|root| prefix.starts_with(root.as_str()));
        scanned
            && !state
                .unsettled
                .keys()
                .any(|p| p.starts_with(prefix) || prefix.starts_with(p.as_str()))
    }

    pub fn unsettled(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.lock().unsettled.keys().cloned().collect();
        prefixes.sort();
        prefixes
    }
}
