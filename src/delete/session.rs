use std::sync::{Arc, Mutex, PoisonError};

use crate::delete::error::DeleteError;
use crate::tree::{NodeId, NodeKind};

/// Lifecycle of one deletion.
///
/// `Idle -> ConfirmPending -> Confirmed -> Resolving -> Deleting -> Done | PartiallyFailed`,
/// or `ConfirmPending -> Cancelled -> Idle`. Only `ConfirmPending` can be
/// cancelled; once batches are sent they cannot be recalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteState {
    Idle,
    ConfirmPending,
    Confirmed,
    Resolving,
    Deleting,
    Done,
    PartiallyFailed,
    Cancelled,
}

impl DeleteState {
    pub fn can_move_to(self, next: DeleteState) -> bool {
        use DeleteState::*;
        matches!(
            (self, next),
            (Idle, ConfirmPending)
                | (ConfirmPending, Confirmed)
                | (ConfirmPending, Cancelled)
                | (Confirmed, Resolving)
                | (Resolving, Deleting)
                | (Resolving, PartiallyFailed)
                | (Deleting, Done)
                | (Deleting, PartiallyFailed)
                | (Cancelled, Idle)
                | (Done, Idle)
                | (PartiallyFailed, Idle)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DeleteState::Done | DeleteState::PartiallyFailed | DeleteState::Idle)
    }

    pub fn label(self) -> &'static str {
        match self {
            DeleteState::Idle => "idle",
            DeleteState::ConfirmPending => "awaiting confirmation",
            DeleteState::Confirmed => "confirmed",
            DeleteState::Resolving => "resolving keys",
            DeleteState::Deleting => "deleting",
            DeleteState::Done => "done",
            DeleteState::PartiallyFailed => "partially failed",
            DeleteState::Cancelled => "cancelled",
        }
    }
}

/// The node a deletion was requested for, captured at request time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTarget {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Display path relative to the bucket root.
    pub path: String,
    /// Key or prefix covering everything the deletion may touch.
    pub scope: String,
    pub size: u64,
    pub count: u64,
}

impl DeleteTarget {
    /// Keys this deletion may touch. A file covers its own key only.
    pub fn lock_scope(&self) -> LockScope {
        match self.kind {
            NodeKind::File => LockScope::Key(self.scope.clone()),
            _ => LockScope::Prefix(self.scope.clone()),
        }
    }
}

/// The keys a deletion holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockScope {
    Key(String),
    /// Every key starting with the prefix.
    Prefix(String),
}

impl LockScope {
    /// `/`-terminated paths and the bucket root are prefixes, anything else
    /// is a single key.
    pub fn of(scope: &str) -> Self {
        if scope.is_empty() || scope.ends_with('/') {
            LockScope::Prefix(scope.to_string())
        } else {
            LockScope::Key(scope.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LockScope::Key(s) | LockScope::Prefix(s) => s,
        }
    }

    fn covers(&self, key: &str) -> bool {
        match self {
            LockScope::Key(k) => k == key,
            LockScope::Prefix(p) => key.starts_with(p.as_str()),
        }
    }

    /// Whether some key could fall in both scopes.
    fn overlaps(&self, other: &LockScope) -> bool {
        match (self, other) {
            (LockScope::Key(a), _) => other.covers(a),
            (_, LockScope::Key(b)) => self.covers(b),
            (LockScope::Prefix(a), LockScope::Prefix(b)) => a.starts_with(b.as_str()) || b.starts_with(a.as_str()),
        }
    }
}

/// One deletion walking through [`DeleteState`].
#[derive(Debug)]
pub struct DeleteSession {
    state: DeleteState,
    target: DeleteTarget,
    guard: Option<SubtreeGuard>,
}

impl DeleteSession {
    pub(crate) fn new(target: DeleteTarget) -> Self {
        Self {
            state: DeleteState::ConfirmPending,
            target,
            guard: None,
        }
    }

    pub fn state(&self) -> DeleteState {
        self.state
    }

    pub fn target(&self) -> &DeleteTarget {
        &self.target
    }

    pub(crate) fn advance(&mut self, next: DeleteState) -> Result<(), DeleteError> {
        if !self.state.can_move_to(next) {
            return Err(DeleteError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(path = %self.target.path, from = ?self.state, to = ?next, "deletion state");
        self.state = next;
        if next.is_terminal() {
            self.guard = None;
        }
        Ok(())
    }

    pub(crate) fn hold(&mut self, guard: SubtreeGuard) {
        self.guard = Some(guard);
    }
}

/// Scopes with a deletion in progress. Two scopes conflict when some key
/// falls in both.
#[derive(Debug, Clone, Default)]
pub struct SubtreeLocks {
    held: Arc<Mutex<Vec<LockScope>>>,
}

impl SubtreeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, scope: &str) -> Option<SubtreeGuard> {
        self.try_acquire_scope(LockScope::of(scope))
    }

    pub fn try_acquire_scope(&self, scope: LockScope) -> Option<SubtreeGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if held.iter().any(|h| h.overlaps(&scope)) {
            return None;
        }
        held.push(scope.clone());
        Some(SubtreeGuard {
            locks: self.clone(),
            scope,
        })
    }

    pub fn is_locked(&self, scope: &str) -> bool {
        let scope = LockScope::of(scope);
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|h| h.overlaps(&scope))
    }

    fn release(&self, scope: &LockScope) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = held.iter().position(|h| h == scope) {
            held.swap_remove(pos);
        }
    }
}

/// Releases its scope on drop.
#[derive(Debug)]
pub struct SubtreeGuard {
    locks: SubtreeLocks,
    scope: LockScope,
}

impl SubtreeGuard {
    pub fn scope(&self) -> &str {
        self.scope.as_str()
    }
}

impl Drop for SubtreeGuard {
    fn drop(&mut self) {
        self.locks.release(&self.scope);
    }
}
