//! Tracking Context
//!
//! The tracking context records which computation is currently running.
//! This enables automatic dependency tracking: when a tracked node is read,
//! the node subscribes the running computation.
//!
//! # Implementation
//!
//! We use a thread-local stack of owners. Running a derivation or a consumer
//! render pushes its node; the guard returned by [`TrackingContext::enter`]
//! pops it again, even if the computation panics.
//!
//! An entry may also have no owner. [`TrackingContext::untracked`] pushes
//! such an entry so that reads inside it register nothing.

use std::cell::RefCell;

use indexmap::IndexSet;
use tracing::warn;

use super::runtime::Runtime;
use crate::graph::NodeId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = RefCell::new(Vec::new());
}

/// An entry in the tracking stack.
#[derive(Debug, Clone)]
struct ContextEntry {
    /// The computation being tracked, or `None` for an untracked scope.
    owner: Option<NodeId>,
    /// Nodes read while this entry was on top, in first-read order.
    reads: IndexSet<NodeId>,
}

/// Guard that pops its entry when dropped.
#[must_use = "the context is exited as soon as the guard is dropped"]
pub struct TrackingContext {
    owner: Option<NodeId>,
    depth: usize,
}

impl TrackingContext {
    /// Enter a tracking scope owned by `owner`.
    pub fn enter(owner: NodeId) -> Self {
        Self::push(Some(owner))
    }

    fn push(owner: Option<NodeId>) -> Self {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(ContextEntry {
                owner,
                reads: IndexSet::new(),
            });
            stack.len()
        });
        Self { owner, depth }
    }

    /// Run `f` with `owner` on top of the stack.
    pub fn run_in_context<R>(owner: NodeId, f: impl FnOnce() -> R) -> R {
        let _ctx = Self::enter(owner);
        f()
    }

    /// Run `f` with `owner` on top of the stack and return the nodes it read.
    pub fn run_collecting<R>(owner: NodeId, f: impl FnOnce() -> R) -> (R, IndexSet<NodeId>) {
        let ctx = Self::enter(owner);
        let result = f();
        let reads = ctx.reads();
        (result, reads)
    }

    /// Run `f` so that reads inside it register no dependency.
    pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
        let _ctx = Self::push(None);
        f()
    }

    /// Whether a tracked computation is running.
    pub fn is_active() -> bool {
        Self::current_owner().is_some()
    }

    /// The owner on top of the stack, if any.
    pub fn current_owner() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.owner))
    }

    /// Subscribe the current owner to `node`, if a tracked computation is
    /// running. Reads outside any computation are legal and register nothing.
    pub fn register_read_if_tracked(node: NodeId) {
        let owner = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let entry = stack.last_mut()?;
            let owner = entry.owner?;
            if owner == node {
                return None;
            }
            entry.reads.insert(node);
            Some(owner)
        });

        if let Some(owner) = owner {
            if let Err(err) = Runtime::subscribe(node, owner) {
                warn!(?node, ?owner, error = %err, "could not record read");
            }
        }
    }

    /// The nodes read so far in the entry this guard pushed.
    pub fn reads(&self) -> IndexSet<NodeId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .get(self.depth - 1)
                .map(|entry| entry.reads.clone())
                .unwrap_or_default()
        })
    }
}

impl Drop for TrackingContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Guards must be dropped in reverse order of entry.
            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.owner, self.owner,
                    "TrackingContext mismatch: expected {:?}, got {:?}",
                    self.owner, entry.owner
                );
            }
        });
    }
}
