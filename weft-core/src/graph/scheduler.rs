//! Render Scheduler
//!
//! The scheduler decides in which order pending consumers are refreshed.
//!
//! # Algorithm
//!
//! 1. Every consumer draws a render order from the scheduler when it is
//!    created. Orders start at 0 and only increase.
//! 2. A notified consumer enqueues itself. The pending set is keyed by the
//!    consumer's node, so enqueuing twice before a flush is a no-op.
//! 3. `flush` takes the pending set, sorts it by render order and calls each
//!    refresh exactly once.
//!
//! Consumers enqueued while a flush is running land in a fresh pending set
//! and wait for the next flush.
//!
//! Pending entries hold weak references: a consumer dropped before the
//! flush is skipped, and an unflushed queue never keeps its consumers (or,
//! through them, the scheduler) alive.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use super::node::NodeId;
use crate::error::Result;

/// Something the scheduler can refresh.
pub trait Refresh {
    /// Identity used to deduplicate pending entries.
    fn node_id(&self) -> NodeId;

    /// Flush order. Lower orders refresh first.
    fn render_order(&self) -> u64;

    /// Refresh the consumer.
    fn refresh(&self) -> Result<()>;
}

struct Pending {
    render_order: u64,
    target: Weak<dyn Refresh>,
}

/// Batches consumer refreshes and runs them in creation order.
///
/// The scheduler is owned by the application root and shared with every
/// consumer it creates.
pub struct RenderScheduler {
    next_order: Cell<u64>,
    pending: RefCell<IndexMap<NodeId, Pending>>,
}

impl RenderScheduler {
    pub fn new() -> Self {
        Self {
            next_order: Cell::new(0),
            pending: RefCell::new(IndexMap::new()),
        }
    }

    /// Draw the next render order.
    pub fn next_render_order(&self) -> u64 {
        let order = self.next_order.get();
        self.next_order.set(order + 1);
        order
    }

    /// Queue a refresh. Re-enqueuing a pending consumer is a no-op.
    ///
    /// The scheduler does not keep `target` alive.
    pub fn enqueue<R>(&self, target: &Rc<R>)
    where
        R: Refresh + 'static,
    {
        let node = target.node_id();
        let mut pending = self.pending.borrow_mut();
        if pending.contains_key(&node) {
            return;
        }
        let render_order = target.render_order();
        trace!(?node, render_order, "enqueue refresh");
        let target: Weak<dyn Refresh> = Rc::downgrade(target) as Weak<dyn Refresh>;
        pending.insert(
            node,
            Pending {
                render_order,
                target,
            },
        );
    }

    /// Drop a pending entry because the consumer rendered for another reason.
    pub fn mark_rendered(&self, node: NodeId) -> bool {
        self.pending.borrow_mut().shift_remove(&node).is_some()
    }

    pub fn is_pending(&self, node: NodeId) -> bool {
        self.pending.borrow().contains_key(&node)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Refresh every pending consumer once, in ascending render order.
    ///
    /// Every entry runs even if an earlier refresh fails; the first error is
    /// returned. Entries whose consumer was dropped are skipped. Returns the
    /// number of refreshes run.
    pub fn flush(&self) -> Result<usize> {
        let mut batch: Vec<(NodeId, Pending)> =
            std::mem::take(&mut *self.pending.borrow_mut()).into_iter().collect();
        if batch.is_empty() {
            return Ok(0);
        }
        batch.sort_by_key(|(_, entry)| entry.render_order);
        debug!(count = batch.len(), "flushing render queue");

        let mut count = 0;
        let mut first_error = None;
        for (node, entry) in batch {
            let Some(target) = entry.target.upgrade() else {
                trace!(?node, "skipping dropped consumer");
                continue;
            };
            count += 1;
            if let Err(err) = target.refresh() {
                warn!(?node, error = %err, "refresh failed");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(count),
        }
    }

    /// Drop every pending entry without running it.
    pub fn clear(&self) {
        self.pending.borrow_mut().clear();
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new()
    }
}
