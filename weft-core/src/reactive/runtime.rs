//! Reactive Runtime
//!
//! The runtime owns the node arena and implements the edge operations every
//! graph object is built on: subscribe, unsubscribe, notify and dispose.
//!
//! # How It Works
//!
//! 1. Every cell, derivation, adapter, binding and consumer registers a node
//!    and keeps the returned [`NodeHandle`]. Dropping the handle releases
//!    the slot and unlinks its edges.
//!
//! 2. The arena only holds weak references to the owning objects' capability
//!    traits ([`Observer`], [`Source`]); ownership stays with user handles.
//!
//! 3. A node whose last observer detaches disposes itself: it unsubscribes
//!    from everything it watches, which can cascade upstream.
//!
//! # Re-entrancy
//!
//! The arena borrow is never held while a capability callback or a dispose
//! callback runs, so callbacks are free to subscribe, unsubscribe or
//! dispose. Notification iterates over a snapshot and skips observers whose
//! edge was removed by an earlier callback.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use slotmap::SlotMap;
use smallvec::SmallVec;
use tracing::{debug, error, trace};

use crate::config::RuntimeConfig;
use crate::error::{GraphError, Result};
use crate::graph::{Node, NodeId, NodeKind};

/// Capability of anything that can observe graph nodes.
///
/// `observe` and `unobserve` are optional hooks that let the observer keep
/// its own view of its reverse edges.
pub trait Observer {
    /// Called when an observed node changed.
    fn notify(&self) -> Result<()>;

    /// Called after `source` subscribed this observer.
    fn observe(&self, _source: NodeId) {}

    /// Called after `source` unsubscribed this observer.
    fn unobserve(&self, _source: NodeId) {}
}

/// Capability of a node that produces a value.
///
/// Values cross this trait type-erased so that bindings can snapshot a
/// source without knowing its value type.
pub trait Source {
    /// Whether the value changed since it was last read.
    fn is_changed(&self) -> bool;

    /// A copy of the current value, if there is one yet.
    fn snapshot(&self) -> Option<Box<dyn Any>>;

    /// Whether the current value differs from an earlier snapshot.
    fn differs_from(&self, snapshot: Option<&dyn Any>) -> bool;

    /// Called once the node has been disposed.
    fn on_disposed(&self) {}
}

/// Anything that owns a node in the graph.
pub trait GraphNode {
    fn node_id(&self) -> NodeId;

    /// Add `observer` to this node's observers.
    fn subscribe(&self, observer: &dyn GraphNode) -> Result<()> {
        Runtime::subscribe(self.node_id(), observer.node_id())
    }

    /// Remove `observer`; disposes this node if it was the last one.
    fn unsubscribe(&self, observer: &dyn GraphNode) {
        Runtime::unsubscribe(self.node_id(), observer.node_id());
    }

    /// Register an action to run when this node is disposed.
    fn on_dispose<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
        Self: Sized,
    {
        Runtime::on_dispose(self.node_id(), f);
    }

    /// Dispose the node if nothing observes it.
    fn dispose(&self) -> bool {
        Runtime::dispose(self.node_id())
    }

    fn is_disposed(&self) -> bool {
        Runtime::is_disposed(self.node_id())
    }

    fn observer_count(&self) -> usize {
        Runtime::observer_count(self.node_id())
    }
}

/// Owning handle to a registered node.
///
/// Dropping this handle releases the node from the arena.
#[derive(Debug)]
pub struct NodeHandle {
    id: NodeId,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        Runtime::release(self.id);
    }
}

#[derive(Default)]
struct GraphState {
    nodes: SlotMap<NodeId, Node>,
    config: RuntimeConfig,
}

thread_local! {
    static GRAPH: RefCell<GraphState> = RefCell::new(GraphState::default());
}

fn with_graph<R>(f: impl FnOnce(&mut GraphState) -> R) -> R {
    GRAPH.with(|graph| f(&mut graph.borrow_mut()))
}

type IdList = SmallVec<[NodeId; 8]>;

/// The per-thread reactive runtime.
///
/// All state lives in a thread-local arena; this type only namespaces the
/// operations on it.
pub struct Runtime;

impl Runtime {
    /// Install the configuration for the current thread.
    pub fn configure(config: RuntimeConfig) {
        with_graph(|g| g.config = config);
    }

    pub fn config() -> RuntimeConfig {
        with_graph(|g| g.config)
    }

    /// Register a new node and return the handle that owns it.
    pub fn register(kind: NodeKind) -> NodeHandle {
        let id = with_graph(|g| g.nodes.insert(Node::new(kind)));
        trace!(?id, ?kind, "register node");
        NodeHandle { id }
    }

    /// Attach the owning object's capabilities to a registered node.
    pub fn attach(
        id: NodeId,
        observer: Option<Weak<dyn Observer>>,
        source: Option<Weak<dyn Source>>,
    ) {
        with_graph(|g| {
            if let Some(node) = g.nodes.get_mut(id) {
                if let Some(observer) = observer {
                    node.set_observer(observer);
                }
                if let Some(source) = source {
                    node.set_source(source);
                }
            }
        });
    }

    /// Add an edge: `observer` watches `source`.
    ///
    /// Adding an existing edge leaves the sets unchanged. The observer's
    /// `observe` hook runs either way.
    pub fn subscribe(source: NodeId, observer: NodeId) -> Result<()> {
        let hook = with_graph(|g| {
            if !g.nodes.contains_key(observer) {
                return Err(GraphError::UnknownNode(observer));
            }
            let Some(node) = g.nodes.get_mut(source) else {
                return Err(GraphError::UnknownNode(source));
            };
            node.add_observer(observer);
            node.revive();

            let watcher = &mut g.nodes[observer];
            watcher.add_observable(source);
            watcher.revive();
            Ok(watcher.observer())
        })?;
        trace!(?source, ?observer, "subscribe");

        if let Some(hook) = hook.and_then(|weak| weak.upgrade()) {
            hook.observe(source);
        }
        Ok(())
    }

    /// Remove an edge. Disposes `source` if this removed its last observer.
    pub fn unsubscribe(source: NodeId, observer: NodeId) {
        let (hook, emptied) = with_graph(|g| {
            let emptied = match g.nodes.get_mut(source) {
                Some(node) => node.remove_observer(observer) && node.observers().is_empty(),
                None => false,
            };
            let hook = g.nodes.get_mut(observer).and_then(|watcher| {
                watcher.remove_observable(source);
                watcher.observer()
            });
            (hook, emptied)
        });
        trace!(?source, ?observer, "unsubscribe");

        if let Some(hook) = hook.and_then(|weak| weak.upgrade()) {
            hook.unobserve(source);
        }
        if emptied {
            Self::dispose(source);
        }
    }

    /// Call `notify` on every current observer of `source`.
    ///
    /// Observers unsubscribed by an earlier observer during the same pass
    /// are skipped. Every remaining observer is notified even after a
    /// failure; the first error is returned.
    pub fn notify_observers(source: NodeId) -> Result<()> {
        let observers: IdList = with_graph(|g| {
            g.nodes
                .get(source)
                .map(|node| node.observers().iter().copied().collect())
                .unwrap_or_default()
        });

        let mut first_error = None;
        for observer in observers {
            let target = with_graph(|g| {
                let still_watching = g
                    .nodes
                    .get(source)
                    .is_some_and(|node| node.observers().contains(&observer));
                if !still_watching {
                    return None;
                }
                g.nodes.get(observer).and_then(Node::observer)
            });
            let Some(target) = target.and_then(|weak| weak.upgrade()) else {
                continue;
            };

            trace!(?source, ?observer, "notify");
            if let Err(err) = target.notify() {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Dispose a node.
    ///
    /// Only takes effect when the node has no observers and is not already
    /// disposed. Unsubscribes from every observable, then runs the owner's
    /// disposal hook and the registered dispose callbacks. Returns whether
    /// the disposal took effect.
    pub fn dispose(id: NodeId) -> bool {
        let taken = with_graph(|g| {
            let node = g.nodes.get_mut(id)?;
            if !node.observers().is_empty() || node.is_disposed() {
                return None;
            }
            node.mark_disposed();
            let upstream: IdList = node.observables().iter().copied().collect();
            Some((upstream, node.take_dispose_callbacks(), node.source()))
        });
        let Some((upstream, callbacks, source)) = taken else {
            return false;
        };
        debug!(?id, upstream = upstream.len(), "dispose node");

        for observable in upstream {
            Self::unsubscribe(observable, id);
        }
        if let Some(source) = source.and_then(|weak| weak.upgrade()) {
            source.on_disposed();
        }
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Remove a node from the arena and unlink all of its edges.
    ///
    /// Pending dispose callbacks run if the node was never disposed.
    pub(crate) fn release(id: NodeId) {
        let removed = GRAPH.try_with(|graph| {
            graph
                .try_borrow_mut()
                .ok()
                .and_then(|mut g| g.nodes.remove(id))
        });
        let Ok(Some(mut node)) = removed else {
            return;
        };
        trace!(?id, kind = ?node.kind(), "release node");

        with_graph(|g| {
            for observer in node.observers() {
                if let Some(watcher) = g.nodes.get_mut(*observer) {
                    watcher.remove_observable(id);
                }
            }
        });
        for observable in node.observables().clone() {
            Self::unsubscribe(observable, id);
        }
        if !node.is_disposed() {
            for callback in node.take_dispose_callbacks() {
                callback();
            }
        }
    }

    /// Register an action to run when `id` is disposed.
    ///
    /// Ignored if the node is gone.
    pub fn on_dispose<F>(id: NodeId, f: F)
    where
        F: FnOnce() + 'static,
    {
        with_graph(|g| {
            if let Some(node) = g.nodes.get_mut(id) {
                node.push_dispose_callback(Box::new(f));
            }
        });
    }

    /// Resolve the value capability of a node.
    pub fn source(id: NodeId) -> Option<Rc<dyn Source>> {
        with_graph(|g| g.nodes.get(id).and_then(Node::source)).and_then(|weak| weak.upgrade())
    }

    pub fn contains(id: NodeId) -> bool {
        with_graph(|g| g.nodes.contains_key(id))
    }

    /// Whether the node is disposed. Released nodes count as disposed.
    pub fn is_disposed(id: NodeId) -> bool {
        with_graph(|g| g.nodes.get(id).map_or(true, Node::is_disposed))
    }

    pub fn observer_count(id: NodeId) -> usize {
        with_graph(|g| g.nodes.get(id).map_or(0, |node| node.observers().len()))
    }

    pub fn observers(id: NodeId) -> Vec<NodeId> {
        with_graph(|g| {
            g.nodes
                .get(id)
                .map(|node| node.observers().iter().copied().collect())
                .unwrap_or_default()
        })
    }

    pub fn observables(id: NodeId) -> Vec<NodeId> {
        with_graph(|g| {
            g.nodes
                .get(id)
                .map(|node| node.observables().iter().copied().collect())
                .unwrap_or_default()
        })
    }

    pub fn is_observing(source: NodeId, observer: NodeId) -> bool {
        with_graph(|g| {
            g.nodes
                .get(source)
                .is_some_and(|node| node.observers().contains(&observer))
        })
    }

    /// Number of live nodes on this thread.
    pub fn node_count() -> usize {
        with_graph(|g| g.nodes.len())
    }

    /// Report a double disposal.
    ///
    /// Panics under a strict configuration; otherwise logs and returns the
    /// error for the caller to surface.
    pub(crate) fn double_disposal(id: NodeId) -> GraphError {
        error!(?id, "node disposed twice");
        if Self::config().strict_disposal {
            panic!("node {id:?} disposed twice");
        }
        GraphError::DoubleDisposal(id)
    }
}
