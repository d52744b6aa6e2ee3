//! Graph Nodes
//!
//! This module defines the arena record for a node in the observable graph.

use std::fmt;
use std::rc::Weak;

use indexmap::IndexSet;
use slotmap::new_key_type;

use crate::reactive::{Observer, Source};

new_key_type! {
    /// Handle to a node in the observable graph.
    ///
    /// Handles are generational: once a slot is released, an old handle
    /// never resolves to whatever reuses the slot.
    pub struct NodeId;
}

/// The kind of object that owns a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A mutable cell. Only ever a producer.
    Cell,

    /// A memoized derivation. Observes its inputs and is observed in turn.
    Derivation,

    /// A bridge from a foreign push source.
    Adapter,

    /// A per-consumer binding proxy between a source and a consumer.
    Binding,

    /// A UI consumer. Only ever an observer.
    Consumer,

    /// A plain callback observer.
    Subscriber,
}

/// A node in the observable graph.
pub struct Node {
    /// What owns this node.
    kind: NodeKind,

    /// Nodes watching this node.
    observers: IndexSet<NodeId>,

    /// Nodes this node watches.
    observables: IndexSet<NodeId>,

    /// Actions run once when the node is disposed.
    on_dispose: Vec<Box<dyn FnOnce()>>,

    disposed: bool,

    /// Notification capability of the owning object, if it observes.
    observer: Option<Weak<dyn Observer>>,

    /// Value capability of the owning object, if it produces.
    source: Option<Weak<dyn Source>>,
}

impl Node {
    /// Create a new node with no edges.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            observers: IndexSet::new(),
            observables: IndexSet::new(),
            on_dispose: Vec::new(),
            disposed: false,
            observer: None,
            source: None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Add an observer. Returns false if it was already present.
    pub fn add_observer(&mut self, node_id: NodeId) -> bool {
        self.observers.insert(node_id)
    }

    /// Remove an observer. Returns false if it was not present.
    pub fn remove_observer(&mut self, node_id: NodeId) -> bool {
        self.observers.shift_remove(&node_id)
    }

    pub fn observers(&self) -> &IndexSet<NodeId> {
        &self.observers
    }

    /// Record that this node watches `node_id`.
    pub fn add_observable(&mut self, node_id: NodeId) -> bool {
        self.observables.insert(node_id)
    }

    pub fn remove_observable(&mut self, node_id: NodeId) -> bool {
        self.observables.shift_remove(&node_id)
    }

    pub fn observables(&self) -> &IndexSet<NodeId> {
        &self.observables
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Mark the node disposed.
    pub fn mark_disposed(&mut self) {
        self.disposed = true;
    }

    /// Bring a disposed node back into service after it gains an edge.
    pub fn revive(&mut self) {
        self.disposed = false;
    }

    pub fn push_dispose_callback(&mut self, f: Box<dyn FnOnce()>) {
        self.on_dispose.push(f);
    }

    /// Remove and return the pending dispose callbacks.
    pub fn take_dispose_callbacks(&mut self) -> Vec<Box<dyn FnOnce()>> {
        std::mem::take(&mut self.on_dispose)
    }

    pub fn set_observer(&mut self, observer: Weak<dyn Observer>) {
        self.observer = Some(observer);
    }

    pub fn set_source(&mut self, source: Weak<dyn Source>) {
        self.source = Some(source);
    }

    pub fn observer(&self) -> Option<Weak<dyn Observer>> {
        self.observer.clone()
    }

    pub fn source(&self) -> Option<Weak<dyn Source>> {
        self.source.clone()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("observers", &self.observers)
            .field("observables", &self.observables)
            .field("pending_dispose_callbacks", &self.on_dispose.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}
