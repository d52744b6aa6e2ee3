//! Observable Graph
//!
//! This module holds the storage side of the observable graph and the
//! render scheduler that batches consumer refreshes.
//!
//! # Overview
//!
//! The graph is a set of nodes connected by observer edges:
//!
//! - Every node records the observers watching it and the observables it
//!   watches, so edges can be torn down from either end.
//! - Nodes live in an arena and are addressed by generational [`NodeId`]
//!   handles, so a cycle in the edge sets never creates an ownership cycle.
//!
//! A cell write walks the observer edges synchronously. Consumers at the
//! edge of the graph do not refresh immediately; they enqueue themselves in
//! a [`RenderScheduler`] which flushes them in creation order.
//!
//! # Design Decisions
//!
//! 1. Edge sets are insertion-ordered so notification order is reproducible.
//!
//! 2. Disposal is reference counted on the observer set: a node whose last
//!    observer detaches disposes itself and releases its own upstream edges.
//!
//! 3. Flush order comes from consumer creation order rather than a
//!    topological sort, which approximates mount order in a UI tree.

mod node;
mod scheduler;

pub use node::{Node, NodeId, NodeKind};
pub use scheduler::{Refresh, RenderScheduler};
