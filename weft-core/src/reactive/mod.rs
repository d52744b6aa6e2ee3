//! Reactive Primitives
//!
//! This module implements the observable graph: cells, derivations, foreign
//! stream adapters and the consumers that render from them.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] holds mutable state. A write that changes the value notifies
//! every observer synchronously. [`TrackedCell`] additionally subscribes
//! whichever computation reads it.
//!
//! ## Derivations
//!
//! A [`Derivation`] caches a value computed from other nodes. It recomputes
//! when an input notifies and propagates only results that differ.
//!
//! ## Adapters
//!
//! A [`ForeignStreamAdapter`] exposes the latest value of an external push
//! source ([`PushSubject`], [`StreamSource`], or any [`PushSource`]) as a
//! graph node, subscribing lazily and unsubscribing when disposed.
//!
//! ## Consumers
//!
//! A [`Consumer`] renders from graph values. It observes its inputs through
//! [`ConsumerBindingProxy`] nodes and rerenders through the
//! [`RenderScheduler`](crate::graph::RenderScheduler), never inline.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses a thread-local stack of running computations.
//! A tracked read checks the top of the stack and, if a computation is
//! running, subscribes it to the node being read.
//!
//! Everything here is single-threaded: nodes live in a thread-local arena
//! and are neither `Send` nor `Sync`.

mod adapter;
mod binding;
mod cell;
mod consumer;
mod context;
mod derivation;
mod runtime;
mod stream;
mod subject;
mod subscriber;

pub use adapter::{ForeignStreamAdapter, PushSource};
pub use binding::{BindingState, ConsumerBindingProxy};
pub use cell::{Cell, TrackedCell};
pub use consumer::Consumer;
pub use context::TrackingContext;
pub use derivation::{Derivation, DerivationState};
pub use runtime::{GraphNode, NodeHandle, Observer, Runtime, Source};
pub use stream::{StreamSource, StreamSubscription};
pub use subject::{PushSubject, SubjectSubscription};
pub use subscriber::Subscriber;
