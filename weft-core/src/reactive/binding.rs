//! Consumer Binding Proxy
//!
//! A binding sits between one source and one consumer. It records the
//! consumer generation that created it and a snapshot of the value the
//! consumer saw, so the consumer can tell whether a rerender is needed and
//! which bindings belong to an older render.
//!
//! Edges: the binding observes the source, the consumer observes the
//! binding. Notifications from the source are forwarded unchanged.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::runtime::{GraphNode, NodeHandle, Observer, Runtime, Source};
use crate::error::Result;
use crate::graph::{NodeId, NodeKind};

/// Lifecycle of a binding relative to its consumer's current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Created by the consumer's latest render.
    Bound,

    /// Created by an earlier render; awaiting cleanup.
    Stale,

    Disposed,
}

struct BindingInner {
    handle: NodeHandle,
    consumer: NodeId,
    generation: u64,
    source_node: NodeId,
    /// Strong reference so the bound source outlives short-lived handles.
    source: RefCell<Option<Rc<dyn Source>>>,
    snapshot: Option<Box<dyn Any>>,
    disposed: Cell<bool>,
}

impl BindingInner {
    fn id(&self) -> NodeId {
        self.handle.id()
    }

    fn source(&self) -> Option<Rc<dyn Source>> {
        self.source.borrow().clone()
    }
}

impl Observer for BindingInner {
    fn notify(&self) -> Result<()> {
        if self.disposed.get() {
            return Ok(());
        }
        trace!(binding = ?self.id(), source = ?self.source_node, "forward notification");
        Runtime::notify_observers(self.id())
    }
}

impl Source for BindingInner {
    fn is_changed(&self) -> bool {
        self.source().is_some_and(|source| source.is_changed())
    }

    fn snapshot(&self) -> Option<Box<dyn Any>> {
        self.source().and_then(|source| source.snapshot())
    }

    fn differs_from(&self, snapshot: Option<&dyn Any>) -> bool {
        self.source()
            .is_some_and(|source| source.differs_from(snapshot))
    }
}

/// The link between one source and one consumer for one render.
pub struct ConsumerBindingProxy {
    inner: Rc<BindingInner>,
}

impl ConsumerBindingProxy {
    /// Bind `source` to `consumer` for render `generation`.
    ///
    /// Subscribes the binding to the source and snapshots its value. The
    /// caller is responsible for subscribing the consumer to the binding.
    pub fn new(consumer: NodeId, generation: u64, source: NodeId) -> Result<Self> {
        let handle = Runtime::register(NodeKind::Binding);
        let id = handle.id();
        let capability = Runtime::source(source);
        let snapshot = capability.as_ref().and_then(|source| source.snapshot());

        let inner = Rc::new(BindingInner {
            handle,
            consumer,
            generation,
            source_node: source,
            source: RefCell::new(capability),
            snapshot,
            disposed: Cell::new(false),
        });
        let observer: Weak<dyn Observer> = Rc::downgrade(&inner) as Weak<dyn Observer>;
        let as_source: Weak<dyn Source> = Rc::downgrade(&inner) as Weak<dyn Source>;
        Runtime::attach(id, Some(observer), Some(as_source));

        Runtime::subscribe(source, id)?;
        trace!(binding = ?id, ?consumer, ?source, generation, "bind");
        Ok(Self { inner })
    }

    pub fn consumer(&self) -> NodeId {
        self.inner.consumer
    }

    /// The render generation that created this binding.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// The node this binding observes.
    pub fn source_node(&self) -> NodeId {
        self.inner.source_node
    }

    /// Whether this binding belongs to a render older than `current`.
    pub fn should_dispose(&self, current: u64) -> bool {
        current > self.inner.generation
    }

    /// Whether the source value differs from the one the consumer saw.
    ///
    /// False once the source is gone.
    pub fn should_update(&self) -> bool {
        self.inner
            .source()
            .is_some_and(|source| source.differs_from(self.inner.snapshot.as_deref()))
    }

    /// The value the consumer saw when this binding was created.
    pub fn snapshot<T: Clone + 'static>(&self) -> Option<T> {
        self.inner
            .snapshot
            .as_ref()
            .and_then(|any| any.downcast_ref::<T>())
            .cloned()
    }

    pub fn state(&self, current_generation: u64) -> BindingState {
        if self.inner.disposed.get() {
            BindingState::Disposed
        } else if self.should_dispose(current_generation) {
            BindingState::Stale
        } else {
            BindingState::Bound
        }
    }

    /// Detach from the consumer and the source.
    ///
    /// Removing the binding may dispose the source if nothing else observes
    /// it. Disposing a binding twice is a lifecycle defect.
    pub fn dispose(&self) -> Result<()> {
        let id = self.inner.id();
        if self.inner.disposed.replace(true) {
            return Err(Runtime::double_disposal(id));
        }
        Runtime::unsubscribe(id, self.inner.consumer);
        Runtime::dispose(id);
        self.inner.source.borrow_mut().take();
        trace!(binding = ?id, "unbind");
        Ok(())
    }
}

impl GraphNode for ConsumerBindingProxy {
    fn node_id(&self) -> NodeId {
        self.inner.handle.id()
    }
}

impl fmt::Debug for ConsumerBindingProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerBindingProxy")
            .field("id", &self.inner.handle.id())
            .field("consumer", &self.inner.consumer)
            .field("source", &self.inner.source_node)
            .field("generation", &self.inner.generation)
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::error::GraphError;
    use crate::reactive::{Cell as ValueCell, Subscriber};

    fn bind(cell: &ValueCell<i32>, consumer: &Subscriber, generation: u64) -> ConsumerBindingProxy {
        let binding = ConsumerBindingProxy::new(consumer.node_id(), generation, cell.node_id()).unwrap();
        binding.subscribe(consumer).unwrap();
        binding
    }

    #[test]
    fn forwards_notifications_to_the_consumer() {
        let cell = ValueCell::new(1);
        let hits = Rc::new(Cell::new(0));
        let hits_clone = hits.clone();
        let consumer = Subscriber::new(move || hits_clone.set(hits_clone.get() + 1));
        let _binding = bind(&cell, &consumer, 1);

        cell.reset(2).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn snapshot_tracks_what_the_consumer_saw() {
        let cell = ValueCell::new(1);
        let consumer = Subscriber::new(|| {});
        let binding = bind(&cell, &consumer, 1);

        assert_eq!(binding.snapshot::<i32>(), Some(1));
        assert!(!binding.should_update());

        cell.reset(2).unwrap();
        assert!(binding.should_update());

        cell.reset(1).unwrap();
        assert!(!binding.should_update());
    }

    #[test]
    fn staleness_follows_generation() {
        let cell = ValueCell::new(0);
        let consumer = Subscriber::new(|| {});
        let binding = bind(&cell, &consumer, 1);

        assert!(!binding.should_dispose(1));
        assert!(binding.should_dispose(2));
        assert_eq!(binding.state(1), BindingState::Bound);
        assert_eq!(binding.state(2), BindingState::Stale);
    }

    #[test]
    fn dispose_unlinks_and_releases_the_source() {
        let cell = ValueCell::new(0);
        let consumer = Subscriber::new(|| {});
        let binding = bind(&cell, &consumer, 1);
        assert_eq!(cell.observer_count(), 1);

        binding.dispose().unwrap();
        assert_eq!(binding.state(1), BindingState::Disposed);
        assert!(binding.is_disposed());
        assert!(cell.is_disposed());
        assert!(!Runtime::is_observing(binding.node_id(), consumer.node_id()));
        assert!(!binding.should_update());
    }

    #[test]
    fn disposing_twice_is_reported() {
        Runtime::configure(RuntimeConfig::lenient());
        let cell = ValueCell::new(0);
        let consumer = Subscriber::new(|| {});
        let binding = bind(&cell, &consumer, 1);

        binding.dispose().unwrap();
        assert!(matches!(binding.dispose(), Err(GraphError::DoubleDisposal(_))));
    }

    #[test]
    fn binding_to_a_released_source_fails() {
        let consumer = Subscriber::new(|| {});
        let released = ValueCell::new(0).node_id();
        assert!(ConsumerBindingProxy::new(consumer.node_id(), 1, released).is_err());
    }
}
