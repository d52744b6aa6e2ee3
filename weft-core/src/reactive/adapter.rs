//! Foreign Stream Adapter
//!
//! Bridges an external push source into the graph.
//!
//! # How It Works
//!
//! 1. The adapter subscribes to its source lazily, on the first `deref`.
//!
//! 2. Each push is compared with the previous one; consecutive duplicates
//!    are dropped.
//!
//! 3. A distinct push is cached for synchronous reads and then notifies the
//!    adapter's observers on the pusher's call stack.
//!
//! 4. When the adapter is disposed (explicitly, or because its last observer
//!    left) the external subscription is dropped. Disposing an adapter that
//!    holds no subscription is a lifecycle defect and is reported as
//!    [`GraphError::DoubleDisposal`](crate::error::GraphError::DoubleDisposal).

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use super::context::TrackingContext;
use super::derivation::Derivation;
use super::runtime::{GraphNode, NodeHandle, Runtime, Source};
use crate::error::Result;
use crate::graph::{NodeId, NodeKind};

/// A foreign source that pushes values to a callback.
///
/// Dropping the returned subscription must stop delivery.
pub trait PushSource<T> {
    type Subscription;

    fn subscribe(&self, push: Box<dyn FnMut(T)>) -> Self::Subscription;
}

struct AdapterInner<T, S: PushSource<T>> {
    handle: NodeHandle,
    source: S,
    subscription: RefCell<Option<S::Subscription>>,
    /// Set from the start of `subscribe` until the subscription is released.
    live: Cell<bool>,
    latest: RefCell<Option<T>>,
    same: Box<dyn Fn(&T, &T) -> bool>,
    changed: Cell<bool>,
}

impl<T, S> AdapterInner<T, S>
where
    T: Clone + 'static,
    S: PushSource<T> + 'static,
{
    fn id(&self) -> NodeId {
        self.handle.id()
    }

    fn push(&self, value: T) {
        if !self.live.get() {
            trace!(node = ?self.id(), "dropped push after release");
            return;
        }
        let duplicate = self
            .latest
            .borrow()
            .as_ref()
            .is_some_and(|previous| (self.same)(previous, &value));
        if duplicate {
            trace!(node = ?self.id(), "suppressed duplicate push");
            return;
        }

        *self.latest.borrow_mut() = Some(value);
        self.changed.set(true);
        if let Err(err) = Runtime::notify_observers(self.id()) {
            warn!(node = ?self.id(), error = %err, "push propagation failed");
        }
    }

    fn release_subscription(&self) -> bool {
        self.live.set(false);
        let subscription = self.subscription.borrow_mut().take();
        let released = subscription.is_some();
        drop(subscription);
        if released {
            debug!(node = ?self.id(), "released foreign subscription");
        }
        released
    }
}

impl<T, S> Source for AdapterInner<T, S>
where
    T: Clone + PartialEq + 'static,
    S: PushSource<T> + 'static,
{
    fn is_changed(&self) -> bool {
        self.changed.get()
    }

    fn snapshot(&self) -> Option<Box<dyn Any>> {
        self.latest
            .borrow()
            .clone()
            .map(|value| Box::new(value) as Box<dyn Any>)
    }

    fn differs_from(&self, snapshot: Option<&dyn Any>) -> bool {
        let previous = snapshot.and_then(|any| any.downcast_ref::<T>());
        self.latest.borrow().as_ref() != previous
    }

    fn on_disposed(&self) {
        self.release_subscription();
    }
}

/// A graph node fed by a foreign push source.
///
/// Cloning an adapter creates a new handle to the same node.
pub struct ForeignStreamAdapter<T, S: PushSource<T>> {
    inner: Rc<AdapterInner<T, S>>,
}

impl<T, S> ForeignStreamAdapter<T, S>
where
    T: Clone + PartialEq + 'static,
    S: PushSource<T> + 'static,
{
    /// Wrap `source`, dropping consecutive pushes that compare equal.
    pub fn new(source: S) -> Self {
        Self::with_comparator(source, |a, b| a == b)
    }

    /// Wrap `source`, dropping a push when `same(previous, next)` holds.
    pub fn with_comparator<F>(source: S, same: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        let handle = Runtime::register(NodeKind::Adapter);
        let id = handle.id();
        let inner = Rc::new(AdapterInner {
            handle,
            source,
            subscription: RefCell::new(None),
            live: Cell::new(false),
            latest: RefCell::new(None),
            same: Box::new(same),
            changed: Cell::new(false),
        });
        let source: Weak<dyn Source> = Rc::downgrade(&inner) as Weak<dyn Source>;
        Runtime::attach(id, None, Some(source));
        Self { inner }
    }

    fn ensure_subscribed(&self) {
        if self.inner.subscription.borrow().is_some() {
            return;
        }
        debug!(node = ?self.inner.id(), "subscribing to foreign source");

        self.inner.live.set(true);
        let weak = Rc::downgrade(&self.inner);
        let subscription = self.inner.source.subscribe(Box::new(move |value| {
            if let Some(inner) = weak.upgrade() {
                inner.push(value);
            }
        }));
        *self.inner.subscription.borrow_mut() = Some(subscription);
    }

    /// The latest pushed value, subscribing to the source on first use.
    ///
    /// Registers a read with the running computation, if any.
    pub fn deref(&self) -> Option<T> {
        self.ensure_subscribed();
        TrackingContext::register_read_if_tracked(self.inner.id());
        self.inner.changed.set(false);
        self.inner.latest.borrow().clone()
    }

    /// The latest pushed value without subscribing or tracking.
    pub fn peek(&self) -> Option<T> {
        self.inner.latest.borrow().clone()
    }

    pub fn is_changed(&self) -> bool {
        self.inner.changed.get()
    }

    /// Whether the adapter currently holds a foreign subscription.
    pub fn is_subscribed(&self) -> bool {
        self.inner.subscription.borrow().is_some()
    }

    /// A derivation over the latest pushed value.
    pub fn map<U, F>(&self, f: F) -> Derivation<U>
    where
        U: Clone + PartialEq + 'static,
        F: Fn(Option<T>) -> U + 'static,
    {
        let adapter = self.clone();
        Derivation::new(move || f(adapter.deref()))
    }

    /// Dispose the adapter and drop its foreign subscription.
    ///
    /// Has no effect while the adapter still has observers. Disposing an
    /// adapter that holds no subscription is a
    /// [`GraphError::DoubleDisposal`](crate::error::GraphError::DoubleDisposal)
    /// (a panic under a strict configuration).
    pub fn dispose(&self) -> Result<bool> {
        if !self.is_subscribed() {
            return Err(Runtime::double_disposal(self.inner.id()));
        }
        if Runtime::dispose(self.inner.id()) {
            return Ok(true);
        }
        // The graph already counts the node disposed; only the subscription is live.
        if Runtime::observer_count(self.inner.id()) == 0 {
            return Ok(self.inner.release_subscription());
        }
        Ok(false)
    }
}

impl<T, S: PushSource<T>> Clone for ForeignStreamAdapter<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, S: PushSource<T>> GraphNode for ForeignStreamAdapter<T, S> {
    fn node_id(&self) -> NodeId {
        self.inner.handle.id()
    }
}

impl<T: fmt::Debug, S: PushSource<T>> fmt::Debug for ForeignStreamAdapter<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignStreamAdapter")
            .field("id", &self.inner.handle.id())
            .field("latest", &self.inner.latest.borrow())
            .field("subscribed", &self.inner.subscription.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::error::GraphError;
    use crate::reactive::{PushSubject, Subscriber};

    fn counting_subscriber() -> (Subscriber, Rc<Cell<u32>>) {
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        let subscriber = Subscriber::new(move || count_clone.set(count_clone.get() + 1));
        (subscriber, count)
    }

    #[test]
    fn subscribes_lazily() {
        let subject = PushSubject::with_value(1);
        let adapter = ForeignStreamAdapter::new(subject.clone());

        assert!(!adapter.is_subscribed());
        assert_eq!(subject.subscriber_count(), 0);

        assert_eq!(adapter.deref(), Some(1));
        assert!(adapter.is_subscribed());
        assert_eq!(subject.subscriber_count(), 1);
    }

    #[test]
    fn suppresses_consecutive_duplicates() {
        let subject = PushSubject::new();
        let adapter = ForeignStreamAdapter::new(subject.clone());
        adapter.deref();
        let (subscriber, count) = counting_subscriber();
        adapter.subscribe(&subscriber).unwrap();

        subject.next(1);
        subject.next(1);
        subject.next(2);
        subject.next(2);
        subject.next(1);

        assert_eq!(count.get(), 3);
        assert_eq!(adapter.deref(), Some(1));
    }

    #[test]
    fn custom_comparator_decides_duplicates() {
        let subject = PushSubject::new();
        let adapter = ForeignStreamAdapter::with_comparator(subject.clone(), |a: &i32, b: &i32| {
            a / 10 == b / 10
        });
        adapter.deref();
        let (subscriber, count) = counting_subscriber();
        adapter.subscribe(&subscriber).unwrap();

        subject.next(11);
        subject.next(15);
        subject.next(21);

        assert_eq!(count.get(), 2);
        assert_eq!(adapter.peek(), Some(21));
    }

    #[test]
    fn last_observer_leaving_releases_subscription() {
        let subject = PushSubject::with_value(0);
        let adapter = ForeignStreamAdapter::new(subject.clone());
        adapter.deref();
        let (subscriber, _count) = counting_subscriber();
        adapter.subscribe(&subscriber).unwrap();

        adapter.unsubscribe(&subscriber);

        assert!(adapter.is_disposed());
        assert!(!adapter.is_subscribed());
        assert_eq!(subject.subscriber_count(), 0);
    }

    #[test]
    fn release_mid_push_drops_the_value() {
        let subject = PushSubject::new();
        let adapter = ForeignStreamAdapter::new(subject.clone());
        let (subscriber, count) = counting_subscriber();

        let (adapter_clone, subscriber_clone) = (adapter.clone(), subscriber.clone());
        let _detacher = subject.subscribe(Box::new(move |_: i32| {
            adapter_clone.unsubscribe(&subscriber_clone);
        }));
        adapter.deref();
        adapter.subscribe(&subscriber).unwrap();

        subject.next(5);

        assert!(adapter.is_disposed());
        assert!(!adapter.is_subscribed());
        assert_eq!(adapter.peek(), None);
        assert!(!adapter.is_changed());
        assert_eq!(count.get(), 0);
        assert_eq!(subject.subscriber_count(), 1);
    }

    #[test]
    fn explicit_dispose_then_resubscribe() {
        Runtime::configure(RuntimeConfig::lenient());
        let subject = PushSubject::with_value(3);
        let adapter = ForeignStreamAdapter::new(subject.clone());
        adapter.deref();

        assert!(adapter.dispose().unwrap());
        assert_eq!(subject.subscriber_count(), 0);

        assert_eq!(adapter.deref(), Some(3));
        assert_eq!(subject.subscriber_count(), 1);
    }

    #[test]
    fn double_dispose_is_reported() {
        Runtime::configure(RuntimeConfig::lenient());
        let subject = PushSubject::with_value(3);
        let adapter = ForeignStreamAdapter::new(subject);
        adapter.deref();

        adapter.dispose().unwrap();
        let err = adapter.dispose().unwrap_err();
        assert!(matches!(err, GraphError::DoubleDisposal(id) if id == adapter.node_id()));
    }

    #[test]
    #[should_panic(expected = "disposed twice")]
    fn double_dispose_panics_when_strict() {
        Runtime::configure(RuntimeConfig::strict());
        let adapter = ForeignStreamAdapter::new(PushSubject::<i32>::new());
        let _ = adapter.dispose();
    }

    #[test]
    fn map_follows_pushes() {
        let subject = PushSubject::with_value(2);
        let adapter = ForeignStreamAdapter::new(subject.clone());
        let squared = adapter.map(|v| v.unwrap_or(0) * v.unwrap_or(0));
        let (subscriber, _count) = counting_subscriber();
        squared.subscribe(&subscriber).unwrap();

        assert_eq!(squared.deref().unwrap(), 4);
        subject.next(5);
        assert_eq!(squared.deref().unwrap(), 25);
    }
}
