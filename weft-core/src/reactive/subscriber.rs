//! Callback observers.
//!
//! A Subscriber is the simplest observer in the graph: a node that runs a
//! callback whenever something it observes notifies. Reads made inside
//! [`Subscriber::run_tracked`] subscribe it automatically.

use std::fmt;
use std::rc::{Rc, Weak};

use super::context::TrackingContext;
use super::runtime::{GraphNode, NodeHandle, Observer, Runtime};
use crate::error::Result;
use crate::graph::{NodeId, NodeKind};

struct SubscriberInner {
    handle: NodeHandle,
    callback: Box<dyn Fn()>,
}

impl Observer for SubscriberInner {
    fn notify(&self) -> Result<()> {
        (self.callback)();
        Ok(())
    }
}

/// An observer node that runs a callback on every notification.
pub struct Subscriber {
    inner: Rc<SubscriberInner>,
}

impl Subscriber {
    /// Create a subscriber with the given notification callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() + 'static,
    {
        let handle = Runtime::register(NodeKind::Subscriber);
        let id = handle.id();
        let inner = Rc::new(SubscriberInner {
            handle,
            callback: Box::new(callback),
        });
        let observer: Weak<dyn Observer> = Rc::downgrade(&inner) as Weak<dyn Observer>;
        Runtime::attach(id, Some(observer), None);
        Self { inner }
    }

    /// Run `f` with this subscriber as the tracking owner.
    pub fn run_tracked<R>(&self, f: impl FnOnce() -> R) -> R {
        TrackingContext::run_in_context(self.node_id(), f)
    }

    /// Invoke the callback directly.
    pub fn notify(&self) {
        (self.inner.callback)();
    }

    /// Stop observing everything this subscriber watches.
    pub fn detach(&self) {
        let id = self.node_id();
        for source in Runtime::observables(id) {
            Runtime::unsubscribe(source, id);
        }
    }
}

impl Clone for Subscriber {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl GraphNode for Subscriber {
    fn node_id(&self) -> NodeId {
        self.inner.handle.id()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.inner.handle.id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Cell, TrackedCell};
    use std::cell::Cell as Flag;

    #[test]
    fn subscriber_ids_are_unique() {
        let first = Subscriber::new(|| {});
        let second = Subscriber::new(|| {});
        let third = Subscriber::new(|| {});

        assert_ne!(first.node_id(), second.node_id());
        assert_ne!(second.node_id(), third.node_id());
        assert_ne!(first.node_id(), third.node_id());
    }

    #[test]
    fn subscriber_notify_calls_callback() {
        let called = Rc::new(Flag::new(false));
        let called_clone = called.clone();

        let subscriber = Subscriber::new(move || called_clone.set(true));

        assert!(!called.get());
        subscriber.notify();
        assert!(called.get());
    }

    #[test]
    fn graph_notification_runs_callback() {
        let cell = Cell::new(0);
        let hits = Rc::new(Flag::new(0));
        let hits_clone = hits.clone();
        let subscriber = Subscriber::new(move || hits_clone.set(hits_clone.get() + 1));

        cell.subscribe(&subscriber).unwrap();
        cell.reset(1).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn detach_drops_every_edge() {
        let a = TrackedCell::new(1);
        let b = TrackedCell::new(2);
        let subscriber = Subscriber::new(|| {});

        subscriber.run_tracked(|| a.deref() + b.deref());
        assert_eq!(Runtime::observables(subscriber.node_id()).len(), 2);

        subscriber.detach();
        assert!(Runtime::observables(subscriber.node_id()).is_empty());
        assert!(a.is_disposed());
        assert!(b.is_disposed());
    }

    #[test]
    fn dropping_the_subscriber_releases_its_node() {
        let cell = TrackedCell::new(1);
        let subscriber = Subscriber::new(|| {});
        subscriber.run_tracked(|| cell.deref());
        assert_eq!(cell.observer_count(), 1);

        drop(subscriber);
        assert_eq!(cell.observer_count(), 0);
    }
}
