//! Consumers
//!
//! A consumer is the end of a propagation chain: typically a UI component
//! that renders from graph values and must rerender when they change.
//!
//! # Render Cycle
//!
//! 1. `render` bumps the consumer's generation and runs the render body
//!    with the consumer as tracking owner.
//!
//! 2. Every read inside the body binds the source to the consumer through a
//!    [`ConsumerBindingProxy`] stamped with the new generation. The direct
//!    edge from the source is replaced by the proxy.
//!
//! 3. After a successful render, bindings from earlier generations are
//!    disposed. Sources read only by older renders lose their observer and
//!    may dispose themselves.
//!
//! # Notification
//!
//! A notified consumer never rerenders on the spot. It enqueues itself on
//! the shared [`RenderScheduler`]; the flush refreshes it once, and only if
//! some binding's source differs from the value the render saw.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::binding::ConsumerBindingProxy;
use super::context::TrackingContext;
use super::runtime::{GraphNode, NodeHandle, Observer, Runtime};
use crate::error::{BoxError, GraphError, Result};
use crate::graph::{NodeId, NodeKind, Refresh, RenderScheduler};

type RefreshFn = Box<dyn Fn(&Consumer) -> std::result::Result<(), BoxError>>;

struct ConsumerInner {
    handle: NodeHandle,
    weak_self: Weak<ConsumerInner>,
    scheduler: Rc<RenderScheduler>,
    render_order: u64,
    generation: Cell<u64>,
    /// Bindings keyed by the binding's own node.
    watching: RefCell<IndexMap<NodeId, ConsumerBindingProxy>>,
    refresh: RefreshFn,
    mounted: Cell<bool>,
    /// Refresh on the next flush even if no input changed.
    forced: Cell<bool>,
}

impl ConsumerInner {
    fn id(&self) -> NodeId {
        self.handle.id()
    }

    fn handle(&self) -> Option<Consumer> {
        self.weak_self.upgrade().map(|inner| Consumer { inner })
    }

    fn has_binding(&self, source: NodeId, generation: u64) -> bool {
        self.watching
            .borrow()
            .values()
            .any(|binding| binding.source_node() == source && binding.generation() == generation)
    }

    fn bind(&self, source: NodeId) -> Result<()> {
        let id = self.id();
        let generation = self.generation.get();
        let binding = ConsumerBindingProxy::new(id, generation, source)?;
        let binding_id = binding.node_id();
        self.watching.borrow_mut().insert(binding_id, binding);
        Runtime::subscribe(binding_id, id)
    }

    fn take_bindings(&self, stale_only: bool) -> SmallVec<[ConsumerBindingProxy; 8]> {
        let current = self.generation.get();
        let mut watching = self.watching.borrow_mut();
        let keys: SmallVec<[NodeId; 8]> = watching
            .iter()
            .filter(|(_, binding)| !stale_only || binding.should_dispose(current))
            .map(|(key, _)| *key)
            .collect();
        keys.into_iter()
            .filter_map(|key| watching.shift_remove(&key))
            .collect()
    }

    fn dispose_bindings(&self, bindings: SmallVec<[ConsumerBindingProxy; 8]>) -> Result<usize> {
        let count = bindings.len();
        let mut first_error = None;
        for binding in bindings {
            if let Err(err) = binding.dispose() {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(count),
        }
    }
}

impl Observer for ConsumerInner {
    fn notify(&self) -> Result<()> {
        if !self.mounted.get() {
            return Ok(());
        }
        if let Some(this) = self.weak_self.upgrade() {
            self.scheduler.enqueue(&this);
        }
        Ok(())
    }

    fn observe(&self, source: NodeId) {
        if self.watching.borrow().contains_key(&source) {
            return;
        }

        let generation = self.generation.get();
        if !self.has_binding(source, generation) {
            if let Err(err) = self.bind(source) {
                warn!(consumer = ?self.id(), ?source, error = %err, "could not bind source");
            }
        }
        // The binding replaces the direct edge.
        Runtime::unsubscribe(source, self.id());
    }
}

impl Refresh for ConsumerInner {
    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn render_order(&self) -> u64 {
        self.render_order
    }

    fn refresh(&self) -> Result<()> {
        if !self.mounted.get() {
            return Ok(());
        }
        let forced = self.forced.replace(false);
        let current = self.generation.get();
        let outdated = forced
            || self
                .watching
                .borrow()
                .values()
                .any(|binding| !binding.should_dispose(current) && binding.should_update());
        if !outdated {
            trace!(consumer = ?self.id(), "refresh skipped, inputs unchanged");
            return Ok(());
        }

        let Some(consumer) = self.handle() else {
            return Ok(());
        };
        debug!(consumer = ?self.id(), "refresh");
        (self.refresh)(&consumer).map_err(|source| GraphError::ComputationFailure {
            node: self.id(),
            source,
        })
    }
}

/// A rendering endpoint of the graph.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = Rc::new(RenderScheduler::new());
/// let count = TrackedCell::new(0);
/// let shown = count.clone();
///
/// let view = Consumer::new(scheduler.clone(), move |this| {
///     this.render(|| Ok(println!("count = {}", shown.deref())))
///         .map_err(Into::into)
/// });
/// view.refresh_now()?;
///
/// count.reset(1)?;
/// scheduler.flush()?; // prints "count = 1"
/// ```
pub struct Consumer {
    inner: Rc<ConsumerInner>,
}

impl Consumer {
    /// Create a mounted consumer.
    ///
    /// `refresh` is called by the scheduler when an input changed; it
    /// usually calls [`Consumer::render`].
    pub fn new<F>(scheduler: Rc<RenderScheduler>, refresh: F) -> Self
    where
        F: Fn(&Consumer) -> std::result::Result<(), BoxError> + 'static,
    {
        let handle = Runtime::register(NodeKind::Consumer);
        let id = handle.id();
        let render_order = scheduler.next_render_order();
        let inner = Rc::new_cyclic(|weak_self| ConsumerInner {
            handle,
            weak_self: weak_self.clone(),
            scheduler,
            render_order,
            generation: Cell::new(0),
            watching: RefCell::new(IndexMap::new()),
            refresh: Box::new(refresh),
            mounted: Cell::new(true),
            forced: Cell::new(false),
        });
        let observer: Weak<dyn Observer> = Rc::downgrade(&inner) as Weak<dyn Observer>;
        Runtime::attach(id, Some(observer), None);
        debug!(consumer = ?id, render_order, "mount consumer");
        Self { inner }
    }

    /// Run a render body.
    ///
    /// Starts a new generation and binds every read made by `f`. Stale
    /// bindings are dropped only if `f` succeeds.
    pub fn render<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> std::result::Result<R, BoxError>,
    {
        let id = self.inner.id();
        self.inner.scheduler.mark_rendered(id);
        let generation = self.inner.generation.get() + 1;
        self.inner.generation.set(generation);
        trace!(consumer = ?id, generation, "render");

        match TrackingContext::run_in_context(id, f) {
            Ok(value) => {
                self.after_render()?;
                Ok(value)
            }
            Err(source) => {
                warn!(consumer = ?id, error = %source, "render failed");
                Err(GraphError::ComputationFailure { node: id, source })
            }
        }
    }

    /// Dispose bindings left over from earlier renders.
    ///
    /// Returns how many were disposed.
    pub fn after_render(&self) -> Result<usize> {
        let stale = self.inner.take_bindings(true);
        if !stale.is_empty() {
            trace!(consumer = ?self.inner.id(), count = stale.len(), "drop stale bindings");
        }
        self.inner.dispose_bindings(stale)
    }

    /// Call the refresh callback now, without consulting the scheduler.
    pub fn refresh_now(&self) -> Result<()> {
        let id = self.inner.id();
        (self.inner.refresh)(self).map_err(|source| GraphError::ComputationFailure { node: id, source })
    }

    /// Queue a refresh for the next flush, whether or not an input changed.
    pub fn notify(&self) -> Result<()> {
        if self.inner.mounted.get() {
            self.inner.forced.set(true);
        }
        self.inner.notify()
    }

    /// Stop receiving updates and drop every binding.
    pub fn unmount(&self) -> Result<()> {
        if !self.inner.mounted.replace(false) {
            return Ok(());
        }
        let id = self.inner.id();
        self.inner.scheduler.mark_rendered(id);
        let bindings = self.inner.take_bindings(false);
        debug!(consumer = ?id, bindings = bindings.len(), "unmount consumer");
        self.inner.dispose_bindings(bindings).map(|_| ())
    }

    pub fn render_order(&self) -> u64 {
        self.inner.render_order
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.get()
    }

    /// Number of live bindings.
    pub fn watching_count(&self) -> usize {
        self.inner.watching.borrow().len()
    }

    /// Source nodes of the current bindings.
    pub fn watched_sources(&self) -> Vec<NodeId> {
        self.inner
            .watching
            .borrow()
            .values()
            .map(ConsumerBindingProxy::source_node)
            .collect()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }
}

impl Clone for Consumer {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl GraphNode for Consumer {
    fn node_id(&self) -> NodeId {
        self.inner.handle.id()
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.handle.id())
            .field("render_order", &self.inner.render_order)
            .field("generation", &self.inner.generation.get())
            .field("watching", &self.inner.watching.borrow().len())
            .field("mounted", &self.inner.mounted.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Derivation, TrackedCell};

    fn rendering_consumer(
        scheduler: &Rc<RenderScheduler>,
        cell: &TrackedCell<i32>,
    ) -> (Consumer, Rc<RefCell<Vec<i32>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (seen_in, cell_in) = (seen.clone(), cell.clone());
        let consumer = Consumer::new(scheduler.clone(), move |this| {
            let value = this.render(|| Ok(cell_in.deref()))?;
            seen_in.borrow_mut().push(value);
            Ok(())
        });
        (consumer, seen)
    }

    #[test]
    fn render_binds_reads_through_proxies() {
        let scheduler = Rc::new(RenderScheduler::new());
        let cell = TrackedCell::new(1);
        let (consumer, seen) = rendering_consumer(&scheduler, &cell);

        consumer.refresh_now().unwrap();
        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(consumer.generation(), 1);
        assert_eq!(consumer.watching_count(), 1);
        assert_eq!(consumer.watched_sources(), vec![cell.node_id()]);
        assert!(!Runtime::is_observing(cell.node_id(), consumer.node_id()));
        assert_eq!(cell.observer_count(), 1);
    }

    #[test]
    fn change_enqueues_and_flush_rerenders() {
        let scheduler = Rc::new(RenderScheduler::new());
        let cell = TrackedCell::new(1);
        let (consumer, seen) = rendering_consumer(&scheduler, &cell);
        consumer.refresh_now().unwrap();

        cell.reset(2).unwrap();
        assert!(scheduler.is_pending(consumer.node_id()));
        assert_eq!(*seen.borrow(), vec![1]);

        assert_eq!(scheduler.flush().unwrap(), 1);
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert_eq!(consumer.watching_count(), 1);
        assert_eq!(consumer.generation(), 2);
    }

    #[test]
    fn value_restored_before_flush_skips_the_render() {
        let scheduler = Rc::new(RenderScheduler::new());
        let cell = TrackedCell::new(1);
        let (consumer, seen) = rendering_consumer(&scheduler, &cell);
        consumer.refresh_now().unwrap();

        cell.reset(2).unwrap();
        cell.reset(1).unwrap();
        scheduler.flush().unwrap();
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn sources_dropped_from_a_render_are_released() {
        let scheduler = Rc::new(RenderScheduler::new());
        let show_detail = TrackedCell::new(true);
        let detail = TrackedCell::new(10);
        let (flag, detail_in) = (show_detail.clone(), detail.clone());
        let consumer = Consumer::new(scheduler.clone(), move |this| {
            this.render(|| Ok(if flag.deref() { detail_in.deref() } else { 0 }))?;
            Ok(())
        });

        consumer.refresh_now().unwrap();
        assert_eq!(consumer.watching_count(), 2);

        show_detail.reset(false).unwrap();
        scheduler.flush().unwrap();
        assert_eq!(consumer.watching_count(), 1);
        assert!(detail.is_disposed());
        assert_eq!(detail.observer_count(), 0);
        assert!(!show_detail.is_disposed());
    }

    #[test]
    fn failed_render_keeps_old_bindings() {
        let scheduler = Rc::new(RenderScheduler::new());
        let cell = TrackedCell::new(1);
        let cell_in = cell.clone();
        let consumer = Consumer::new(scheduler.clone(), move |this| {
            this.render(|| {
                let v = cell_in.deref();
                if v > 5 {
                    return Err("too large".into());
                }
                Ok(v)
            })?;
            Ok(())
        });
        consumer.refresh_now().unwrap();

        cell.reset(9).unwrap();
        let err = scheduler.flush().unwrap_err();
        assert_eq!(err.node(), consumer.node_id());
        assert_eq!(consumer.generation(), 2);
        assert_eq!(consumer.watching_count(), 2);

        cell.reset(3).unwrap();
        scheduler.flush().unwrap();
        assert_eq!(consumer.watching_count(), 1);
    }

    #[test]
    fn unmount_releases_everything() {
        let scheduler = Rc::new(RenderScheduler::new());
        let cell = TrackedCell::new(1);
        let (consumer, seen) = rendering_consumer(&scheduler, &cell);
        consumer.refresh_now().unwrap();

        cell.reset(2).unwrap();
        consumer.unmount().unwrap();
        assert!(!consumer.is_mounted());
        assert!(!scheduler.is_pending(consumer.node_id()));
        assert_eq!(consumer.watching_count(), 0);
        assert!(cell.is_disposed());

        cell.reset(3).unwrap();
        scheduler.flush().unwrap();
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn explicit_notify_forces_a_refresh() {
        let scheduler = Rc::new(RenderScheduler::new());
        let cell = TrackedCell::new(1);
        let (consumer, seen) = rendering_consumer(&scheduler, &cell);
        consumer.refresh_now().unwrap();

        consumer.notify().unwrap();
        consumer.notify().unwrap();
        assert_eq!(scheduler.pending_len(), 1);
        scheduler.flush().unwrap();
        assert_eq!(*seen.borrow(), vec![1, 1]);

        scheduler.flush().unwrap();
        assert_eq!(*seen.borrow(), vec![1, 1]);
    }

    #[test]
    fn render_orders_follow_creation() {
        let scheduler = Rc::new(RenderScheduler::new());
        let first = Consumer::new(scheduler.clone(), |_| Ok(()));
        let second = Consumer::new(scheduler.clone(), |_| Ok(()));
        assert!(first.render_order() < second.render_order());
    }

    #[test]
    fn derivation_inputs_reach_the_consumer() {
        let scheduler = Rc::new(RenderScheduler::new());
        let x = TrackedCell::new(2);
        let x_in = x.clone();
        let squared = Derivation::new(move || x_in.deref() * x_in.deref());
        let rendered = Rc::new(RefCell::new(Vec::new()));
        let (rendered_in, squared_in) = (rendered.clone(), squared.clone());
        let consumer = Consumer::new(scheduler.clone(), move |this| {
            let v = this.render(|| squared_in.deref().map_err(Into::into))?;
            rendered_in.borrow_mut().push(v);
            Ok(())
        });

        consumer.refresh_now().unwrap();
        x.reset(3).unwrap();
        scheduler.flush().unwrap();
        assert_eq!(*rendered.borrow(), vec![4, 9]);
    }
}
