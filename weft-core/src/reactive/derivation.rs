//! Derivation Implementation
//!
//! A derivation is a memoized value computed from other graph nodes.
//!
//! # How Derivations Work
//!
//! 1. On first read, the derivation runs its computation inside its own
//!    tracking scope and caches the result. Every tracked read made by the
//!    computation becomes an edge from that node to the derivation.
//!
//! 2. Further reads return the cached value without running anything.
//!
//! 3. When an input notifies, the derivation recomputes right away and
//!    compares the new result with the old one. Only a different result is
//!    propagated to its own observers.
//!
//! 4. Each recomputation rediscovers the inputs. Inputs the previous run
//!    read but this one did not are unsubscribed.
//!
//! # Failure
//!
//! A computation that returns an error leaves the derivation dirty and keeps
//! its previous edges and cached value. The error reaches whoever triggered
//! the computation: the reader, or the writer of the input.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use super::context::TrackingContext;
use super::runtime::{GraphNode, NodeHandle, Observer, Runtime, Source};
use crate::error::{BoxError, GraphError, Result};
use crate::graph::{NodeId, NodeKind};

/// Dirty state of a derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationState {
    /// The cached value is up to date.
    Clean,

    /// The derivation must recompute before its value can be read.
    Dirty,
}

type Compute<T> = Box<dyn Fn() -> std::result::Result<T, BoxError>>;

struct DerivationInner<T> {
    handle: NodeHandle,
    compute: Compute<T>,
    value: RefCell<Option<T>>,
    state: Cell<DerivationState>,
    changed: Cell<bool>,
    runs: Cell<u64>,
}

impl<T> DerivationInner<T>
where
    T: Clone + PartialEq + 'static,
{
    fn id(&self) -> NodeId {
        self.handle.id()
    }

    /// Run the computation and replace the cached value.
    fn recompute(&self) -> Result<T> {
        let id = self.id();
        let previous_inputs = Runtime::observables(id);

        let (result, reads) = TrackingContext::run_collecting(id, || (self.compute)());
        let value = match result {
            Ok(value) => value,
            Err(source) => {
                self.state.set(DerivationState::Dirty);
                warn!(node = ?id, error = %source, "derivation failed");
                return Err(GraphError::ComputationFailure { node: id, source });
            }
        };

        for input in previous_inputs {
            if !reads.contains(&input) {
                Runtime::unsubscribe(input, id);
            }
        }

        self.runs.set(self.runs.get() + 1);
        *self.value.borrow_mut() = Some(value.clone());
        self.state.set(DerivationState::Clean);
        debug!(node = ?id, inputs = reads.len(), "derivation recomputed");
        Ok(value)
    }

    fn cached(&self) -> Option<T> {
        match self.state.get() {
            DerivationState::Clean => self.value.borrow().clone(),
            DerivationState::Dirty => None,
        }
    }
}

impl<T> Observer for DerivationInner<T>
where
    T: Clone + PartialEq + 'static,
{
    fn notify(&self) -> Result<()> {
        self.state.set(DerivationState::Dirty);
        let previous = self.value.borrow().clone();
        let current = self.recompute()?;

        let differs = previous.as_ref() != Some(&current);
        self.changed.set(differs);
        if differs {
            Runtime::notify_observers(self.id())?;
        }
        Ok(())
    }
}

impl<T> Source for DerivationInner<T>
where
    T: Clone + PartialEq + 'static,
{
    fn is_changed(&self) -> bool {
        self.changed.get()
    }

    fn snapshot(&self) -> Option<Box<dyn Any>> {
        self.value
            .borrow()
            .clone()
            .map(|value| Box::new(value) as Box<dyn Any>)
    }

    fn differs_from(&self, snapshot: Option<&dyn Any>) -> bool {
        let previous = snapshot.and_then(|any| any.downcast_ref::<T>());
        self.value.borrow().as_ref() != previous
    }

    fn on_disposed(&self) {
        // No longer subscribed to its inputs, so the cache can go stale.
        self.state.set(DerivationState::Dirty);
    }
}

/// A memoized value computed from other graph nodes.
///
/// # Example
///
/// ```rust,ignore
/// let x = TrackedCell::new(1);
/// let x_in = x.clone();
/// let y = Derivation::new(move || x_in.deref() * 2);
///
/// assert_eq!(y.deref()?, 2);
/// x.reset(5)?;
/// assert_eq!(y.deref()?, 10);
/// ```
pub struct Derivation<T> {
    inner: Rc<DerivationInner<T>>,
}

impl<T> Derivation<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a derivation from an infallible computation.
    ///
    /// Nothing runs until the first read.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::try_new(move || Ok(compute()))
    }

    /// Create a derivation from a computation that can fail.
    pub fn try_new<F>(compute: F) -> Self
    where
        F: Fn() -> std::result::Result<T, BoxError> + 'static,
    {
        let handle = Runtime::register(NodeKind::Derivation);
        let id = handle.id();
        let inner = Rc::new(DerivationInner {
            handle,
            compute: Box::new(compute),
            value: RefCell::new(None),
            state: Cell::new(DerivationState::Dirty),
            changed: Cell::new(true),
            runs: Cell::new(0),
        });
        let observer: Weak<dyn Observer> = Rc::downgrade(&inner) as Weak<dyn Observer>;
        let source: Weak<dyn Source> = Rc::downgrade(&inner) as Weak<dyn Source>;
        Runtime::attach(id, Some(observer), Some(source));
        Self { inner }
    }

    /// Read the value, recomputing first if dirty.
    ///
    /// Registers a read with the running computation, if any.
    pub fn deref(&self) -> Result<T> {
        let value = match self.inner.cached() {
            Some(value) => value,
            None => self.inner.recompute()?,
        };
        TrackingContext::register_read_if_tracked(self.inner.id());
        self.inner.changed.set(false);
        Ok(value)
    }

    /// The cached value, without computing or tracking.
    pub fn peek(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    /// Whether the last recomputation produced a new value not yet read.
    pub fn is_changed(&self) -> bool {
        self.inner.changed.get()
    }

    pub fn state(&self) -> DerivationState {
        self.inner.state.get()
    }

    /// Force the next read to recompute.
    pub fn mark_dirty(&self) {
        self.inner.state.set(DerivationState::Dirty);
    }

    /// How many times the computation completed.
    pub fn run_count(&self) -> u64 {
        self.inner.runs.get()
    }

    /// A derivation computing `f` over this one.
    pub fn map<U, F>(&self, f: F) -> Derivation<U>
    where
        U: Clone + PartialEq + 'static,
        F: Fn(T) -> U + 'static,
    {
        let source = self.clone();
        Derivation::try_new(move || Ok(f(source.deref()?)))
    }
}

impl<T> Clone for Derivation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> GraphNode for Derivation<T> {
    fn node_id(&self) -> NodeId {
        self.inner.handle.id()
    }
}

impl<T: Debug> Debug for Derivation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derivation")
            .field("id", &self.inner.handle.id())
            .field("state", &self.inner.state.get())
            .field("value", &self.inner.value.borrow())
            .field("runs", &self.inner.runs.get())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
