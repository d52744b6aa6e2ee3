//! Cell Implementation
//!
//! A cell is the mutable leaf of the graph. It holds a value and notifies
//! its observers when a write replaces that value with a different one.
//!
//! # How Cells Work
//!
//! 1. `reset` and `swap` compare the new value with the current one. A write
//!    of an equal value is a true no-op for observers.
//!
//! 2. A changing write sets the "changed since read" flag, publishes the
//!    value to the cell's subject (if one was requested) and notifies every
//!    observer before returning.
//!
//! 3. `deref` clears the flag and returns a copy of the value.
//!
//! A plain [`Cell`] never registers reads. [`TrackedCell`] wraps a cell and
//! registers each `deref` with the running computation, which is what makes
//! dependency edges appear without being declared.

use std::any::Any;
use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::trace;

use super::context::TrackingContext;
use super::derivation::Derivation;
use super::runtime::{GraphNode, NodeHandle, Runtime, Source};
use super::subject::PushSubject;
use crate::error::Result;
use crate::graph::{NodeId, NodeKind};

struct CellInner<T> {
    handle: NodeHandle,
    value: RefCell<T>,
    changed: std::cell::Cell<bool>,
    subject: RefCell<Option<PushSubject<T>>>,
}

impl<T: Clone + PartialEq + 'static> Source for CellInner<T> {
    fn is_changed(&self) -> bool {
        self.changed.get()
    }

    fn snapshot(&self) -> Option<Box<dyn Any>> {
        Some(Box::new(self.value.borrow().clone()))
    }

    fn differs_from(&self, snapshot: Option<&dyn Any>) -> bool {
        match snapshot.and_then(|any| any.downcast_ref::<T>()) {
            Some(previous) => *self.value.borrow() != *previous,
            None => true,
        }
    }
}

/// A mutable value that notifies observers when it changes.
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(0);
/// count.reset(5)?;
/// count.swap(|v, step| v + step, 2)?;
/// assert_eq!(count.deref(), 7);
/// ```
pub struct Cell<T> {
    inner: Rc<CellInner<T>>,
}

impl<T> Cell<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a new cell with the given initial value.
    pub fn new(value: T) -> Self {
        let handle = Runtime::register(NodeKind::Cell);
        let id = handle.id();
        let inner = Rc::new(CellInner {
            handle,
            value: RefCell::new(value),
            changed: std::cell::Cell::new(true),
            subject: RefCell::new(None),
        });
        let source: Weak<dyn Source> = Rc::downgrade(&inner) as Weak<dyn Source>;
        Runtime::attach(id, None, Some(source));
        Self { inner }
    }

    fn id(&self) -> NodeId {
        self.inner.handle.id()
    }

    /// Read the value and clear the changed flag.
    pub fn deref(&self) -> T {
        self.inner.changed.set(false);
        self.inner.value.borrow().clone()
    }

    /// Read the value without touching the changed flag.
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Whether a changing write happened since the last `deref`.
    pub fn is_changed(&self) -> bool {
        self.inner.changed.get()
    }

    /// Replace the value. Returns the new value.
    ///
    /// Observers are notified only if the value differs from the current
    /// one. A failing derivation downstream surfaces here.
    pub fn reset(&self, value: T) -> Result<T> {
        let changed = *self.inner.value.borrow() != value;
        self.write(value, changed)
    }

    /// Replace the value with `f(current, args)`. Returns the new value.
    ///
    /// The extra arguments reach `f` as a single value; use a tuple to pass
    /// several.
    pub fn swap<A, F>(&self, f: F, args: A) -> Result<T>
    where
        F: FnOnce(&T, A) -> T,
    {
        let current = self.peek();
        let value = f(&current, args);
        let changed = current != value;
        self.write(value, changed)
    }

    /// Replace the value with `f(current)`.
    pub fn update<F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&T) -> T,
    {
        self.swap(|current, ()| f(current), ())
    }

    fn write(&self, value: T, changed: bool) -> Result<T> {
        self.inner.changed.set(changed);
        *self.inner.value.borrow_mut() = value.clone();
        if !changed {
            return Ok(value);
        }
        trace!(node = ?self.id(), "cell changed");

        let subject = self.inner.subject.borrow().clone();
        if let Some(subject) = subject {
            subject.next(value.clone());
        }
        Runtime::notify_observers(self.id())?;
        Ok(value)
    }

    /// A derivation computing `f` over this cell.
    ///
    /// The derivation reads the cell tracked, so it recomputes whenever the
    /// cell changes.
    pub fn map<U, F>(&self, f: F) -> Derivation<U>
    where
        U: Clone + PartialEq + 'static,
        F: Fn(T) -> U + 'static,
    {
        let tracked = TrackedCell::from_cell(self.clone());
        Derivation::new(move || f(tracked.deref()))
    }

    /// The push stream of this cell's values.
    ///
    /// Created on first call; it replays the current value and then
    /// receives every changing write.
    pub fn subject(&self) -> PushSubject<T> {
        self.inner
            .subject
            .borrow_mut()
            .get_or_insert_with(|| PushSubject::with_value(self.peek()))
            .clone()
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> GraphNode for Cell<T> {
    fn node_id(&self) -> NodeId {
        self.inner.handle.id()
    }
}

impl<T: Debug> Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.handle.id())
            .field("value", &self.inner.value.borrow())
            .field("changed", &self.inner.changed.get())
            .finish()
    }
}

/// A cell whose reads register with the running computation.
///
/// This is the cell to hand to render functions and derivations.
pub struct TrackedCell<T> {
    cell: Cell<T>,
}

impl<T> TrackedCell<T>
where
    T: Clone + PartialEq + 'static,
{
    pub fn new(value: T) -> Self {
        Self::from_cell(Cell::new(value))
    }

    /// Track reads of an existing cell. Both handles share the value.
    pub fn from_cell(cell: Cell<T>) -> Self {
        Self { cell }
    }

    /// Register the read, then read the value and clear the changed flag.
    pub fn deref(&self) -> T {
        TrackingContext::register_read_if_tracked(self.cell.node_id());
        self.cell.deref()
    }

    pub fn peek(&self) -> T {
        self.cell.peek()
    }

    pub fn is_changed(&self) -> bool {
        self.cell.is_changed()
    }

    pub fn reset(&self, value: T) -> Result<T> {
        self.cell.reset(value)
    }

    pub fn swap<A, F>(&self, f: F, args: A) -> Result<T>
    where
        F: FnOnce(&T, A) -> T,
    {
        self.cell.swap(f, args)
    }

    pub fn update<F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&T) -> T,
    {
        self.cell.update(f)
    }

    pub fn map<U, F>(&self, f: F) -> Derivation<U>
    where
        U: Clone + PartialEq + 'static,
        F: Fn(T) -> U + 'static,
    {
        self.cell.map(f)
    }

    pub fn subject(&self) -> PushSubject<T> {
        self.cell.subject()
    }

    /// The untracked cell underneath.
    pub fn as_cell(&self) -> &Cell<T> {
        &self.cell
    }
}

impl<T> Clone for TrackedCell<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> GraphNode for TrackedCell<T> {
    fn node_id(&self) -> NodeId {
        self.cell.node_id()
    }
}

impl<T: Debug> Debug for TrackedCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TrackedCell").field(&self.cell).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Shared;
    use crate::reactive::Subscriber;

    fn counting_subscriber() -> (Subscriber, Rc<std::cell::Cell<u32>>) {
        let count = Rc::new(std::cell::Cell::new(0));
        let count_clone = count.clone();
        let subscriber = Subscriber::new(move || count_clone.set(count_clone.get() + 1));
        (subscriber, count)
    }

    #[test]
    fn cell_reset_and_deref() {
        let cell = Cell::new(0);
        assert_eq!(cell.deref(), 0);

        assert_eq!(cell.reset(42).unwrap(), 42);
        assert_eq!(cell.deref(), 42);
    }

    #[test]
    fn distinct_writes_notify_each_time() {
        let cell = Cell::new(0);
        let (subscriber, count) = counting_subscriber();
        cell.subscribe(&subscriber).unwrap();

        cell.reset(1).unwrap();
        cell.reset(2).unwrap();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let cell = Cell::new(0);
        let (subscriber, count) = counting_subscriber();
        cell.subscribe(&subscriber).unwrap();

        cell.reset(1).unwrap();
        cell.reset(1).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn changed_flag_follows_writes_and_reads() {
        let cell = Cell::new(0);
        assert!(cell.is_changed());

        cell.deref();
        assert!(!cell.is_changed());

        cell.reset(0).unwrap();
        assert!(!cell.is_changed());

        cell.reset(3).unwrap();
        assert!(cell.is_changed());
        assert_eq!(cell.peek(), 3);
        assert!(cell.is_changed());

        cell.deref();
        assert!(!cell.is_changed());
    }

    #[test]
    fn swap_passes_extra_arguments_as_one_value() {
        let cell = Cell::new(10);
        let result = cell.swap(|v, (a, b): (i32, i32)| v * a + b, (2, 1)).unwrap();
        assert_eq!(result, 21);
        assert_eq!(cell.deref(), 21);
    }

    #[test]
    fn swap_to_same_value_does_not_notify() {
        let cell = Cell::new(5);
        let (subscriber, count) = counting_subscriber();
        cell.subscribe(&subscriber).unwrap();

        cell.update(|v| *v).unwrap();
        assert_eq!(count.get(), 0);

        cell.update(|v| v + 1).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn shared_values_compare_by_identity() {
        let first = Shared::new(String::from("a"));
        let cell = Cell::new(first.clone());
        let (subscriber, count) = counting_subscriber();
        cell.subscribe(&subscriber).unwrap();

        cell.reset(first).unwrap();
        assert_eq!(count.get(), 0);

        cell.reset(Shared::new(String::from("a"))).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn clone_shares_state() {
        let cell1 = Cell::new(0);
        let cell2 = cell1.clone();

        cell1.reset(42).unwrap();
        assert_eq!(cell2.deref(), 42);
        assert_eq!(cell1.node_id(), cell2.node_id());
    }

    #[test]
    fn plain_cell_reads_are_untracked() {
        let cell = Cell::new(1);
        let (subscriber, _) = counting_subscriber();

        subscriber.run_tracked(|| cell.deref());
        assert_eq!(cell.observer_count(), 0);
    }

    #[test]
    fn tracked_cell_registers_reads() {
        let cell = TrackedCell::new(1);
        let (subscriber, count) = counting_subscriber();

        assert_eq!(subscriber.run_tracked(|| cell.deref()), 1);
        assert_eq!(cell.observer_count(), 1);

        cell.reset(2).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn orphan_read_of_tracked_cell_is_fine() {
        let cell = TrackedCell::new(9);
        assert_eq!(cell.deref(), 9);
        assert_eq!(cell.observer_count(), 0);
    }

    #[test]
    fn subject_receives_changing_writes() {
        let cell = Cell::new(1);
        let subject = cell.subject();
        assert_eq!(subject.value(), Some(1));

        cell.reset(1).unwrap();
        cell.reset(2).unwrap();
        assert_eq!(subject.value(), Some(2));
    }

    #[test]
    fn unobserved_cell_is_disposed() {
        let cell = Cell::new(0);
        let (subscriber, _) = counting_subscriber();
        let disposed = Rc::new(std::cell::Cell::new(false));
        let disposed_clone = disposed.clone();
        cell.on_dispose(move || disposed_clone.set(true));

        cell.subscribe(&subscriber).unwrap();
        cell.unsubscribe(&subscriber);

        assert!(disposed.get());
        assert!(cell.is_disposed());
    }
}
