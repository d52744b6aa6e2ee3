//! Push Subject
//!
//! A minimal behaviour-subject: it remembers the latest value, replays it to
//! each new listener and pushes every later value to all listeners. Cells
//! publish their writes through one, and it is the simplest foreign source
//! a [`ForeignStreamAdapter`](super::ForeignStreamAdapter) can wrap.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use tracing::warn;

use super::adapter::PushSource;

new_key_type! {
    struct ListenerKey;
}

type Listener<T> = Rc<RefCell<Box<dyn FnMut(T)>>>;

struct SubjectInner<T> {
    current: RefCell<Option<T>>,
    listeners: RefCell<SlotMap<ListenerKey, Listener<T>>>,
}

/// A replaying push source.
///
/// Cloning a `PushSubject` creates a new handle to the same subject.
pub struct PushSubject<T> {
    inner: Rc<SubjectInner<T>>,
}

impl<T: Clone + 'static> PushSubject<T> {
    /// Create a subject with no value yet.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SubjectInner {
                current: RefCell::new(None),
                listeners: RefCell::new(SlotMap::with_key()),
            }),
        }
    }

    /// Create a subject that replays `value` to its first listeners.
    pub fn with_value(value: T) -> Self {
        let subject = Self::new();
        *subject.inner.current.borrow_mut() = Some(value);
        subject
    }

    /// Store `value` and push it to every listener.
    pub fn next(&self, value: T) {
        *self.inner.current.borrow_mut() = Some(value.clone());

        let listeners: SmallVec<[(ListenerKey, Listener<T>); 4]> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(key, listener)| (key, listener.clone()))
            .collect();
        for (key, listener) in listeners {
            // Removed by an earlier listener in this pass.
            if !self.inner.listeners.borrow().contains_key(key) {
                continue;
            }
            match listener.try_borrow_mut() {
                Ok(mut listener) => (*listener)(value.clone()),
                Err(_) => warn!("skipping re-entrant push to a busy listener"),
            }
        }
    }

    /// The latest value, if any.
    pub fn value(&self) -> Option<T> {
        self.inner.current.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }
}

impl<T: Clone + 'static> Default for PushSubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for PushSubject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PushSubject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushSubject")
            .field("current", &self.inner.current.borrow())
            .field("listeners", &self.inner.listeners.borrow().len())
            .finish()
    }
}

/// A listener registration. Dropping it stops delivery.
pub struct SubjectSubscription<T> {
    subject: Weak<SubjectInner<T>>,
    key: ListenerKey,
}

impl<T> Drop for SubjectSubscription<T> {
    fn drop(&mut self) {
        if let Some(subject) = self.subject.upgrade() {
            let removed = subject.listeners.borrow_mut().remove(self.key);
            drop(removed);
        }
    }
}

impl<T: Clone + 'static> PushSource<T> for PushSubject<T> {
    type Subscription = SubjectSubscription<T>;

    fn subscribe(&self, push: Box<dyn FnMut(T)>) -> Self::Subscription {
        let listener: Listener<T> = Rc::new(RefCell::new(push));
        let key = self.inner.listeners.borrow_mut().insert(listener.clone());

        let replay = self.inner.current.borrow().clone();
        if let Some(value) = replay {
            (*listener.borrow_mut())(value);
        }

        SubjectSubscription {
            subject: Rc::downgrade(&self.inner),
            key,
        }
    }
}
