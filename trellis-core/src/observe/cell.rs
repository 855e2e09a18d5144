//! Reactive Cell Implementation
//!
//! A cell is one observable property slot. It owns the dependency for that
//! property and, when the stored value is a container, a handle to the
//! container's observer so that reads also register container-level edges.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::{observe, Observer, ReactiveArray, Value};
use crate::reactive::{Dep, ReactiveContext};

/// An observable property slot.
pub struct ReactiveCell {
    dep: Rc<Dep>,
    value: RefCell<Value>,
    child: RefCell<Option<Rc<Observer>>>,
    shallow: bool,
}

impl ReactiveCell {
    /// Create a cell. Unless `shallow`, the initial value is observed too.
    pub(crate) fn new(value: Value, shallow: bool) -> Rc<Self> {
        let child = if shallow { None } else { observe(&value, false) };
        Rc::new(Self {
            dep: Dep::new(),
            value: RefCell::new(value),
            child: RefCell::new(child),
            shallow,
        })
    }

    /// The cell's dependency.
    pub fn dep(&self) -> &Rc<Dep> {
        &self.dep
    }

    /// Read the value, recording a dependency if a watcher is evaluating.
    ///
    /// Besides the cell itself, the read depends on the child observer (so
    /// structural changes inside the value are seen) and, for arrays, on
    /// every observed element.
    pub fn get(&self) -> Value {
        let value = self.value.borrow().clone();

        if ReactiveContext::is_active() {
            self.dep.depend();

            let child = self.child.borrow().clone();
            if let Some(child) = child {
                child.dep().depend();
                if let Value::Array(items) = &value {
                    depend_array(items);
                }
            }
        }

        value
    }

    /// Read the value without tracking.
    pub fn get_untracked(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Write a value. Returns whether it was a change.
    ///
    /// Writing the same value (identity, with `NaN == NaN`) does nothing.
    pub fn set(&self, new_value: Value) -> bool {
        if self.value.borrow().same(&new_value) {
            return false;
        }

        let child = if self.shallow {
            None
        } else {
            observe(&new_value, false)
        };
        *self.value.borrow_mut() = new_value;
        *self.child.borrow_mut() = child;

        self.dep.notify();
        true
    }
}

impl fmt::Debug for ReactiveCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveCell")
            .field("dep", &self.dep.id())
            .field("value", &*self.value.borrow())
            .field("subscribers", &self.dep.subscriber_count())
            .finish()
    }
}

/// Depend on every observed element of an array, recursively.
///
/// Element reads are not tracked individually, so a computation that reads
/// an array through a cell has to subscribe to the element containers here.
fn depend_array(items: &ReactiveArray) {
    for item in items.items_untracked() {
        if let Some(observer) = item.observer() {
            observer.dep().depend();
        }
        if let Value::Array(nested) = &item {
            depend_array(nested);
        }
    }
}
