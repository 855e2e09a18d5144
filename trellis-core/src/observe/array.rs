//! Observable sequences.
//!
//! Elements of a [`ReactiveArray`] are not cells. Every mutating operation
//! observes the elements it inserts and then notifies the array's observer
//! dependency, the same path a property write takes. Reads depend on that
//! dependency while a watcher is evaluating.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::{observe, should_observe, Observer, Value};
use crate::reactive::ReactiveContext;

struct ArrayInner {
    items: RefCell<Vec<Value>>,
    observer: RefCell<Option<Rc<Observer>>>,
    extensible: Cell<bool>,
}

/// A reference-counted, observable sequence.
#[derive(Clone)]
pub struct ReactiveArray(Rc<ArrayInner>);

impl ReactiveArray {
    /// Create an empty, unobserved array.
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Wrap a vector without observing it.
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Rc::new(ArrayInner {
            items: RefCell::new(items),
            observer: RefCell::new(None),
            extensible: Cell::new(true),
        }))
    }

    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Whether two handles point at the same array.
    pub fn ptr_eq(&self, other: &ReactiveArray) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.0.observer.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.track();
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read an element. Out-of-range reads give `undefined`.
    pub fn get(&self, index: usize) -> Value {
        self.track();
        self.0.items.borrow().get(index).cloned().unwrap_or_default()
    }

    /// Snapshot the elements, tracking the array.
    pub fn to_vec(&self) -> Vec<Value> {
        self.track();
        self.items_untracked()
    }

    pub(crate) fn items_untracked(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    /// Append an element, returning the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.push(value.clone());
            items.len()
        };
        self.mutated(&[value]);
        len
    }

    pub fn pop(&self) -> Option<Value> {
        let popped = self.0.items.borrow_mut().pop();
        self.mutated(&[]);
        popped
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        let shifted = {
            let mut items = self.0.items.borrow_mut();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        self.mutated(&[]);
        shifted
    }

    /// Prepend an element, returning the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.insert(0, value.clone());
            items.len()
        };
        self.mutated(&[value]);
        len
    }

    /// Insert at `index` (clamped to the length).
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        self.splice(index, 0, vec![value.into()]);
    }

    /// Remove the element at `index`.
    pub fn remove(&self, index: usize) -> Option<Value> {
        self.splice(index, 1, Vec::new()).into_iter().next()
    }

    /// Remove `delete_count` elements from `start` and insert `items` in
    /// their place. Both bounds are clamped. Returns the removed elements.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        let removed = {
            let mut current = self.0.items.borrow_mut();
            let start = start.min(current.len());
            let end = start + delete_count.min(current.len() - start);
            current.splice(start..end, items.iter().cloned()).collect()
        };
        self.mutated(&items);
        removed
    }

    /// Replace the element at `index`, growing the array with `undefined`
    /// if needed.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        {
            let mut items = self.0.items.borrow_mut();
            if items.len() < index {
                items.resize(index, Value::Undefined);
            }
        }
        self.splice(index, 1, vec![value.into()]);
    }

    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        // The comparator may read this array, so sort a copy.
        let mut sorted = self.0.items.borrow().clone();
        sorted.sort_by(compare);
        *self.0.items.borrow_mut() = sorted;
        self.mutated(&[]);
    }

    pub fn reverse(&self) {
        self.0.items.borrow_mut().reverse();
        self.mutated(&[]);
    }

    pub fn clear(&self) {
        self.0.items.borrow_mut().clear();
        self.mutated(&[]);
    }

    /// Forbid observation of this array from now on.
    pub fn prevent_extensions(&self) {
        self.0.extensible.set(false);
    }

    pub fn is_extensible(&self) -> bool {
        self.0.extensible.get()
    }

    pub(crate) fn install_observer(&self) -> Option<Rc<Observer>> {
        if let Some(existing) = self.observer() {
            return Some(existing);
        }
        if !should_observe() || !self.is_extensible() {
            return None;
        }

        let observer = Observer::new();
        *self.0.observer.borrow_mut() = Some(observer.clone());
        for item in self.items_untracked() {
            observe(&item, false);
        }
        Some(observer)
    }

    fn mutated(&self, inserted: &[Value]) {
        let Some(observer) = self.observer() else {
            return;
        };
        for value in inserted {
            observe(value, false);
        }
        observer.dep().notify();
    }

    fn track(&self) {
        if ReactiveContext::is_active() {
            if let Some(observer) = self.observer() {
                observer.dep().depend();
            }
        }
    }
}

impl Default for ReactiveArray {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReactiveArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.items.borrow().iter()).finish()
    }
}
