//! Observable objects.
//!
//! A [`ReactiveObject`] is an ordered map of properties. Before it is
//! observed its properties are plain slots; observing it converts every
//! configurable slot into a [`ReactiveCell`]. Properties defined with
//! [`ReactiveObject::define_frozen`] are non-configurable and silently stay
//! plain forever.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{observe, should_observe, Observer, ReactiveCell, Value};
use crate::error;
use crate::reactive::ReactiveContext;

enum Slot {
    Plain { value: Value, configurable: bool },
    Reactive(Rc<ReactiveCell>),
}

struct ObjectInner {
    slots: RefCell<IndexMap<Rc<str>, Slot>>,
    observer: RefCell<Option<Rc<Observer>>>,
    extensible: Cell<bool>,
}

/// A reference-counted, observable object.
///
/// Cloning the handle shares the object; identity is the allocation.
#[derive(Clone)]
pub struct ReactiveObject(Rc<ObjectInner>);

impl ReactiveObject {
    /// Create an empty, unobserved object.
    pub fn new() -> Self {
        Self(Rc::new(ObjectInner {
            slots: RefCell::new(IndexMap::new()),
            observer: RefCell::new(None),
            extensible: Cell::new(true),
        }))
    }

    /// Create an unobserved object from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let obj = Self::new();
        {
            let mut slots = obj.0.slots.borrow_mut();
            for (key, value) in pairs {
                slots.insert(
                    Rc::from(key.as_ref()),
                    Slot::Plain {
                        value: value.into(),
                        configurable: true,
                    },
                );
            }
        }
        obj
    }

    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Whether two handles point at the same object.
    pub fn ptr_eq(&self, other: &ReactiveObject) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The observer marker, if the object has been observed.
    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.0.observer.borrow().clone()
    }

    /// Read a property. Missing keys read as `undefined` and track the
    /// object's shape, so adding the key later re-runs the reader.
    pub fn get(&self, key: &str) -> Value {
        match self.slot_handle(key) {
            Some(SlotHandle::Cell(cell)) => cell.get(),
            Some(SlotHandle::Plain(value)) => value,
            None => {
                self.track_shape();
                Value::Undefined
            }
        }
    }

    /// Read a property without tracking.
    pub fn get_untracked(&self, key: &str) -> Value {
        match self.slot_handle(key) {
            Some(SlotHandle::Cell(cell)) => cell.get_untracked(),
            Some(SlotHandle::Plain(value)) => value,
            None => Value::Undefined,
        }
    }

    /// Write a property.
    ///
    /// Existing reactive properties notify only on change. A new key on an
    /// observed object becomes a reactive cell and notifies the object's
    /// observer, so computations that enumerate keys re-run.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();

        match self.slot_handle(key) {
            Some(SlotHandle::Cell(cell)) => {
                cell.set(value);
            }
            Some(SlotHandle::Plain(_)) => {
                if let Some(Slot::Plain { value: slot, .. }) =
                    self.0.slots.borrow_mut().get_mut(key)
                {
                    *slot = value;
                }
            }
            None => self.insert_new(key, value),
        }
    }

    fn insert_new(&self, key: &str, value: Value) {
        let Some(observer) = self.observer() else {
            self.0.slots.borrow_mut().insert(
                Rc::from(key),
                Slot::Plain {
                    value,
                    configurable: true,
                },
            );
            return;
        };

        let cell = ReactiveCell::new(value, false);
        self.0
            .slots
            .borrow_mut()
            .insert(Rc::from(key), Slot::Reactive(cell));
        observer.dep().notify();
    }

    /// Delete a property, returning its last value.
    ///
    /// Root state refuses deletion (a warning is emitted and `None`
    /// returned).
    pub fn remove(&self, key: &str) -> Option<Value> {
        let observer = self.observer();
        if let Some(observer) = &observer {
            if observer.root_count() > 0 {
                error::warn(&format!(
                    "avoid deleting property \"{key}\" from root reactive state"
                ));
                return None;
            }
        }

        let removed = self.0.slots.borrow_mut().shift_remove(key)?;
        let value = match removed {
            Slot::Plain { value, .. } => value,
            Slot::Reactive(cell) => cell.get_untracked(),
        };

        if let Some(observer) = observer {
            observer.dep().notify();
        }
        Some(value)
    }

    /// Define a non-configurable, non-reactive property.
    ///
    /// Any existing slot is replaced without notification. Observing the
    /// object later leaves this property alone.
    pub fn define_frozen(&self, key: &str, value: impl Into<Value>) {
        self.0.slots.borrow_mut().insert(
            Rc::from(key),
            Slot::Plain {
                value: value.into(),
                configurable: false,
            },
        );
    }

    /// Whether the property at `key` is a reactive cell.
    pub fn is_reactive(&self, key: &str) -> bool {
        matches!(self.0.slots.borrow().get(key), Some(Slot::Reactive(_)))
    }

    /// The reactive cell behind `key`, if any.
    pub fn cell(&self, key: &str) -> Option<Rc<ReactiveCell>> {
        match self.0.slots.borrow().get(key) {
            Some(Slot::Reactive(cell)) => Some(cell.clone()),
            _ => None,
        }
    }

    /// Whether `key` exists. Tracks the object's shape.
    pub fn contains_key(&self, key: &str) -> bool {
        self.track_shape();
        self.0.slots.borrow().contains_key(key)
    }

    /// Property names in insertion order. Tracks the object's shape.
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.track_shape();
        self.0.slots.borrow().keys().cloned().collect()
    }

    /// Number of properties. Tracks the object's shape.
    pub fn len(&self) -> usize {
        self.track_shape();
        self.0.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forbid observation of this object from now on.
    pub fn prevent_extensions(&self) {
        self.0.extensible.set(false);
    }

    pub fn is_extensible(&self) -> bool {
        self.0.extensible.get()
    }

    /// Untracked snapshot of every property.
    pub(crate) fn entries_untracked(&self) -> Vec<(Rc<str>, Value)> {
        self.0
            .slots
            .borrow()
            .iter()
            .map(|(key, slot)| {
                let value = match slot {
                    Slot::Plain { value, .. } => value.clone(),
                    Slot::Reactive(cell) => cell.get_untracked(),
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Attach an observer and convert configurable properties to cells.
    ///
    /// The marker is set before the walk so that self-referencing structures
    /// terminate.
    pub(crate) fn install_observer(&self) -> Option<Rc<Observer>> {
        if let Some(existing) = self.observer() {
            return Some(existing);
        }
        if !should_observe() || !self.is_extensible() {
            return None;
        }

        let observer = Observer::new();
        *self.0.observer.borrow_mut() = Some(observer.clone());
        self.walk();
        Some(observer)
    }

    fn walk(&self) {
        let pending: Vec<(Rc<str>, Value)> = self
            .0
            .slots
            .borrow()
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Plain {
                    value,
                    configurable: true,
                } => Some((key.clone(), value.clone())),
                _ => None,
            })
            .collect();

        for (key, value) in pending {
            let cell = ReactiveCell::new(value, false);
            if let Some(slot) = self.0.slots.borrow_mut().get_mut(&key) {
                *slot = Slot::Reactive(cell);
            }
        }
    }

    fn track_shape(&self) {
        if ReactiveContext::is_active() {
            if let Some(observer) = self.observer() {
                observer.dep().depend();
            }
        }
    }

    fn slot_handle(&self, key: &str) -> Option<SlotHandle> {
        self.0.slots.borrow().get(key).map(|slot| match slot {
            Slot::Plain { value, .. } => SlotHandle::Plain(value.clone()),
            Slot::Reactive(cell) => SlotHandle::Cell(cell.clone()),
        })
    }
}

enum SlotHandle {
    Plain(Value),
    Cell(Rc<ReactiveCell>),
}

impl Default for ReactiveObject {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveObject")
            .field("keys", &self.0.slots.borrow().len())
            .field("observed", &self.0.observer.borrow().is_some())
            .finish()
    }
}
