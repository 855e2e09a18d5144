//! Observable State
//!
//! This module turns plain value trees into observable ones.
//!
//! # Concepts
//!
//! ## Observers
//!
//! An [`Observer`] is the hidden marker attached to a container the first time
//! it is made observable. Its presence makes installation idempotent, and its
//! [`Dep`] is the container-level dependency notified on structural changes
//! (keys added or removed, elements inserted or reordered).
//!
//! ## Reactive cells
//!
//! Every property of an observed [`ReactiveObject`] is stored in a
//! [`ReactiveCell`]: a slot with its own dependency. Reading a cell while a
//! watcher is evaluating records the edge; writing a different value notifies.
//!
//! ## Observable sequences
//!
//! [`ReactiveArray`] elements are not individual cells. Instead, every
//! mutating operation goes through the array's observer dependency, and newly
//! inserted elements are observed on the way in.

mod array;
mod cell;
mod object;
mod traverse;
mod value;

pub use array::ReactiveArray;
pub use cell::ReactiveCell;
pub use object::ReactiveObject;
pub use traverse::traverse;
pub use value::Value;

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::reactive::Dep;

thread_local! {
    static SHOULD_OBSERVE: Cell<bool> = const { Cell::new(true) };
}

/// Marker attached to an observed container.
pub struct Observer {
    dep: Rc<Dep>,
    root_count: Cell<u32>,
}

impl Observer {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            dep: Dep::new(),
            root_count: Cell::new(0),
        })
    }

    /// The container-level dependency.
    pub fn dep(&self) -> &Rc<Dep> {
        &self.dep
    }

    /// How many times the container was observed as root state.
    pub fn root_count(&self) -> u32 {
        self.root_count.get()
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.dep.id())
            .field("root_count", &self.root_count())
            .finish()
    }
}

/// Globally enable or disable observation of new containers.
///
/// Containers that are already observed stay observed.
pub fn toggle_observing(enabled: bool) {
    SHOULD_OBSERVE.with(|flag| flag.set(enabled));
}

pub(crate) fn should_observe() -> bool {
    SHOULD_OBSERVE.with(Cell::get)
}

/// Make a value observable, returning its observer.
///
/// Scalars are never observed. Containers that are already observed return
/// their existing observer; non-extensible containers, or any container
/// while observation is toggled off, return `None`.
pub fn observe(value: &Value, as_root: bool) -> Option<Rc<Observer>> {
    let observer = match value {
        Value::Object(obj) => obj.install_observer(),
        Value::Array(arr) => arr.install_observer(),
        _ => return None,
    };

    if as_root {
        if let Some(observer) = &observer {
            observer.root_count.set(observer.root_count.get() + 1);
        }
    }

    observer
}

/// Observe a value as root state and hand it back.
///
/// ```rust,ignore
/// let state = reactive(Value::from_json(json!({ "a": 1 })));
/// ```
pub fn reactive(value: Value) -> Value {
    observe(&value, true);
    value
}
