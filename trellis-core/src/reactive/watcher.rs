//! Watcher Implementation
//!
//! A watcher is a subscriber that evaluates a getter, records the
//! dependencies read along the way, and reacts when any of them change.
//! Three flavors share this type:
//!
//! - **lazy** watchers back computed values: a change only marks them dirty
//!   and the value is recomputed on the next read;
//! - **sync** watchers re-run immediately on change;
//! - everything else is queued on the scheduler and re-run in the next
//!   flush, batched and ordered by creation.
//!
//! # Dependency bookkeeping
//!
//! Each evaluation collects a fresh dependency set. Afterwards the previous
//! set is diffed against it: subscriptions to deps no longer read are
//! removed, so conditional branches do not keep stale edges alive.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::owner::{Hook, Owner, WeakOwner};
use super::{Dep, DepId, WatcherId};
use crate::error::{report_error, EvalError, ReactiveError};
use crate::observe::{traverse, Value};
use crate::schedule::scheduler;

/// A watcher's evaluator.
pub type Getter = Rc<dyn Fn() -> Result<Value, EvalError>>;

/// A watcher's reaction, called with `(new, old)`.
pub type Callback = Rc<dyn Fn(&Value, &Value) -> Result<(), EvalError>>;

/// Options controlling how a watcher reacts.
#[derive(Clone, Default)]
pub struct WatcherOptions {
    pub lazy: bool,
    pub sync: bool,
    /// User-created: evaluator and callback errors are reported instead of
    /// propagated.
    pub user: bool,
    pub deep: bool,
    /// Run before each scheduled re-run.
    pub before: Option<Hook>,
    /// Label used in diagnostics.
    pub expression: Option<String>,
}

impl WatcherOptions {
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    pub fn user(mut self) -> Self {
        self.user = true;
        self
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn before(mut self, hook: impl Fn() + 'static) -> Self {
        self.before = Some(Rc::new(hook));
        self
    }

    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

impl fmt::Debug for WatcherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("lazy", &self.lazy)
            .field("sync", &self.sync)
            .field("user", &self.user)
            .field("deep", &self.deep)
            .field("before", &self.before.is_some())
            .field("expression", &self.expression)
            .finish()
    }
}

#[derive(Default)]
struct DepSet {
    ids: HashSet<DepId>,
    deps: SmallVec<[Rc<Dep>; 4]>,
}

/// A dependency-tracking subscriber.
pub struct Watcher {
    id: WatcherId,
    expression: String,
    getter: Getter,
    callback: Option<Callback>,
    before: Option<Hook>,
    lazy: bool,
    sync: bool,
    user: bool,
    deep: bool,
    active: Cell<bool>,
    dirty: Cell<bool>,
    value: RefCell<Value>,
    deps: RefCell<DepSet>,
    new_deps: RefCell<DepSet>,
    owner: Option<WeakOwner>,
    this: Weak<Watcher>,
}

impl Watcher {
    /// Create a watcher without evaluating it.
    ///
    /// The watcher is registered with `owner`, which keeps it alive.
    pub fn build<F>(
        owner: Option<&Owner>,
        getter: F,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Rc<Self>
    where
        F: Fn() -> Result<Value, EvalError> + 'static,
    {
        let id = WatcherId::next();
        let watcher = Rc::new_cyclic(|this| Self {
            id,
            expression: options
                .expression
                .unwrap_or_else(|| format!("watcher{id}")),
            getter: Rc::new(getter),
            callback,
            before: options.before,
            lazy: options.lazy,
            sync: options.sync,
            user: options.user,
            deep: options.deep,
            active: Cell::new(true),
            dirty: Cell::new(options.lazy),
            value: RefCell::new(Value::Undefined),
            deps: RefCell::new(DepSet::default()),
            new_deps: RefCell::new(DepSet::default()),
            owner: owner.map(Owner::downgrade),
            this: this.clone(),
        });

        if let Some(owner) = owner {
            owner.register(watcher.clone());
        }

        tracing::trace!(watcher = %watcher.id, expression = %watcher.expression, "watcher created");
        watcher
    }

    /// Create a watcher and, unless it is lazy, evaluate it once.
    pub fn new<F>(
        owner: Option<&Owner>,
        getter: F,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Result<Rc<Self>, ReactiveError>
    where
        F: Fn() -> Result<Value, EvalError> + 'static,
    {
        let watcher = Self::build(owner, getter, callback, options);
        watcher.init()?;
        Ok(watcher)
    }

    /// Run the first evaluation of a non-lazy watcher.
    pub(crate) fn init(&self) -> Result<(), ReactiveError> {
        if !self.lazy {
            let value = self.get()?;
            *self.value.borrow_mut() = value;
        }
        Ok(())
    }

    /// Evaluate the getter and re-collect dependencies.
    ///
    /// Errors from user watchers are reported and the result becomes
    /// `undefined`; other watchers propagate them.
    pub(crate) fn get(&self) -> Result<Value, ReactiveError> {
        let Some(this) = self.this.upgrade() else {
            return Ok(Value::Undefined);
        };

        let result = {
            let _frame = EvalFrame {
                watcher: self,
                _context: ReactiveContext::enter(this),
            };

            let result = (self.getter)();
            if self.deep {
                if let Ok(value) = &result {
                    traverse(value);
                }
            }
            result
        };

        match result {
            Ok(value) => Ok(value),
            Err(source) => {
                let err = ReactiveError::Evaluator {
                    expression: self.expression.clone(),
                    source,
                };
                if self.user {
                    report_error(err);
                    Ok(Value::Undefined)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Record `dep` as read during the current evaluation.
    ///
    /// Subscribes only to deps not already held from the previous run.
    pub fn add_dep(&self, dep: &Rc<Dep>) {
        if !self.active.get() {
            return;
        }

        let id = dep.id();
        let mut new_deps = self.new_deps.borrow_mut();
        if !new_deps.ids.insert(id) {
            return;
        }
        new_deps.deps.push(dep.clone());

        if !self.deps.borrow().ids.contains(&id) {
            if let Some(this) = self.this.upgrade() {
                dep.add_sub(&this);
            }
        }
    }

    /// Swap the collected set in and drop stale subscriptions.
    fn cleanup_deps(&self) {
        let next = std::mem::take(&mut *self.new_deps.borrow_mut());

        if !self.active.get() {
            // Torn down mid-evaluation: nothing collected may survive.
            for dep in &next.deps {
                dep.remove_sub(self.id);
            }
            return;
        }

        let previous = self.deps.replace(next);
        let current = self.deps.borrow();
        for dep in &previous.deps {
            if !current.ids.contains(&dep.id()) {
                dep.remove_sub(self.id);
            }
        }
    }

    /// React to a dependency change.
    pub fn update(&self) {
        if self.lazy {
            self.dirty.set(true);
        } else if self.sync {
            if let Err(err) = self.run() {
                report_error(err);
            }
        } else if let Some(this) = self.this.upgrade() {
            scheduler::queue_watcher(this);
        }
    }

    /// Re-evaluate and, if the value changed, invoke the callback.
    ///
    /// Container results and deep watchers always count as changed, since
    /// their contents may have mutated in place.
    pub fn run(&self) -> Result<(), ReactiveError> {
        if !self.active.get() {
            return Ok(());
        }

        let value = self.get()?;
        let changed =
            !value.same(&self.value.borrow()) || value.is_container() || self.deep;
        if !changed {
            return Ok(());
        }

        let old = self.value.replace(value.clone());
        let Some(callback) = &self.callback else {
            return Ok(());
        };

        if let Err(source) = callback(&value, &old) {
            let err = ReactiveError::Callback {
                expression: self.expression.clone(),
                source,
            };
            if self.user {
                report_error(err);
            } else {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Recompute a lazy watcher's value and clear the dirty flag.
    pub fn evaluate(&self) -> Result<(), ReactiveError> {
        let value = self.get()?;
        *self.value.borrow_mut() = value;
        self.dirty.set(false);
        Ok(())
    }

    /// Make the currently evaluating watcher depend on everything this
    /// watcher depends on.
    pub fn depend(&self) {
        let deps = self.deps.borrow().deps.clone();
        for dep in deps.iter().rev() {
            dep.depend();
        }
    }

    /// Unsubscribe from every dependency and deactivate. Idempotent.
    pub fn teardown(&self) {
        if !self.active.get() {
            return;
        }
        // Removal from the owner may drop the last strong reference.
        let _alive = self.this.upgrade();

        if let Some(owner) = self.owner() {
            if !owner.is_being_destroyed() {
                owner.remove_watcher(self.id);
            }
        }

        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for dep in &deps.deps {
            dep.remove_sub(self.id);
        }
        self.active.set(false);
        tracing::trace!(watcher = %self.id, "watcher torn down");
    }

    pub(crate) fn call_before(&self) {
        if let Some(before) = &self.before {
            before();
        }
    }

    pub fn id(&self) -> WatcherId {
        self.id
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The last computed value.
    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn is_user(&self) -> bool {
        self.user
    }

    pub fn is_sync(&self) -> bool {
        self.sync
    }

    pub fn is_deep(&self) -> bool {
        self.deep
    }

    /// IDs of the deps collected by the last evaluation.
    pub fn dep_ids(&self) -> Vec<DepId> {
        self.deps.borrow().deps.iter().map(|dep| dep.id()).collect()
    }

    pub fn dep_count(&self) -> usize {
        self.deps.borrow().deps.len()
    }

    pub fn owner(&self) -> Option<Owner> {
        self.owner.as_ref().and_then(WeakOwner::upgrade)
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        for dep in self.deps.get_mut().deps.drain(..) {
            dep.remove_sub(self.id);
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("expression", &self.expression)
            .field("active", &self.active.get())
            .field("dirty", &self.dirty.get())
            .field("deps", &self.dep_ids())
            .finish()
    }
}

/// Dependency collection for one evaluation.
///
/// On drop the collected set is swapped in, then the context field pops.
struct EvalFrame<'a> {
    watcher: &'a Watcher,
    _context: ReactiveContext,
}

impl Drop for EvalFrame<'_> {
    fn drop(&mut self) {
        self.watcher.cleanup_deps();
    }
}
