//! Owners
//!
//! An [`Owner`] is the boundary the engine shares with component lifecycle
//! code. It keeps every watcher created on its behalf alive, knows its single
//! primary (render) watcher, and carries the lifecycle flags and hooks the
//! scheduler consults around a flush:
//!
//! - `before_update` runs before the primary watcher re-runs;
//! - `updated` runs after a flush in which the primary watcher ran;
//! - `activated` runs after a flush for owners queued via
//!   [`Owner::activate`].
//!
//! Destroying an owner tears down all of its watchers.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::untrack;
use super::watcher::Watcher;
use super::WatcherId;
use crate::schedule::scheduler;

/// A lifecycle hook.
pub type Hook = Rc<dyn Fn()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookKind {
    BeforeUpdate,
    Updated,
    Activated,
}

#[derive(Default)]
struct Hooks {
    before_update: Vec<Hook>,
    updated: Vec<Hook>,
    activated: Vec<Hook>,
}

pub(crate) struct OwnerInner {
    name: String,
    watchers: RefCell<Vec<Rc<Watcher>>>,
    primary: RefCell<Option<Weak<Watcher>>>,
    mounted: Cell<bool>,
    being_destroyed: Cell<bool>,
    destroyed: Cell<bool>,
    inactive: Cell<bool>,
    hooks: RefCell<Hooks>,
}

/// The owning scope of a group of watchers.
#[derive(Clone)]
pub struct Owner(Rc<OwnerInner>);

/// Non-owning handle stored by watchers.
#[derive(Clone)]
pub(crate) struct WeakOwner(Weak<OwnerInner>);

impl WeakOwner {
    pub(crate) fn upgrade(&self) -> Option<Owner> {
        self.0.upgrade().map(Owner)
    }
}

impl Owner {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Rc::new(OwnerInner {
            name: name.into(),
            watchers: RefCell::new(Vec::new()),
            primary: RefCell::new(None),
            mounted: Cell::new(false),
            being_destroyed: Cell::new(false),
            destroyed: Cell::new(false),
            inactive: Cell::new(false),
            hooks: RefCell::new(Hooks::default()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn ptr_eq(&self, other: &Owner) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn on_before_update(&self, hook: impl Fn() + 'static) {
        self.0.hooks.borrow_mut().before_update.push(Rc::new(hook));
    }

    pub fn on_updated(&self, hook: impl Fn() + 'static) {
        self.0.hooks.borrow_mut().updated.push(Rc::new(hook));
    }

    pub fn on_activated(&self, hook: impl Fn() + 'static) {
        self.0.hooks.borrow_mut().activated.push(Rc::new(hook));
    }

    /// Mark the owner as mounted. `before_update` and `updated` hooks only
    /// fire for mounted owners.
    pub fn mount(&self) {
        self.0.mounted.set(true);
    }

    pub fn is_mounted(&self) -> bool {
        self.0.mounted.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    pub fn is_being_destroyed(&self) -> bool {
        self.0.being_destroyed.get()
    }

    pub fn is_inactive(&self) -> bool {
        self.0.inactive.get()
    }

    /// Mark the owner as deactivated (kept alive but hidden).
    pub fn deactivate(&self) {
        self.0.inactive.set(true);
    }

    /// Queue the owner for reactivation. Its `activated` hooks run at the
    /// end of the current or next flush.
    pub fn activate(&self) {
        scheduler::queue_activated(self.clone());
    }

    /// Tear down every watcher of this owner. Idempotent.
    pub fn destroy(&self) {
        if self.0.being_destroyed.get() {
            return;
        }
        self.0.being_destroyed.set(true);

        if let Some(primary) = self.primary_watcher() {
            primary.teardown();
        }

        let watchers = std::mem::take(&mut *self.0.watchers.borrow_mut());
        for watcher in watchers.iter().rev() {
            watcher.teardown();
        }

        self.0.destroyed.set(true);
        tracing::debug!(owner = %self.0.name, watchers = watchers.len(), "owner destroyed");
    }

    /// The primary (render) watcher, if one was created.
    pub fn primary_watcher(&self) -> Option<Rc<Watcher>> {
        self.0.primary.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn is_primary(&self, id: WatcherId) -> bool {
        self.primary_watcher().is_some_and(|w| w.id() == id)
    }

    /// Number of live watchers registered with this owner.
    pub fn watcher_count(&self) -> usize {
        self.0.watchers.borrow().len()
    }

    pub(crate) fn downgrade(&self) -> WeakOwner {
        WeakOwner(Rc::downgrade(&self.0))
    }

    pub(crate) fn register(&self, watcher: Rc<Watcher>) {
        self.0.watchers.borrow_mut().push(watcher);
    }

    pub(crate) fn set_primary(&self, watcher: &Rc<Watcher>) {
        *self.0.primary.borrow_mut() = Some(Rc::downgrade(watcher));
    }

    pub(crate) fn remove_watcher(&self, id: WatcherId) -> Option<Rc<Watcher>> {
        let mut watchers = self.0.watchers.borrow_mut();
        let index = watchers.iter().position(|w| w.id() == id)?;
        Some(watchers.remove(index))
    }

    /// Run hooks of one kind, untracked.
    pub(crate) fn call_hook(&self, kind: HookKind) {
        let hooks: Vec<Hook> = {
            let hooks = self.0.hooks.borrow();
            match kind {
                HookKind::BeforeUpdate => hooks.before_update.clone(),
                HookKind::Updated => hooks.updated.clone(),
                HookKind::Activated => hooks.activated.clone(),
            }
        };

        untrack(|| {
            for hook in hooks {
                hook();
            }
        });
    }

    /// Reactivate and run `activated` hooks. Called by the scheduler.
    pub(crate) fn run_activation(&self) {
        self.0.inactive.set(false);
        self.call_hook(HookKind::Activated);
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("name", &self.0.name)
            .field("watchers", &self.watcher_count())
            .field("mounted", &self.is_mounted())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
