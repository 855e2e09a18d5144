//! Dependency Implementation
//!
//! A `Dep` is the fan-out point for change notification: every reactive cell
//! and every observer owns one, and watchers subscribe to the deps they read.
//!
//! Subscribers are held weakly. A watcher keeps its deps alive (it must be
//! able to unsubscribe), so a strong back-reference would form a cycle. The
//! watcher removes itself on teardown and on drop.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::watcher::Watcher;
use super::{DepId, WatcherId};
use crate::config;

/// A registry of watchers interested in one reactive source.
pub struct Dep {
    id: DepId,
    subs: RefCell<SmallVec<[(WatcherId, Weak<Watcher>); 4]>>,
}

impl Dep {
    /// Create a new dependency with the next ID.
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            id: DepId::next(),
            subs: RefCell::new(SmallVec::new()),
        })
    }

    pub fn id(&self) -> DepId {
        self.id
    }

    /// Add a subscriber.
    ///
    /// Duplicates are prevented on the watcher side, which only calls this
    /// for deps it did not already hold.
    pub fn add_sub(&self, watcher: &Rc<Watcher>) {
        self.subs
            .borrow_mut()
            .push((watcher.id(), Rc::downgrade(watcher)));
    }

    /// Remove a subscriber.
    pub fn remove_sub(&self, id: WatcherId) {
        let mut subs = self.subs.borrow_mut();
        if let Some(index) = subs.iter().position(|(sub, _)| *sub == id) {
            subs.remove(index);
        }
    }

    /// Register this dep with the watcher currently evaluating, if any.
    pub fn depend(self: &Rc<Self>) {
        if let Some(target) = ReactiveContext::current() {
            target.add_dep(self);
        }
    }

    /// Notify every subscriber.
    ///
    /// The subscriber list is snapshotted first, so subscribers may remove
    /// themselves (or others) while being updated. In synchronous mode the
    /// snapshot is sorted by watcher ID, giving creation order without the
    /// scheduler.
    pub fn notify(&self) {
        let mut subs: SmallVec<[Rc<Watcher>; 4]> = self
            .subs
            .borrow()
            .iter()
            .filter_map(|(_, watcher)| watcher.upgrade())
            .collect();

        if !config::settings().async_mode {
            subs.sort_by_key(|watcher| watcher.id());
        }

        for watcher in subs {
            watcher.update();
        }
    }

    /// Number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subs.borrow().len()
    }

    /// Whether the watcher with `id` is subscribed.
    pub fn has_sub(&self, id: WatcherId) -> bool {
        self.subs.borrow().iter().any(|(sub, _)| *sub == id)
    }

    /// IDs of the subscribers, in subscription order.
    pub fn subscriber_ids(&self) -> Vec<WatcherId> {
        self.subs.borrow().iter().map(|(id, _)| *id).collect()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id)
            .field("subscribers", &self.subscriber_ids())
            .finish()
    }
}
