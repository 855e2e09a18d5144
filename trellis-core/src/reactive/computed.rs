//! Computed Values
//!
//! A computed value is a lazy watcher with a cached result.
//!
//! # How Computed Values Work
//!
//! 1. Creation does not evaluate anything; the watcher starts dirty.
//!
//! 2. On read, a dirty computed re-evaluates and caches the result.
//!
//! 3. When a dependency changes, the computed is only marked dirty. No work
//!    happens until somebody reads it again.
//!
//! 4. A read from inside another evaluation forwards the computed's own
//!    dependencies to the outer watcher, so the outer watcher is notified
//!    directly by the underlying cells.

use std::fmt;
use std::rc::Rc;

use super::context::ReactiveContext;
use super::owner::Owner;
use super::watcher::{Watcher, WatcherOptions};
use crate::error::{EvalError, ReactiveError};
use crate::observe::Value;

/// A cached, lazily recomputed derived value.
#[derive(Clone)]
pub struct Computed {
    watcher: Rc<Watcher>,
}

impl Computed {
    /// Create an ownerless computed value.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> Result<Value, EvalError> + 'static,
    {
        Self::build(None, getter, None)
    }

    /// Create a computed value kept alive by `owner`.
    pub fn in_owner<F>(owner: &Owner, getter: F) -> Self
    where
        F: Fn() -> Result<Value, EvalError> + 'static,
    {
        Self::build(Some(owner), getter, None)
    }

    /// Like [`Computed::new`], labelled for diagnostics.
    pub fn named<F>(name: impl Into<String>, getter: F) -> Self
    where
        F: Fn() -> Result<Value, EvalError> + 'static,
    {
        Self::build(None, getter, Some(name.into()))
    }

    fn build<F>(owner: Option<&Owner>, getter: F, name: Option<String>) -> Self
    where
        F: Fn() -> Result<Value, EvalError> + 'static,
    {
        let mut options = WatcherOptions::default().lazy();
        options.expression = name;
        Self {
            watcher: Watcher::build(owner, getter, None, options),
        }
    }

    /// Read the value, recomputing it first if dirty.
    pub fn get(&self) -> Result<Value, ReactiveError> {
        if self.watcher.is_dirty() {
            self.watcher.evaluate()?;
        }
        if ReactiveContext::is_active() {
            self.watcher.depend();
        }
        Ok(self.watcher.value())
    }

    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    /// The backing lazy watcher.
    pub fn watcher(&self) -> &Rc<Watcher> {
        &self.watcher
    }

    pub fn teardown(&self) {
        self.watcher.teardown();
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("watcher", &self.watcher.id())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
