//! Reactive Primitives
//!
//! This module implements dependency tracking: dependencies, watchers,
//! computed values and the watch API. Together with [`crate::observe`] it
//! forms the core of Trellis.
//!
//! # Concepts
//!
//! ## Dependencies
//!
//! A [`Dep`] is the subscriber list of one reactive source: a property cell
//! or a container's observer. Notifying it updates every subscribed watcher.
//!
//! ## Watchers
//!
//! A [`Watcher`] evaluates a getter while registered as the current target
//! of the reactive context. Every dependency read during the evaluation adds
//! the watcher as a subscriber. When one of them changes, the watcher is
//! marked dirty (lazy), re-run immediately (sync) or queued on the scheduler.
//!
//! ## Computed values and watches
//!
//! [`Computed`] wraps a lazy watcher with a cached value. [`watch`] and
//! [`watch_path`] create user watchers with a change callback.
//!
//! ## Owners
//!
//! An [`Owner`] holds a group of watchers, such as those of one component,
//! and the lifecycle hooks the scheduler runs around a flush.
//!
//! # Implementation Notes
//!
//! Everything is single-threaded: shared state uses `Rc` and `RefCell`, and
//! the context stack and scheduler queue are thread-local.

mod computed;
mod context;
mod dep;
mod id;
mod owner;
mod watch;
mod watcher;

pub use computed::Computed;
pub use context::{untrack, ReactiveContext};
pub use dep::Dep;
pub use id::{DepId, WatcherId};
pub use owner::{Hook, Owner};
pub use watch::{parse_path, path_getter, render_watcher, watch, watch_path, Unwatch, WatchOptions};
pub use watcher::{Callback, Getter, Watcher, WatcherOptions};

pub(crate) use owner::HookKind;
