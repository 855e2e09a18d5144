//! Trellis Core
//!
//! This crate provides the dependency-tracking and update-scheduling engine
//! behind Trellis' reactive state. It implements:
//!
//! - Observable state (objects, arrays and property cells)
//! - Automatic dependency tracking (dependencies, watchers, computed values)
//! - Batched, ordered re-runs (scheduler queue and tick batching)
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `observe`: turning plain value trees into observable ones
//! - `reactive`: dependencies, watchers, computed values and the watch API
//! - `schedule`: the watcher queue, the flush and tick drivers
//! - `config` / `error`: engine settings and error reporting
//!
//! Everything is single-threaded. Shared state lives in thread-locals, so
//! each thread runs its own independent engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::observe::{reactive, Value};
//! use trellis_core::reactive::{watch, WatchOptions};
//! use trellis_core::schedule::tick;
//!
//! // Create observable state
//! let state = reactive(Value::from_json(json!({ "count": 1 })));
//! let data = state.as_object().cloned().unwrap();
//!
//! // Watch a derived value
//! let d = data.clone();
//! let _handle = watch(
//!     None,
//!     move || Ok(Value::from(d.get("count").as_f64().unwrap_or(0.0) * 2.0)),
//!     |new, old| {
//!         println!("doubled: {old} -> {new}");
//!         Ok(())
//!     },
//!     WatchOptions::default(),
//! );
//!
//! // Writes are batched; the watcher re-runs once on the next tick
//! data.set("count", 2);
//! data.set("count", 3);
//! tick::flush_pending(); // prints "doubled: 2 -> 6"
//! ```

pub mod config;
pub mod error;
pub mod observe;
pub mod reactive;
pub mod schedule;

pub use config::Settings;
pub use error::{EvalError, ReactiveError};
pub use observe::{ReactiveArray, ReactiveObject, Value};
pub use reactive::{Computed, Owner, Watcher, WatcherOptions};
