//! Update Scheduling
//!
//! Watchers that are neither lazy nor sync do not re-run when a dependency
//! changes. They are queued here and re-run together in one flush, armed
//! once per tick.
//!
//! - [`scheduler`] owns the deduplicated watcher queue and the flush.
//! - [`tick`] batches callbacks into one wake-up per synchronous turn and
//!   decides how that wake-up is armed.

pub mod scheduler;
pub mod tick;

pub use scheduler::{flush_scheduler_queue, queue_activated, queue_watcher};
pub use tick::{next_tick, schedule, DriverKind, NextTick, TickDriver};
