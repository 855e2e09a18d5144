//! Update Scheduler
//!
//! The scheduler batches watcher re-runs so that any number of writes in one
//! synchronous turn cause at most one run per watcher.
//!
//! # Algorithm
//!
//! 1. `queue_watcher` records the watcher in a membership set. Duplicates
//!    are ignored, which is what collapses N writes into one run.
//! 2. The first queued watcher arms one flush through the tick primitive.
//! 3. The flush sorts the queue by watcher ID. Watchers are numbered in
//!    creation order, so parents run before their children.
//! 4. The queue is scanned with an explicit index. A watcher queued while
//!    the flush runs is inserted at its sorted position, but never at or
//!    before the index, so it still runs in this flush.
//! 5. After the scan the state is reset, then `activated` and `updated`
//!    owner hooks run.
//!
//! # Circular updates
//!
//! Every time a watcher is queued while a flush is running, its counter is
//! bumped. Past `max_update_count` it is excluded from the queue for the
//! rest of the flush and a warning is emitted, so mutually triggering
//! watchers terminate.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::tick;
use crate::config;
use crate::error::{self, report_error, ReactiveError};
use crate::reactive::{HookKind, Owner, Watcher, WatcherId};

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Rc<Watcher>>,
    activated: Vec<Owner>,
    has: HashSet<WatcherId>,
    circular: HashMap<WatcherId, u32>,
    excluded: HashSet<WatcherId>,
    waiting: bool,
    flushing: bool,
    index: usize,
    flush_count: u64,
}

thread_local! {
    static STATE: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Queue a watcher for the next flush.
///
/// Watchers already queued (and not yet run) are ignored.
pub fn queue_watcher(watcher: Rc<Watcher>) {
    let id = watcher.id();
    let limit = config::settings().max_update_count;

    let outcome = STATE.with(|state| {
        let mut state = state.borrow_mut();
        if state.has.contains(&id) || state.excluded.contains(&id) {
            return Queued::Skipped;
        }

        if state.flushing {
            let count = state.circular.entry(id).or_insert(0);
            *count += 1;
            if *count > limit {
                state.excluded.insert(id);
                return Queued::Runaway;
            }
        }
        state.has.insert(id);

        if state.flushing {
            let mut position = state.queue.len();
            while position > state.index + 1 && state.queue[position - 1].id() > id {
                position -= 1;
            }
            state.queue.insert(position, watcher.clone());
        } else {
            state.queue.push(watcher.clone());
        }

        if state.waiting {
            Queued::Added
        } else {
            state.waiting = true;
            Queued::Armed
        }
    });

    match outcome {
        Queued::Armed => arm_flush(),
        Queued::Runaway => error::warn(
            &ReactiveError::CircularUpdate {
                expression: watcher.expression().to_string(),
                limit,
            }
            .to_string(),
        ),
        Queued::Added | Queued::Skipped => {}
    }
}

enum Queued {
    Skipped,
    Added,
    Armed,
    Runaway,
}

/// Queue an owner whose `activated` hooks should run after the flush.
pub fn queue_activated(owner: Owner) {
    let arm = STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.activated.push(owner);
        if state.waiting {
            false
        } else {
            state.waiting = true;
            true
        }
    });

    if arm {
        arm_flush();
    }
}

fn arm_flush() {
    if !config::settings().async_mode {
        if let Err(err) = flush_scheduler_queue() {
            report_error(err);
        }
        return;
    }

    tick::schedule(|| {
        if let Err(err) = flush_scheduler_queue() {
            report_error(err);
        }
        Ok(())
    });
}

/// Run every queued watcher.
///
/// Errors from internal watchers do not abort the flush: the remaining
/// watchers still run and the first error is returned. Later errors are
/// reported as they happen. Calling this while a flush is already running
/// does nothing.
pub fn flush_scheduler_queue() -> Result<(), ReactiveError> {
    let started = STATE.with(|state| {
        let mut state = state.borrow_mut();
        if state.flushing {
            return None;
        }
        state.flushing = true;
        state.index = 0;
        state.flush_count += 1;
        state.queue.sort_by_key(|watcher| watcher.id());
        Some((state.flush_count, state.queue.len()))
    });
    let Some((flush, queued)) = started else {
        return Ok(());
    };
    tracing::trace!(flush, queued, "flush started");

    let mut scan = ScanGuard { armed: true };
    let mut first_error = None;
    let mut ran = 0usize;

    loop {
        let next = STATE.with(|state| {
            let mut state = state.borrow_mut();
            let watcher = state.queue.get(state.index).cloned();
            if let Some(watcher) = &watcher {
                state.has.remove(&watcher.id());
            }
            watcher
        });
        let Some(watcher) = next else {
            break;
        };

        watcher.call_before();
        if let Err(err) = watcher.run() {
            if first_error.is_none() {
                first_error = Some(err);
            } else {
                report_error(err);
            }
        }
        ran += 1;

        STATE.with(|state| state.borrow_mut().index += 1);
    }

    scan.armed = false;
    let (queue, activated) = reset_state();
    tracing::trace!(flush, ran, "flush finished");

    for owner in &activated {
        owner.run_activation();
    }
    call_updated_hooks(&queue);

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Resets the scheduler if the scan unwinds, so a panicking watcher does not
/// leave the thread stuck in `flushing`.
struct ScanGuard {
    armed: bool,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if self.armed {
            let (queue, _) = reset_state();
            tracing::warn!(dropped = queue.len(), "flush unwound, queue discarded");
        }
    }
}

fn reset_state() -> (Vec<Rc<Watcher>>, Vec<Owner>) {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        let queue = std::mem::take(&mut state.queue);
        let activated = std::mem::take(&mut state.activated);
        state.has.clear();
        state.circular.clear();
        state.excluded.clear();
        state.waiting = false;
        state.flushing = false;
        state.index = 0;
        (queue, activated)
    })
}

/// Fire `updated` hooks for owners whose primary watcher ran, children
/// first.
fn call_updated_hooks(queue: &[Rc<Watcher>]) {
    for watcher in queue.iter().rev() {
        let Some(owner) = watcher.owner() else {
            continue;
        };
        if owner.is_primary(watcher.id()) && owner.is_mounted() && !owner.is_destroyed() {
            owner.call_hook(HookKind::Updated);
        }
    }
}

/// Whether a flush is running right now.
pub fn is_flushing() -> bool {
    STATE.with(|state| state.borrow().flushing)
}

/// Whether a flush has been armed and not yet run.
pub fn is_waiting() -> bool {
    STATE.with(|state| state.borrow().waiting)
}

/// Number of watchers queued and not yet run.
pub fn pending_count() -> usize {
    STATE.with(|state| {
        let state = state.borrow();
        if state.flushing {
            state.queue.len().saturating_sub(state.index)
        } else {
            state.queue.len()
        }
    })
}

/// Number of flushes run on this thread.
pub fn flush_count() -> u64 {
    STATE.with(|state| state.borrow().flush_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use crate::observe::{reactive, Value};
    use crate::reactive::WatcherOptions;
    use serde_json::json;
    use std::cell::Cell;

    fn counting_watcher(runs: &Rc<Cell<u32>>) -> Rc<Watcher> {
        let counter = runs.clone();
        Watcher::new(
            None,
            move || {
                counter.set(counter.get() + 1);
                Ok(Value::Undefined)
            },
            None,
            WatcherOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn duplicate_queueing_runs_once() {
        let runs = Rc::new(Cell::new(0));
        let watcher = counting_watcher(&runs);
        assert_eq!(runs.get(), 1);

        queue_watcher(watcher.clone());
        queue_watcher(watcher.clone());
        queue_watcher(watcher);
        assert_eq!(pending_count(), 1);
        assert!(is_waiting());

        assert!(tick::flush_pending());
        assert_eq!(runs.get(), 2);
        assert_eq!(pending_count(), 0);
        assert!(!is_waiting());
    }

    #[test]
    fn flush_runs_in_creation_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let make = |label: &'static str| {
            let order = order.clone();
            Watcher::build(
                None,
                move || {
                    order.borrow_mut().push(label);
                    Ok(Value::Undefined)
                },
                None,
                WatcherOptions::default(),
            )
        };
        let parent = make("parent");
        let child = make("child");

        queue_watcher(child);
        queue_watcher(parent);
        flush_scheduler_queue().unwrap();

        assert_eq!(order.borrow().as_slice(), &["parent", "child"]);
    }

    #[test]
    fn watchers_queued_mid_flush_run_in_the_same_flush() {
        let state = reactive(Value::from_json(json!({ "a": 0, "b": 0 })));
        let data = state.as_object().cloned().unwrap();
        let b_runs = Rc::new(Cell::new(0));

        let d = data.clone();
        let _a = Watcher::new(
            None,
            move || Ok(d.get("a")),
            Some(Rc::new({
                let d = data.clone();
                move |new: &Value, _: &Value| {
                    d.set("b", new.clone());
                    Ok(())
                }
            })),
            WatcherOptions::default(),
        )
        .unwrap();

        let d = data.clone();
        let counter = b_runs.clone();
        let _b = Watcher::new(
            None,
            move || {
                counter.set(counter.get() + 1);
                Ok(d.get("b"))
            },
            None,
            WatcherOptions::default(),
        )
        .unwrap();

        data.set("a", 1);
        let before = flush_count();
        tick::drain();

        assert_eq!(flush_count(), before + 1);
        assert_eq!(b_runs.get(), 2);
    }

    #[test]
    fn earlier_watchers_requeued_mid_flush_run_again() {
        let state = reactive(Value::from_json(json!({ "x": 0, "y": 0 })));
        let data = state.as_object().cloned().unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        let d = data.clone();
        let sink = log.clone();
        let _low = Watcher::new(
            None,
            move || Ok(d.get("x")),
            Some(Rc::new(move |new: &Value, _: &Value| {
                sink.borrow_mut().push(format!("low {new}"));
                Ok(())
            })),
            WatcherOptions::default(),
        )
        .unwrap();

        let d = data.clone();
        let sink = log.clone();
        let _high = Watcher::new(
            None,
            move || Ok(d.get("y")),
            Some(Rc::new({
                let d = data.clone();
                move |new: &Value, _: &Value| {
                    sink.borrow_mut().push(format!("high {new}"));
                    d.set("x", 99);
                    Ok(())
                }
            })),
            WatcherOptions::default(),
        )
        .unwrap();

        data.set("x", 1);
        data.set("y", 1);
        let before = flush_count();
        tick::drain();

        assert_eq!(flush_count(), before + 1);
        assert_eq!(log.borrow().as_slice(), &["low 1", "high 1", "low 99"]);
    }

    #[test]
    fn panicking_watcher_does_not_wedge_the_queue() {
        let explode = Rc::new(Cell::new(false));
        let trigger = explode.clone();
        let faulty = Watcher::build(
            None,
            move || {
                if trigger.get() {
                    panic!("evaluator blew up");
                }
                Ok(Value::Undefined)
            },
            None,
            WatcherOptions::default(),
        );

        explode.set(true);
        queue_watcher(faulty);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tick::flush_pending();
        }));

        assert!(outcome.is_err());
        assert!(!is_flushing());
        assert!(!is_waiting());
        assert_eq!(pending_count(), 0);

        let runs = Rc::new(Cell::new(0));
        queue_watcher(counting_watcher(&runs));
        assert!(tick::flush_pending());
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn flush_continues_past_errors() {
        let runs = Rc::new(Cell::new(0));
        let failing = Watcher::build(
            None,
            || Err(EvalError::msg("render failed")),
            None,
            WatcherOptions::default(),
        );
        let healthy = counting_watcher(&runs);

        queue_watcher(failing);
        queue_watcher(healthy);
        let result = flush_scheduler_queue();

        assert!(matches!(result, Err(ReactiveError::Evaluator { .. })));
        assert_eq!(runs.get(), 2);
        assert!(!is_flushing());
    }

    #[test]
    fn self_triggering_watcher_is_cut_off() {
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let sink = warnings.clone();
        config::configure(|c| {
            c.settings.max_update_count = 5;
            c.warn_handler = Some(Rc::new(move |message: &str| {
                sink.borrow_mut().push(message.to_string());
            }));
        });

        let state = reactive(Value::from_json(json!({ "n": 0 })));
        let data = state.as_object().cloned().unwrap();
        let d = data.clone();
        let _watcher = Watcher::new(
            None,
            move || Ok(d.get("n")),
            Some(Rc::new({
                let d = data.clone();
                move |new: &Value, _: &Value| {
                    d.set("n", new.as_f64().unwrap_or(0.0) + 1.0);
                    Ok(())
                }
            })),
            WatcherOptions::default().expression("counter"),
        )
        .unwrap();

        data.set("n", 1);
        tick::drain();

        assert_eq!(warnings.borrow().len(), 1);
        assert!(warnings.borrow()[0].contains("counter"));
        assert_eq!(data.get_untracked("n"), Value::from(7));
        assert!(!tick::is_pending());
        config::reset();
    }

    #[test]
    fn synchronous_mode_flushes_immediately() {
        config::configure(|c| c.settings.async_mode = false);

        let runs = Rc::new(Cell::new(0));
        let watcher = counting_watcher(&runs);
        queue_watcher(watcher);

        assert_eq!(runs.get(), 2);
        assert!(!tick::is_pending());
        config::reset();
    }

    #[test]
    fn activated_hooks_run_after_flush() {
        let owner = Owner::new("cached");
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        owner.on_activated(move || flag.set(true));
        owner.deactivate();

        owner.activate();
        assert!(!fired.get());

        tick::flush_pending();
        assert!(fired.get());
        assert!(!owner.is_inactive());
    }
}
