//! Tick Batching
//!
//! [`schedule`] collects callbacks for the end of the current synchronous
//! turn. However many callbacks are scheduled, exactly one wake-up is armed
//! per batch; when it fires, the batch is swapped out and run in order.
//!
//! # Drivers
//!
//! The wake-up is armed through a [`TickDriver`]. Selection, finest first:
//!
//! 1. a driver installed with [`install_driver`];
//! 2. a tokio current-thread runtime, if one is running on this thread
//!    (the flush is spawned as a task on it);
//! 3. the manual driver, which arms nothing: the host calls
//!    [`flush_pending`] (or [`drain`]) from its own loop.
//!
//! Multi-threaded runtimes are not selected automatically, since their tasks
//! may run on a different thread than the state they would flush. Hosts
//! running a `LocalSet` can install [`LocalSetDriver`].
//!
//! A thread can see a current-thread runtime without being the thread that
//! drives it (`spawn_blocking` workers, threads holding an `enter` guard).
//! The tokio driver checks where its task lands: if that is not the arming
//! thread, the arming thread is marked misrouted and selects the manual
//! driver from then on. Its pending batch stays pending for the host to
//! flush.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;

use crate::error::{report_error, EvalError, ReactiveError};

/// A scheduled callback.
type Task = Box<dyn FnOnce() -> Result<(), EvalError>>;

/// Which kind of driver armed a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Custom,
    TokioCurrentThread,
    LocalSet,
    Manual,
}

/// Strategy for arming the wake-up that runs a batch.
pub trait TickDriver {
    /// Arrange for `flush` to be called once, after the current
    /// synchronous turn, on this thread.
    fn arm(&self, flush: fn());

    fn kind(&self) -> DriverKind {
        DriverKind::Custom
    }
}

/// Spawns the flush on a tokio current-thread runtime.
///
/// The flush only runs if the task lands on the thread that created the
/// driver. Otherwise that thread is marked misrouted and falls back to the
/// manual driver.
pub struct TokioDriver {
    handle: Handle,
    origin: ThreadId,
    misrouted: Arc<AtomicBool>,
}

impl TokioDriver {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            origin: thread::current().id(),
            misrouted: MISROUTED.with(Arc::clone),
        }
    }
}

impl TickDriver for TokioDriver {
    fn arm(&self, flush: fn()) {
        let origin = self.origin;
        let misrouted = self.misrouted.clone();
        self.handle.spawn(async move {
            if thread::current().id() == origin {
                flush();
            } else {
                tracing::warn!(
                    ?origin,
                    "tick landed off the arming thread, falling back to manual flushing"
                );
                misrouted.store(true, Ordering::Release);
            }
        });
    }

    fn kind(&self) -> DriverKind {
        DriverKind::TokioCurrentThread
    }
}

/// Spawns the flush with `tokio::task::spawn_local`.
///
/// Must only be used from inside a `LocalSet`.
#[derive(Debug, Default)]
pub struct LocalSetDriver;

impl TickDriver for LocalSetDriver {
    fn arm(&self, flush: fn()) {
        tokio::task::spawn_local(async move { flush() });
    }

    fn kind(&self) -> DriverKind {
        DriverKind::LocalSet
    }
}

/// Arms nothing; the host pumps [`flush_pending`].
#[derive(Debug, Default)]
pub struct ManualDriver;

impl TickDriver for ManualDriver {
    fn arm(&self, _flush: fn()) {}

    fn kind(&self) -> DriverKind {
        DriverKind::Manual
    }
}

#[derive(Default)]
struct TickState {
    callbacks: Vec<Task>,
    pending: bool,
}

thread_local! {
    static TICK: RefCell<TickState> = RefCell::new(TickState::default());
    static DRIVER: RefCell<Option<Rc<dyn TickDriver>>> = const { RefCell::new(None) };
    static MISROUTED: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
}

/// Install a driver for this thread, replacing automatic selection.
pub fn install_driver(driver: impl TickDriver + 'static) {
    DRIVER.with(|slot| *slot.borrow_mut() = Some(Rc::new(driver)));
}

/// Return to automatic driver selection.
pub fn clear_driver() {
    DRIVER.with(|slot| *slot.borrow_mut() = None);
}

fn select_driver() -> Rc<dyn TickDriver> {
    if let Some(driver) = DRIVER.with(|slot| slot.borrow().clone()) {
        return driver;
    }

    if let Ok(handle) = Handle::try_current() {
        if handle.runtime_flavor() == RuntimeFlavor::CurrentThread && !is_misrouted() {
            return Rc::new(TokioDriver::new(handle));
        }
    }

    Rc::new(ManualDriver)
}

/// Whether a tokio tick armed on this thread landed on another thread.
pub fn is_misrouted() -> bool {
    MISROUTED.with(|flag| flag.load(Ordering::Acquire))
}

/// The driver the next tick would be armed with.
pub fn current_driver() -> DriverKind {
    select_driver().kind()
}

/// Run `callback` after the current synchronous turn.
///
/// Errors returned by the callback are reported through the error hook.
pub fn schedule<F>(callback: F)
where
    F: FnOnce() -> Result<(), EvalError> + 'static,
{
    let arm = TICK.with(|tick| {
        let mut tick = tick.borrow_mut();
        tick.callbacks.push(Box::new(callback));
        if tick.pending {
            false
        } else {
            tick.pending = true;
            true
        }
    });

    if arm {
        let driver = select_driver();
        tracing::debug!(driver = ?driver.kind(), "tick armed");
        driver.arm(run_callbacks);
    }
}

fn run_callbacks() {
    let callbacks = TICK.with(|tick| {
        let mut tick = tick.borrow_mut();
        tick.pending = false;
        std::mem::take(&mut tick.callbacks)
    });

    for callback in callbacks {
        if let Err(err) = callback() {
            report_error(ReactiveError::Tick(err));
        }
    }
}

/// Run the pending batch now. Returns whether there was one.
pub fn flush_pending() -> bool {
    if !is_pending() {
        return false;
    }
    run_callbacks();
    true
}

/// Run batches until none is pending. Returns how many ran.
pub fn drain() -> usize {
    let mut batches = 0;
    while flush_pending() {
        batches += 1;
    }
    batches
}

/// Whether a batch is waiting to run.
pub fn is_pending() -> bool {
    TICK.with(|tick| tick.borrow().pending)
}

/// A future that resolves after the next batch has run.
///
/// With the manual driver it only resolves once the host flushes.
pub fn next_tick() -> NextTick {
    let (tx, rx) = oneshot::channel();
    schedule(move || {
        // The receiver may have been dropped; nothing to resolve then.
        let _ = tx.send(());
        Ok(())
    });
    NextTick { rx }
}

/// Future returned by [`next_tick`].
pub struct NextTick {
    rx: oneshot::Receiver<()>,
}

impl Future for NextTick {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}

impl fmt::Debug for NextTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextTick").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use std::cell::Cell;

    struct CountingDriver(Rc<Cell<u32>>);

    impl TickDriver for CountingDriver {
        fn arm(&self, _flush: fn()) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn one_wake_up_per_batch() {
        let armed = Rc::new(Cell::new(0));
        install_driver(CountingDriver(armed.clone()));

        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            schedule(move || {
                order.borrow_mut().push(i);
                Ok(())
            });
        }
        assert_eq!(armed.get(), 1);

        assert!(flush_pending());
        assert_eq!(order.borrow().as_slice(), &[0, 1, 2]);

        schedule(|| Ok(()));
        assert_eq!(armed.get(), 2);
        clear_driver();
    }

    #[test]
    fn callbacks_scheduled_during_a_batch_run_in_the_next() {
        let ran = Rc::new(Cell::new(0));
        let outer = ran.clone();
        schedule(move || {
            let inner = outer.clone();
            schedule(move || {
                inner.set(inner.get() + 1);
                Ok(())
            });
            Ok(())
        });

        assert!(flush_pending());
        assert_eq!(ran.get(), 0);
        assert!(is_pending());

        assert_eq!(drain(), 1);
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn callback_errors_are_reported() {
        let reported = Rc::new(Cell::new(false));
        let sink = reported.clone();
        config::configure(|c| {
            c.error_handler = Some(Rc::new(move |err: &ReactiveError| {
                sink.set(matches!(err, ReactiveError::Tick(_)));
            }));
        });

        schedule(|| Err(EvalError::msg("late failure")));
        flush_pending();

        assert!(reported.get());
        config::reset();
    }

    #[test]
    fn manual_driver_outside_a_runtime() {
        assert_eq!(current_driver(), DriverKind::Manual);
        assert!(!flush_pending());
    }

    #[test]
    fn blocking_threads_fall_back_to_manual_flushing() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (before, after, first, second) = rt.block_on(async {
            tokio::task::spawn_blocking(|| {
                let before = current_driver();
                let ran = Rc::new(Cell::new(0));

                let flag = ran.clone();
                schedule(move || {
                    flag.set(flag.get() + 1);
                    Ok(())
                });
                for _ in 0..200 {
                    if is_misrouted() {
                        break;
                    }
                    thread::sleep(std::time::Duration::from_millis(5));
                }
                let after = current_driver();

                assert!(is_pending());
                drain();
                let first = ran.get();

                let flag = ran.clone();
                schedule(move || {
                    flag.set(flag.get() + 1);
                    Ok(())
                });
                drain();
                (before, after, first, ran.get())
            })
            .await
            .unwrap()
        });

        assert_eq!(before, DriverKind::TokioCurrentThread);
        assert_eq!(after, DriverKind::Manual);
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn current_thread_runtime_drives_ticks() {
        assert_eq!(current_driver(), DriverKind::TokioCurrentThread);

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        schedule(move || {
            flag.set(true);
            Ok(())
        });

        next_tick().await;
        assert!(ran.get());
    }
}
