//! Reactive Context
//!
//! The reactive context tracks which watcher is currently evaluating.
//! This enables automatic dependency tracking: when a cell is read, the cell
//! asks the context for the current watcher and registers the edge.
//!
//! # Implementation
//!
//! We use a thread-local stack. Entering an evaluation pushes the watcher;
//! the returned guard pops it when dropped, so the stack stays balanced even
//! if the evaluator fails or unwinds.
//!
//! The stack supports nested evaluation (a computed value read from inside
//! another watcher). It also supports untracked frames, pushed by
//! [`untrack`], which hide the outer watcher from reads performed inside.

use std::cell::RefCell;
use std::rc::Rc;

use super::watcher::Watcher;
use super::WatcherId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Option<Rc<Watcher>>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    expected: Option<WatcherId>,
}

impl ReactiveContext {
    /// Enter an evaluation of `watcher`.
    ///
    /// While the guard lives, reads register `watcher` as a subscriber.
    pub fn enter(watcher: Rc<Watcher>) -> Self {
        let expected = Some(watcher.id());
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Some(watcher)));
        Self { expected }
    }

    /// Enter an untracked frame: reads inside record nothing.
    pub fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(None));
        Self { expected: None }
    }

    /// Whether a watcher is collecting dependencies right now.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// The watcher currently collecting dependencies, if any.
    pub fn current() -> Option<Rc<Watcher>> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    /// Number of frames on the stack, tracked or not.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        // Verify we're popping the frame we pushed.
        if let Some(frame) = popped {
            debug_assert_eq!(
                frame.as_ref().map(|w| w.id()),
                self.expected,
                "ReactiveContext mismatch"
            );
        }
    }
}

/// Run `f` without recording dependencies.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let _frame = ReactiveContext::untracked();
    f()
}
