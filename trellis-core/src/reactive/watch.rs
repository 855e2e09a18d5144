//! Watch API
//!
//! Factories for the watchers application code creates directly:
//!
//! - [`watch`] runs a callback whenever the getter's result changes;
//! - [`watch_path`] does the same for a dotted property path;
//! - [`render_watcher`] creates an owner's primary watcher, which re-runs an
//!   update routine and fires the owner's `before_update` hooks first.
//!
//! User watchers never propagate evaluator or callback errors; they are
//! routed to the configured error handler.

use std::fmt;
use std::rc::Rc;

use super::context::untrack;
use super::owner::{HookKind, Owner};
use super::watcher::{Callback, Watcher, WatcherOptions};
use crate::error::{report_error, EvalError, ReactiveError};
use crate::observe::{ReactiveObject, Value};

/// Options for [`watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Invoke the callback once right away with `(value, undefined)`.
    pub immediate: bool,
    /// Also react to writes anywhere inside the result.
    pub deep: bool,
    /// React synchronously instead of through the scheduler.
    pub sync: bool,
}

impl WatchOptions {
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }
}

/// Handle returned by [`watch`].
///
/// An ownerless watcher lives as long as its handle; dropping the handle
/// stops it.
pub struct Unwatch {
    watcher: Rc<Watcher>,
}

impl Unwatch {
    /// Stop watching.
    pub fn unwatch(&self) {
        self.watcher.teardown();
    }

    pub fn watcher(&self) -> &Rc<Watcher> {
        &self.watcher
    }
}

impl fmt::Debug for Unwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Unwatch").field(&self.watcher.id()).finish()
    }
}

/// Watch the result of `getter`, calling `callback(new, old)` on change.
pub fn watch<G, C>(owner: Option<&Owner>, getter: G, callback: C, options: WatchOptions) -> Unwatch
where
    G: Fn() -> Result<Value, EvalError> + 'static,
    C: Fn(&Value, &Value) -> Result<(), EvalError> + 'static,
{
    create_user_watcher(owner, getter, Rc::new(callback), options, None)
}

/// Watch a dotted property path of `target`, such as `"user.address.city"`.
///
/// Unreachable segments read as `undefined`. A path containing anything
/// besides word characters, `$` and `.` is rejected.
pub fn watch_path<C>(
    owner: Option<&Owner>,
    target: &ReactiveObject,
    path: &str,
    callback: C,
    options: WatchOptions,
) -> Result<Unwatch, ReactiveError>
where
    C: Fn(&Value, &Value) -> Result<(), EvalError> + 'static,
{
    let getter = path_getter(target, path).map_err(|source| ReactiveError::Evaluator {
        expression: path.to_string(),
        source,
    })?;

    Ok(create_user_watcher(
        owner,
        getter,
        Rc::new(callback),
        options,
        Some(path.to_string()),
    ))
}

fn create_user_watcher<G>(
    owner: Option<&Owner>,
    getter: G,
    callback: Callback,
    options: WatchOptions,
    expression: Option<String>,
) -> Unwatch
where
    G: Fn() -> Result<Value, EvalError> + 'static,
{
    let mut watcher_options = WatcherOptions::default().user();
    watcher_options.deep = options.deep;
    watcher_options.sync = options.sync;
    watcher_options.expression = expression;

    let watcher = Watcher::build(owner, getter, Some(callback.clone()), watcher_options);
    if let Err(err) = watcher.init() {
        report_error(err);
    }

    if options.immediate {
        let value = watcher.value();
        if let Err(source) = untrack(|| callback(&value, &Value::Undefined)) {
            report_error(ReactiveError::Callback {
                expression: watcher.expression().to_string(),
                source,
            });
        }
    }

    Unwatch { watcher }
}

/// Split a dotted path into segments.
pub fn parse_path(path: &str) -> Result<Vec<String>, EvalError> {
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.');
    if !valid {
        return Err(EvalError::InvalidPath(path.to_string()));
    }
    Ok(path.split('.').map(str::to_string).collect())
}

/// Build a getter that reads `path` starting at `target`.
pub fn path_getter(
    target: &ReactiveObject,
    path: &str,
) -> Result<impl Fn() -> Result<Value, EvalError> + 'static, EvalError> {
    let segments = parse_path(path)?;
    let root = target.clone();

    Ok(move || {
        let mut current = Value::Object(root.clone());
        for segment in &segments {
            current = match &current {
                Value::Object(obj) => obj.get(segment),
                Value::Array(arr) => match segment.parse::<usize>() {
                    Ok(index) => arr.get(index),
                    Err(_) => Value::Undefined,
                },
                _ => return Ok(Value::Undefined),
            };
        }
        Ok(current)
    })
}

/// Create the primary watcher of `owner`.
///
/// `update` re-renders from reactive state; it is run once right away and
/// again, through the scheduler, whenever anything it read changes. Before
/// each scheduled run the owner's `before_update` hooks fire, if the owner
/// is mounted and not destroyed.
pub fn render_watcher<F>(owner: &Owner, update: F) -> Result<Rc<Watcher>, ReactiveError>
where
    F: Fn() -> Result<(), EvalError> + 'static,
{
    let weak = owner.downgrade();
    let options = WatcherOptions::default()
        .expression(format!("render {}", owner.name()))
        .before(move || {
            if let Some(owner) = weak.upgrade() {
                if owner.is_mounted() && !owner.is_destroyed() {
                    owner.call_hook(HookKind::BeforeUpdate);
                }
            }
        });

    let watcher = Watcher::build(
        Some(owner),
        move || {
            update()?;
            Ok(Value::Undefined)
        },
        None,
        options,
    );
    owner.set_primary(&watcher);
    watcher.init()?;
    Ok(watcher)
}
