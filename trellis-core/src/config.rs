//! Engine Configuration
//!
//! Configuration lives in a thread-local [`Config`], matching the
//! single-threaded model of the rest of the engine. The plain [`Settings`]
//! part is serde-serializable so hosts can load it from JSON; the error and
//! warning hooks are closures and are installed in code.
//!
//! ```rust,ignore
//! use trellis_core::config;
//!
//! config::configure(|c| {
//!     c.settings.max_update_count = 50;
//!     c.error_handler = Some(Rc::new(|err| eprintln!("{err}")));
//! });
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;

/// Default bound for the circular-update guard.
///
/// An engineering constant: a watcher re-queued more than this many times in
/// one flushing period is assumed to be part of an update loop.
pub const DEFAULT_MAX_UPDATE_COUNT: u32 = 100;

/// Plain, serializable engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How many times one watcher may be re-queued during a single flushing
    /// period before the circular-update guard excludes it.
    pub max_update_count: u32,

    /// When `false`, queued watchers flush synchronously inside
    /// `queue_watcher` and dependencies notify subscribers sorted by ID.
    /// Meant for tests and debugging.
    pub async_mode: bool,

    /// Suppress the default `tracing` output of the error and warn hooks.
    pub silent: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_update_count: DEFAULT_MAX_UPDATE_COUNT,
            async_mode: true,
            silent: false,
        }
    }
}

impl Settings {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ReactiveError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Handler invoked for every reported error.
pub type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

/// Handler invoked for every warning.
pub type WarnHandler = Rc<dyn Fn(&str)>;

/// The full engine configuration.
#[derive(Clone, Default)]
pub struct Config {
    /// Plain settings.
    pub settings: Settings,

    /// Replaces the default `tracing::error!` reporting.
    pub error_handler: Option<ErrorHandler>,

    /// Replaces the default `tracing::warn!` reporting.
    pub warn_handler: Option<WarnHandler>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("settings", &self.settings)
            .field("error_handler", &self.error_handler.is_some())
            .field("warn_handler", &self.warn_handler.is_some())
            .finish()
    }
}

thread_local! {
    static CONFIG: RefCell<Config> = RefCell::new(Config::default());
}

/// Modify the configuration of the current thread.
pub fn configure<F>(f: F)
where
    F: FnOnce(&mut Config),
{
    CONFIG.with(|config| f(&mut config.borrow_mut()));
}

/// Replace the settings wholesale, keeping the installed handlers.
pub fn apply(settings: Settings) {
    configure(|c| c.settings = settings);
}

/// Restore the default configuration.
pub fn reset() {
    CONFIG.with(|config| *config.borrow_mut() = Config::default());
}

/// Get a copy of the current settings.
pub fn settings() -> Settings {
    CONFIG.with(|config| config.borrow().settings)
}

pub(crate) fn error_handler() -> Option<ErrorHandler> {
    CONFIG.with(|config| config.borrow().error_handler.clone())
}

pub(crate) fn warn_handler() -> Option<WarnHandler> {
    CONFIG.with(|config| config.borrow().warn_handler.clone())
}
