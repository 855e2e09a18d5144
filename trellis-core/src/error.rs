//! Error types and the central error-reporting hook.
//!
//! Evaluators and reaction callbacks return [`EvalError`]. The engine wraps
//! those into [`ReactiveError`] with the watcher's expression attached, then
//! either hands them back to the caller (internal watchers) or routes them
//! through [`report_error`] (user watchers, tick callbacks, flush failures).

use thiserror::Error;

use crate::config;

/// An error raised by user code running inside the engine: an evaluator, a
/// reaction callback, or a path lookup.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A free-form failure message.
    #[error("{0}")]
    Message(String),

    /// A watch path could not be parsed.
    #[error("invalid watch path `{0}`")]
    InvalidPath(String),

    /// A nested reactive computation failed (e.g. a computed read with `?`).
    #[error(transparent)]
    Nested(Box<ReactiveError>),
}

impl EvalError {
    /// Build a message error.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<ReactiveError> for EvalError {
    fn from(err: ReactiveError) -> Self {
        Self::Nested(Box::new(err))
    }
}

impl From<String> for EvalError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for EvalError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

/// Errors produced by the reactive engine.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A watcher's evaluator failed.
    #[error("error in getter for watcher \"{expression}\": {source}")]
    Evaluator {
        /// Label of the failing watcher.
        expression: String,
        source: EvalError,
    },

    /// A watcher's reaction callback failed.
    #[error("error in callback for watcher \"{expression}\": {source}")]
    Callback {
        /// Label of the failing watcher.
        expression: String,
        source: EvalError,
    },

    /// The circular-update guard tripped during a flush.
    #[error("you may have an infinite update loop in watcher \"{expression}\" (more than {limit} updates in one flush)")]
    CircularUpdate {
        /// Label of the runaway watcher.
        expression: String,
        /// The configured bound that was exceeded.
        limit: u32,
    },

    /// A next-tick callback failed.
    #[error("error in next-tick callback: {0}")]
    Tick(#[source] EvalError),

    /// Settings could not be parsed.
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] serde_json::Error),
}

/// Route an error to the configured error handler.
///
/// Without a handler the error is logged at `error` level, unless the
/// `silent` setting is on.
pub fn report_error(err: ReactiveError) {
    if let Some(handler) = config::error_handler() {
        handler(&err);
        return;
    }

    if !config::settings().silent {
        tracing::error!(error = %err, "unhandled reactive error");
    }
}

/// Route a warning to the configured warn handler, falling back to
/// `tracing::warn!`.
pub fn warn(message: &str) {
    if let Some(handler) = config::warn_handler() {
        handler(message);
        return;
    }

    if !config::settings().silent {
        tracing::warn!("{}", message);
    }
}
