//! Logging hooks.
//!
//! The engine reports calls and failures to an injected [`Logger`]. The
//! default [`TracingLogger`] forwards to `tracing`, so nothing is printed
//! unless the host installs a subscriber. Logging never affects a call: a
//! panicking logger is caught and ignored.

use chanrpc_common::ServiceError;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LogOptions;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogEvent<'a> {
    /// A local method is about to run for an inbound request.
    BeCalled {
        method: &'a str,
        params: &'a [Value],
        remote_stack: Option<&'a str>,
    },
    /// A local method returned.
    Returned {
        method: &'a str,
        result: &'a Value,
        elapsed: Duration,
    },
    /// A local method failed while serving an inbound request.
    LocalError {
        method: &'a str,
        error: &'a ServiceError,
    },
    /// A call made by this side was answered with an error.
    RemoteError {
        method: &'a str,
        error: &'a ServiceError,
        /// The request as sent, when request replay is enabled
        replay: Option<&'a Value>,
    },
}

pub trait Logger: Send + Sync {
    fn log(&self, event: &LogEvent<'_>);
}

/// Logger forwarding to `tracing` under the `chanrpc` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger {
    pub pretty: bool,
}

impl TracingLogger {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

fn format_args_list(params: &[Value]) -> String {
    params
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Logger for TracingLogger {
    fn log(&self, event: &LogEvent<'_>) {
        match *event {
            LogEvent::BeCalled {
                method,
                params,
                remote_stack,
            } => {
                if self.pretty {
                    tracing::info!(target: "chanrpc", "{}({}) called", method, format_args_list(params));
                } else {
                    tracing::info!(target: "chanrpc", method, params = ?params, remote_stack, "be called");
                }
            }
            LogEvent::Returned {
                method,
                result,
                elapsed,
            } => {
                if self.pretty {
                    tracing::info!(target: "chanrpc", "{}() @ {} ({:?})", method, result, elapsed);
                } else {
                    tracing::info!(target: "chanrpc", method, %result, ?elapsed, "returned");
                }
            }
            LogEvent::LocalError { method, error } => {
                tracing::error!(target: "chanrpc", method, stack = error.stack.as_deref(), "{}", error);
            }
            LogEvent::RemoteError {
                method,
                error,
                replay,
            } => match replay {
                Some(request) => {
                    tracing::error!(target: "chanrpc", method, %request, "remote error: {}", error)
                }
                None => tracing::error!(target: "chanrpc", method, "remote error: {}", error),
            },
        }
    }
}

/// Logger that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _event: &LogEvent<'_>) {}
}

/// A logger plus the switches deciding which events reach it.
#[derive(Clone)]
pub(crate) struct LogHooks {
    logger: Arc<dyn Logger>,
    options: LogOptions,
}

impl LogHooks {
    pub(crate) fn new(logger: Arc<dyn Logger>, options: LogOptions) -> Self {
        Self { logger, options }
    }

    fn enabled(&self, event: &LogEvent<'_>) -> bool {
        match event {
            LogEvent::BeCalled { .. } | LogEvent::Returned { .. } => self.options.be_called,
            LogEvent::LocalError { .. } => self.options.local_error,
            LogEvent::RemoteError { .. } => self.options.remote_error,
        }
    }

    pub(crate) fn emit(&self, event: LogEvent<'_>) {
        if !self.enabled(&event) {
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| self.logger.log(&event))).is_err() {
            tracing::debug!("logger panicked, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl Logger for Recording {
        fn log(&self, event: &LogEvent<'_>) {
            let name = match event {
                LogEvent::BeCalled { method, .. } => format!("called {}", method),
                LogEvent::Returned { method, .. } => format!("returned {}", method),
                LogEvent::LocalError { method, .. } => format!("local {}", method),
                LogEvent::RemoteError { method, .. } => format!("remote {}", method),
            };
            self.events.lock().unwrap().push(name);
        }
    }

    struct Panicking;

    impl Logger for Panicking {
        fn log(&self, _event: &LogEvent<'_>) {
            panic!("logger failure");
        }
    }

    #[test]
    fn test_events_are_gated_by_options() {
        let recording = Arc::new(Recording::default());
        let hooks = LogHooks::new(
            recording.clone(),
            LogOptions {
                be_called: false,
                ..LogOptions::default()
            },
        );
        let error = ServiceError::error("boom");

        hooks.emit(LogEvent::BeCalled {
            method: "add",
            params: &[],
            remote_stack: None,
        });
        hooks.emit(LogEvent::LocalError {
            method: "add",
            error: &error,
        });

        assert_eq!(*recording.events.lock().unwrap(), vec!["local add".to_string()]);
    }

    #[test]
    fn test_panicking_logger_is_swallowed() {
        let hooks = LogHooks::new(Arc::new(Panicking), LogOptions::all());
        hooks.emit(LogEvent::Returned {
            method: "add",
            result: &Value::Null,
            elapsed: Duration::ZERO,
        });
    }

    #[test]
    fn test_tracing_logger_without_subscriber() {
        let error = ServiceError::type_error("bad");
        for pretty in [true, false] {
            TracingLogger::new(pretty).log(&LogEvent::RemoteError {
                method: "m",
                error: &error,
                replay: Some(&Value::Null),
            });
        }
    }
}
