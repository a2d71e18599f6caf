//! Engine configuration.
//!
//! Everything here is plain data with sensible defaults; the
//! [`EngineBuilder`](crate::EngineBuilder) is the usual way to set it.

use chanrpc_common::ParameterStructure;
use std::time::Duration;

/// Strict-mode policy.
///
/// # Fields
///
/// - `method_not_found` - answer calls to missing or non-callable methods with
///   a `-32601` error instead of staying silent (default: true)
/// - `unknown_message` - answer payloads that are not valid envelopes with a
///   parse/invalid-request error instead of dropping them (default: true)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strictness {
    pub method_not_found: bool,
    pub unknown_message: bool,
}

impl Default for Strictness {
    fn default() -> Self {
        Self {
            method_not_found: true,
            unknown_message: true,
        }
    }
}

impl Strictness {
    pub fn lenient() -> Self {
        Self {
            method_not_found: false,
            unknown_message: false,
        }
    }
}

impl From<bool> for Strictness {
    fn from(strict: bool) -> Self {
        Self {
            method_not_found: strict,
            unknown_message: strict,
        }
    }
}

/// The six independent logging switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    /// Log local methods being called and what they returned
    pub be_called: bool,
    /// Log local methods failing
    pub local_error: bool,
    /// Log remote failures observed by callers
    pub remote_error: bool,
    /// Human-oriented formatting instead of structured fields
    pub pretty: bool,
    /// Attach the serialized request to remote-error events
    pub request_replay: bool,
    /// Send stacks across the channel (caller stack on requests, error stack on replies)
    pub send_local_stack: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            be_called: true,
            local_error: true,
            remote_error: true,
            pretty: true,
            request_replay: false,
            send_local_stack: false,
        }
    }
}

impl LogOptions {
    pub fn off() -> Self {
        Self {
            be_called: false,
            local_error: false,
            remote_error: false,
            pretty: false,
            request_replay: false,
            send_local_stack: false,
        }
    }

    pub fn all() -> Self {
        Self {
            be_called: true,
            local_error: true,
            remote_error: true,
            pretty: true,
            request_replay: true,
            send_local_stack: true,
        }
    }
}

/// Logging preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Off,
    #[default]
    Default,
    All,
    Custom(LogOptions),
}

impl LogLevel {
    pub fn options(self) -> LogOptions {
        match self {
            LogLevel::Off => LogOptions::off(),
            LogLevel::Default => LogOptions::default(),
            LogLevel::All => LogOptions::all(),
            LogLevel::Custom(options) => options,
        }
    }
}

impl From<bool> for LogLevel {
    fn from(enabled: bool) -> Self {
        if enabled {
            LogLevel::Default
        } else {
            LogLevel::Off
        }
    }
}

impl From<LogOptions> for LogLevel {
    fn from(options: LogOptions) -> Self {
        LogLevel::Custom(options)
    }
}

/// Resolved engine settings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineConfig {
    pub strict: Strictness,
    pub log: LogOptions,
    pub parameter_structure: ParameterStructure,
    /// Call a same-named local method directly instead of going through the channel
    pub prefer_local_implementation: bool,
    /// Drop remote iterators idle for longer than this (default: never)
    pub iterator_idle_timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictness_from_bool() {
        assert_eq!(Strictness::from(true), Strictness::default());
        assert_eq!(Strictness::from(false), Strictness::lenient());
    }

    #[test]
    fn test_log_presets() {
        assert_eq!(LogLevel::from(false).options(), LogOptions::off());
        let defaults = LogLevel::from(true).options();
        assert!(defaults.be_called && defaults.remote_error);
        assert!(!defaults.send_local_stack && !defaults.request_replay);
        assert!(LogLevel::All.options().request_replay);
    }

    #[test]
    fn test_custom_log_options() {
        let options = LogOptions {
            be_called: false,
            ..LogOptions::default()
        };
        assert_eq!(LogLevel::from(options).options(), options);
    }
}
