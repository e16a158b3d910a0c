/*!
 * Logging Sink
 * Leveled text boundary between the arenas and whatever records their events
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Event severity for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Trace => write!(f, "TRACE"),
            Severity::Debug => write!(f, "DEBUG"),
            Severity::Info => write!(f, "INFO"),
            Severity::Warn => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Sink accepting leveled text messages
///
/// Implementations must not fail and must not call back into the arena that
/// is logging: arenas emit while holding their lock.
pub trait Logger: Send + Sync {
    fn log(&self, severity: Severity, message: &str);
}

/// Forwards to the `log` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacade;

impl Logger for LogFacade {
    fn log(&self, severity: Severity, message: &str) {
        let level = match severity {
            Severity::Trace => log::Level::Trace,
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warn => log::Level::Warn,
            Severity::Error | Severity::Critical => log::Level::Error,
        };
        log::log!(target: "arena", level, "{}", message);
    }
}

/// Forwards to `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFacade;

impl Logger for TracingFacade {
    fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Trace => tracing::trace!(target: "arena", "{}", message),
            Severity::Debug => tracing::debug!(target: "arena", "{}", message),
            Severity::Info => tracing::info!(target: "arena", "{}", message),
            Severity::Warn => tracing::warn!(target: "arena", "{}", message),
            Severity::Error => tracing::error!(target: "arena", "{}", message),
            Severity::Critical => tracing::error!(target: "arena", critical = true, "{}", message),
        }
    }
}

/// Emit through an optional sink, formatting only when one is installed
#[inline]
pub(crate) fn emit<F>(logger: Option<&Arc<dyn Logger>>, severity: Severity, message: F)
where
    F: FnOnce() -> String,
{
    if let Some(logger) = logger {
        logger.log(severity, &message());
    }
}
