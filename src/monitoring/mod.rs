/*!
 * Monitoring
 * Logging sink boundary and tracing setup
 */

mod sink;
mod tracer;

pub use sink::{LogFacade, Logger, Severity, TracingFacade};
pub use tracer::{init_tracing, TRACE_JSON_ENV};

pub(crate) use sink::emit;
