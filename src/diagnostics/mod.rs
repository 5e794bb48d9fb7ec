//! Diagnostics: traceback formatting and the shadow-stack trace hook
//!
//! - `trace.rs` - `TraceBuffer`, `TraceHook`, `ShadowStack`, hook installation
//! - `traceback.rs` - formatting the pending exception for the report sink
//! - `report.rs` - the `Reporter` sink and its default implementations

mod report;
mod trace;
mod traceback;

pub use report::{BufferedReporter, LogReporter, Reporter};
pub use trace::{install, uninstall, FrameInfo, ShadowStack, TraceBuffer, TraceHook, TRACE_CAPACITY};
pub use traceback::{error_message, report_traceback, summarize, NO_PENDING_ERROR};
