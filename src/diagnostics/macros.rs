//! Internal tracing macros.
//!
//! Lifecycle events go to `log` at debug level when the `log` feature is on and
//! compile to nothing otherwise.

/// Trace a pool lifecycle event.
macro_rules! rp_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        {
            log::debug!(target: "respool", $($arg)*);
        }
        #[cfg(not(feature = "log"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

/// Emit a predefined diagnostic, optionally with a formatted context line.
///
/// `rp_emit!(release DIAG, ...)` is for release paths (guard drop, purge,
/// backend free) and never panics under strict mode.
macro_rules! rp_emit {
    (release $diag:expr, $($ctx:tt)+) => {
        $crate::diagnostics::emit::emit_on_release(&$diag, &format!($($ctx)+))
    };
    ($diag:expr) => {
        $crate::diagnostics::emit::emit(&$diag)
    };
    ($diag:expr, $($ctx:tt)+) => {
        $crate::diagnostics::emit::emit_with_context(&$diag, &format!($($ctx)+))
    };
}

pub(crate) use rp_emit;
pub(crate) use rp_trace;
