//! Diagnostics.
//!
//! This module provides:
//! - **Runtime diagnostics**: pool-aware error messages with codes
//! - **Strict mode**: optional panics for diagnostics raised by pool calls,
//!   set in code or through `RESPOOL_STRICT`
//! - **Tracing**: lifecycle events through the `log` facade (`log` feature)
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                        |
//! |-------|--------------------------------|
//! | RP0xx | Host mapping issues            |
//! | RP1xx | Pool lifecycle issues          |
//! | RP3xx | Budget/limit issues            |
//! | RP9xx | Backend errors                 |

pub mod emit;
pub mod kind;
pub(crate) mod macros;
pub mod strict;

pub use emit::{emit, emit_with_context, is_suppressed, suppress_diagnostics};
pub use kind::{Diagnostic, DiagnosticKind};
pub use kind::{RP001, RP002, RP101, RP301, RP901};
pub use strict::{set_strict_mode, strict_mode, StrictMode, StrictModeGuard};
