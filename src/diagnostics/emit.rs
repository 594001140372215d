//! Diagnostic emission backend.
//!
//! Handles outputting diagnostics to stderr and, with the `log` feature, to the
//! `log` facade.

#[cfg(any(debug_assertions, feature = "diagnostics"))]
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use super::kind::Diagnostic;
#[cfg(feature = "log")]
use super::kind::DiagnosticKind;
use super::strict::{is_fatal, Site};

/// Global flag to suppress diagnostic output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Suppress all diagnostic output.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Emit a diagnostic.
///
/// Writes to stderr in debug builds or with the `diagnostics` feature, and to
/// `log` when the `log` feature is enabled.
pub fn emit(diag: &Diagnostic) {
    emit_inner(diag, None, Site::Call);
}

/// Emit a diagnostic with additional runtime context.
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    emit_inner(diag, Some(context), Site::Call);
}

/// Emit a diagnostic raised while releasing. Never panics, whatever the
/// strict mode.
pub(crate) fn emit_on_release(diag: &Diagnostic, context: &str) {
    emit_inner(diag, Some(context), Site::Release);
}

fn emit_inner(diag: &Diagnostic, context: Option<&str>, site: Site) {
    if is_suppressed() {
        return;
    }

    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    emit_to_stderr(diag, context);

    #[cfg(feature = "log")]
    emit_to_log(diag, context);

    if is_fatal(diag.kind, site) {
        panic!(
            "[respool][{}] {}\nContext: {}\nStrict mode enabled - diagnostics are fatal.",
            diag.code,
            diag.message,
            context.unwrap_or("-")
        );
    }
}

#[cfg(any(debug_assertions, feature = "diagnostics"))]
fn emit_to_stderr(diag: &Diagnostic, context: Option<&str>) {
    let mut stderr = std::io::stderr().lock();

    let _ = writeln!(
        stderr,
        "[respool][{}] {}: {}",
        diag.code,
        diag.kind.prefix(),
        diag.message
    );
    if let Some(context) = context {
        let _ = writeln!(stderr, "  context: {}", context);
    }
    if let Some(note) = diag.note {
        let _ = writeln!(stderr, "  note: {}", note);
    }
    if let Some(help) = diag.help {
        let _ = writeln!(stderr, "  help: {}", help);
    }
}

/// Emit a diagnostic using the log crate.
#[cfg(feature = "log")]
fn emit_to_log(diag: &Diagnostic, context: Option<&str>) {
    let context = context.unwrap_or("");
    match diag.kind {
        DiagnosticKind::Error => log::error!("[{}] {} {}", diag.code, diag.message, context),
        DiagnosticKind::Warning => log::warn!("[{}] {} {}", diag.code, diag.message, context),
        DiagnosticKind::Note => log::info!("[{}] {} {}", diag.code, diag.message, context),
    }

    if let Some(note) = diag.note {
        log::info!("  note: {}", note);
    }
    if let Some(help) = diag.help {
        log::info!("  help: {}", help);
    }
}
