//! Strict mode: which diagnostics abort the operation that raised them.
//!
//! Strict mode only escalates diagnostics raised by a pool call such as an
//! allocation or a budget check. Diagnostics raised while something is being
//! released (a mapping guard dropping, a purge, a backend free) are always
//! reported and never panic, so the release itself always completes.
//!
//! Until [`set_strict_mode`] is called, the mode comes from the
//! `RESPOOL_STRICT` environment variable, read on first use. See
//! [`StrictMode::parse`] for the accepted values.

use std::sync::atomic::{AtomicU8, Ordering};

use super::kind::DiagnosticKind;

/// How diagnostics raised by pool calls are escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrictMode {
    /// Report only.
    #[default]
    Report,
    /// Panic on error diagnostics.
    Errors,
    /// Panic on error and warning diagnostics.
    All,
}

impl StrictMode {
    /// Parse a `RESPOOL_STRICT` value.
    ///
    /// `"0"`, `"off"` and `"report"` give `Report`; `"1"`, `"error"` and
    /// `"errors"` give `Errors`; `"2"`, `"warning"` and `"all"` give `All`.
    /// Case is ignored.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" | "off" | "report" => Some(Self::Report),
            "1" | "error" | "errors" => Some(Self::Errors),
            "2" | "warning" | "all" => Some(Self::All),
            _ => None,
        }
    }

    /// Whether a diagnostic of `kind` panics under this mode.
    pub fn escalates(self, kind: DiagnosticKind) -> bool {
        match (self, kind) {
            (_, DiagnosticKind::Note) | (Self::Report, _) => false,
            (Self::Errors, kind) => kind == DiagnosticKind::Error,
            (Self::All, _) => true,
        }
    }

    const fn to_raw(self) -> u8 {
        match self {
            Self::Report => 0,
            Self::Errors => 1,
            Self::All => 2,
        }
    }

    const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Report),
            1 => Some(Self::Errors),
            2 => Some(Self::All),
            _ => None,
        }
    }
}

/// Where a diagnostic was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Site {
    /// Inside a pool call that can still fail.
    Call,
    /// While releasing: guard drop, purge, backend free.
    Release,
}

const UNSET: u8 = u8::MAX;

static MODE: AtomicU8 = AtomicU8::new(UNSET);

/// Set the strict mode for the whole process.
pub fn set_strict_mode(mode: StrictMode) {
    MODE.store(mode.to_raw(), Ordering::Relaxed);
}

/// The current strict mode.
pub fn strict_mode() -> StrictMode {
    if let Some(mode) = StrictMode::from_raw(MODE.load(Ordering::Relaxed)) {
        return mode;
    }
    let mode = std::env::var("RESPOOL_STRICT")
        .ok()
        .and_then(|value| StrictMode::parse(&value))
        .unwrap_or_default();
    // An explicit set_strict_mode that raced with this read wins.
    match MODE.compare_exchange(UNSET, mode.to_raw(), Ordering::Relaxed, Ordering::Relaxed) {
        Ok(_) => mode,
        Err(raw) => StrictMode::from_raw(raw).unwrap_or_default(),
    }
}

/// Whether a diagnostic of `kind` raised at `site` panics.
pub(crate) fn is_fatal(kind: DiagnosticKind, site: Site) -> bool {
    site == Site::Call && !std::thread::panicking() && strict_mode().escalates(kind)
}

/// Sets a strict mode and restores the previous one on drop.
///
/// The mode is process-global, so tests that install a guard should not run
/// alongside tests that expect a different mode.
#[must_use = "the previous mode is restored when the guard drops"]
pub struct StrictModeGuard {
    previous: StrictMode,
}

impl StrictModeGuard {
    pub fn new(mode: StrictMode) -> Self {
        let previous = strict_mode();
        set_strict_mode(mode);
        Self { previous }
    }
}

impl Drop for StrictModeGuard {
    fn drop(&mut self) {
        set_strict_mode(self.previous);
    }
}
