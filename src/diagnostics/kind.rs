//! Diagnostic kinds and core types.
//!
//! Mirrors rustc's diagnostic levels for familiar UX.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A hard error - something is definitely wrong.
    Error,
    /// A warning - something is probably wrong or suboptimal.
    Warning,
    /// Additional context about another diagnostic.
    Note,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Note => "note",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `RP0xx` - Host mapping issues
/// - `RP1xx` - Pool lifecycle issues
/// - `RP3xx` - Budget/limit issues
/// - `RP9xx` - Backend errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "RP001").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// Predefined diagnostics (RP0xx - Host mapping)
// =============================================================================

/// RP001: Flush failed while releasing a write mapping.
pub const RP001: Diagnostic = Diagnostic::error(
    "RP001",
    "flush failed while releasing a write mapping"
).with_note("host writes made through the mapping may not be visible to the device")
 .with_help("check the backend error in the context line; the memory was still unmapped");

/// RP002: A purge found a resource whose memory was still mapped.
pub const RP002: Diagnostic = Diagnostic::warning(
    "RP002",
    "purge released a resource that is still mapped"
).with_note("the resource is destroyed when its mapping guard is dropped")
 .with_help("drop mapping guards before calling purge() or dropping the pool");

// =============================================================================
// Predefined diagnostics (RP1xx - Pool lifecycle)
// =============================================================================

/// RP101: Image view creation failed after the image was created.
pub const RP101: Diagnostic = Diagnostic::warning(
    "RP101",
    "image view creation failed; image released"
).with_note("the image and its memory were returned to the allocator before the error propagated")
 .with_help("check that the view format and type are compatible with the image descriptor");

// =============================================================================
// Predefined diagnostics (RP3xx - Budgets)
// =============================================================================

/// RP301: Allocation exceeds the pool memory budget.
pub const RP301: Diagnostic = Diagnostic::warning(
    "RP301",
    "allocation exceeds pool memory budget"
).with_note("the request would push the pool over PoolConfig::memory_limit")
 .with_help("purge the pool, raise memory_limit, or allocate less");

// =============================================================================
// Predefined diagnostics (RP9xx - Backend)
// =============================================================================

/// RP901: Backend failed to release a resource.
pub const RP901: Diagnostic = Diagnostic::error(
    "RP901",
    "backend failed to release a resource"
).with_note("the allocation may have leaked inside the allocator")
 .with_help("this usually indicates a double free or a destroyed device");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_codes() {
        assert_eq!(RP001.code, "RP001");
        assert_eq!(RP001.kind, DiagnosticKind::Error);
        assert_eq!(RP301.kind, DiagnosticKind::Warning);
        assert!(RP101.note.is_some());
        assert!(RP002.help.is_some());
    }

    #[test]
    fn test_prefix() {
        assert_eq!(DiagnosticKind::Error.prefix(), "error");
        assert_eq!(DiagnosticKind::Note.prefix(), "note");
    }
}
