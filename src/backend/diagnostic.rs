use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A value was read or written at an index where it has no location.
    MissingLocation,
    /// Every scratch register was locked when another one was needed.
    ScratchExhausted,
    /// An instruction kind the code generator cannot translate.
    UnsupportedOpcode,
    /// A branch names a block that does not exist in the function.
    UnknownLabel,
}

impl DiagnosticKind {
    pub fn severity(&self) -> Severity {
        match self {
            DiagnosticKind::MissingLocation | DiagnosticKind::ScratchExhausted => Severity::Error,
            DiagnosticKind::UnsupportedOpcode | DiagnosticKind::UnknownLabel => Severity::Warning,
        }
    }
}

/// A best-effort recovery made by the code generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub function: String,
    /// Instruction index within `function`; 0 for the prologue.
    pub inst: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, function: &str, inst: usize, message: String) -> Self {
        Diagnostic {
            severity: kind.severity(),
            kind,
            function: function.to_string(),
            inst,
            message,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}#{}: {}", self.severity, self.function, self.inst, self.message)
    }
}
