//! Exit codes and structured error reporting for the binary.

use serde::Serialize;

/// Process exit codes.
///
/// - 0: Success
/// - 1: General error
/// - 2: The item has already been seen (`check`)
/// - 3: Degraded: an image did not reach the uniqueness thresholds and the
///   best effort was kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Completed normally.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// The item is already in the store.
    AlreadySeen = 2,
    /// Completed, but the uniqueness search was exhausted.
    Degraded = 3,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "UP000",
            Self::GeneralError => "UP001",
            Self::AlreadySeen => "UP002",
            Self::Degraded => "UP003",
        }
    }
}

/// Error report printed with `--json-errors`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// Code prefix such as "UP001".
    pub code: String,
    pub exit_code: i32,
    pub message: String,
    /// The full `caused by` chain, outermost first.
    pub causes: Vec<String>,
}

impl StructuredError {
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: err.to_string(),
            causes: err.chain().skip(1).map(ToString::to_string).collect(),
        }
    }
}
