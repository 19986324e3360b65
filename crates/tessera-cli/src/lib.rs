//! Tessera CLI -- command-line interface for policy checks and evidence chains.
//!
//! Subcommands live in [`commands`]; [`context`] works out which repository
//! and CI run an attestation belongs to.

use std::fmt;

use tessera_core::CheckStatus;

pub mod commands;
pub mod context;

// ---------------------------------------------------------------------------
// Exit Codes
// ---------------------------------------------------------------------------

/// How a `tessera` invocation ended.
///
/// `check` and `attest` exit 1 when a rule fails. `verify` exits 1 when the
/// chain linkage or a signature does not hold. A warning never fails a run.
/// Code 3 is unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitCode {
    Pass = 0,
    CheckFailed = 1,
    /// The store, a signing key or the scanner could not be used.
    EngineError = 2,
    /// `.tessera.yaml` is invalid, or no signing/trusted key is available.
    ConfigError = 4,
}

impl ExitCode {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Exit code for a run whose overall policy status is `status`.
    #[must_use]
    pub const fn for_status(status: CheckStatus) -> Self {
        if status.is_fail() {
            Self::CheckFailed
        } else {
            Self::Pass
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Pass => "checks passed, evidence chain intact",
            Self::CheckFailed => "policy violation or evidence chain did not verify",
            Self::EngineError => "evidence store, key or scanner failure",
            Self::ConfigError => "invalid configuration or no usable key",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u8(), self.description())
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_u8())
    }
}

/// Logs how the run ended and converts `code` for `main`.
pub fn terminate(code: ExitCode) -> std::process::ExitCode {
    if code == ExitCode::Pass {
        tracing::info!(%code, "tessera exiting");
    } else {
        tracing::error!(%code, "tessera exiting with error");
    }
    code.into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
