//! Tessera Core -- shared types, configuration, and tracing setup.
//!
//! This crate defines the vocabulary shared by the policy engine, the evidence
//! chain, and the CLI: the closed [`CheckStatus`] enumeration, the
//! [`CheckOutcome`] record emitted by rules, and the layered configuration in
//! [`config`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod config;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Top-level error type for the tessera-core crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Tracing/logging initialization failed.
    #[error("tracing initialization error: {0}")]
    TracingInit(String),
}

// ---------------------------------------------------------------------------
// Tracing / Logging
// ---------------------------------------------------------------------------

/// Initialize structured tracing with the given verbosity level.
///
/// # Behaviour
///
/// | `verbose` | `quiet` | `json_output` | Effect                                  |
/// |-----------|---------|---------------|-----------------------------------------|
/// | `true`    | _       | _             | DEBUG level                             |
/// | _         | `true`  | _             | ERROR level only                        |
/// | `false`   | `false` | _             | WARN level (default)                    |
/// | _         | _       | `true`        | JSON-formatted log lines (CI/CD)        |
/// | _         | _       | `false`       | Human-readable, compact log lines       |
///
/// The `RUST_LOG` environment variable, when set, takes precedence over the
/// programmatic level selection. Logs go to stderr so that command output on
/// stdout stays machine-readable.
///
/// # Errors
///
/// Returns [`CoreError::TracingInit`] if the global subscriber has already been
/// set (i.e. this function was called more than once in the same process).
pub fn init_tracing(verbose: bool, quiet: bool, json_output: bool) -> Result<(), CoreError> {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    if json_output {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
            .map_err(|e| CoreError::TracingInit(e.to_string()))
    } else {
        fmt()
            .compact()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
            .map_err(|e| CoreError::TracingInit(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// CheckStatus
// ---------------------------------------------------------------------------

/// Outcome of a single policy check.
///
/// The variant order is the precedence order used when deriving an overall
/// status: any `Fail` dominates, then any `Warn`, otherwise `Pass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// The check found no violation.
    Pass,
    /// The check found something worth a look but not blocking.
    Warn,
    /// The check found a violation.
    Fail,
}

impl CheckStatus {
    /// Returns `true` for [`CheckStatus::Fail`].
    #[must_use]
    pub const fn is_fail(self) -> bool {
        matches!(self, Self::Fail)
    }

    /// Short terminal marker used by human-readable reports.
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Warn => "WARN",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// CheckOutcome
// ---------------------------------------------------------------------------

/// The result of evaluating one rule against the scanned files.
///
/// Emitted by the rule engine and carried verbatim inside attestations; the
/// evidence chain treats it as opaque data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    /// Name of the rule that produced this outcome.
    pub rule_name: String,

    pub status: CheckStatus,

    /// Human-readable explanation.
    pub message: String,

    /// File the outcome refers to, relative to the scan root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// 1-based line number within `file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// Suggested fix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,

    /// Free-form rule-specific details. A `BTreeMap` so serialization order
    /// is stable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl CheckOutcome {
    /// Creates an outcome with only the required fields set.
    pub fn new(rule_name: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            status,
            message: message.into(),
            file: None,
            line: None,
            remediation: None,
            metadata: None,
        }
    }

    /// Sets the file and line location.
    #[must_use]
    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Sets the remediation hint.
    #[must_use]
    pub fn remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_status_display() {
        assert_eq!(CheckStatus::Pass.to_string(), "pass");
        assert_eq!(CheckStatus::Warn.to_string(), "warn");
        assert_eq!(CheckStatus::Fail.to_string(), "fail");
    }

    #[test]
    fn check_status_serde_lowercase() {
        let json = serde_json::to_string(&CheckStatus::Fail).unwrap();
        assert_eq!(json, "\"fail\"");
        let back: CheckStatus = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(back, CheckStatus::Warn);
    }

    #[test]
    fn check_status_rejects_unknown_value() {
        let result: Result<CheckStatus, _> = serde_json::from_str("\"error\"");
        assert!(result.is_err());
    }

    #[test]
    fn check_status_precedence_ordering() {
        assert!(CheckStatus::Fail > CheckStatus::Warn);
        assert!(CheckStatus::Warn > CheckStatus::Pass);
        let statuses = [CheckStatus::Warn, CheckStatus::Fail, CheckStatus::Pass];
        assert_eq!(statuses.iter().max(), Some(&CheckStatus::Fail));
    }

    #[test]
    fn check_outcome_optional_fields_omitted() {
        let outcome = CheckOutcome::new("s3-no-public-buckets", CheckStatus::Pass, "ok");
        let json = serde_json::to_value(&outcome).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["ruleName"], "s3-no-public-buckets");
        assert_eq!(obj["status"], "pass");
    }

    #[test]
    fn check_outcome_builder_sets_location_and_metadata() {
        let outcome = CheckOutcome::new("sg-no-open-ingress", CheckStatus::Fail, "open")
            .at("main.tf", 12)
            .remediation("restrict CIDR")
            .with_metadata("line_content", serde_json::json!("cidr_blocks = [\"0.0.0.0/0\"]"));

        assert_eq!(outcome.file.as_deref(), Some("main.tf"));
        assert_eq!(outcome.line, Some(12));
        assert_eq!(outcome.remediation.as_deref(), Some("restrict CIDR"));
        assert!(outcome.metadata.unwrap().contains_key("line_content"));
    }

    #[test]
    fn tracing_init_error_display() {
        let err = CoreError::TracingInit("already initialized".to_string());
        assert!(err.to_string().contains("tracing initialization error"));
        assert!(err.to_string().contains("already initialized"));
    }

    // `init_tracing` sets a global subscriber, so only the second call in a
    // process is guaranteed to fail.
    #[test]
    fn init_tracing_returns_error_on_double_init() {
        let _ = init_tracing(false, false, false);

        let result = init_tracing(false, false, false);
        assert!(result.is_err());
        if let Err(CoreError::TracingInit(msg)) = result {
            assert!(!msg.is_empty());
        } else {
            panic!("expected CoreError::TracingInit");
        }
    }
}
