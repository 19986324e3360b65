//! Human-readable and JSON rendering of check outcomes.

use std::fmt::Write as _;

use serde::Serialize;

use tessera_core::{CheckOutcome, CheckStatus};

use crate::PolicyError;

/// Per-status counts over a set of outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub warnings: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    #[must_use]
    pub fn tally(outcomes: &[CheckOutcome]) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            match outcome.status {
                CheckStatus::Pass => counts.passed += 1,
                CheckStatus::Warn => counts.warnings += 1,
                CheckStatus::Fail => counts.failed += 1,
            }
        }
        counts
    }
}

/// Renders outcomes as a terminal report followed by a summary line.
#[must_use]
pub fn format_results(outcomes: &[CheckOutcome]) -> String {
    let mut out = String::new();

    for outcome in outcomes {
        let _ = writeln!(
            out,
            "[{}] {}: {}",
            outcome.status.marker(),
            outcome.rule_name,
            outcome.message
        );
        if outcome.status.is_fail() {
            if let Some(file) = &outcome.file {
                let _ = writeln!(out, "       at {file}:{}", outcome.line.unwrap_or(0));
            }
            if let Some(remediation) = &outcome.remediation {
                let _ = writeln!(out, "       fix: {remediation}");
            }
        }
    }

    let counts = OutcomeCounts::tally(outcomes);
    let _ = writeln!(
        out,
        "\nSummary: {} passed, {} failed, {} warnings",
        counts.passed, counts.failed, counts.warnings
    );

    if counts.failed > 0 {
        let _ = writeln!(out, "Policy check failed: {} violations found", counts.failed);
    } else {
        let _ = writeln!(out, "All policy checks passed");
    }

    out
}

/// Pretty-printed JSON array of outcomes.
///
/// # Errors
///
/// Returns [`PolicyError::Serialization`] if encoding fails.
pub fn to_json(outcomes: &[CheckOutcome]) -> Result<String, PolicyError> {
    Ok(serde_json::to_string_pretty(outcomes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<CheckOutcome> {
        vec![
            CheckOutcome::new("s3-no-public-buckets", CheckStatus::Pass, "No public S3 buckets detected"),
            CheckOutcome::new("sg-no-open-ingress", CheckStatus::Fail, "open ingress")
                .at("sg.tf", 4)
                .remediation("restrict it"),
            CheckOutcome::new("deploy-require-oidc", CheckStatus::Warn, "No deployment workflows detected"),
        ]
    }

    #[test]
    fn tally_counts_each_status() {
        let counts = OutcomeCounts::tally(&sample());
        assert_eq!(
            counts,
            OutcomeCounts {
                passed: 1,
                warnings: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn format_includes_location_and_summary() {
        let report = format_results(&sample());
        assert!(report.contains("[FAIL] sg-no-open-ingress: open ingress"));
        assert!(report.contains("at sg.tf:4"));
        assert!(report.contains("fix: restrict it"));
        assert!(report.contains("Summary: 1 passed, 1 failed, 1 warnings"));
        assert!(report.contains("1 violations found"));
    }

    #[test]
    fn format_all_passed() {
        let outcomes = vec![CheckOutcome::new("r", CheckStatus::Pass, "ok")];
        assert!(format_results(&outcomes).contains("All policy checks passed"));
    }

    #[test]
    fn json_uses_camel_case_fields() {
        let json = to_json(&sample()).unwrap();
        assert!(json.contains("\"ruleName\""));
        assert!(json.contains("\"remediation\": \"restrict it\""));
    }
}
