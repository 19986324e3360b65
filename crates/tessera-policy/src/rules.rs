//! Built-in configuration policy rules and the engine that runs them.
//!
//! Rules inspect the files returned by [`crate::scanner::discover_files`] line
//! by line. Matching is plain substring search; a pattern made of several
//! fragments matches when the fragments occur in order on the same line.

use serde_json::json;
use tracing::debug;

use tessera_core::{CheckOutcome, CheckStatus};

use crate::scanner::DiscoveredFile;

// ---------------------------------------------------------------------------
// PolicyRule
// ---------------------------------------------------------------------------

/// A single configuration check.
///
/// Every rule returns at least one outcome: either one per violation, or a
/// single `pass`/`warn` outcome summarising a clean run.
pub trait PolicyRule: Send + Sync {
    /// Stable rule identifier, e.g. `s3-no-public-buckets`.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Evaluates the rule against `files`, which are sorted by relative path.
    fn check(&self, files: &[DiscoveredFile]) -> Vec<CheckOutcome>;
}

// ---------------------------------------------------------------------------
// PolicyEngine
// ---------------------------------------------------------------------------

/// Runs a fixed set of rules in registration order.
pub struct PolicyEngine {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    /// Creates an engine with the built-in rules.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rules(vec![
            Box::new(S3PublicBucketRule),
            Box::new(SecurityGroupOpenIngressRule),
            Box::new(RequireOidcRule),
        ])
    }

    /// Creates an engine with a custom rule set.
    #[must_use]
    pub fn with_rules(rules: Vec<Box<dyn PolicyRule>>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn PolicyRule> {
        self.rules.iter().map(AsRef::as_ref)
    }

    /// Runs every rule and concatenates their outcomes.
    #[must_use]
    pub fn run_checks(&self, files: &[DiscoveredFile]) -> Vec<CheckOutcome> {
        let mut outcomes = Vec::new();
        for rule in &self.rules {
            let rule_outcomes = rule.check(files);
            debug!(rule = rule.name(), outcomes = rule_outcomes.len(), "rule evaluated");
            outcomes.extend(rule_outcomes);
        }
        outcomes
    }
}

// ---------------------------------------------------------------------------
// s3-no-public-buckets
// ---------------------------------------------------------------------------

/// Flags S3 buckets with public ACLs or wildcard-principal read policies.
pub struct S3PublicBucketRule;

const S3_PUBLIC_PATTERNS: &[&[&str]] = &[
    &["public_read_write"],
    &["public-read-write"],
    &["public_read"],
    &["public-read"],
    &["\"*\"", "s3:GetObject"],
];

impl PolicyRule for S3PublicBucketRule {
    fn name(&self) -> &'static str {
        "s3-no-public-buckets"
    }

    fn description(&self) -> &'static str {
        "S3 buckets should not allow public read access"
    }

    fn check(&self, files: &[DiscoveredFile]) -> Vec<CheckOutcome> {
        let mut outcomes = Vec::new();

        for file in files.iter().filter(|f| is_terraform_file(&f.relative_path)) {
            for (idx, line) in file.content.lines().enumerate() {
                // One outcome per line: `public_read_write` also contains `public_read`.
                let Some(pattern) = S3_PUBLIC_PATTERNS.iter().find(|p| matches_in_order(line, p))
                else {
                    continue;
                };
                outcomes.push(
                    CheckOutcome::new(
                        self.name(),
                        CheckStatus::Fail,
                        "S3 bucket configured with public access",
                    )
                    .at(&file.relative_path, line_number(idx))
                    .remediation(
                        "Remove public access configuration or use specific IAM policies instead",
                    )
                    .with_metadata("pattern", json!(pattern.join(".*")))
                    .with_metadata("line_content", json!(line.trim())),
                );
            }
        }

        if outcomes.is_empty() {
            outcomes.push(CheckOutcome::new(
                self.name(),
                CheckStatus::Pass,
                "No public S3 buckets detected",
            ));
        }
        outcomes
    }
}

// ---------------------------------------------------------------------------
// sg-no-open-ingress
// ---------------------------------------------------------------------------

/// Flags security group ingress blocks open to `0.0.0.0/0`.
pub struct SecurityGroupOpenIngressRule;

const OPEN_CIDR: &str = "0.0.0.0/0";

impl PolicyRule for SecurityGroupOpenIngressRule {
    fn name(&self) -> &'static str {
        "sg-no-open-ingress"
    }

    fn description(&self) -> &'static str {
        "Security groups should not allow ingress from 0.0.0.0/0 on sensitive ports"
    }

    fn check(&self, files: &[DiscoveredFile]) -> Vec<CheckOutcome> {
        let mut outcomes = Vec::new();

        for file in files.iter().filter(|f| is_terraform_file(&f.relative_path)) {
            let mut in_ingress = false;

            for (idx, line) in file.content.lines().enumerate() {
                let trimmed = line.trim();
                if trimmed.contains("ingress {") {
                    in_ingress = true;
                } else if trimmed.contains("egress {") || (in_ingress && trimmed.contains('}')) {
                    in_ingress = false;
                }

                if in_ingress && line.contains(OPEN_CIDR) && line.contains("cidr_blocks") {
                    outcomes.push(
                        CheckOutcome::new(
                            self.name(),
                            CheckStatus::Fail,
                            "Security group allows ingress from 0.0.0.0/0",
                        )
                        .at(&file.relative_path, line_number(idx))
                        .remediation("Restrict ingress to specific CIDR blocks or security groups")
                        .with_metadata("line_content", json!(trimmed)),
                    );
                }
            }
        }

        if outcomes.is_empty() {
            outcomes.push(CheckOutcome::new(
                self.name(),
                CheckStatus::Pass,
                "No overly permissive security groups detected",
            ));
        }
        outcomes
    }
}

// ---------------------------------------------------------------------------
// deploy-require-oidc
// ---------------------------------------------------------------------------

/// Requires GitHub Actions deployments to use OIDC instead of static AWS keys.
pub struct RequireOidcRule;

const OIDC_PATTERNS: &[&[&str]] = &[
    &["id-token:", "write"],
    &["aws-actions/configure-aws-credentials"],
    &["role-to-assume"],
];

const STATIC_CREDENTIAL_PATTERNS: &[&str] = &[
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "secrets.AWS_ACCESS_KEY",
];

impl PolicyRule for RequireOidcRule {
    fn name(&self) -> &'static str {
        "deploy-require-oidc"
    }

    fn description(&self) -> &'static str {
        "Deployment workflows should use OIDC workload identity instead of long-lived credentials"
    }

    fn check(&self, files: &[DiscoveredFile]) -> Vec<CheckOutcome> {
        let mut outcomes = Vec::new();
        let mut found_oidc = false;

        for file in files.iter().filter(|f| is_workflow_file(&f.relative_path)) {
            if file
                .content
                .lines()
                .any(|line| OIDC_PATTERNS.iter().any(|p| matches_in_order(line, p)))
            {
                found_oidc = true;
            }

            for (idx, line) in file.content.lines().enumerate() {
                for pattern in STATIC_CREDENTIAL_PATTERNS.iter().filter(|p| line.contains(*p)) {
                    outcomes.push(
                        CheckOutcome::new(
                            self.name(),
                            CheckStatus::Fail,
                            "GitHub Action uses long-lived credentials instead of OIDC",
                        )
                        .at(&file.relative_path, line_number(idx))
                        .remediation("Replace with OIDC workload identity using role-to-assume")
                        .with_metadata("pattern", json!(pattern)),
                    );
                }
            }
        }

        if outcomes.is_empty() {
            if found_oidc {
                outcomes.push(CheckOutcome::new(
                    self.name(),
                    CheckStatus::Pass,
                    "OIDC workload identity properly configured",
                ));
            } else {
                outcomes.push(CheckOutcome::new(
                    self.name(),
                    CheckStatus::Warn,
                    "No deployment workflows detected",
                ));
            }
        }
        outcomes
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_terraform_file(path: &str) -> bool {
    path.ends_with(".tf") || path.ends_with(".tfvars")
}

fn is_workflow_file(path: &str) -> bool {
    let in_workflows = path.starts_with(".github/workflows/") || path.contains("/.github/workflows/");
    in_workflows && (path.ends_with(".yml") || path.ends_with(".yaml"))
}

/// Returns `true` if every fragment occurs in `line`, each after the previous one.
fn matches_in_order(line: &str, fragments: &[&str]) -> bool {
    let mut rest = line;
    for fragment in fragments {
        match rest.find(fragment) {
            Some(pos) => rest = &rest[pos + fragment.len()..],
            None => return false,
        }
    }
    true
}

fn line_number(idx: usize) -> u32 {
    u32::try_from(idx + 1).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
