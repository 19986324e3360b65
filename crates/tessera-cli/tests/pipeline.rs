//! End-to-end tests for the attest -> verify -> rebuild pipeline.
//!
//! Fixture trees under `tests/fixtures/` are scanned in place; each test keeps
//! its configuration, signing key and evidence store in a fresh temp project.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tessera_cli::commands::attest::{self, AttestArgs};
use tessera_cli::commands::init::{self, InitArgs};
use tessera_cli::commands::rebuild::{self, RebuildArgs};
use tessera_cli::commands::verify::{self, VerifyArgs};
use tessera_cli::commands::{OutputArgs, ProjectArgs};
use tessera_cli::ExitCode;
use tessera_core::config::{self, CONFIG_FILE_NAME};
use tessera_core::CheckStatus;
use tessera_evidence::chain::CHAIN_INDEX_NAME;
use tessera_evidence::{
    Attestation, ChainManager, EvidenceStore, FileKeySource, FsEvidenceStore, KeySource,
    SignedAttestation,
};

/// Returns the workspace root directory.
fn workspace_root() -> PathBuf {
    // CARGO_MANIFEST_DIR points to crates/tessera-cli, so go up two levels.
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root must exist")
}

fn fixture(name: &str) -> PathBuf {
    workspace_root().join("tests/fixtures").join(name)
}

fn quiet() -> OutputArgs {
    OutputArgs {
        quiet: true,
        ..OutputArgs::default()
    }
}

fn project_args(project: &Path) -> ProjectArgs {
    ProjectArgs {
        project: project.to_path_buf(),
    }
}

fn init_project(project: &Path) {
    let code = init::execute(InitArgs {
        project: project_args(project),
        force: false,
        output: quiet(),
    })
    .unwrap();
    assert_eq!(code, ExitCode::Pass);
}

fn attest_fixture(project: &Path, name: &str) -> ExitCode {
    // Artifact names have millisecond resolution.
    thread::sleep(Duration::from_millis(5));
    attest::execute(AttestArgs {
        target: fixture(name),
        project: Some(project.to_path_buf()),
        ephemeral_key: false,
        output: quiet(),
    })
    .unwrap()
}

fn verify_project(project: &Path, linkage_only: bool, public_keys: Vec<String>) -> ExitCode {
    verify::execute(VerifyArgs {
        project: project_args(project),
        linkage_only,
        public_keys,
        output: quiet(),
    })
    .unwrap()
}

fn manager(project: &Path) -> ChainManager<FsEvidenceStore> {
    let cfg = config::load_config(Some(project)).unwrap();
    ChainManager::new(FsEvidenceStore::new(cfg.evidence.evidence_dir(project)))
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[test]
fn attest_then_verify_passes() {
    let tmp = tempfile::tempdir().unwrap();
    init_project(tmp.path());

    assert_eq!(attest_fixture(tmp.path(), "secure-infra"), ExitCode::Pass);
    assert_eq!(attest_fixture(tmp.path(), "insecure-infra"), ExitCode::CheckFailed);
    assert_eq!(attest_fixture(tmp.path(), "secure-infra"), ExitCode::Pass);

    assert_eq!(verify_project(tmp.path(), false, vec![]), ExitCode::Pass);

    let chain = manager(tmp.path()).load().unwrap();
    assert_eq!(chain.length, 3);
    let statuses: Vec<_> = chain.entries.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![CheckStatus::Pass, CheckStatus::Fail, CheckStatus::Pass]
    );
}

#[test]
fn attestation_subjects_hash_file_content() {
    let tmp = tempfile::tempdir().unwrap();
    init_project(tmp.path());
    attest_fixture(tmp.path(), "insecure-infra");

    let manager = manager(tmp.path());
    let chain = manager.load().unwrap();
    let bytes = manager.store().read(&chain.entries[0].store_reference).unwrap();
    let attestation = SignedAttestation::from_json(&bytes)
        .unwrap()
        .attestation()
        .unwrap();

    let names: Vec<_> = attestation.subjects().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec![".github/workflows/deploy.yml", "main.tf"]);

    let content = std::fs::read(fixture("insecure-infra").join("main.tf")).unwrap();
    let expected = tessera_evidence::canonical::sha256_hex(&content);
    assert_eq!(attestation.subjects()[1].digest["sha256"], expected);
    assert!(attestation.summary().overall_status.is_fail());
}

// ---------------------------------------------------------------------------
// Tampering
// ---------------------------------------------------------------------------

#[test]
fn tampered_artifact_fails_signature_verification_only() {
    let tmp = tempfile::tempdir().unwrap();
    init_project(tmp.path());
    attest_fixture(tmp.path(), "secure-infra");
    attest_fixture(tmp.path(), "secure-infra");

    let manager = manager(tmp.path());
    let chain = manager.load().unwrap();
    let path = manager.store().dir().join(&chain.entries[1].store_reference);

    let mut signed: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    signed["signingMetadata"]["source"] = serde_json::json!("elsewhere");
    signed["envelope"]["signatures"][0]["signature"] =
        serde_json::json!(signed["envelope"]["signatures"][0]["signature"]
            .as_str()
            .unwrap()
            .chars()
            .rev()
            .collect::<String>());
    std::fs::write(&path, serde_json::to_vec(&signed).unwrap()).unwrap();

    assert_eq!(verify_project(tmp.path(), true, vec![]), ExitCode::Pass);
    assert_eq!(verify_project(tmp.path(), false, vec![]), ExitCode::CheckFailed);
}

#[test]
fn edited_index_fails_linkage() {
    let tmp = tempfile::tempdir().unwrap();
    init_project(tmp.path());
    attest_fixture(tmp.path(), "secure-infra");
    attest_fixture(tmp.path(), "insecure-infra");

    let manager = manager(tmp.path());
    let mut chain = manager.load().unwrap();
    chain.entries[1].status = CheckStatus::Pass;
    chain.entries[1].parent_hash = "0".repeat(64);
    manager.persist(&chain).unwrap();

    assert_eq!(verify_project(tmp.path(), true, vec![]), ExitCode::CheckFailed);
}

#[test]
fn untrusted_signer_fails_verification() {
    let tmp = tempfile::tempdir().unwrap();
    init_project(tmp.path());
    attest_fixture(tmp.path(), "secure-infra");

    // Trust only an unrelated key.
    let other = tempfile::tempdir().unwrap();
    let other_key = FileKeySource::new(other.path().join("other.key"))
        .generate()
        .unwrap();
    let other_public = tessera_evidence::Signer::new(other_key).public_key_base64();
    let yaml = format!(
        "evidence:\n  trusted_keys:\n    - \"{other_public}\"\n  require_signatures: true\n"
    );
    std::fs::write(tmp.path().join(CONFIG_FILE_NAME), yaml).unwrap();

    assert_eq!(verify_project(tmp.path(), false, vec![]), ExitCode::CheckFailed);

    let own = FileKeySource::new(tmp.path().join(".tessera/signing.key"))
        .signing_key()
        .unwrap();
    let own_public = tessera_evidence::Signer::new(own).public_key_base64();
    assert_eq!(verify_project(tmp.path(), false, vec![own_public]), ExitCode::Pass);
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[test]
fn lost_index_is_rebuilt_from_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    init_project(tmp.path());
    for name in ["secure-infra", "insecure-infra", "secure-infra"] {
        attest_fixture(tmp.path(), name);
    }

    let manager = manager(tmp.path());
    let original = manager.load().unwrap();
    std::fs::remove_file(manager.store().dir().join(CHAIN_INDEX_NAME)).unwrap();

    let code = rebuild::execute(RebuildArgs {
        project: project_args(tmp.path()),
        output: quiet(),
    })
    .unwrap();
    assert_eq!(code, ExitCode::Pass);

    let rebuilt = manager.load().unwrap();
    assert_ne!(rebuilt.chain_id, original.chain_id);
    assert_eq!(rebuilt.entries, original.entries);
    assert_eq!(rebuilt.head, original.head);
    assert_eq!(verify_project(tmp.path(), false, vec![]), ExitCode::Pass);
}

#[test]
fn rebuild_skips_corrupt_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    init_project(tmp.path());
    attest_fixture(tmp.path(), "secure-infra");

    let manager = manager(tmp.path());
    manager
        .store()
        .write_new("attestation-19700101-000000-000-deadbeef.json", b"{ truncated")
        .unwrap();

    let rebuilt = manager.rebuild().unwrap();
    assert_eq!(rebuilt.length, 1);
    let head = rebuilt.head.clone().unwrap();

    let bytes = manager.store().read(&rebuilt.entries[0].store_reference).unwrap();
    let attestation: Attestation = SignedAttestation::from_json(&bytes)
        .unwrap()
        .attestation()
        .unwrap();
    assert_eq!(attestation.hash(), head);
}
