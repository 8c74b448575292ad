//! Full pipeline runs against in-process collaborators.

use attest_bridge::error::Error;
use attest_bridge::layout::rules::RuleError;
use attest_bridge::layout::{DigestSet, Layout, LayoutError, Link, Metablock, DEFAULT_STEP};
use attest_bridge::mock::{certificate_pem, MockFetcher, MockLogClient, MockReleaseQuery};
use attest_bridge::policy::Policy;
use attest_bridge::release::{AssetNode, ReleaseNode};
use attest_bridge::signing::{self, SigningKey};
use attest_bridge::{pipeline, LayoutMode, VerificationConfig};
use indexmap::IndexMap;

const ARTIFACT: &[u8] = b"release binary under verification";

fn url(name: &str) -> String {
    format!("https://release.test/{}", name)
}

fn asset(name: &str) -> AssetNode {
    AssetNode {
        name: name.to_owned(),
        download_url: url(name),
    }
}

fn latest_release() -> Vec<ReleaseNode> {
    vec![
        ReleaseNode {
            is_latest: false,
            tag_name: "v0.9".to_owned(),
        },
        ReleaseNode {
            is_latest: true,
            tag_name: "v1.0".to_owned(),
        },
    ]
}

fn compile_link(signer: &SigningKey, products: &[(&str, &[u8])]) -> Metablock<Link> {
    let link = Link {
        name: DEFAULT_STEP.to_owned(),
        command: String::new(),
        materials: IndexMap::new(),
        products: products
            .iter()
            .map(|(name, bytes)| {
                (
                    (*name).to_owned(),
                    DigestSet {
                        sha256: signing::digest(bytes),
                    },
                )
            })
            .collect(),
    };
    Metablock::sign(link, signer).unwrap()
}

/// The release's five assets: binary, signature, certificate, compile
/// link (signed by `link_signer`), and the functionary public key.
fn release_fetcher(
    artifact_signer: &SigningKey,
    link_signer: &SigningKey,
    functionary: &SigningKey,
    link_products: &[(&str, &[u8])],
) -> (MockReleaseQuery, MockFetcher) {
    let query = MockReleaseQuery::new(
        latest_release(),
        vec![
            asset("hello-go"),
            asset("hello-go.sig"),
            asset("hello-go.crt"),
            asset("compile.0a1b2c3d.link"),
            asset("developer.pub"),
        ],
    );

    let link = compile_link(link_signer, link_products);
    let fetcher = MockFetcher::new()
        .with(&url("hello-go"), ARTIFACT)
        .with(
            &url("hello-go.sig"),
            artifact_signer.sign(ARTIFACT).unwrap().as_bytes(),
        )
        .with(
            &url("hello-go.crt"),
            certificate_pem(artifact_signer).as_bytes(),
        )
        .with(
            &url("compile.0a1b2c3d.link"),
            serde_json::to_string(&link).unwrap().as_bytes(),
        )
        .with(
            &url("developer.pub"),
            signing::der_to_pem(&functionary.public_spki(), "PUBLIC KEY").as_bytes(),
        );

    (query, fetcher)
}

#[test]
fn verified_run_reports_the_artifact_digest() {
    let key = SigningKey::generate().unwrap();
    let (query, fetcher) = release_fetcher(&key, &key, &key, &[("hello-go", ARTIFACT)]);

    let config = VerificationConfig {
        layout_mode: LayoutMode::Simple,
        ..Default::default()
    };
    let outcome = pipeline::run(&query, &fetcher, &MockLogClient::new(), &config).unwrap();

    assert_eq!(outcome.tag, "v1.0");
    assert_eq!(outcome.verified.len(), 1);
    assert_eq!(outcome.verified[0].digest, signing::digest(ARTIFACT));
}

#[test]
fn verified_hashes_are_recorded_under_the_destination_path() {
    let key = SigningKey::generate().unwrap();
    let (query, fetcher) = release_fetcher(&key, &key, &key, &[("hello-go", ARTIFACT)]);

    let outcome = pipeline::run(
        &query,
        &fetcher,
        &MockLogClient::new(),
        &VerificationConfig::default(),
    )
    .unwrap();

    // The policy key is where the artifact will live on the target host,
    // not the release asset's basename.
    let destination = "/usr/bin/hello-go";
    let mut policy = Policy::load(None).unwrap();
    for artifact in &outcome.verified {
        policy.append(destination, &artifact.digest);
    }

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("keylime-policy.json");
    policy.persist(&path).unwrap();

    let reloaded = Policy::load(Some(&path)).unwrap();
    assert_eq!(
        reloaded.hashes.get(destination),
        Some(&vec![signing::digest(ARTIFACT)])
    );
    assert!(reloaded.hashes.get("hello-go").is_none());
}

#[test]
fn tampered_artifact_fails_the_digest_stage_first() {
    let key = SigningKey::generate().unwrap();
    // The link attests to different bytes than the release serves.
    let (query, fetcher) = release_fetcher(&key, &key, &key, &[("hello-go", b"original bytes")]);

    let err = pipeline::run(
        &query,
        &fetcher,
        &MockLogClient::new(),
        &VerificationConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::DigestMismatch { .. }));
    assert_eq!(err.exit_code().as_i32(), 40);
}

#[test]
fn unauthorized_link_signer_is_an_authorization_failure() {
    let functionary = SigningKey::generate().unwrap();
    let intruder = SigningKey::generate().unwrap();
    // Artifact signature is fine; only the link is signed by the wrong key.
    let (query, fetcher) = release_fetcher(
        &functionary,
        &intruder,
        &functionary,
        &[("hello-go", ARTIFACT)],
    );

    let config = VerificationConfig {
        layout_mode: LayoutMode::Simple,
        ..Default::default()
    };
    let err = pipeline::run(&query, &fetcher, &MockLogClient::new(), &config).unwrap_err();
    assert!(matches!(
        err,
        Error::Layout(LayoutError::Authorization { ref step }) if step == DEFAULT_STEP
    ));
}

#[test]
fn undeclared_product_is_a_rule_violation_not_an_authorization_failure() {
    let functionary = SigningKey::generate().unwrap();
    // Same authorized signer, but the link records an extra product the
    // layout disallows.
    let (query, fetcher) = release_fetcher(
        &functionary,
        &functionary,
        &functionary,
        &[("hello-go", ARTIFACT), ("backdoor", b"unexpected")],
    );

    let config = VerificationConfig {
        layout_mode: LayoutMode::Simple,
        ..Default::default()
    };
    let err = pipeline::run(&query, &fetcher, &MockLogClient::new(), &config).unwrap_err();
    assert!(matches!(
        err,
        Error::Layout(LayoutError::Rule(RuleError::Disallowed { .. }))
    ));
}

#[test]
fn custom_layout_full_mode_verifies_from_disk() {
    let functionary = SigningKey::generate().unwrap();
    let layout_key = SigningKey::generate().unwrap();
    let (query, fetcher) = release_fetcher(
        &functionary,
        &functionary,
        &functionary,
        &[("hello-go", ARTIFACT)],
    );

    let layout = Layout {
        expires: chrono::Utc::now() + chrono::Duration::hours(1),
        steps: vec![attest_bridge::layout::Step {
            name: DEFAULT_STEP.to_owned(),
            pubkeys: vec![functionary.keyid()],
            expected_command: String::new(),
            rules: vec!["CREATE hello-go".to_owned(), "DISALLOW *".to_owned()],
        }],
        inspect: vec![attest_bridge::layout::Inspection {
            name: "verify-products".to_owned(),
            rules: vec![format!("MATCH hello-go WITH PRODUCTS FROM {}", DEFAULT_STEP)],
        }],
    };
    let metablock = Metablock::sign(layout, &layout_key).unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    let layout_path = dir.path().join("root.layout");
    let key_path = dir.path().join("layout-key.pem");
    std::fs::write(&layout_path, serde_json::to_string(&metablock).unwrap()).unwrap();
    std::fs::write(&key_path, layout_key.private_pem()).unwrap();

    let config = VerificationConfig {
        layout_mode: LayoutMode::Full,
        custom_layout_path: Some(layout_path),
        custom_layout_key: Some(key_path),
        ..Default::default()
    };
    let outcome = pipeline::run(&query, &fetcher, &MockLogClient::new(), &config).unwrap();
    assert_eq!(outcome.verified.len(), 1);
}
