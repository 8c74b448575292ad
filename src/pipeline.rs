//! The staged verification pipeline.
//!
//! One run resolves the latest release, builds the run's trust material,
//! then verifies each artifact in order: content hash against its
//! attested hash, detached signature against its certificate, optional
//! transparency log inclusion, optional layout verification. Stages are
//! strictly sequential; the first failure aborts the whole run and
//! nothing is written.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;

use crate::config::{LayoutMode, VerificationConfig};
use crate::error::Error;
use crate::fetch::{Fetch, FetchError};
use crate::layout::{self, Link, Metablock, SignedLayout, TrustContext};
use crate::rekor::{self, LogClient};
use crate::release::{self, ArtifactDescriptor, ReleaseQuery};
use crate::signing;

/// One artifact that survived every enabled stage.
#[derive(Debug, Clone)]
pub struct VerifiedArtifact {
    pub name: String,
    /// Lowercase hex SHA-256 of the verified bytes.
    pub digest: String,
}

/// The result of a fully successful run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub tag: String,
    pub verified: Vec<VerifiedArtifact>,
}

/// Execute one verification run.
pub fn run(
    query: &dyn ReleaseQuery,
    fetcher: &dyn Fetch,
    log_client: &dyn LogClient,
    config: &VerificationConfig,
) -> Result<RunOutcome, Error> {
    config.validate()?;

    let resolved = release::resolve(query)?;
    eprintln!(
        "release {}: {} artifact(s), {} link(s), {} key(s)",
        resolved.tag,
        resolved.artifacts.len(),
        resolved.links.len(),
        resolved.keys.len()
    );

    let mut trust = TrustContext::new();
    for key in resolved.keys.values() {
        let pem = fetcher.text(&key.url)?;
        let keyid = trust.add_key_pem(&key.name, &pem)?;
        eprintln!("functionary {} has keyid {}", key.name, keyid);
    }

    let mut links: IndexMap<String, Metablock<Link>> = IndexMap::new();
    for link in resolved.links.values() {
        let json = fetcher.text(&link.url)?;
        links.insert(link.step_name.clone(), layout::parse_link(&json)?);
    }

    let attested = attested_digests(&links);
    let signed_layout = resolve_layout(config, &resolved.artifacts, &trust)?;

    let mut verified = Vec::new();
    for artifact in resolved.artifacts.values() {
        eprintln!("verifying artifact {}", artifact.name);
        let digest = verify_artifact(
            artifact,
            fetcher,
            log_client,
            config,
            &attested,
            signed_layout.as_ref(),
            &trust,
            &links,
        )?;
        eprintln!("artifact {} verified: {}", artifact.name, digest);
        verified.push(VerifiedArtifact {
            name: artifact.name.clone(),
            digest,
        });
    }

    Ok(RunOutcome {
        tag: resolved.tag,
        verified,
    })
}

/// Run one artifact through the enabled stages, in order.
#[allow(clippy::too_many_arguments)]
fn verify_artifact(
    artifact: &ArtifactDescriptor,
    fetcher: &dyn Fetch,
    log_client: &dyn LogClient,
    config: &VerificationConfig,
    attested: &IndexMap<String, String>,
    signed_layout: Option<&SignedLayout>,
    trust: &TrustContext,
    links: &IndexMap<String, Metablock<Link>>,
) -> Result<String, Error> {
    // Stage 1: content hash against the attested hash.
    let bytes = artifact_bytes(artifact, fetcher, config)?;
    let digest = signing::digest(&bytes);
    if let Some(expected) = attested.get(&artifact.name) {
        if expected != &digest {
            return Err(Error::DigestMismatch {
                artifact: artifact.name.clone(),
                expected: expected.clone(),
                actual: digest,
            });
        }
    }

    // Stage 2: detached signature against the certificate.
    let signature_b64 = fetcher.text(artifact.require_signature_url()?)?;
    let certificate_pem = fetcher.text(artifact.require_certificate_url()?)?;
    signing::verify_signature(&bytes, &signature_b64, &certificate_pem).map_err(|source| {
        Error::InvalidSignature {
            artifact: artifact.name.clone(),
            source,
        }
    })?;

    // Stage 3: transparency log inclusion.
    if config.enable_log_check {
        rekor::verify_inclusion(log_client, &bytes, &certificate_pem).map_err(|source| {
            Error::InclusionProof {
                artifact: artifact.name.clone(),
                source,
            }
        })?;
    }

    // Stage 4: layout verification against this artifact.
    if let Some(signed_layout) = signed_layout {
        let mut live = IndexMap::new();
        live.insert(artifact.name.clone(), digest.clone());
        layout::verify(signed_layout, trust, links, &live)?;
    }

    Ok(digest)
}

/// The artifact bytes: a caller-supplied local file when its basename
/// matches the asset name, otherwise the release download.
fn artifact_bytes(
    artifact: &ArtifactDescriptor,
    fetcher: &dyn Fetch,
    config: &VerificationConfig,
) -> Result<Vec<u8>, Error> {
    if let Some(local) = &config.local_artifact_path {
        if basename(local) == Some(artifact.name.as_str()) {
            eprintln!("using local file {} for {}", local.display(), artifact.name);
            return Ok(fs::read(local).map_err(FetchError::from)?);
        }
    }
    Ok(fetcher.bytes(artifact.require_artifact_url()?)?)
}

/// Digests attested by the run's link attestations, keyed by basename.
/// The first link to record a name wins.
fn attested_digests(links: &IndexMap<String, Metablock<Link>>) -> IndexMap<String, String> {
    let mut attested = IndexMap::new();
    for link in links.values() {
        for (name, digests) in &link.signed.products {
            let base = Path::new(name)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(name)
                .to_owned();
            attested.entry(base).or_insert_with(|| digests.sha256.clone());
        }
    }
    attested
}

/// Resolve the layout for this run per the configured mode.
fn resolve_layout(
    config: &VerificationConfig,
    artifacts: &std::collections::BTreeMap<String, ArtifactDescriptor>,
    trust: &TrustContext,
) -> Result<Option<SignedLayout>, Error> {
    match config.layout_mode {
        LayoutMode::None => Ok(None),
        LayoutMode::Simple => {
            let products: Vec<String> = artifacts.keys().cloned().collect();
            Ok(Some(layout::default_layout(&products, trust)?))
        }
        LayoutMode::Full => {
            // validate() guarantees both paths are present in full mode.
            let layout_path = config.custom_layout_path.as_deref().unwrap_or(Path::new(""));
            let key_path = config.custom_layout_key.as_deref().unwrap_or(Path::new(""));
            let layout_json = fs::read_to_string(layout_path).map_err(FetchError::from)?;
            let key_pem = fs::read_to_string(key_path).map_err(FetchError::from)?;
            Ok(Some(layout::load_custom(
                &layout_json,
                &key_pem,
                config.layout_key_password.as_deref(),
            )?))
        }
    }
}

fn basename(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}
