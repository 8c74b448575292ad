//! Transparency log inclusion verification.
//!
//! Confirms that a valid signature over the artifact is recorded in the
//! append-only log: search the log by artifact digest, find a candidate
//! entry whose embedded signature verifies over the artifact bytes with
//! the certificate's key, then check that entry's Merkle inclusion proof
//! against the declared tree head.
//!
//! Candidates are scanned in ascending log-index order so the outcome
//! does not depend on the search API's return order.

pub mod merkle;

use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::fetch::http_agent;
use crate::signing;
use merkle::{leaf_hash, root_from_inclusion_proof, Hash, ProofError};

/// Default transparency log base URL.
pub const DEFAULT_LOG_URL: &str = "https://rekor.sigstore.dev";

/// Errors from transparency log verification.
#[derive(Debug, Error)]
pub enum RekorError {
    /// The search-by-digest endpoint returned no candidates.
    #[error("no log entries found for digest {digest}")]
    NoCandidates { digest: String },

    /// No candidate's embedded signature verified over the artifact.
    #[error("no log entry carries a matching signature for digest {digest}")]
    NoMatchingCandidate { digest: String },

    /// The matching entry's audit path did not fold to the declared root.
    #[error("inclusion proof root mismatch for log entry {uuid}")]
    RootMismatch { uuid: String },

    /// The matching entry carries no inclusion proof.
    #[error("log entry {uuid} has no inclusion proof")]
    MissingProof { uuid: String },

    /// The matching entry's proof fields are malformed.
    #[error("log entry {uuid} is malformed: {reason}")]
    MalformedEntry { uuid: String, reason: String },

    #[error("inclusion proof error: {0}")]
    Proof(#[from] ProofError),

    #[error("log transport error: {0}")]
    Transport(String),
}

/// Merkle inclusion proof attached to a log entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    /// Index of the entry's leaf within the tree.
    pub log_index: u64,
    /// Size of the tree the proof was produced against.
    pub tree_size: u64,
    /// Declared root hash for that tree size, hex.
    pub root_hash: String,
    /// Ordered sibling hashes, leaf level first, hex.
    pub hashes: Vec<String>,
}

/// One transparency log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub uuid: String,
    pub log_index: u64,
    /// Base64-encoded canonical entry body.
    pub body: String,
    pub inclusion_proof: Option<InclusionProof>,
}

/// Client for the transparency log's two endpoints.
pub trait LogClient {
    /// Search the log by artifact digest, returning candidate entry ids.
    fn search_by_digest(&self, digest_hex: &str) -> Result<Vec<String>, RekorError>;

    /// Fetch a full entry by its identifier.
    fn fetch_entry(&self, uuid: &str) -> Result<LogEntry, RekorError>;
}

/// Verify that the artifact's signature is recorded in the log.
///
/// Zero search candidates is fatal. Candidates whose embedded signature
/// does not verify are skipped, because a log may index unrelated entries
/// under the same digest; only a signature-matching entry can attest to
/// this exact artifact. The first matching candidate's inclusion proof
/// must fold to its declared root hash; a mismatch is fatal with no
/// fallback to later candidates.
pub fn verify_inclusion(
    client: &dyn LogClient,
    artifact: &[u8],
    certificate_pem: &str,
) -> Result<(), RekorError> {
    let spki = signing::spki_from_certificate_pem(certificate_pem)
        .map_err(|e| RekorError::Transport(format!("certificate: {}", e)))?;
    verify_inclusion_with_spki(client, artifact, &spki)
}

/// The candidate scan, given the signer's bare SPKI DER.
pub(crate) fn verify_inclusion_with_spki(
    client: &dyn LogClient,
    artifact: &[u8],
    spki: &[u8],
) -> Result<(), RekorError> {
    let digest = signing::digest(artifact);

    let uuids = client.search_by_digest(&digest)?;
    if uuids.is_empty() {
        return Err(RekorError::NoCandidates { digest });
    }

    let mut entries = uuids
        .iter()
        .map(|uuid| client.fetch_entry(uuid))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.log_index);

    for entry in &entries {
        let Some(body) = decode_body(entry) else {
            continue;
        };
        let Some(embedded_sig) = embedded_signature(&body) else {
            continue;
        };
        if signing::verify_with_spki(spki, artifact, &embedded_sig).is_err() {
            continue;
        }

        // First signature-matching candidate: its proof decides the run.
        return verify_entry_proof(entry, &body);
    }

    Err(RekorError::NoMatchingCandidate { digest })
}

/// Fold the entry's leaf hash through its audit path and compare against
/// the declared tree head.
fn verify_entry_proof(entry: &LogEntry, body: &[u8]) -> Result<(), RekorError> {
    let proof = entry
        .inclusion_proof
        .as_ref()
        .ok_or_else(|| RekorError::MissingProof {
            uuid: entry.uuid.clone(),
        })?;

    let expected_root = decode_hash(&proof.root_hash).ok_or_else(|| {
        RekorError::MalformedEntry {
            uuid: entry.uuid.clone(),
            reason: "root hash is not a 32-byte hex string".to_owned(),
        }
    })?;

    let path = proof
        .hashes
        .iter()
        .map(|h| decode_hash(h))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| RekorError::MalformedEntry {
            uuid: entry.uuid.clone(),
            reason: "audit path contains a non-hash entry".to_owned(),
        })?;

    let leaf = leaf_hash(body);
    let root = root_from_inclusion_proof(proof.log_index, proof.tree_size, leaf, &path)?;

    if root != expected_root {
        return Err(RekorError::RootMismatch {
            uuid: entry.uuid.clone(),
        });
    }
    Ok(())
}

/// Decode the base64 entry body.
fn decode_body(entry: &LogEntry) -> Option<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(entry.body.as_bytes())
        .ok()
}

/// Extract the embedded detached signature from a signing-event entry
/// body (`spec.signature.content`, base64).
fn embedded_signature(body: &[u8]) -> Option<Vec<u8>> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let content = value["spec"]["signature"]["content"].as_str()?;
    base64::engine::general_purpose::STANDARD
        .decode(content.as_bytes())
        .ok()
}

fn decode_hash(hex_str: &str) -> Option<Hash> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}

/// Log client backed by the HTTP REST API.
pub struct HttpLogClient {
    base_url: String,
}

impl HttpLogClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

impl Default for HttpLogClient {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_URL)
    }
}

impl LogClient for HttpLogClient {
    fn search_by_digest(&self, digest_hex: &str) -> Result<Vec<String>, RekorError> {
        let url = format!("{}/api/v1/index/retrieve", self.base_url);
        let body = serde_json::json!({ "hash": format!("sha256:{}", digest_hex) });

        let response = http_agent()
            .post(url.as_str())
            .send_json(&body)
            .map_err(|e| RekorError::Transport(e.to_string()))?;
        let text = response
            .into_body()
            .read_to_string()
            .map_err(|e| RekorError::Transport(e.to_string()))?;

        serde_json::from_str(&text).map_err(|e| RekorError::Transport(e.to_string()))
    }

    fn fetch_entry(&self, uuid: &str) -> Result<LogEntry, RekorError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawEntry {
            body: String,
            log_index: u64,
            verification: Option<RawVerification>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RawVerification {
            inclusion_proof: Option<InclusionProof>,
        }

        let url = format!("{}/api/v1/log/entries/{}", self.base_url, uuid);
        let response = http_agent()
            .get(url.as_str())
            .call()
            .map_err(|e| RekorError::Transport(e.to_string()))?;
        let text = response
            .into_body()
            .read_to_string()
            .map_err(|e| RekorError::Transport(e.to_string()))?;

        // The endpoint returns a one-entry map keyed by uuid.
        let entries: std::collections::HashMap<String, RawEntry> =
            serde_json::from_str(&text).map_err(|e| RekorError::Transport(e.to_string()))?;
        let (key, raw) = entries
            .into_iter()
            .next()
            .ok_or_else(|| RekorError::Transport(format!("empty entry response for {}", uuid)))?;

        Ok(LogEntry {
            uuid: key,
            log_index: raw.log_index,
            body: raw.body,
            inclusion_proof: raw.verification.and_then(|v| v.inclusion_proof),
        })
    }
}
