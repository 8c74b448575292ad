//! Supply chain layout verification.
//!
//! A layout is a signed, ordered list of steps plus inspections. Each
//! step names its authorized functionary keys (any one suffices), an
//! expected command, and material/product rules; each step's actual
//! behavior is attested by a signed link. Inspections run the same rule
//! grammar against the live artifact set instead of a recorded link.
//!
//! Trust material is threaded through a [`TrustContext`] passed by
//! reference; nothing is looked up from process-global state.

pub mod rules;

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::signing::{self, SignatureError, SigningKey};
use rules::{Rule, RuleError, StepArtifacts};

/// Step name used by the synthesized default layout.
pub const DEFAULT_STEP: &str = "compile";

/// Validity window of the synthesized default layout, in hours.
const DEFAULT_VALIDITY_HOURS: i64 = 24;

/// Errors from layout resolution and verification.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The layout's validity window has elapsed.
    #[error("layout expired at {expires}")]
    Expired { expires: String },

    /// A step's link is not signed by any of its authorized keys.
    /// Deliberately distinct from rule violations.
    #[error("step {step:?}: link is not signed by an authorized functionary key")]
    Authorization { step: String },

    /// A material/product rule was violated (or unparseable).
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// The link's recorded command differs from the step's expectation.
    #[error("step {step:?}: recorded command {actual:?} does not match expected {expected:?}")]
    CommandMismatch {
        step: String,
        expected: String,
        actual: String,
    },

    /// A step has no link attestation.
    #[error("step {step:?} has no link attestation")]
    MissingLink { step: String },

    /// The layout's own signature did not verify.
    #[error("layout signature did not verify against the layout key")]
    BadLayoutSignature,

    /// Caller-supplied layout configuration is inconsistent.
    #[error("layout configuration error: {0}")]
    Config(String),

    /// A layout or link document did not parse.
    #[error("malformed layout document: {0}")]
    Format(String),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// Functionary keys for one verification run, keyed by keyid
/// (SHA-256 over the SPKI DER).
#[derive(Default)]
pub struct TrustContext {
    functionaries: IndexMap<String, Functionary>,
}

struct Functionary {
    name: String,
    spki: Vec<u8>,
}

impl TrustContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a functionary's PEM public key; returns its keyid.
    pub fn add_key_pem(&mut self, name: &str, pem: &str) -> Result<String, LayoutError> {
        let spki = signing::spki_from_public_key_pem(pem)?;
        let keyid = signing::key_fingerprint(&spki);
        self.functionaries.insert(
            keyid.clone(),
            Functionary {
                name: name.to_owned(),
                spki,
            },
        );
        Ok(keyid)
    }

    pub fn len(&self) -> usize {
        self.functionaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functionaries.is_empty()
    }

    /// The name registered for `keyid`, if any.
    pub fn name(&self, keyid: &str) -> Option<&str> {
        self.functionaries.get(keyid).map(|f| f.name.as_str())
    }

    fn spki(&self, keyid: &str) -> Option<&[u8]> {
        self.functionaries.get(keyid).map(|f| f.spki.as_slice())
    }

    /// The single registered keyid, required by the default layout.
    fn sole_keyid(&self) -> Result<&str, LayoutError> {
        let mut keyids = self.functionaries.keys();
        match (keyids.next(), keyids.next()) {
            (Some(keyid), None) => Ok(keyid),
            _ => Err(LayoutError::Config(format!(
                "default layout requires exactly one functionary key, found {}",
                self.functionaries.len()
            ))),
        }
    }
}

/// A signed envelope: the serialized `signed` payload is what the
/// signatures cover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metablock<T> {
    pub signed: T,
    pub signatures: Vec<Signature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: String,
    /// Base64 ASN.1 DER ECDSA signature.
    pub sig: String,
}

impl<T: Serialize> Metablock<T> {
    /// The byte payload the signatures cover: RFC 8785 canonical JSON of
    /// the signed content, so verification does not depend on the key
    /// order the producer happened to serialize with.
    fn payload(&self) -> Result<Vec<u8>, LayoutError> {
        serde_json_canonicalizer::to_vec(&self.signed)
            .map_err(|e| LayoutError::Format(e.to_string()))
    }

    /// Sign `signed` with `key` and wrap it.
    pub fn sign(signed: T, key: &SigningKey) -> Result<Self, LayoutError> {
        let payload = serde_json_canonicalizer::to_vec(&signed)
            .map_err(|e| LayoutError::Format(e.to_string()))?;
        let sig = key.sign(&payload)?;
        Ok(Self {
            signed,
            signatures: vec![Signature {
                keyid: key.keyid(),
                sig,
            }],
        })
    }
}

/// The layout document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layout {
    pub expires: DateTime<Utc>,
    pub steps: Vec<Step>,
    pub inspect: Vec<Inspection>,
}

/// One expected supply chain step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Authorized functionary keyids; any one suffices.
    pub pubkeys: Vec<String>,
    /// Expected command line; empty means "not checked".
    pub expected_command: String,
    pub rules: Vec<String>,
}

/// A rule set evaluated against the live artifact set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspection {
    pub name: String,
    pub rules: Vec<String>,
}

/// A step's recorded attestation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub command: String,
    pub materials: IndexMap<String, DigestSet>,
    pub products: IndexMap<String, DigestSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSet {
    pub sha256: String,
}

/// A layout together with the public key that must have signed it.
#[derive(Debug)]
pub struct SignedLayout {
    pub metablock: Metablock<Layout>,
    pub key_spki: Vec<u8>,
}

/// Parse a signed link attestation document.
pub fn parse_link(json: &str) -> Result<Metablock<Link>, LayoutError> {
    parse_metablock(json)
}

/// Load a caller-supplied signed layout and the key that signed it.
pub fn load_custom(
    layout_json: &str,
    key_pem: &str,
    password: Option<&str>,
) -> Result<SignedLayout, LayoutError> {
    let metablock: Metablock<Layout> =
        serde_json::from_str(layout_json).map_err(|e| LayoutError::Format(e.to_string()))?;
    let key = SigningKey::from_pem(key_pem, password)?;
    Ok(SignedLayout {
        metablock,
        key_spki: key.public_spki(),
    })
}

/// Synthesize the default single-step layout for the run's artifacts.
///
/// One "compile" step authorized for the run's sole functionary key,
/// producing exactly the expected artifacts, plus one inspection matching
/// each live artifact against that step's products. Signed with an
/// ephemeral key, so the layout is trusted for this run only.
pub fn default_layout(
    expected_products: &[String],
    trust: &TrustContext,
) -> Result<SignedLayout, LayoutError> {
    let functionary = trust.sole_keyid()?.to_owned();

    let mut step_rules: Vec<String> = expected_products
        .iter()
        .map(|product| format!("CREATE {}", product))
        .collect();
    step_rules.push("DISALLOW *".to_owned());

    let inspection_rules = expected_products
        .iter()
        .map(|product| format!("MATCH {} WITH PRODUCTS FROM {}", product, DEFAULT_STEP))
        .collect();

    let layout = Layout {
        expires: Utc::now() + Duration::hours(DEFAULT_VALIDITY_HOURS),
        steps: vec![Step {
            name: DEFAULT_STEP.to_owned(),
            pubkeys: vec![functionary],
            expected_command: String::new(),
            rules: step_rules,
        }],
        inspect: vec![Inspection {
            name: "verify-products".to_owned(),
            rules: inspection_rules,
        }],
    };

    let key = SigningKey::generate()?;
    Ok(SignedLayout {
        metablock: Metablock::sign(layout, &key)?,
        key_spki: key.public_spki(),
    })
}

/// Verify a layout against its links and the live artifact set.
///
/// `links` maps step name to its parsed link attestation; `live` maps
/// artifact name to its SHA-256 digest and feeds the inspections.
pub fn verify(
    layout: &SignedLayout,
    trust: &TrustContext,
    links: &IndexMap<String, Metablock<Link>>,
    live: &IndexMap<String, String>,
) -> Result<(), LayoutError> {
    verify_at(layout, trust, links, live, Utc::now())
}

fn verify_at(
    layout: &SignedLayout,
    trust: &TrustContext,
    links: &IndexMap<String, Metablock<Link>>,
    live: &IndexMap<String, String>,
    now: DateTime<Utc>,
) -> Result<(), LayoutError> {
    verify_envelope(&layout.metablock, &layout.key_spki)?;

    let signed = &layout.metablock.signed;
    if signed.expires <= now {
        return Err(LayoutError::Expired {
            expires: signed.expires.to_rfc3339(),
        });
    }

    // Parse every rule before evaluating anything.
    let step_rules = signed
        .steps
        .iter()
        .map(|step| parse_rules(&step.rules))
        .collect::<Result<Vec<_>, _>>()?;
    let inspection_rules = signed
        .inspect
        .iter()
        .map(|inspection| parse_rules(&inspection.rules))
        .collect::<Result<Vec<_>, _>>()?;

    // Steps in order; sources only ever hold earlier steps, so MATCH
    // references are acyclic by construction.
    let mut sources = StepArtifacts::new();
    for (step, rules) in signed.steps.iter().zip(&step_rules) {
        let link = links.get(&step.name).ok_or_else(|| LayoutError::MissingLink {
            step: step.name.clone(),
        })?;

        authorize_link(step, link, trust)?;

        if !step.expected_command.is_empty() && step.expected_command != link.signed.command {
            return Err(LayoutError::CommandMismatch {
                step: step.name.clone(),
                expected: step.expected_command.clone(),
                actual: link.signed.command.clone(),
            });
        }

        let materials = by_basename(&link.signed.materials);
        let products = by_basename(&link.signed.products);
        rules::evaluate(&step.name, rules, &products, &sources)?;
        sources.insert(step.name.clone(), (materials, products));
    }

    for (inspection, rules) in signed.inspect.iter().zip(&inspection_rules) {
        rules::evaluate(&inspection.name, rules, live, &sources)?;
    }

    Ok(())
}

/// Check that at least one envelope signature verifies with `spki`.
fn verify_envelope<T: Serialize>(
    metablock: &Metablock<T>,
    spki: &[u8],
) -> Result<(), LayoutError> {
    let payload = metablock.payload()?;
    for signature in &metablock.signatures {
        let Ok(sig) = signing::decode_signature(&signature.sig) else {
            continue;
        };
        if signing::verify_with_spki(spki, &payload, &sig).is_ok() {
            return Ok(());
        }
    }
    Err(LayoutError::BadLayoutSignature)
}

/// Check that the link carries a signature by one of the step's
/// authorized keys; any one suffices.
fn authorize_link(
    step: &Step,
    link: &Metablock<Link>,
    trust: &TrustContext,
) -> Result<(), LayoutError> {
    let payload = link.payload()?;

    for signature in &link.signatures {
        if !step.pubkeys.contains(&signature.keyid) {
            continue;
        }
        let Some(spki) = trust.spki(&signature.keyid) else {
            continue;
        };
        let Ok(sig) = signing::decode_signature(&signature.sig) else {
            continue;
        };
        if signing::verify_with_spki(spki, &payload, &sig).is_ok() {
            return Ok(());
        }
    }

    Err(LayoutError::Authorization {
        step: step.name.clone(),
    })
}

fn parse_rules(rules: &[String]) -> Result<Vec<Rule>, RuleError> {
    rules.iter().map(|rule| Rule::parse(rule)).collect()
}

/// Flatten a recorded digest map to basename keys, so recorded paths
/// compare against release asset names.
fn by_basename(recorded: &IndexMap<String, DigestSet>) -> IndexMap<String, String> {
    recorded
        .iter()
        .map(|(name, digests)| {
            let base = Path::new(name)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(name)
                .to_owned();
            (base, digests.sha256.clone())
        })
        .collect()
}

/// Deserialize helper shared by link and layout fetch paths.
pub fn parse_metablock<T: DeserializeOwned>(json: &str) -> Result<Metablock<T>, LayoutError> {
    serde_json::from_str(json).map_err(|e| LayoutError::Format(e.to_string()))
}
