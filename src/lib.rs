//! attest-bridge - release artifact provenance verification
//!
//! Resolves the latest GitHub release of a repository, verifies each
//! artifact's content hash, detached ECDSA P-256 signature, optional
//! transparency log inclusion, and optional supply chain layout, then
//! appends the verified hashes to a Keylime-style JSON trust policy.

pub mod config;
pub mod error;
pub mod fetch;
pub mod layout;
pub mod mock;
pub mod pipeline;
pub mod policy;
pub mod rekor;
pub mod release;
pub mod signing;

pub use config::{LayoutMode, VerificationConfig};
pub use error::{Error, ExitCode};
pub use pipeline::{run, RunOutcome, VerifiedArtifact};
pub use policy::Policy;
