//! Top-level error taxonomy and process exit codes.
//!
//! Every stage failure is unrecoverable for the run: nothing is retried,
//! downgraded, or skipped past, and the policy file is only written after
//! total success.

use thiserror::Error;

use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::layout::LayoutError;
use crate::policy::PolicyError;
use crate::rekor::RekorError;
use crate::release::ResolveError;
use crate::signing::SignatureError;

/// Process exit codes, one per failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Invalid configuration
    Config = 10,
    /// Release or asset discovery failed
    Resolution = 20,
    /// Download failure
    Fetch = 30,
    /// Content hash disagrees with attested hash
    DigestMismatch = 40,
    /// Detached signature did not verify
    InvalidSignature = 50,
    /// Transparency log inclusion not proven
    InclusionProof = 60,
    /// Layout rule or authorization failure
    LayoutVerification = 70,
    /// Layout validity window elapsed
    LayoutExpired = 71,
    /// Unparseable policy file
    PolicyFormat = 80,
    /// Policy file could not be read or written
    PolicyIo = 81,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Any failure of a verification run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolveError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The artifact's content hash disagrees with the attested hash.
    /// Raised before any signature or inclusion check runs.
    #[error("artifact {artifact}: digest {actual} does not match attested {expected}")]
    DigestMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },

    #[error("artifact {artifact}: {source}")]
    InvalidSignature {
        artifact: String,
        source: SignatureError,
    },

    #[error("artifact {artifact}: {source}")]
    InclusionProof {
        artifact: String,
        source: RekorError,
    },

    #[error("layout verification failed: {0}")]
    Layout(#[from] LayoutError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
}

impl Error {
    /// Map the failure to its process exit code.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::Config(_) => ExitCode::Config,
            Error::Resolution(_) => ExitCode::Resolution,
            Error::Fetch(_) => ExitCode::Fetch,
            Error::DigestMismatch { .. } => ExitCode::DigestMismatch,
            Error::InvalidSignature { .. } => ExitCode::InvalidSignature,
            Error::InclusionProof { .. } => ExitCode::InclusionProof,
            Error::Layout(LayoutError::Expired { .. }) => ExitCode::LayoutExpired,
            Error::Layout(_) => ExitCode::LayoutVerification,
            Error::Policy(PolicyError::Io(_)) => ExitCode::PolicyIo,
            Error::Policy(_) => ExitCode::PolicyFormat,
        }
    }
}
