//! Run configuration.
//!
//! One [`VerificationConfig`] value is built by the CLI and threaded
//! read-only through the pipeline; stages never consult ambient state.

use std::path::PathBuf;

use thiserror::Error;

/// Which layout check the run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutMode {
    /// No layout verification.
    #[default]
    None,
    /// Synthesized single-step layout from the release's signing material.
    Simple,
    /// Caller-supplied signed layout plus its key.
    Full,
}

/// Errors from configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a custom layout requires both --layout and --layout-key")]
    IncompleteCustomLayout,

    #[error("--layout and --layout-key require --layout-mode full")]
    LayoutMaterialWithoutFullMode,
}

/// Caller-supplied settings for one verification run.
#[derive(Debug, Clone, Default)]
pub struct VerificationConfig {
    /// Local file substituted for the artifact download, matched by
    /// basename against the release asset name.
    pub local_artifact_path: Option<PathBuf>,

    /// Whether to require transparency log inclusion.
    pub enable_log_check: bool,

    /// Transparency log base URL.
    pub log_url: Option<String>,

    pub layout_mode: LayoutMode,

    /// Signed layout document, required (with the key) in full mode.
    pub custom_layout_path: Option<PathBuf>,

    /// The layout's signing key, PKCS#8 PEM.
    pub custom_layout_key: Option<PathBuf>,

    /// Password for an encrypted layout key.
    pub layout_key_password: Option<String>,
}

impl VerificationConfig {
    /// Check mode/material consistency. Supplying exactly one of the
    /// layout document and its key is a configuration error, as is
    /// supplying either outside full mode.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.layout_mode {
            LayoutMode::Full => {
                if self.custom_layout_path.is_none() || self.custom_layout_key.is_none() {
                    return Err(ConfigError::IncompleteCustomLayout);
                }
            }
            LayoutMode::None | LayoutMode::Simple => {
                if self.custom_layout_path.is_some() || self.custom_layout_key.is_some() {
                    return Err(ConfigError::LayoutMaterialWithoutFullMode);
                }
            }
        }
        Ok(())
    }
}
