//! Release resolution: discover the latest release of a repository and
//! classify its assets into signing material maps.
//!
//! The paginated release-query client is a collaborator behind the
//! [`ReleaseQuery`] trait; [`github::GithubReleaseQuery`] is the
//! production implementation. The resolver itself only walks pages and
//! classifies asset filenames.

pub mod github;

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

pub use github::GithubReleaseQuery;

/// Errors from release and asset discovery.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No release in the repository is flagged as latest.
    #[error("no release is flagged as latest")]
    NoLatestRelease,

    /// The query client failed (pagination, auth, transport).
    #[error("release query failed: {0}")]
    Query(String),

    /// A discovered artifact is missing part of its signing material.
    #[error("artifact {name} is missing {missing}")]
    IncompleteArtifact {
        name: String,
        missing: &'static str,
    },
}

/// One page of a paginated collection.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub nodes: Vec<T>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

/// A release node as returned by the query client.
#[derive(Debug, Clone)]
pub struct ReleaseNode {
    pub is_latest: bool,
    pub tag_name: String,
}

/// An asset node as returned by the query client.
#[derive(Debug, Clone)]
pub struct AssetNode {
    pub name: String,
    pub download_url: String,
}

/// The paginated release-query client, treated as a black box returning
/// structured release/asset data.
pub trait ReleaseQuery {
    /// Fetch one page of releases.
    fn releases(&self, cursor: Option<&str>) -> Result<Page<ReleaseNode>, ResolveError>;

    /// Fetch one page of assets for the release tagged `tag`.
    fn release_assets(
        &self,
        tag: &str,
        cursor: Option<&str>,
    ) -> Result<Page<AssetNode>, ResolveError>;
}

/// A discovered release asset with its detached signing material.
#[derive(Debug, Clone, Default)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub artifact_url: Option<String>,
    pub signature_url: Option<String>,
    pub certificate_url: Option<String>,
}

impl ArtifactDescriptor {
    /// The artifact URL, or an error naming what is missing.
    pub fn require_artifact_url(&self) -> Result<&str, ResolveError> {
        self.artifact_url.as_deref().ok_or(ResolveError::IncompleteArtifact {
            name: self.name.clone(),
            missing: "artifact download URL",
        })
    }

    /// The detached signature URL, or an error naming what is missing.
    pub fn require_signature_url(&self) -> Result<&str, ResolveError> {
        self.signature_url.as_deref().ok_or(ResolveError::IncompleteArtifact {
            name: self.name.clone(),
            missing: "detached signature (.sig)",
        })
    }

    /// The certificate URL, or an error naming what is missing.
    pub fn require_certificate_url(&self) -> Result<&str, ResolveError> {
        self.certificate_url.as_deref().ok_or(ResolveError::IncompleteArtifact {
            name: self.name.clone(),
            missing: "certificate (.crt)",
        })
    }
}

/// A layout step's signed link attestation.
#[derive(Debug, Clone)]
pub struct LinkDescriptor {
    pub step_name: String,
    pub url: String,
}

/// A functionary's public key file.
#[derive(Debug, Clone)]
pub struct FunctionaryKey {
    pub name: String,
    pub url: String,
}

/// The classified asset maps of the latest release.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRelease {
    pub tag: String,
    pub artifacts: BTreeMap<String, ArtifactDescriptor>,
    pub links: BTreeMap<String, LinkDescriptor>,
    pub keys: BTreeMap<String, FunctionaryKey>,
}

/// Resolve the latest release and classify its assets.
///
/// Paginates the releases collection until a release flagged latest is
/// found, then paginates that release's assets. Classification is by
/// filename extension: `.link` files key the link map by the first
/// dot-segment of the basename, `.sig`/`.crt` merge into the artifact
/// entry keyed by basename without extension, `.pub` files populate the
/// functionary key map, and anything else is the artifact itself.
pub fn resolve(query: &dyn ReleaseQuery) -> Result<ResolvedRelease, ResolveError> {
    let tag = find_latest_tag(query)?;

    let mut resolved = ResolvedRelease {
        tag: tag.clone(),
        ..Default::default()
    };

    let mut cursor: Option<String> = None;
    loop {
        let page = query.release_assets(&tag, cursor.as_deref())?;
        for asset in &page.nodes {
            classify_asset(&mut resolved, &asset.name, &asset.download_url);
        }
        if !page.has_next_page {
            break;
        }
        cursor = page.end_cursor;
    }

    Ok(resolved)
}

/// Walk release pages until the entry flagged latest is found.
fn find_latest_tag(query: &dyn ReleaseQuery) -> Result<String, ResolveError> {
    let mut cursor: Option<String> = None;
    loop {
        let page = query.releases(cursor.as_deref())?;
        if let Some(latest) = page.nodes.iter().find(|r| r.is_latest) {
            return Ok(latest.tag_name.clone());
        }
        if !page.has_next_page {
            return Err(ResolveError::NoLatestRelease);
        }
        cursor = page.end_cursor;
    }
}

/// Classify a single asset by filename extension.
fn classify_asset(resolved: &mut ResolvedRelease, name: &str, url: &str) {
    let path = Path::new(name);
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let root = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_owned();

    match extension {
        "link" => {
            // The base step name is the first dot-segment of the
            // basename: "compile.c1ae1e44.link" attests step "compile".
            let step_name = root.split('.').next().unwrap_or(&root).to_owned();
            resolved.links.insert(
                step_name.clone(),
                LinkDescriptor {
                    step_name,
                    url: url.to_owned(),
                },
            );
        }
        "pub" => {
            resolved.keys.insert(
                root.clone(),
                FunctionaryKey {
                    name: root,
                    url: url.to_owned(),
                },
            );
        }
        "sig" => {
            artifact_entry(resolved, &root).signature_url = Some(url.to_owned());
        }
        "crt" => {
            artifact_entry(resolved, &root).certificate_url = Some(url.to_owned());
        }
        _ => {
            artifact_entry(resolved, name).artifact_url = Some(url.to_owned());
        }
    }
}

fn artifact_entry<'a>(resolved: &'a mut ResolvedRelease, name: &str) -> &'a mut ArtifactDescriptor {
    resolved
        .artifacts
        .entry(name.to_owned())
        .or_insert_with(|| ArtifactDescriptor {
            name: name.to_owned(),
            ..Default::default()
        })
}
