//! The destination trust policy (allowlist) consumed by the
//! runtime-integrity agent.
//!
//! A policy maps file paths (or keyring names) to ordered lists of
//! accepted SHA-256 hashes. Policies load either from the current JSON
//! schema or from the legacy line format (`<hash> <path>` per line, with
//! `%keyring:` targets routed to the keyrings table), and are persisted
//! as a single whole-file overwrite only after a fully successful run.

use std::fs;
use std::io;
use std::path::Path;

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generator identifier stamped on freshly created policies.
pub const GENERATOR_FRESH: &str = "keylime-policy-importer";

/// Generator identifier stamped on policies migrated from the legacy format.
pub const GENERATOR_MIGRATION: &str = "keylime-legacy-format-upgrade";

/// Fixed destination filename for the amended policy.
pub const POLICY_FILENAME: &str = "keylime-policy.json";

/// Target prefix that routes a legacy entry into the keyrings table.
const KEYRING_PREFIX: &str = "%keyring:";

/// Errors from policy loading and persistence.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The existing policy file looked like JSON but did not parse.
    #[error("unparseable policy file: {0}")]
    Format(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Policy metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyMeta {
    /// Creation timestamp, RFC 3339.
    pub timestamp: String,

    /// Identifier of the tool that produced this policy.
    pub generator: String,
}

/// The trust policy document.
///
/// Hash lists preserve insertion order and are never deduplicated;
/// a list exists only once it has at least one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub meta: PolicyMeta,

    /// Map from file path to ordered accepted hashes.
    pub hashes: IndexMap<String, Vec<String>>,

    /// Map from keyring name to ordered accepted hashes.
    pub keyrings: IndexMap<String, Vec<String>>,
}

impl Policy {
    /// Create a fresh, empty policy stamped with the current time.
    pub fn new() -> Self {
        Self::empty(GENERATOR_FRESH)
    }

    fn empty(generator: &str) -> Self {
        Self {
            meta: PolicyMeta {
                timestamp: Utc::now().to_rfc3339(),
                generator: generator.to_owned(),
            },
            hashes: IndexMap::new(),
            keyrings: IndexMap::new(),
        }
    }

    /// Load a policy from `path`, or create a fresh one if no path given.
    ///
    /// Content starting with `{` (after leading whitespace) parses as the
    /// current JSON schema; anything else is treated as the legacy line
    /// format and migrated.
    pub fn load(path: Option<&Path>) -> Result<Self, PolicyError> {
        let Some(path) = path else {
            return Ok(Self::new());
        };

        let raw = fs::read_to_string(path)?;
        if raw.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&raw)?)
        } else {
            Ok(Self::from_legacy(&raw))
        }
    }

    /// Migrate a legacy line-format allowlist.
    ///
    /// Each non-blank line splits on the first whitespace run into
    /// (hash, target). Malformed lines are skipped with a warning, not
    /// fatal.
    pub fn from_legacy(raw: &str) -> Self {
        let mut policy = Self::empty(GENERATOR_MIGRATION);

        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((checksum, rest)) = line.split_once(char::is_whitespace) else {
                eprintln!(
                    "warning: allowlist line does not consist of hash and file path: {}",
                    line
                );
                continue;
            };
            let target = rest.trim_start();
            if target.is_empty() {
                eprintln!(
                    "warning: allowlist line does not consist of hash and file path: {}",
                    line
                );
                continue;
            }

            if let Some(keyring) = target.strip_prefix(KEYRING_PREFIX) {
                policy
                    .keyrings
                    .entry(keyring.to_owned())
                    .or_default()
                    .push(checksum.to_owned());
            } else {
                policy
                    .hashes
                    .entry(target.to_owned())
                    .or_default()
                    .push(checksum.to_owned());
            }
        }

        policy
    }

    /// Append a verified hash for `path`, creating the list if absent.
    ///
    /// Deliberately does not deduplicate; repeats are preserved.
    pub fn append(&mut self, path: &str, hash: &str) {
        self.hashes
            .entry(path.to_owned())
            .or_default()
            .push(hash.to_owned());
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Serialize the entire policy and overwrite `destination` in one write.
    pub fn persist(&self, destination: &Path) -> Result<(), PolicyError> {
        let json = self.to_json()?;
        fs::write(destination, json)?;
        Ok(())
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_policy_has_meta_and_empty_tables() {
        let policy = Policy::new();
        assert_eq!(policy.meta.generator, GENERATOR_FRESH);
        assert!(!policy.meta.timestamp.is_empty());
        assert!(policy.hashes.is_empty());
        assert!(policy.keyrings.is_empty());
    }

    #[test]
    fn append_creates_then_extends() {
        let mut policy = Policy::new();
        policy.append("/usr/bin/app", "h1");
        policy.append("/usr/bin/app", "h2");
        assert_eq!(
            policy.hashes.get("/usr/bin/app").unwrap(),
            &vec!["h1".to_owned(), "h2".to_owned()]
        );
    }

    #[test]
    fn append_does_not_deduplicate() {
        let mut policy = Policy::new();
        policy.append("/bin/x", "same");
        policy.append("/bin/x", "same");
        assert_eq!(policy.hashes.get("/bin/x").unwrap().len(), 2);
    }

    #[test]
    fn scenario_a_single_append_serializes() {
        let mut policy = Policy::new();
        policy.append("/usr/bin/app", "abc123");
        let json = policy.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["hashes"]["/usr/bin/app"][0], "abc123");
    }

    #[test]
    fn scenario_b_legacy_migration() {
        let policy = Policy::from_legacy("deadbeef /bin/x\nfeedface %keyring:trusted\n");
        assert_eq!(policy.hashes.get("/bin/x").unwrap(), &vec!["deadbeef".to_owned()]);
        assert_eq!(
            policy.keyrings.get("trusted").unwrap(),
            &vec!["feedface".to_owned()]
        );
        assert_eq!(policy.meta.generator, GENERATOR_MIGRATION);
    }

    #[test]
    fn legacy_skips_malformed_lines() {
        let policy = Policy::from_legacy("justonehash\n\nabc123 /bin/ok\n");
        assert_eq!(policy.hashes.len(), 1);
        assert!(policy.hashes.contains_key("/bin/ok"));
    }

    #[test]
    fn legacy_splits_on_first_whitespace_run_only() {
        let policy = Policy::from_legacy("abc123   /path with spaces\n");
        assert_eq!(
            policy.hashes.get("/path with spaces").unwrap(),
            &vec!["abc123".to_owned()]
        );
    }

    #[test]
    fn legacy_preserves_line_order() {
        let policy = Policy::from_legacy("h1 /b\nh2 /a\nh3 /b\n");
        let paths: Vec<_> = policy.hashes.keys().collect();
        assert_eq!(paths, vec!["/b", "/a"]);
        assert_eq!(policy.hashes.get("/b").unwrap(), &vec!["h1".to_owned(), "h3".to_owned()]);
    }

    #[test]
    fn migration_is_idempotent_under_reparse() {
        let migrated = Policy::from_legacy("deadbeef /bin/x\nfeedface %keyring:trusted\n");
        let json = migrated.to_json().unwrap();
        let reparsed: Policy = serde_json::from_str(&json).unwrap();
        let rejson = reparsed.to_json().unwrap();
        assert_eq!(json, rejson);
        assert_eq!(reparsed.hashes, migrated.hashes);
        assert_eq!(reparsed.keyrings, migrated.keyrings);
    }

    #[test]
    fn load_json_and_legacy_and_missing() {
        let dir = tempfile::TempDir::new().unwrap();

        // Current schema
        let json_path = dir.path().join("policy.json");
        let mut policy = Policy::new();
        policy.append("/bin/app", "abc");
        policy.persist(&json_path).unwrap();
        let loaded = Policy::load(Some(&json_path)).unwrap();
        assert_eq!(loaded.hashes.get("/bin/app").unwrap(), &vec!["abc".to_owned()]);

        // Legacy
        let legacy_path = dir.path().join("allowlist.txt");
        std::fs::write(&legacy_path, "deadbeef /bin/x\n").unwrap();
        let migrated = Policy::load(Some(&legacy_path)).unwrap();
        assert!(migrated.hashes.contains_key("/bin/x"));

        // Absent path: fresh
        let fresh = Policy::load(None).unwrap();
        assert!(fresh.hashes.is_empty());
    }

    #[test]
    fn load_rejects_invalid_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Policy::load(Some(&path)).unwrap_err();
        assert!(matches!(err, PolicyError::Format(_)));
    }
}
