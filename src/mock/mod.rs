//! In-process test doubles for the network collaborators.
//!
//! Used by unit tests and the integration suites; production code never
//! constructs these.

use std::collections::HashMap;

use crate::fetch::{Fetch, FetchError};
use crate::rekor::{LogClient, LogEntry, RekorError};
use crate::release::{AssetNode, Page, ReleaseNode, ReleaseQuery, ResolveError};

/// A paginating release query over fixed collections.
pub struct MockReleaseQuery {
    releases: Vec<ReleaseNode>,
    assets: Vec<AssetNode>,
    page_size: usize,
}

impl MockReleaseQuery {
    pub fn new(releases: Vec<ReleaseNode>, assets: Vec<AssetNode>) -> Self {
        Self {
            releases,
            assets,
            page_size: 100,
        }
    }

    /// Shrink pages to force pagination in tests.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    fn page_of<T: Clone>(&self, items: &[T], cursor: Option<&str>) -> Page<T> {
        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(items.len());
        Page {
            nodes: items[start.min(items.len())..end].to_vec(),
            end_cursor: Some(end.to_string()),
            has_next_page: end < items.len(),
        }
    }
}

impl ReleaseQuery for MockReleaseQuery {
    fn releases(&self, cursor: Option<&str>) -> Result<Page<ReleaseNode>, ResolveError> {
        Ok(self.page_of(&self.releases, cursor))
    }

    fn release_assets(
        &self,
        _tag: &str,
        cursor: Option<&str>,
    ) -> Result<Page<AssetNode>, ResolveError> {
        Ok(self.page_of(&self.assets, cursor))
    }
}

/// A transparency log over fixed search results and entries.
#[derive(Default)]
pub struct MockLogClient {
    search: HashMap<String, Vec<String>>,
    entries: HashMap<String, LogEntry>,
}

impl MockLogClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_result(mut self, digest: &str, uuids: &[&str]) -> Self {
        self.search.insert(
            digest.to_owned(),
            uuids.iter().map(|u| (*u).to_owned()).collect(),
        );
        self
    }

    pub fn with_entry(mut self, entry: LogEntry) -> Self {
        self.entries.insert(entry.uuid.clone(), entry);
        self
    }
}

impl LogClient for MockLogClient {
    fn search_by_digest(&self, digest_hex: &str) -> Result<Vec<String>, RekorError> {
        Ok(self.search.get(digest_hex).cloned().unwrap_or_default())
    }

    fn fetch_entry(&self, uuid: &str) -> Result<LogEntry, RekorError> {
        self.entries
            .get(uuid)
            .cloned()
            .ok_or_else(|| RekorError::Transport(format!("no such entry: {}", uuid)))
    }
}

/// A fetcher serving fixed bodies by URL.
#[derive(Default)]
pub struct MockFetcher {
    bodies: HashMap<String, Vec<u8>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_owned(), body.to_vec());
        self
    }
}

impl Fetch for MockFetcher {
    fn bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                url: url.to_owned(),
            })
    }
}

/// Build a self-signed X.509 certificate PEM carrying `key`'s public key.
///
/// Only the SubjectPublicKeyInfo matters to the verifiers; issuer and
/// subject are left empty.
pub fn certificate_pem(key: &crate::signing::SigningKey) -> String {
    use der::asn1::BitString;
    use der::oid::ObjectIdentifier;
    use der::{Decode, Encode};
    use x509_cert::certificate::{Certificate, TbsCertificate, Version};
    use x509_cert::name::Name;
    use x509_cert::serial_number::SerialNumber;
    use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
    use x509_cert::time::Validity;

    const ECDSA_WITH_SHA256: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");

    let spki_der = key.public_spki();
    let spki = SubjectPublicKeyInfoOwned::from_der(&spki_der).expect("generated SPKI is valid");

    let algorithm = AlgorithmIdentifierOwned {
        oid: ECDSA_WITH_SHA256,
        parameters: None,
    };

    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&[1]).expect("one-byte serial"),
        signature: algorithm.clone(),
        issuer: Name::default(),
        validity: Validity::from_now(std::time::Duration::from_secs(3600))
            .expect("validity window"),
        subject: Name::default(),
        subject_public_key_info: spki,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };

    let tbs_der = tbs.to_der().expect("TBS encodes");
    let sig_b64 = key.sign(&tbs_der).expect("self-sign");
    let sig = crate::signing::decode_signature(&sig_b64).expect("signature is base64");

    let certificate = Certificate {
        tbs_certificate: tbs,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(&sig).expect("signature fits a bit string"),
    };

    crate::signing::der_to_pem(
        &certificate.to_der().expect("certificate encodes"),
        "CERTIFICATE",
    )
}
