//! Fingerprint-based revocation list (component 4.4).
//!
//! Restructured from the teacher's zone/monotonic-head `RevocationRegistry`
//! (`supply_chain/revocation_registry.rs`) into a flat fingerprint-set model:
//! this runtime has no zones to advance a head over, only a set of revoked
//! signer fingerprints loaded from and saved to a JSON file.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const FINGERPRINT_PREFIX: &str = "sha256:";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevokedCertificateEntry {
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub revoked_at: DateTime<Utc>,
}

impl RevokedCertificateEntry {
    /// Validates and normalizes a fingerprint before storing an entry.
    pub fn new(
        fingerprint: &str,
        reason: Option<String>,
        revoked_at: DateTime<Utc>,
    ) -> Result<Self, RevocationError> {
        let normalized = normalize_fingerprint(fingerprint)?;
        Ok(Self {
            fingerprint: normalized,
            reason,
            revoked_at,
        })
    }
}

fn normalize_fingerprint(fingerprint: &str) -> Result<String, RevocationError> {
    let lower = fingerprint.to_ascii_lowercase();
    if !lower.starts_with(FINGERPRINT_PREFIX) {
        return Err(RevocationError::BadFingerprint(fingerprint.to_string()));
    }
    let hex_part = &lower[FINGERPRINT_PREFIX.len()..];
    if hex_part.len() != 64 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(RevocationError::BadFingerprint(fingerprint.to_string()));
    }
    Ok(lower)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationList {
    pub version: u64,
    pub updated: DateTime<Utc>,
    #[serde(rename = "revoked")]
    pub entries: BTreeSet<RevokedCertificateEntry>,
}

impl RevocationList {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: 0,
            updated: Utc::now(),
            entries: BTreeSet::new(),
        }
    }

    /// Loads the list from `path`. A missing file is not an error: it is
    /// treated as an empty v0 list.
    pub fn load(path: &Path) -> Result<Self, RevocationError> {
        if !path.exists() {
            return Ok(Self::empty());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| RevocationError::ReadFailed(path.to_path_buf(), e.to_string()))?;
        let raw: RawRevocationList = serde_json::from_str(&content)
            .map_err(|e| RevocationError::ParseFailed(path.to_path_buf(), e.to_string()))?;
        raw.into_list()
    }

    pub fn save(&self, path: &Path) -> Result<(), RevocationError> {
        let body = serde_json::to_string_pretty(self)
            .map_err(|e| RevocationError::SerializeFailed(e.to_string()))?;
        std::fs::write(path, body)
            .map_err(|e| RevocationError::WriteFailed(path.to_path_buf(), e.to_string()))
    }

    #[must_use]
    pub fn is_revoked(&self, fingerprint: &str) -> bool {
        let Ok(normalized) = normalize_fingerprint(fingerprint) else {
            return false;
        };
        self.entries.iter().any(|e| e.fingerprint == normalized)
    }

    #[must_use]
    pub fn entry_for(&self, fingerprint: &str) -> Option<&RevokedCertificateEntry> {
        let normalized = normalize_fingerprint(fingerprint).ok()?;
        self.entries.iter().find(|e| e.fingerprint == normalized)
    }

    pub fn revoke(&mut self, entry: RevokedCertificateEntry) {
        self.entries.insert(entry);
        self.version += 1;
        self.updated = Utc::now();
    }
}

/// Intermediate shape used only so a missing `version` field is a hard
/// parse error even though `RevocationList` itself derives `Deserialize`
/// with no field-level validation.
#[derive(Deserialize)]
struct RawRevocationList {
    version: Option<u64>,
    updated: DateTime<Utc>,
    #[serde(default, rename = "revoked")]
    entries: BTreeSet<RevokedCertificateEntry>,
}

impl RawRevocationList {
    fn into_list(self) -> Result<RevocationList, RevocationError> {
        let version = self.version.ok_or(RevocationError::MissingVersion)?;
        Ok(RevocationList {
            version,
            updated: self.updated,
            entries: self.entries,
        })
    }
}

/// `sha256:<64 lowercase hex>` fingerprint of `bytes`.
pub fn compute_fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{FINGERPRINT_PREFIX}{}", hex::encode(digest))
}

#[derive(Debug, thiserror::Error)]
pub enum RevocationError {
    #[error("failed to read revocation list {0}: {1}")]
    ReadFailed(std::path::PathBuf, String),
    #[error("failed to parse revocation list {0}: {1}")]
    ParseFailed(std::path::PathBuf, String),
    #[error("failed to write revocation list {0}: {1}")]
    WriteFailed(std::path::PathBuf, String),
    #[error("failed to serialize revocation list: {0}")]
    SerializeFailed(String),
    #[error("revocation list missing required 'version' field")]
    MissingVersion,
    #[error("fingerprint must be 'sha256:<64 hex chars>', got: {0}")]
    BadFingerprint(String),
}

impl RevocationError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ReadFailed(..) => "PLUGIN_REVOCATION_READ_FAILED",
            Self::ParseFailed(..) => "PLUGIN_REVOCATION_PARSE_FAILED",
            Self::WriteFailed(..) => "PLUGIN_REVOCATION_WRITE_FAILED",
            Self::SerializeFailed(_) => "PLUGIN_REVOCATION_SERIALIZE_FAILED",
            Self::MissingVersion => "PLUGIN_REVOCATION_MISSING_VERSION",
            Self::BadFingerprint(_) => "PLUGIN_REVOCATION_BAD_FINGERPRINT",
        }
    }
}
