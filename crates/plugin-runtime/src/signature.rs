//! Signature verification against a configured trust list (component 4.3).
//!
//! Grounded on `supply_chain/provenance_gate.rs`'s pure `evaluate_gate`
//! pattern: the policy and the artifact are both plain data, and a single
//! free function folds them into a decision with no side effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub subject: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl Certificate {
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.not_before && now <= self.not_after
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureManifest {
    /// Digest of the signed artifact contents, `sha256:<hex>` form.
    pub manifest_digest: String,
    pub certificate_chain: Vec<Certificate>,
}

impl SignatureManifest {
    #[must_use]
    pub fn signer(&self) -> Option<&Certificate> {
        self.certificate_chain.first()
    }

    #[must_use]
    pub fn fingerprint(&self) -> Option<String> {
        self.signer().map(|c| {
            let digest = Sha256::digest(c.subject.as_bytes());
            format!("sha256:{}", hex::encode(digest))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Trusted { signer_dn: String },
    Untrusted { signer_dn: String },
    Invalid { reason: String },
    Unsigned,
}

#[derive(Debug, Clone)]
pub struct TrustPolicy {
    pub require_signature: bool,
    pub trust_only: bool,
    pub trusted_publishers: Vec<String>,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            require_signature: false,
            trust_only: false,
            trusted_publishers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub outcome: VerificationOutcome,
    pub acceptable: bool,
}

/// Verifies `artifact_digest` against an (optional) detached `manifest`
/// under `policy`, computing the actual digest of the artifact bytes.
pub fn verify(
    artifact_bytes: &[u8],
    manifest: Option<&SignatureManifest>,
    policy: &TrustPolicy,
    now: DateTime<Utc>,
) -> VerificationResult {
    let Some(manifest) = manifest else {
        let outcome = VerificationOutcome::Unsigned;
        let acceptable = !policy.require_signature;
        return VerificationResult { outcome, acceptable };
    };

    let actual_digest = format!("sha256:{}", hex::encode(Sha256::digest(artifact_bytes)));
    if actual_digest != manifest.manifest_digest {
        let outcome = VerificationOutcome::Invalid {
            reason: "manifest digest does not match artifact contents".to_string(),
        };
        return VerificationResult {
            outcome,
            acceptable: false,
        };
    }

    let Some(signer) = manifest.signer() else {
        let outcome = VerificationOutcome::Invalid {
            reason: "signature manifest has an empty certificate chain".to_string(),
        };
        return VerificationResult {
            outcome,
            acceptable: false,
        };
    };

    if manifest.certificate_chain.iter().any(|c| !c.is_valid_at(now)) {
        let outcome = VerificationOutcome::Invalid {
            reason: "certificate chain contains an expired or not-yet-valid certificate"
                .to_string(),
        };
        return VerificationResult {
            outcome,
            acceptable: false,
        };
    }

    let trusted = policy
        .trusted_publishers
        .iter()
        .any(|dn| dn == &signer.subject);

    if trusted {
        VerificationResult {
            outcome: VerificationOutcome::Trusted {
                signer_dn: signer.subject.clone(),
            },
            acceptable: true,
        }
    } else {
        let acceptable = !policy.trust_only;
        VerificationResult {
            outcome: VerificationOutcome::Untrusted {
                signer_dn: signer.subject.clone(),
            },
            acceptable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cert(subject: &str, now: DateTime<Utc>) -> Certificate {
        Certificate {
            subject: subject.to_string(),
            not_before: now - Duration::days(1),
            not_after: now + Duration::days(365),
        }
    }

    fn manifest_for(bytes: &[u8], signer: Certificate) -> SignatureManifest {
        SignatureManifest {
            manifest_digest: format!("sha256:{}", hex::encode(Sha256::digest(bytes))),
            certificate_chain: vec![signer],
        }
    }

    #[test]
    fn unsigned_is_acceptable_unless_required() {
        let now = Utc::now();
        let lax = TrustPolicy::default();
        let result = verify(b"artifact", None, &lax, now);
        assert_eq!(result.outcome, VerificationOutcome::Unsigned);
        assert!(result.acceptable);

        let strict = TrustPolicy {
            require_signature: true,
            ..Default::default()
        };
        let result = verify(b"artifact", None, &strict, now);
        assert!(!result.acceptable);
    }

    #[test]
    fn trusted_publisher_matches() {
        let now = Utc::now();
        let signer = cert("CN=Acme Plugins", now);
        let manifest = manifest_for(b"artifact", signer);
        let policy = TrustPolicy {
            require_signature: true,
            trust_only: false,
            trusted_publishers: vec!["CN=Acme Plugins".to_string()],
        };
        let result = verify(b"artifact", Some(&manifest), &policy, now);
        assert!(matches!(result.outcome, VerificationOutcome::Trusted { .. }));
        assert!(result.acceptable);
    }

    #[test]
    fn untrusted_publisher_rejected_under_trust_only() {
        let now = Utc::now();
        let signer = cert("CN=Random Dev", now);
        let manifest = manifest_for(b"artifact", signer);
        let policy = TrustPolicy {
            require_signature: true,
            trust_only: true,
            trusted_publishers: vec!["CN=Acme Plugins".to_string()],
        };
        let result = verify(b"artifact", Some(&manifest), &policy, now);
        assert!(matches!(result.outcome, VerificationOutcome::Untrusted { .. }));
        assert!(!result.acceptable);
    }

    #[test]
    fn digest_mismatch_is_invalid() {
        let now = Utc::now();
        let signer = cert("CN=Acme", now);
        let manifest = manifest_for(b"other-bytes", signer);
        let result = verify(b"artifact", Some(&manifest), &TrustPolicy::default(), now);
        assert!(matches!(result.outcome, VerificationOutcome::Invalid { .. }));
        assert!(!result.acceptable);
    }

    #[test]
    fn expired_certificate_is_invalid() {
        let now = Utc::now();
        let expired = Certificate {
            subject: "CN=Acme".to_string(),
            not_before: now - Duration::days(730),
            not_after: now - Duration::days(365),
        };
        let manifest = manifest_for(b"artifact", expired);
        let result = verify(b"artifact", Some(&manifest), &TrustPolicy::default(), now);
        assert!(matches!(result.outcome, VerificationOutcome::Invalid { .. }));
    }
}
