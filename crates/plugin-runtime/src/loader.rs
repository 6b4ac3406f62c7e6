//! Bundle Loader (component 4.2): discovers bundle artifacts on disk,
//! parses their manifest, gates them through signature verification and
//! revocation, and exposes per-bundle namespace isolation.
//!
//! The staged discover -> verify -> gate pipeline follows
//! `connector/activation_pipeline.rs`'s pattern of a pure function walking
//! fixed stages with early return on failure. Manifest parsing reuses the
//! teacher's `config.rs` TOML-load idiom (`std::fs::read_to_string` +
//! `toml::from_str` mapped into a `thiserror` variant).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;

use crate::context::Permission;
use crate::error::SecurityViolationKind;
use crate::registry::{BundleContainer, BundleDescriptor, DependencyDeclaration};
use crate::revocation::{compute_fingerprint, RevocationList};
use crate::signature::{self, SignatureManifest, TrustPolicy};
use crate::version::{Range, Version};

#[derive(Debug, Deserialize)]
struct ManifestToml {
    id: String,
    human_name: String,
    version: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    min_host_version: Option<String>,
    #[serde(default)]
    dependencies: Vec<ManifestDependency>,
    #[serde(default)]
    permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ManifestDependency {
    target_id: String,
    range: String,
    #[serde(default)]
    optional: bool,
}

const DEFAULT_HOST_API_PREFIXES: &[&str] = &["plugin-api."];

pub struct BundleLoader {
    search_paths: Vec<PathBuf>,
    host_api_prefixes: Vec<String>,
    trust_policy: TrustPolicy,
    revocation_list: RevocationList,
}

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("failed to read manifest at {0}: {1}")]
    ReadFailed(PathBuf, String),
    #[error("failed to parse manifest at {0}: {1}")]
    ParseFailed(PathBuf, String),
    #[error("invalid version in manifest {0}: {1}")]
    InvalidVersion(PathBuf, String),
    #[error("security violation for bundle {id}: {kind}")]
    SecurityViolation { id: String, kind: SecurityViolationKind },
}

impl LoaderError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ReadFailed(..) => "PLUGIN_LOADER_MANIFEST_READ_FAILED",
            Self::ParseFailed(..) => "PLUGIN_LOADER_MANIFEST_PARSE_FAILED",
            Self::InvalidVersion(..) => "PLUGIN_LOADER_MANIFEST_INVALID_VERSION",
            Self::SecurityViolation { kind, .. } => kind.code(),
        }
    }
}

/// A bundle's own exported symbol table plus resolution rules against the
/// host. No dynamic-library loading occurs; symbols are names read from the
/// bundle's `lib/` directory, sufficient to exercise the resolution-order
/// contract without platform-specific unsafe code.
pub struct BundleNamespace {
    own_symbols: HashSet<String>,
    host_api_prefixes: Vec<String>,
}

impl BundleNamespace {
    #[must_use]
    pub fn is_host_api(&self, symbol: &str) -> bool {
        self.host_api_prefixes.iter().any(|p| symbol.starts_with(p.as_str()))
    }

    /// Resolution order: host API allow-list, then the bundle's own
    /// symbols, then (implicitly, by returning `false`) fallback to host.
    #[must_use]
    pub fn resolves_locally(&self, symbol: &str) -> bool {
        !self.is_host_api(symbol) && self.own_symbols.contains(symbol)
    }

    pub fn close(self) {
        drop(self);
    }
}

pub struct DiscoveredBundle {
    pub container: BundleContainer,
    pub namespace: BundleNamespace,
}

impl BundleLoader {
    #[must_use]
    pub fn new(search_paths: Vec<PathBuf>, trust_policy: TrustPolicy, revocation_list: RevocationList) -> Self {
        Self {
            search_paths,
            host_api_prefixes: DEFAULT_HOST_API_PREFIXES.iter().map(|s| s.to_string()).collect(),
            trust_policy,
            revocation_list,
        }
    }

    pub fn add_host_api_prefix(&mut self, prefix: &str) {
        self.host_api_prefixes.push(prefix.to_string());
    }

    #[must_use]
    pub fn is_host_api(&self, symbol: &str) -> bool {
        self.host_api_prefixes.iter().any(|p| symbol.starts_with(p.as_str()))
    }

    /// Discovers every bundle under the configured search paths. A bundle
    /// that fails to parse or fails the signature/revocation gate is
    /// skipped and logged; it never stops discovery of the rest of the
    /// batch (a per-bundle failure is never fatal to the manager).
    pub fn discover_all(&self) -> Result<Vec<DiscoveredBundle>, LoaderError> {
        let mut found = Vec::new();
        for root in &self.search_paths {
            if !root.is_dir() {
                continue;
            }
            let Ok(entries) = std::fs::read_dir(root) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && path.join("manifest.toml").exists() {
                    match self.load_one(&path) {
                        Ok(bundle) => found.push(bundle),
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "bundle failed to load; skipping");
                        }
                    }
                }
            }
        }
        found.sort_by(|a, b| a.container.descriptor.id.cmp(&b.container.descriptor.id));
        Ok(found)
    }

    /// As [`discover_all`](Self::discover_all), filtered by host-version
    /// compatibility.
    pub fn discover_compatible(&self, host_version: &Version) -> Result<Vec<DiscoveredBundle>, LoaderError> {
        Ok(self
            .discover_all()?
            .into_iter()
            .filter(|b| is_version_compatible(host_version, Some(&b.container.descriptor.min_host_version)))
            .collect())
    }

    pub fn reload(&self) -> Result<Vec<DiscoveredBundle>, LoaderError> {
        self.discover_all()
    }

    fn load_one(&self, dir: &Path) -> Result<DiscoveredBundle, LoaderError> {
        let manifest_path = dir.join("manifest.toml");
        let content = std::fs::read_to_string(&manifest_path)
            .map_err(|e| LoaderError::ReadFailed(manifest_path.clone(), e.to_string()))?;
        let manifest: ManifestToml = toml::from_str(&content)
            .map_err(|e| LoaderError::ParseFailed(manifest_path.clone(), e.to_string()))?;

        let version = manifest
            .version
            .parse::<Version>()
            .map_err(|e| LoaderError::InvalidVersion(manifest_path.clone(), e.to_string()))?;
        let min_host_version = match manifest.min_host_version {
            Some(raw) => raw
                .parse::<Version>()
                .map_err(|e| LoaderError::InvalidVersion(manifest_path.clone(), e.to_string()))?,
            None => Version::new(0, 0, 0),
        };

        let mut dependencies = Vec::with_capacity(manifest.dependencies.len());
        for dep in &manifest.dependencies {
            let range = dep
                .range
                .parse::<Range>()
                .map_err(|e| LoaderError::InvalidVersion(manifest_path.clone(), e.to_string()))?;
            dependencies.push(DependencyDeclaration {
                target_id: dep.target_id.clone(),
                range,
                optional: dep.optional,
            });
        }

        self.gate_signature_and_revocation(&manifest.id, dir)?;

        let descriptor = BundleDescriptor {
            id: manifest.id.clone(),
            human_name: manifest.human_name,
            version,
            summary: manifest.summary,
            author: manifest.author,
            min_host_version,
        };

        let mut container = BundleContainer::new(descriptor, dependencies);
        container.artifact_path = Some(dir.to_path_buf());

        let own_symbols = list_lib_symbols(dir);
        let namespace = BundleNamespace {
            own_symbols,
            host_api_prefixes: self.host_api_prefixes.clone(),
        };

        Ok(DiscoveredBundle { container, namespace })
    }

    fn gate_signature_and_revocation(&self, bundle_id: &str, dir: &Path) -> Result<(), LoaderError> {
        let signature_path = dir.join("signature.toml");
        let manifest: Option<SignatureManifest> = if signature_path.exists() {
            let content = std::fs::read_to_string(&signature_path)
                .map_err(|e| LoaderError::ReadFailed(signature_path.clone(), e.to_string()))?;
            Some(
                toml::from_str(&content)
                    .map_err(|e| LoaderError::ParseFailed(signature_path.clone(), e.to_string()))?,
            )
        } else {
            None
        };

        let artifact_bytes = manifest_bytes_for_digest(dir);
        let result = signature::verify(&artifact_bytes, manifest.as_ref(), &self.trust_policy, Utc::now());
        if !result.acceptable {
            let kind = match result.outcome {
                signature::VerificationOutcome::Unsigned => SecurityViolationKind::UnsignedBundle,
                signature::VerificationOutcome::Invalid { .. } => SecurityViolationKind::InvalidSignature,
                signature::VerificationOutcome::Untrusted { .. } => SecurityViolationKind::UntrustedPublisher,
                signature::VerificationOutcome::Trusted { .. } => unreachable!("trusted is always acceptable"),
            };
            return Err(LoaderError::SecurityViolation {
                id: bundle_id.to_string(),
                kind,
            });
        }

        if let Some(manifest) = &manifest {
            if let Some(fingerprint) = manifest.fingerprint() {
                if self.revocation_list.is_revoked(&fingerprint) {
                    return Err(LoaderError::SecurityViolation {
                        id: bundle_id.to_string(),
                        kind: SecurityViolationKind::Revoked,
                    });
                }
            }
        }

        Ok(())
    }
}

fn manifest_bytes_for_digest(dir: &Path) -> Vec<u8> {
    std::fs::read(dir.join("manifest.toml")).unwrap_or_default()
}

fn list_lib_symbols(dir: &Path) -> HashSet<String> {
    let lib_dir = dir.join("lib");
    let Ok(entries) = std::fs::read_dir(lib_dir) else {
        return HashSet::new();
    };
    entries
        .flatten()
        .filter_map(|e| e.path().file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect()
}

/// `current >= min`, tolerant of different segment counts. `min` absent is
/// always satisfied.
#[must_use]
pub fn is_version_compatible(current: &Version, min: Option<&Version>) -> bool {
    current.is_compatible_with_min(min)
}

#[must_use]
pub fn permission_from_str(name: &str) -> Option<Permission> {
    match name {
        "DATA_READ" => Some(Permission::DataRead),
        "DATA_WRITE" => Some(Permission::DataWrite),
        "NETWORK" => Some(Permission::Network),
        "FILESYSTEM" => Some(Permission::Filesystem),
        "UI_EXTENSION" => Some(Permission::UiExtension),
        "UI_MODIFY" => Some(Permission::UiModify),
        "EXTERNAL_API" => Some(Permission::ExternalApi),
        "HMRC_API" => Some(Permission::HmrcApi),
        "SERVICE_PROVIDER" => Some(Permission::ServiceProvider),
        "EVENT_PUBLISH" => Some(Permission::EventPublish),
        _ => None,
    }
}

#[must_use]
pub fn manifest_permissions(manifest_permission_names: &[String]) -> Vec<Permission> {
    manifest_permission_names
        .iter()
        .filter_map(|name| permission_from_str(name))
        .collect()
}
