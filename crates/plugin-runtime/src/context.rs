//! Bundle Context (component 4.11): a per-bundle handle exposing host
//! version, a sandboxed data directory, and granted permissions.
//!
//! The id-sanitization and path-containment rules here are the runtime's
//! path-traversal guard (invariant 5 in the component data model); they are
//! original to this spec rather than lifted from the teacher, which has no
//! equivalent sandboxed-storage concept in the retrieved files.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{PluginError, SecurityViolationKind};
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    DataRead,
    DataWrite,
    Network,
    Filesystem,
    UiExtension,
    UiModify,
    ExternalApi,
    HmrcApi,
    ServiceProvider,
    EventPublish,
}

#[derive(Debug, Clone)]
pub struct BundleContext {
    pub host_version: Version,
    pub data_directory: PathBuf,
    pub granted_permissions: BTreeSet<Permission>,
}

impl BundleContext {
    #[must_use]
    pub fn has(&self, permission: Permission) -> bool {
        self.granted_permissions.contains(&permission)
    }

    pub fn require(&self, bundle_id: &str, permission: Permission) -> Result<(), PluginError> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(PluginError::security_violation(
                bundle_id,
                SecurityViolationKind::PermissionDenied,
            ))
        }
    }
}

/// Replaces any byte outside `[A-Za-z0-9._-]` with `_`.
#[must_use]
pub fn sanitize_bundle_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct BundleContextBuilder {
    host_version: Version,
    base_data_directory: PathBuf,
    bundle_id: String,
    granted_permissions: BTreeSet<Permission>,
}

impl BundleContextBuilder {
    #[must_use]
    pub fn new(host_version: Version, base_data_directory: PathBuf, bundle_id: &str) -> Self {
        Self {
            host_version,
            base_data_directory,
            bundle_id: bundle_id.to_string(),
            granted_permissions: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.granted_permissions.extend(permissions);
        self
    }

    pub fn build(self) -> Result<BundleContext, PluginError> {
        let sanitized = sanitize_bundle_id(&self.bundle_id);
        let data_directory = self.base_data_directory.join(&sanitized);

        let normalized_base = normalize(&self.base_data_directory);
        let normalized_data = normalize(&data_directory);
        if !normalized_data.starts_with(&normalized_base) {
            return Err(PluginError::security_violation(
                self.bundle_id,
                SecurityViolationKind::PermissionDenied,
            ));
        }

        std::fs::create_dir_all(&data_directory).map_err(|_| {
            PluginError::security_violation(
                self.bundle_id.clone(),
                SecurityViolationKind::PermissionDenied,
            )
        })?;

        Ok(BundleContext {
            host_version: self.host_version,
            data_directory,
            granted_permissions: self.granted_permissions,
        })
    }
}

/// Lexical normalization (not symlink-resolving `canonicalize`, which would
/// require the directory to already exist): collapses `.` components,
/// consumes `..` against the preceding component, keeps everything else.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
