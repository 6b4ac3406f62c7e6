//! Aggregated error taxonomy for the plugin runtime.
//!
//! Every component error enum implements `.code()` with a stable
//! `PLUGIN_{SUBSYSTEM}_{CODE}` string so operators can grep logs without
//! depending on the Rust type. [`PluginError`] aggregates them for callers
//! that want one type to match on.

use crate::loader::LoaderError;
use crate::resolver::ResolverError;
use crate::revocation::RevocationError;
use crate::services::ServiceError;
use crate::version::{RangeError, VersionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityViolationKind {
    InvalidSignature,
    UnsignedBundle,
    UntrustedPublisher,
    Revoked,
    PermissionDenied,
}

impl SecurityViolationKind {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidSignature => "PLUGIN_SECURITY_INVALID_SIGNATURE",
            Self::UnsignedBundle => "PLUGIN_SECURITY_UNSIGNED_BUNDLE",
            Self::UntrustedPublisher => "PLUGIN_SECURITY_UNTRUSTED_PUBLISHER",
            Self::Revoked => "PLUGIN_SECURITY_REVOKED",
            Self::PermissionDenied => "PLUGIN_SECURITY_PERMISSION_DENIED",
        }
    }
}

impl std::fmt::Display for SecurityViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::InvalidSignature => "invalid signature",
            Self::UnsignedBundle => "unsigned bundle",
            Self::UntrustedPublisher => "untrusted publisher",
            Self::Revoked => "revoked",
            Self::PermissionDenied => "permission denied",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("bundle not found: {0}")]
    BundleNotFound(String),

    #[error("invalid state transition for bundle {id}: {from} -> {to}")]
    InvalidStateTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("lifecycle error for bundle {id} during {phase}: {cause}")]
    LifecycleError {
        id: String,
        phase: String,
        cause: String,
    },

    #[error("dependency unsatisfied for bundle {id}: {reason}")]
    DependencyUnsatisfied { id: String, reason: String },

    #[error("circular dependency detected among: {}", participants.join(", "))]
    CircularDependency { participants: Vec<String> },

    #[error("security violation for bundle {id}: {kind}")]
    SecurityViolation {
        id: String,
        kind: SecurityViolationKind,
    },

    #[error(transparent)]
    Revocation(#[from] RevocationError),

    #[error("already registered: {service_type} / {provider_id}")]
    AlreadyRegistered {
        service_type: String,
        provider_id: String,
    },

    #[error("required argument missing: {0}")]
    NullArgument(&'static str),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Loader(#[from] LoaderError),
}

impl PluginError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Version(e) => e.code(),
            Self::Range(e) => e.code(),
            Self::BundleNotFound(_) => "PLUGIN_REGISTRY_NOT_FOUND",
            Self::InvalidStateTransition { .. } => "PLUGIN_LIFECYCLE_INVALID_TRANSITION",
            Self::LifecycleError { .. } => "PLUGIN_LIFECYCLE_CALLBACK_FAILED",
            Self::DependencyUnsatisfied { .. } => "PLUGIN_RESOLVER_DEPENDENCY_UNSATISFIED",
            Self::CircularDependency { .. } => "PLUGIN_RESOLVER_CIRCULAR_DEPENDENCY",
            Self::SecurityViolation { kind, .. } => kind.code(),
            Self::Revocation(e) => e.code(),
            Self::AlreadyRegistered { .. } => "PLUGIN_SERVICE_ALREADY_REGISTERED",
            Self::NullArgument(_) => "PLUGIN_ARG_NULL",
            Self::Resolver(e) => e.code(),
            Self::Service(e) => e.code(),
            Self::Loader(e) => e.code(),
        }
    }

    #[must_use]
    pub fn bundle_not_found(id: impl Into<String>) -> Self {
        Self::BundleNotFound(id.into())
    }

    #[must_use]
    pub fn invalid_state_transition(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            id: id.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    #[must_use]
    pub fn lifecycle_error(
        id: impl Into<String>,
        phase: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self::LifecycleError {
            id: id.into(),
            phase: phase.into(),
            cause: cause.into(),
        }
    }

    #[must_use]
    pub fn dependency_unsatisfied(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyUnsatisfied {
            id: id.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn circular_dependency(participants: Vec<String>) -> Self {
        Self::CircularDependency { participants }
    }

    #[must_use]
    pub fn security_violation(id: impl Into<String>, kind: SecurityViolationKind) -> Self {
        Self::SecurityViolation {
            id: id.into(),
            kind,
        }
    }
}
