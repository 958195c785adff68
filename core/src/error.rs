//! Structured error types for the Agora kernel
//!
//! Every failure a kernel primitive can report is enumerated here. Primitives
//! never partially succeed: on any of these errors the store, ledger and rate
//! tracker are exactly as they were before the call.

use std::time::Duration;
use thiserror::Error;

/// Primary error type for kernel operations
#[derive(Error, Debug)]
pub enum KernelError {
    // =========================================================================
    // Lookup / namespace errors
    // =========================================================================
    /// Artifact does not exist
    #[error("not found: {id}")]
    NotFound { id: String },

    /// An id was written with a different type than it already carries
    #[error("type is immutable: {id} is {existing}, rejected {requested}")]
    TypeImmutable {
        id: String,
        existing: String,
        requested: String,
    },

    /// The `genesis_` prefix is reserved for the bootstrap phase
    #[error("reserved prefix: {id}")]
    ReservedPrefix { id: String },

    /// Creation raced with an existing artifact of the same id
    #[error("id conflict: {id}")]
    IdConflict { id: String },

    // =========================================================================
    // Permission / contract errors
    // =========================================================================
    /// A contract (or default policy) denied the action
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// Nested permission checks exceeded the configured depth
    #[error("contract depth exceeded: {depth} > {max_depth}")]
    DepthExceeded { depth: u32, max_depth: u32 },

    /// Contract evaluation hit the sandbox wall-clock timeout
    #[error("contract sandbox timed out after {timeout:?}")]
    SandboxTimeout { timeout: Duration },

    /// Contract evaluation terminated abnormally
    #[error("contract error: {detail}")]
    ContractError { detail: String },

    // =========================================================================
    // Resource errors
    // =========================================================================
    /// A depletable balance would have gone negative
    #[error("insufficient {resource}: have {available}, need {requested}")]
    InsufficientResource {
        resource: String,
        available: f64,
        requested: f64,
    },

    /// A renewable resource has no capacity left in the current window
    #[error("rate limited on {resource}, retry after {retry_after:?}")]
    RateLimited {
        resource: String,
        retry_after: Duration,
    },

    // =========================================================================
    // Caller errors
    // =========================================================================
    /// Malformed or out-of-range argument
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    // =========================================================================
    // External wrappers
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl KernelError {
    /// Shorthand for the most common denial construction
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Shorthand for argument validation failures
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Check if the same call could succeed later without any input change
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::InsufficientResource { .. } | Self::Io(_)
        )
    }

    /// Suggested wait before retrying, when the kernel can compute one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Stable lowercase tag used in event payloads and logs
    pub fn taxon(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::TypeImmutable { .. } => "type_immutable",
            Self::ReservedPrefix { .. } => "reserved_prefix",
            Self::IdConflict { .. } => "id_conflict",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::SandboxTimeout { .. } => "sandbox_timeout",
            Self::ContractError { .. } => "contract_error",
            Self::InsufficientResource { .. } => "insufficient_resource",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using KernelError
pub type Result<T> = std::result::Result<T, KernelError>;
