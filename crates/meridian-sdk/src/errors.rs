//! Error types for the SDK.
//!
//! `SdkError` covers the full failure taxonomy: configuration loading and
//! validation, policy enforcement, handler failures, and the per-call RPC
//! errors. `MultiError` aggregates independent validation failures so a
//! single startup pass can report everything that is wrong at once.

use std::fmt;

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Unified error type for the SDK.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// A configuration artifact was absent on disk. Negotiable by policy.
    #[error("config not found: {0}")]
    ConfigNotFound(String),

    /// YAML or scalar parse failure. Fatal at startup.
    #[error("parse error: {0}")]
    Parse(String),

    /// A scheme or semantic check failed.
    #[error("validation error: {0}")]
    Validation(String),

    /// A required config source was absent, or a prohibited source was
    /// relied upon.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// The config scheme major does not match the SDK's supported major.
    #[error("incompatible config version: {0}")]
    VersionIncompatible(String),

    /// A device handler's read or write returned an error.
    #[error("handler error: {0}")]
    Handler(String),

    /// The write queue is at capacity.
    #[error("write queue is full")]
    QueueFull,

    /// A request referenced a device ID absent from the registry.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// A handler produced a value outside the reading type taxonomy, or a
    /// value a transformation cannot operate on.
    #[error("unsupported value: {0}")]
    UnsupportedValue(String),

    /// The handler does not implement the requested capability.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Aggregated validation failures.
    #[error("{0}")]
    Multi(MultiError),

    /// Server/transport failure.
    #[error("server error: {0}")]
    Server(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SdkError> for tonic::Status {
    fn from(err: SdkError) -> Self {
        match &err {
            SdkError::UnknownDevice(_) => tonic::Status::not_found(err.to_string()),
            SdkError::QueueFull => tonic::Status::resource_exhausted(err.to_string()),
            SdkError::NotSupported(_) => tonic::Status::failed_precondition(err.to_string()),
            SdkError::Validation(_) | SdkError::Multi(_) => {
                tonic::Status::invalid_argument(err.to_string())
            }
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}

/// Collects independent validation failures under a shared context label.
///
/// The full list is preserved for diagnostics; `Display` renders every
/// collected error.
#[derive(Debug, Default)]
pub struct MultiError {
    context: String,
    errors: Vec<SdkError>,
}

impl MultiError {
    /// Create a new, empty collector for the given context.
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            errors: Vec::new(),
        }
    }

    /// Add an error to the collection.
    pub fn add(&mut self, err: SdkError) {
        self.errors.push(err);
    }

    /// Add a validation error built from a message.
    pub fn add_validation(&mut self, msg: impl Into<String>) {
        self.errors.push(SdkError::Validation(msg.into()));
    }

    /// Fold another collection into this one.
    pub fn extend(&mut self, other: MultiError) {
        self.errors.extend(other.errors);
    }

    /// Whether any errors were collected.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of collected errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// The collected errors.
    pub fn errors(&self) -> &[SdkError] {
        &self.errors
    }

    /// Resolve the collection: `Ok(())` when nothing was collected,
    /// otherwise the aggregate error.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(SdkError::Multi(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} error(s)", self.context, self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n  - {}", err)?;
        }
        Ok(())
    }
}
