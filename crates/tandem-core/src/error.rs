use thiserror::Error;

/// Engine-level failures. Adapter failures are a separate sum ([`AdapterError`])
/// because the reconciler branches on them per mapping instead of propagating.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("remote failure: {0}")]
    Remote(String),
    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether a pass-level error must abort the whole pass instead of the
    /// current project.
    pub fn is_fatal_for_pass(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_) | Self::Configuration(_) | Self::Cancelled
        )
    }
}

impl From<AdapterError> for SyncError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Cancelled => Self::Cancelled,
            other => Self::Remote(other.to_string()),
        }
    }
}

/// Outcome sum for every remote operation. `NotFound` is terminal and drives
/// the stale-mapping deletion path; `Transient` is retried by the transport
/// and, if it still surfaces, retried on the next pass; `Permanent` abandons
/// the specific request for the pass.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("remote object not found")]
    NotFound,
    #[error("transient remote failure: {0}")]
    Transient(String),
    #[error("permanent remote failure ({status}): {detail}")]
    Permanent { status: u16, detail: String },
    #[error("remote payload could not be decoded: {0}")]
    Decode(String),
    #[error("cancelled")]
    Cancelled,
}

impl AdapterError {
    pub fn permanent(status: u16, detail: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            detail: detail.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;
