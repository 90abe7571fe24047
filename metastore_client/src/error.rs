//! Error types surfaced by the metastore client.

use std::{fmt::Display, sync::Arc};

/// Classification of a failure reported by the remote catalog service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceErrorKind {
    AccessDenied,
    EntityNotFound,
    AlreadyExists,
    InvalidInput,
    Throttling,
    Timeout,
    Internal,
    Unknown,
}

impl Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AccessDenied => "access denied",
            Self::EntityNotFound => "entity not found",
            Self::AlreadyExists => "already exists",
            Self::InvalidInput => "invalid input",
            Self::Throttling => "throttled",
            Self::Timeout => "timed out",
            Self::Internal => "internal service error",
            Self::Unknown => "unknown error",
        };
        f.write_str(s)
    }
}

/// The remote catalog service rejected or failed a request.
///
/// Cheap to clone: the underlying cause, if any, is shared.
#[derive(Debug, Clone, thiserror::Error)]
#[error("catalog service error ({kind}): {message}")]
pub struct ServiceError {
    kind: ServiceErrorKind,
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the lower-level cause of this failure.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn entity_not_found(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::EntityNotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::AlreadyExists, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::InvalidInput, message)
    }

    pub fn kind(&self) -> ServiceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl PartialEq for ServiceError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

/// Primary error type for the [`MetastoreClient`](crate::MetastoreClient)
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("waiting on catalog requests was interrupted")]
    Interrupted,

    #[error("partition segment count {configured} exceeds the catalog limit of {max}")]
    TooManySegments { configured: usize, max: usize },

    #[error("partition segment count must be at least 1")]
    NoSegments,

    #[error("segment index {index} is out of range for {total} total segments")]
    InvalidSegment { index: u32, total: u32 },

    #[error("failed to build the catalog worker pool: {0}")]
    WorkerPool(#[source] std::io::Error),
}

impl Error {
    /// The remote failure behind this error, if it came from the catalog service.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
