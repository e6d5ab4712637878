use thiserror::Error;

/// Typed failures raised by the migration pipeline.
///
/// Functions in this crate return `anyhow::Result`; callers that need to
/// branch on the failure kind use `error.downcast_ref::<MigrationError>()`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The alias service refused a write because the path already resolves
    /// to another destination.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl MigrationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
        }
    }
}

/// Returns the typed migration error carried by `error`, if any.
pub fn migration_error(error: &anyhow::Error) -> Option<&MigrationError> {
    error.downcast_ref::<MigrationError>()
}
