//! Error taxonomy shared by every Pan Bagnat process.
//!
//! Database sentinels are produced here (unique violation, FK violation,
//! row-not-found) so the store adapters never leak raw `sqlx` errors to
//! HTTP handlers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid pagination token")]
    PaginationTokenInvalid,

    #[error("module is already cloned")]
    ModuleAlreadyCloned,

    #[error("module is not cloned yet")]
    ModuleNotCloned,

    #[error("module access secret is not configured")]
    ModuleAccessSecretMissing,

    #[error("operation would remove the last admin")]
    WouldRemoveLastAdmin,

    #[error("docker daemon unavailable: {0}")]
    DockerUnavailable(String),

    #[error("module upstream error")]
    UpstreamBadGateway,

    #[error("net-controller unavailable")]
    NetControllerUnavailable,

    #[error("command `{command}` exited with {code}: {output}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

/// Postgres error code for unique-constraint violations.
const UNIQUE_VIOLATION: &str = "23505";
/// Postgres error code for foreign-key violations.
const FK_VIOLATION: &str = "23503";

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(UNIQUE_VIOLATION) => Error::AlreadyExists(db.message().to_string()),
                Some(FK_VIOLATION) => Error::Conflict(db.message().to_string()),
                _ => Error::Database(e),
            },
            _ => Error::Database(e),
        }
    }
}

impl Error {
    /// HTTP status code this error maps to at an API boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::AlreadyExists(_) => 409,
            Error::InvalidInput(_) => 400,
            Error::Conflict(_) | Error::ModuleAlreadyCloned => 409,
            Error::ModuleNotCloned => 409,
            Error::PaginationTokenInvalid => 400,
            Error::ModuleAccessSecretMissing => 503,
            Error::WouldRemoveLastAdmin => 409,
            Error::UpstreamBadGateway => 502,
            Error::NetControllerUnavailable => 502,
            Error::DockerUnavailable(_) => 502,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::ModuleAlreadyCloned.http_status(), 409);
        assert_eq!(Error::PaginationTokenInvalid.http_status(), 400);
        assert_eq!(Error::UpstreamBadGateway.http_status(), 502);
        assert_eq!(Error::ModuleAccessSecretMissing.http_status(), 503);
    }
}
