//! Persistence error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{0} not found")]
    NotFound(String),

    /// A conditional write lost a race (e.g. the retry lease was taken over).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A write referenced a row that no longer exists, e.g. a retry task
    /// for an endpoint deleted mid-flight.
    #[error("missing reference: {0}")]
    MissingReference(String),

    /// A stored value could not be mapped back into the domain.
    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

impl StoreError {
    /// Maps a write error, separating foreign key violations from other
    /// database failures.
    pub(crate) fn from_write(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
                Self::MissingReference(db.message().to_string())
            }
            _ => Self::Database(err),
        }
    }

    /// Failures worth retrying: the database was unreachable or the
    /// transaction aborted. Logical rejections are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_database_errors_are_transient() {
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(StoreError::from_write(sqlx::Error::PoolClosed).is_transient());
        assert!(!StoreError::Conflict("lease lost".into()).is_transient());
        assert!(!StoreError::MissingReference("endpoint".into()).is_transient());
        assert!(!StoreError::NotFound("task".into()).is_transient());
    }
}
