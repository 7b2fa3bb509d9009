//! Error types for dependency tracking
//!
//! Storage failures are always fatal to the operation that hit them and carry
//! the operation name and target id. Resolution misses never show up here:
//! they are logged and skipped where they happen.

use thiserror::Error;

/// Errors raised by the cache, materializer, queue and updater
#[derive(Error, Debug)]
pub enum DependsError {
    /// A storage statement failed while performing a named operation
    #[error("{operation} failed for {target}: {source}")]
    Storage {
        operation: &'static str,
        target: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Storage failure outside of a named operation (open, pragma, commit)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An external collaborator (algorithm catalog, group engine, ...) failed
    #[error("{collaborator} failed for {target}: {message}")]
    Collaborator {
        collaborator: &'static str,
        target: String,
        message: String,
    },

    /// A stored row could not be decoded
    #[error("Corrupt record: {0}")]
    Corruption(String),
}

impl DependsError {
    /// Build a collaborator failure
    pub fn collaborator(
        collaborator: &'static str,
        target: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        DependsError::Collaborator {
            collaborator,
            target: target.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for dependency operations
pub type DependsResult<T> = Result<T, DependsError>;

/// Attach an operation name and target id to a rusqlite result
pub trait StorageContext<T> {
    fn during(self, operation: &'static str, target: impl ToString) -> DependsResult<T>;
}

impl<T> StorageContext<T> for rusqlite::Result<T> {
    fn during(self, operation: &'static str, target: impl ToString) -> DependsResult<T> {
        self.map_err(|source| DependsError::Storage {
            operation,
            target: target.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DependsError::collaborator("group expansion", "group 7", "timeout");
        assert_eq!(err.to_string(), "group expansion failed for group 7: timeout");

        let err = DependsError::Corruption("bad event code".to_string());
        assert_eq!(err.to_string(), "Corrupt record: bad event code");
    }

    #[test]
    fn test_storage_context() {
        let res: rusqlite::Result<()> = Err(rusqlite::Error::QueryReturnedNoRows);
        let err = res.during("delete dependencies", "computation 12").unwrap_err();
        assert!(matches!(
            err,
            DependsError::Storage {
                operation: "delete dependencies",
                ..
            }
        ));
        assert!(err.to_string().starts_with("delete dependencies failed for computation 12"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DependsError = io_err.into();
        assert!(matches!(err, DependsError::Io(_)));
    }
}
