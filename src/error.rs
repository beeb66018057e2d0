use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid {field}: {value} (expected {expected})")]
    InvalidArgument {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),

    #[error("no progress record for topic {0}")]
    RecordNotFound(i64),

    #[error("topic {0} is not in the syllabus")]
    TopicNotFound(i64),

    #[error("failed to read syllabus file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed syllabus JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(
        field: &'static str,
        value: impl ToString,
        expected: &'static str,
    ) -> Self {
        Error::InvalidArgument {
            field,
            value: value.to_string(),
            expected,
        }
    }

    /// Rejected input the caller can re-prompt for, as opposed to an I/O failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument { .. } | Error::RecordNotFound(_) | Error::TopicNotFound(_)
        )
    }
}
