use std::error::Error as StdError;

type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

/// Coarse classification of a [`SessionError`], stable across variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Serialization,
    InvalidInput,
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A session payload could not be written or read back.
    #[error("session serialization failed: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backing store could not be reached.
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::Serialization { .. } => ErrorCode::Serialization,
            SessionError::InvalidArgument(_) => ErrorCode::InvalidInput,
            SessionError::Unavailable(_) => ErrorCode::Unavailable,
        }
    }

    /// True when a stored payload was unreadable, as opposed to absent.
    pub fn is_serialization(&self) -> bool {
        self.code() == ErrorCode::Serialization
    }

    pub(crate) fn serialization(message: impl Into<String>) -> Self {
        SessionError::Serialization {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn serialization_caused_by(
        message: impl Into<String>,
        cause: impl StdError + Send + Sync + 'static,
    ) -> Self {
        SessionError::Serialization {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

pub(crate) fn serde_error(err: serde_json::Error) -> SessionError {
    SessionError::serialization_caused_by(err.to_string(), err)
}

pub(crate) fn io_error(context: &str, err: std::io::Error) -> SessionError {
    SessionError::serialization_caused_by(format!("{context}: {err}"), err)
}

pub(crate) fn invalid_argument(message: impl Into<String>) -> SessionError {
    SessionError::InvalidArgument(message.into())
}

#[cfg(feature = "redis")]
pub(crate) fn redis_error(err: redis::RedisError) -> SessionError {
    SessionError::Unavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_errors_keep_their_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err = io_error("reading session id", io);
        assert_eq!(err.code(), ErrorCode::Serialization);
        assert!(err.is_serialization());
        let cause = err.source().expect("cause retained");
        assert!(cause.to_string().contains("short read"));
    }

    #[test]
    fn invalid_argument_maps_to_invalid_input() {
        let err = invalid_argument("attribute name must not be empty");
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert!(!err.is_serialization());
    }
}
