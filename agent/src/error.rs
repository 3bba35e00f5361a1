use thiserror::Error;

/// Classification used by the router to decide what (if anything) can still
/// be written back to a caller.
///
/// Variants are checked outermost-first: a [`RelayError::BadRequest`] wrapped
/// inside a [`RelayError::LogOnly`] is a Log-Only error, not a Bad-Request,
/// because by the time it surfaced the connection had already been hijacked.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Malformed input from a client whose connection has not yet been
    /// hijacked: bad headers, bad boundary, missing filename, duplicate name
    /// detected before hijack.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Occurred after hijack (or after a response was already committed); no
    /// HTTP status can be sent to the peer. Logged and swallowed.
    #[error("log only: {0}")]
    LogOnly(#[source] Box<RelayError>),

    /// Any other failure before hijack.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn log_only(self) -> Self {
        RelayError::LogOnly(Box::new(self))
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
