use thiserror::Error;

/// Typed error kinds returned by engines and surfaced by controllers.
///
/// Every kind maps to a fixed HTTP status code; controllers serialize the
/// code together with the message, so messages should be meaningful to API
/// callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Caller input is malformed or violates a normalization rule.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The target task or topic does not exist, or the topic currently has
    /// no eligible task.
    #[error("not found: {0}")]
    NotFound(String),

    /// ID uniqueness violated on insert, nonce mismatch on commit, or a
    /// claim against a task that is not in the expected state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller cancelled or the connection died mid-request. Never
    /// retried by the engine.
    #[error("client closed request: {0}")]
    ClientClosedRequest(String),

    /// The storage engine is not ready to serve requests.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status code associated with the error kind. 499 is the
    /// non-standard "client closed request" code popularized by nginx.
    pub fn code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::ClientClosedRequest(_) => 499,
            Error::ServiceUnavailable(_) => 503,
            Error::Internal(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
