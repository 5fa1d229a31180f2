use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An engine callback failed. `code` is an errno-style value, 0 if not applicable.
    #[error("{op}: {message} (code {code})")]
    Engine {
        op: String,
        code: i32,
        message: String,
    },
    #[error("Engine not found: {0}")]
    NotFound(String),
    #[error("Engine already registered: {0}")]
    AlreadyRegistered(String),
    #[error("Buffer: {0}")]
    Buffer(String),
}

impl Error {
    #[inline]
    pub fn code(&self) -> i32 {
        match self {
            Error::Engine { code, .. } => *code,
            Error::NotFound(_) => libc::ENOENT,
            Error::AlreadyRegistered(_) => libc::EEXIST,
            Error::Buffer(_) => libc::ENOMEM,
        }
    }
}
