use thiserror::Error;

/// Everything that can go wrong between receiving a call description and
/// handing back a marshaled result. Every component fails fast with one of
/// these; no partial results cross the invocation boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed or unknown type descriptor, or `va_args` misuse at the
    /// descriptor level.
    #[error("type error: {0}")]
    Type(String),

    /// A struct id was used where a registered layout was expected but none
    /// exists and no field list was supplied.
    #[error("lookup error: {0}")]
    Lookup(String),

    /// Argument arena growth failed. The whole call is abandoned.
    #[error("resource error: {0}")]
    Resource(String),

    /// Frame construction could not produce a complete type/value array.
    #[error("failed to build call frame for argument #{index}: {message}")]
    Build { index: usize, message: String },

    /// Call interface preparation failed, or the native call faulted and was
    /// contained.
    #[error("invoke error: {0}")]
    Invoke(String),

    /// The return buffer or an output slot could not be converted back.
    #[error("marshal error: {0}")]
    Marshal(String),
}

impl Error {
    pub(crate) fn build(index: usize, message: impl Into<String>) -> Self {
        Error::Build {
            index,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
