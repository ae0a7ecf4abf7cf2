use crate::error::Error;

/// Result alias used by every fallible kvsql operation.
pub type Result<T> = std::result::Result<T, Error>;
