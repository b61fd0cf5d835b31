//! Error types for the stats source tree.

use thiserror::Error;

/// Errors surfaced at the stats tree API boundary.
///
/// The four kinds map one-to-one onto the error codes a filesystem host
/// reports to readers (`ENOENT`, `EEXIST`, `ENOMEM`, `EINVAL`). Lookup
/// misses *during* an aggregation walk are never errors: a node that lacks
/// the sought value array simply contributes nothing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A descriptor is absent from the source, a named lookup missed, or an
    /// open raced destruction of the source it referenced.
    #[error("{0} not found")]
    NotFound(String),

    /// The exact (value array, base) pair is already bound to the source.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The host ran out of room while materialising directories or files,
    /// or a snapshot exceeded its buffer budget.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A malformed write payload, mount option, or file operation that the
    /// file's mode does not permit.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result alias for stats tree operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("value \"exits\" in source \"kvm_1\"".to_string());
        assert_eq!(err.to_string(), "value \"exits\" in source \"kvm_1\" not found");

        let err = Error::InvalidArgument("write payload must be zero".to_string());
        assert_eq!(err.to_string(), "invalid argument: write payload must be zero");
    }
}
