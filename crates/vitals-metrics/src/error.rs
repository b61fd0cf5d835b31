//! Error types for the metrics exporter.

use thiserror::Error;

/// Errors surfaced by metric registration and teardown.
///
/// File-open failures (a metric unregistered under an open, an
/// `annotations` or `fields` snapshot exceeding its buffer) surface as
/// [`vitals_core::Error`] through the host's open path instead; producer
/// callback misbehavior is never an error, it manifests as truncated
/// output.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Field names end up verbatim in the `fields` header line, so spaces
    /// and double quotes cannot appear in them.
    #[error("invalid field name {name:?} for metric {metric:?}")]
    InvalidFieldName {
        /// The metric being registered.
        metric: String,
        /// The offending field name.
        name: String,
    },

    /// Metrics carry at most two fields.
    #[error("metric {metric:?} declares {count} fields, at most 2 are supported")]
    TooManyFields {
        /// The metric being registered.
        metric: String,
        /// Number of fields declared.
        count: usize,
    },

    /// Host-side failure creating or removing directories and files.
    #[error(transparent)]
    Host(#[from] vitals_core::Error),
}

/// Result alias for metrics exporter operations.
pub type Result<T> = std::result::Result<T, Error>;
