//! Error types for the localization core

use thiserror::Error;

/// Errors surfaced by the localization core.
///
/// Recoverable conditions (empty window, degenerate particle weights) are
/// handled inside the components with a documented fallback and never show
/// up here. `UnknownLocation` is the one condition the caller must decide
/// about.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A location id that is not present in the fingerprint store
    #[error("unknown location id: {id}")]
    UnknownLocation { id: String },

    /// The fingerprint table was empty after loading
    #[error("fingerprint store must contain at least one record")]
    EmptyStore,

    /// Two records in the fingerprint table share a location id
    #[error("duplicate location id in fingerprint table: {id}")]
    DuplicateLocation { id: String },

    /// A matcher was handed an empty candidate set; the window layer
    /// guarantees this never happens, so this is a caller bug
    #[error("candidate set is empty (window fallback contract violated)")]
    EmptyCandidates,

    /// A configuration value outside its valid range
    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    /// A malformed row or header in the reference dataset
    #[error("bad reference dataset at line {line}: {reason}")]
    Dataset { line: usize, reason: String },

    #[error("failed to read reference dataset")]
    Io(#[from] std::io::Error),
}
