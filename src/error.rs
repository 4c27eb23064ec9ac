//! Crate-wide error and result types.

use std::io;

/// Result alias used throughout certfhe.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the library can produce.
///
/// Error messages are kept terse; callers that need richer context should
/// wrap [`Error`] in their own type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operand was invalid: an empty ciphertext used where one with a
    /// node was required, operands drawn from different [`crate::Context`]s,
    /// mismatched permutation lengths, or a duplicate ciphertext handle in a
    /// serialize batch.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Creating a CCC would exceed `max_ccc_size` default-length chunks.
    ///
    /// Raised by the CCC constructor. Callers with a DAG fallback (CADD/CMUL
    /// fusion) treat this as "skip fusion, keep the operand nodes"; callers
    /// with no fallback (an explicit, user-requested materialization)
    /// propagate it.
    #[error("capacity exceeded: {deflen_count} chunks exceeds the configured limit of {limit}")]
    CapacityExceeded {
        /// The deflen count that would have resulted.
        deflen_count: u64,
        /// The configured limit that was exceeded.
        limit: u64,
    },

    /// A DAG invariant was violated: a reference count would go negative, a
    /// null concurrency guard was encountered, or deserialized data produced
    /// a dangling child reference. These are programming/data errors, not
    /// recoverable conditions.
    #[error("inconsistent internal state: {0}")]
    InconsistentState(&'static str),

    /// A serialization buffer I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
