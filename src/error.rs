//! Error types for tapir.
//!
//! Every precondition failure carries the public function name and the
//! offending argument, so composite computations surface errors that read
//! like `"hmm_marginal_lpdf: gamma[1, ] must sum to 1, but sums to 1.5"`.
//! Checks run before any tape or arena allocation, so an `Err` means no
//! partial graph state exists.

use thiserror::Error;

/// Result type alias using tapir's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by tapir operators.
///
/// Precondition variants are detected eagerly at each operator's API
/// boundary; [`Error::Device`] wraps an accelerated-backend failure and is
/// fatal to the current episode only. Allocation exhaustion is not
/// represented here — it aborts, as there is nothing to recover mid-episode.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// An element is NaN or infinite where a finite value is required.
    #[error("{function}: {name}[{index}] is {value}, but must be finite")]
    NotFinite {
        function: &'static str,
        name: String,
        index: usize,
        value: f64,
    },

    /// An element is negative where a non-negative value is required.
    #[error("{function}: {name}[{index}] is {value}, but must be non-negative")]
    Negative {
        function: &'static str,
        name: String,
        index: usize,
        value: f64,
    },

    /// A container is empty where at least one element is required.
    #[error("{function}: {name} has zero size")]
    ZeroSize {
        function: &'static str,
        name: String,
    },

    /// A matrix argument is not square.
    #[error("{function}: {name} is {rows}x{cols}, but must be square")]
    NotSquare {
        function: &'static str,
        name: String,
        rows: usize,
        cols: usize,
    },

    /// A vector is not a probability simplex (its entries do not sum to 1).
    #[error("{function}: {name} must sum to 1, but sums to {sum}")]
    NotSimplex {
        function: &'static str,
        name: String,
        sum: f64,
    },

    /// Two arguments that must have equal sizes do not.
    #[error(
        "{function}: {lhs_name} has size {lhs_len}, but {rhs_name} has size {rhs_len}; \
         sizes must match"
    )]
    SizeMismatch {
        function: &'static str,
        lhs_name: String,
        lhs_len: usize,
        rhs_name: String,
        rhs_len: usize,
    },

    /// An argument's size does not match a size implied by another argument.
    #[error("{function}: {name} has size {len}, but must have size {expected}")]
    InconsistentSize {
        function: &'static str,
        name: String,
        len: usize,
        expected: usize,
    },

    /// An accelerated-backend operation failed.
    #[error("device operation '{op}' failed: {message}")]
    Device { op: &'static str, message: String },
}
