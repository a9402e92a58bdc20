//! Precondition guards for public operators.
//!
//! Every fallible operator runs its checks here before touching the tape or
//! arena, so a failed check leaves the episode exactly as it found it. All
//! element-wise guards scan the whole container and report the first
//! offending index.

use crate::error::{Error, Result};
use crate::float::Float;

/// Tolerance for simplex sums: `|sum - 1| <= SIMPLEX_TOLERANCE` passes.
pub const SIMPLEX_TOLERANCE: f64 = 1e-8;

fn as_f64<F: Float>(x: F) -> f64 {
    x.to_f64().unwrap_or(f64::NAN)
}

/// Check that every element of `y` is finite.
pub fn check_finite<F: Float>(function: &'static str, name: &str, y: &[F]) -> Result<()> {
    for (index, &v) in y.iter().enumerate() {
        if !v.is_finite() {
            return Err(Error::NotFinite {
                function,
                name: name.to_string(),
                index,
                value: as_f64(v),
            });
        }
    }
    Ok(())
}

/// Check that every element of `y` is non-negative. NaN fails as non-finite.
pub fn check_nonnegative<F: Float>(function: &'static str, name: &str, y: &[F]) -> Result<()> {
    for (index, &v) in y.iter().enumerate() {
        if v.is_nan() {
            return Err(Error::NotFinite {
                function,
                name: name.to_string(),
                index,
                value: as_f64(v),
            });
        }
        if v < F::zero() {
            return Err(Error::Negative {
                function,
                name: name.to_string(),
                index,
                value: as_f64(v),
            });
        }
    }
    Ok(())
}

/// Check that a container has at least one element.
pub fn check_nonzero_size(function: &'static str, name: &str, len: usize) -> Result<()> {
    if len == 0 {
        return Err(Error::ZeroSize {
            function,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Check that two containers have the same size.
pub fn check_matching_sizes(
    function: &'static str,
    lhs_name: &str,
    lhs_len: usize,
    rhs_name: &str,
    rhs_len: usize,
) -> Result<()> {
    if lhs_len != rhs_len {
        return Err(Error::SizeMismatch {
            function,
            lhs_name: lhs_name.to_string(),
            lhs_len,
            rhs_name: rhs_name.to_string(),
            rhs_len,
        });
    }
    Ok(())
}

/// Check that a container has an exact expected size.
pub fn check_consistent_size(
    function: &'static str,
    name: &str,
    len: usize,
    expected: usize,
) -> Result<()> {
    if len != expected {
        return Err(Error::InconsistentSize {
            function,
            name: name.to_string(),
            len,
            expected,
        });
    }
    Ok(())
}

/// Check that a matrix is square.
pub fn check_square(function: &'static str, name: &str, rows: usize, cols: usize) -> Result<()> {
    if rows != cols {
        return Err(Error::NotSquare {
            function,
            name: name.to_string(),
            rows,
            cols,
        });
    }
    Ok(())
}

/// Check that `y` is a probability simplex: non-empty, finite, non-negative,
/// summing to 1 within [`SIMPLEX_TOLERANCE`].
pub fn check_simplex<F: Float>(function: &'static str, name: &str, y: &[F]) -> Result<()> {
    check_nonzero_size(function, name, y.len())?;
    check_finite(function, name, y)?;
    check_nonnegative(function, name, y)?;
    let sum = y.iter().fold(F::zero(), |acc, &v| acc + v);
    if (as_f64(sum) - 1.0).abs() > SIMPLEX_TOLERANCE {
        return Err(Error::NotSimplex {
            function,
            name: name.to_string(),
            sum: as_f64(sum),
        });
    }
    Ok(())
}
