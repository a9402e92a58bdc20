//! Operators built on the engine: squared distance, the ordered-vector
//! constraint transform, and small reductions.
//!
//! The scalar forms record plain nodes; the container forms go through
//! [`adj_jac_apply`] with their replay state cached in the episode arena.
//! All fallible forms run their shape checks before anything touches the
//! tape.

use crate::adj_jac::{adj_jac_apply, AdjJacOp, Operand};
use crate::arena::{Arena, ArenaSlice};
use crate::check::check_matching_sizes;
use crate::error::Result;
use crate::float::Float;
use crate::ops::binary;
use crate::scalar::Scalar;
use crate::tape::TapeThreadLocal;
use crate::var::Var;

// ──────────────────────────────────────────────
//  Squared distance
// ──────────────────────────────────────────────

/// Scalar squared distance `(a - b)²`.
///
/// Accepts any mix of differentiable and constant operands; the adjoint
/// contract is `∂/∂a = 2(a - b)` and `∂/∂b = -2(a - b)`, with no node state
/// recorded for constant sides.
#[inline]
pub fn squared_distance<F, A, B>(a: A, b: B) -> Var<F>
where
    F: Float + TapeThreadLocal,
    A: Scalar<Float = F>,
    B: Scalar<Float = F>,
{
    let d = a.value() - b.value();
    let two = F::one() + F::one();
    let av = Var::from_tape(a.value(), a.node_index());
    let bv = Var::from_tape(b.value(), b.node_index());
    binary(av, bv, d * d, two * d, -(two * d))
}

/// Squared distance between two equal-length vectors, `Σ (aᵢ - bᵢ)²`.
struct SquaredDistanceOp {
    diffs: ArenaSlice,
}

impl<F: Float> AdjJacOp<F> for SquaredDistanceOp {
    fn forward(&mut self, arena: &mut Arena<F>, inputs: &[&[F]]) -> Vec<F> {
        let (a, b) = (inputs[0], inputs[1]);
        self.diffs = arena.alloc_array(a.len());
        let mut sum = F::zero();
        let diffs = arena.slice_mut(self.diffs);
        for i in 0..a.len() {
            let d = a[i] - b[i];
            diffs[i] = d;
            sum = sum + d * d;
        }
        vec![sum]
    }

    fn multiply_adjoint_jacobian(
        &self,
        arena: &Arena<F>,
        active: &[bool],
        adj: &[F],
    ) -> Vec<Vec<F>> {
        let diffs = arena.slice(self.diffs);
        let two = F::one() + F::one();
        let scale = two * adj[0];
        let d_a = if active[0] {
            diffs.iter().map(|&d| scale * d).collect()
        } else {
            Vec::new()
        };
        let d_b = if active[1] {
            diffs.iter().map(|&d| -(scale * d)).collect()
        } else {
            Vec::new()
        };
        vec![d_a, d_b]
    }
}

/// Vector squared distance `Σ (aᵢ - bᵢ)²` with any mix of differentiable
/// and constant operands.
///
/// Fails with a size-mismatch error before any node is created.
pub fn squared_distance_vec<F: Float + TapeThreadLocal>(
    a: Operand<'_, F>,
    b: Operand<'_, F>,
) -> Result<Var<F>> {
    check_matching_sizes("squared_distance", "a", a.len(), "b", b.len())?;
    let out = adj_jac_apply(
        SquaredDistanceOp {
            diffs: ArenaSlice::EMPTY,
        },
        &[a, b],
    );
    Ok(out[0])
}

// ──────────────────────────────────────────────
//  Ordered constraint
// ──────────────────────────────────────────────

/// `y₀ = x₀, yₖ = yₖ₋₁ + exp(xₖ)`: a free vector mapped to a strictly
/// increasing one.
struct OrderedConstrainOp {
    exp_x: ArenaSlice,
}

impl<F: Float> AdjJacOp<F> for OrderedConstrainOp {
    fn forward(&mut self, arena: &mut Arena<F>, inputs: &[&[F]]) -> Vec<F> {
        let x = inputs[0];
        let n = x.len();
        let mut y = vec![F::zero(); n];
        if n == 0 {
            return y;
        }
        self.exp_x = arena.alloc_array(n - 1);
        y[0] = x[0];
        let exp_x = arena.slice_mut(self.exp_x);
        for k in 1..n {
            exp_x[k - 1] = x[k].exp();
            y[k] = y[k - 1] + exp_x[k - 1];
        }
        y
    }

    fn multiply_adjoint_jacobian(
        &self,
        arena: &Arena<F>,
        active: &[bool],
        adj: &[F],
    ) -> Vec<Vec<F>> {
        let n = adj.len();
        let mut d_x = vec![F::zero(); n];
        if n > 0 && active[0] {
            let exp_x = arena.slice(self.exp_x);
            let mut rolling = F::zero();
            for k in (1..n).rev() {
                rolling = rolling + adj[k];
                d_x[k] = exp_x[k - 1] * rolling;
            }
            d_x[0] = rolling + adj[0];
        }
        vec![d_x]
    }
}

/// Return an increasing ordered vector derived from the specified free
/// vector. The result has the same length as the input; an empty input
/// yields an empty output (and still records a valid, trivial node).
pub fn ordered_constrain<F: Float + TapeThreadLocal>(x: &[Var<F>]) -> Vec<Var<F>> {
    adj_jac_apply(
        OrderedConstrainOp {
            exp_x: ArenaSlice::EMPTY,
        },
        &[Operand::Vars(x)],
    )
}

// ──────────────────────────────────────────────
//  Reductions
// ──────────────────────────────────────────────

/// Sum of a slice of variables. An empty slice is the constant zero.
pub fn sum<F: Float + TapeThreadLocal>(xs: &[Var<F>]) -> Var<F> {
    xs.iter()
        .copied()
        .fold(Var::constant(F::zero()), |acc, x| acc + x)
}

/// Dot product of two equal-length slices of variables.
pub fn dot<F: Float + TapeThreadLocal>(a: &[Var<F>], b: &[Var<F>]) -> Result<Var<F>> {
    check_matching_sizes("dot", "a", a.len(), "b", b.len())?;
    Ok(a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x * y)
        .fold(Var::constant(F::zero()), |acc, p| acc + p))
}
