//! Graph nodes recorded on the episode tape.
//!
//! A node carries the forward value, a mutable adjoint accumulator, and the
//! rule for pushing its adjoint into its operands. The rule set is a closed
//! sum type — one case per operator family — so the reverse sweep is a match,
//! not a virtual call. Operand references are `u32` indices into the tape's
//! node slab and always point strictly earlier on the tape.

use crate::float::Float;

/// Sentinel index indicating a constant (not recorded on tape).
pub const CONSTANT: u32 = u32::MAX;

/// Propagation rule for one node.
///
/// Binary operations with a constant operand use the dedicated
/// [`Op::LeftConst`] / [`Op::RightConst`] cases so the sweep does no adjoint
/// work for the constant side.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Op<F> {
    /// Independent variable or adapter output slot. Adjoint sink; propagates
    /// nothing.
    Leaf,
    /// `result = f(arg)` with precomputed `partial = df/d(arg)`.
    Unary { arg: u32, partial: F },
    /// Binary operation with both operands tracked.
    Binary {
        lhs: u32,
        rhs: u32,
        lhs_partial: F,
        rhs_partial: F,
    },
    /// Binary operation whose left operand is constant.
    LeftConst { rhs: u32, rhs_partial: F },
    /// Binary operation whose right operand is constant.
    RightConst { lhs: u32, lhs_partial: F },
    /// Controller for a generic adjoint-Jacobian operator; `id` indexes the
    /// tape's adapter table. Its output slots follow immediately on the tape
    /// as [`Op::Leaf`] nodes.
    AdjJac { id: u32 },
}

/// One tape entry: value, adjoint accumulator, propagation rule.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Node<F> {
    pub value: F,
    pub adjoint: F,
    pub op: Op<F>,
}

impl<F: Float> Node<F> {
    #[inline]
    pub fn new(value: F, op: Op<F>) -> Self {
        Node {
            value,
            adjoint: F::zero(),
            op,
        }
    }
}
