//! Generic adjoint-Jacobian operators.
//!
//! An operator implemented through this module supplies two plain-number
//! routines instead of a bespoke node type:
//!
//! - a forward pass over raw slices, free to cache whatever the adjoint
//!   pass will need (large buffers go in the episode's [`Arena`]);
//! - a routine mapping the output adjoint vector to one input-adjoint
//!   vector per operand — left-multiplication by the Jacobian transpose.
//!
//! [`adj_jac_apply`] wires the pair onto the active tape: one controller
//! node plus one output slot per result element, with edges back to the
//! differentiable operands' nodes. Constant operands get no edge, so the
//! reverse sweep does no adjoint work for them. The cost is one boxed
//! operator per invocation and one Jacobian-transpose product per sweep —
//! the right trade whenever the forward computation is more than a few
//! lines.

use crate::arena::Arena;
use crate::float::Float;
use crate::tape::{with_active_tape, TapeThreadLocal};
use crate::var::Var;

/// One operator argument: a differentiable container or a plain-number one.
///
/// This is the runtime form of the capability query: construction decides
/// once whether adjoints flow into the argument, and everything downstream
/// branches on it.
#[derive(Clone, Copy)]
pub enum Operand<'a, F: Float> {
    /// Differentiable elements; adjoints are distributed to their nodes.
    Vars(&'a [Var<F>]),
    /// Constant elements; stripped to values, never receives adjoints.
    Consts(&'a [F]),
}

impl<'a, F: Float> Operand<'a, F> {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Operand::Vars(v) => v.len(),
            Operand::Consts(c) => c.len(),
        }
    }

    /// Whether the operand has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether adjoints flow into this operand.
    pub fn is_tracked(&self) -> bool {
        matches!(self, Operand::Vars(_))
    }

    /// Plain values, with any graph structure stripped.
    pub fn values(&self) -> Vec<F> {
        match self {
            Operand::Vars(v) => v.iter().map(|x| x.value()).collect(),
            Operand::Consts(c) => c.to_vec(),
        }
    }

    /// Node indices for a differentiable operand, `None` for a constant.
    fn edge(&self) -> Option<Vec<u32>> {
        match self {
            Operand::Vars(v) => Some(v.iter().map(|x| x.index()).collect()),
            Operand::Consts(_) => None,
        }
    }
}

/// A forward function plus its adjoint-Jacobian product.
///
/// `forward` runs once at recording time; `multiply_adjoint_jacobian` runs
/// exactly once per reverse sweep, after every consumer of the operator's
/// outputs has accumulated into the output adjoints.
pub trait AdjJacOp<F: Float> {
    /// Compute output values from plain input values. State needed to
    /// replay the adjoint computation is cached on `self`; buffers of `F`
    /// belong in `arena` so they share the episode's lifetime.
    fn forward(&mut self, arena: &mut Arena<F>, inputs: &[&[F]]) -> Vec<F>;

    /// Multiply the output adjoint vector by the Jacobian transpose,
    /// returning one input-adjoint vector per operand (in input order).
    /// `active[k]` is false for constant operands, whose entries may be
    /// left empty.
    fn multiply_adjoint_jacobian(
        &self,
        arena: &Arena<F>,
        active: &[bool],
        adj: &[F],
    ) -> Vec<Vec<F>>;
}

/// Record an adjoint-Jacobian operator on the active tape.
///
/// Strips the operands to plain values, runs the forward pass, and records
/// a controller node plus one output slot per result element. Returns the
/// outputs as differentiable variables. Zero-size outputs still record a
/// (trivial) valid controller, so downstream bookkeeping never special-cases
/// emptiness.
pub fn adj_jac_apply<F, O>(mut op: O, operands: &[Operand<'_, F>]) -> Vec<Var<F>>
where
    F: Float + TapeThreadLocal,
    O: AdjJacOp<F> + 'static,
{
    with_active_tape(|tape| {
        let values: Vec<Vec<F>> = operands.iter().map(|o| o.values()).collect();
        let inputs: Vec<&[F]> = values.iter().map(|v| v.as_slice()).collect();
        let out_values = op.forward(tape.arena_mut(), &inputs);

        let edges: Vec<Option<Vec<u32>>> = operands.iter().map(|o| o.edge()).collect();
        let first_out = tape.push_adj_jac(Box::new(op), edges, &out_values);

        out_values
            .iter()
            .enumerate()
            .map(|(k, &v)| Var::from_tape(v, first_out + k as u32))
            .collect()
    })
}
