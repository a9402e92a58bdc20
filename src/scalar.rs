//! The [`Scalar`] trait for writing AD-generic numeric code.
//!
//! Functions written as `fn f<T: Scalar>(x: T) -> T` work transparently with
//! plain `f32`/`f64` and with [`Var`]. The trait doubles as the capability
//! query used by operator front ends: [`Scalar::TRACKS_ADJOINT`] answers
//! "does this type carry a derivative" and [`Scalar::Float`] answers "what
//! is the underlying element type", selecting the constant-operand or
//! differentiable-operand path at compile time.

use std::fmt::{Debug, Display};
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::float::Float;
use crate::node::CONSTANT;
use crate::tape::TapeThreadLocal;
use crate::var::Var;

/// The central trait for AD-generic numeric code.
pub trait Scalar:
    Copy
    + Default
    + Debug
    + Display
    + PartialEq
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Send
    + 'static
{
    /// The underlying primitive float type.
    type Float: Float;

    /// Whether values of this type accumulate adjoints on a tape.
    const TRACKS_ADJOINT: bool;

    /// Lift a plain float to this scalar (constant — zero derivative).
    fn from_f(val: Self::Float) -> Self;

    /// Extract the primal value.
    fn value(&self) -> Self::Float;

    /// Tape index of the node holding this scalar's adjoint slot, or the
    /// constant sentinel for untracked values.
    fn node_index(&self) -> u32 {
        CONSTANT
    }
}

impl Scalar for f32 {
    type Float = f32;
    const TRACKS_ADJOINT: bool = false;

    #[inline]
    fn from_f(val: f32) -> Self {
        val
    }

    #[inline]
    fn value(&self) -> f32 {
        *self
    }
}

impl Scalar for f64 {
    type Float = f64;
    const TRACKS_ADJOINT: bool = false;

    #[inline]
    fn from_f(val: f64) -> Self {
        val
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }
}

impl<F: Float + TapeThreadLocal> Scalar for Var<F> {
    type Float = F;
    const TRACKS_ADJOINT: bool = true;

    #[inline]
    fn from_f(val: F) -> Self {
        Var::constant(val)
    }

    #[inline]
    fn value(&self) -> F {
        self.value
    }

    #[inline]
    fn node_index(&self) -> u32 {
        self.index
    }
}
