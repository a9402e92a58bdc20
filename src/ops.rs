//! Operator overloads and elementary functions for [`Var`].
//!
//! Each operation computes the forward value from operand values, records
//! exactly one node on the active tape with the local partials, and returns
//! a new `Var` wrapping that node. The [`crate::tape::Tape::push_binary`]
//! sentinel handling turns constant operands into the smaller one-sided node
//! variants, so no adjoint work is recorded for the constant side.

use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use crate::float::Float;
use crate::tape::{self, TapeThreadLocal};
use crate::var::Var;

/// Record a unary elemental on the active tape.
#[inline]
pub(crate) fn unary<F: Float + TapeThreadLocal>(x: Var<F>, value: F, partial: F) -> Var<F> {
    let index = tape::with_active_tape(|t| t.push_unary(value, x.index, partial));
    Var { value, index }
}

/// Record a binary elemental on the active tape.
#[inline]
pub(crate) fn binary<F: Float + TapeThreadLocal>(
    x: Var<F>,
    y: Var<F>,
    value: F,
    dx: F,
    dy: F,
) -> Var<F> {
    let index = tape::with_active_tape(|t| t.push_binary(value, x.index, dx, y.index, dy));
    Var { value, index }
}

// ──────────────────────────────────────────────
//  Arithmetic
// ──────────────────────────────────────────────

impl<F: Float + TapeThreadLocal> Add for Var<F> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        binary(self, rhs, self.value + rhs.value, F::one(), F::one())
    }
}

impl<F: Float + TapeThreadLocal> Sub for Var<F> {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        binary(self, rhs, self.value - rhs.value, F::one(), -F::one())
    }
}

impl<F: Float + TapeThreadLocal> Mul for Var<F> {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        binary(self, rhs, self.value * rhs.value, rhs.value, self.value)
    }
}

impl<F: Float + TapeThreadLocal> Div for Var<F> {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        let inv = F::one() / rhs.value;
        binary(self, rhs, self.value * inv, inv, -self.value * inv * inv)
    }
}

impl<F: Float + TapeThreadLocal> Neg for Var<F> {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        unary(self, -self.value, -F::one())
    }
}

impl<F: Float + TapeThreadLocal> AddAssign for Var<F> {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<F: Float + TapeThreadLocal> SubAssign for Var<F> {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl<F: Float + TapeThreadLocal> MulAssign for Var<F> {
    #[inline]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl<F: Float + TapeThreadLocal> DivAssign for Var<F> {
    #[inline]
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

// Mixed ops: Var<F> with primitive floats.
macro_rules! impl_var_scalar_ops {
    ($f:ty) => {
        impl Add<$f> for Var<$f> {
            type Output = Var<$f>;
            #[inline]
            fn add(self, rhs: $f) -> Var<$f> {
                unary(self, self.value + rhs, 1.0)
            }
        }

        impl Add<Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn add(self, rhs: Var<$f>) -> Var<$f> {
                unary(rhs, self + rhs.value, 1.0)
            }
        }

        impl Sub<$f> for Var<$f> {
            type Output = Var<$f>;
            #[inline]
            fn sub(self, rhs: $f) -> Var<$f> {
                unary(self, self.value - rhs, 1.0)
            }
        }

        impl Sub<Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn sub(self, rhs: Var<$f>) -> Var<$f> {
                unary(rhs, self - rhs.value, -1.0)
            }
        }

        impl Mul<$f> for Var<$f> {
            type Output = Var<$f>;
            #[inline]
            fn mul(self, rhs: $f) -> Var<$f> {
                unary(self, self.value * rhs, rhs)
            }
        }

        impl Mul<Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn mul(self, rhs: Var<$f>) -> Var<$f> {
                unary(rhs, self * rhs.value, self)
            }
        }

        impl Div<$f> for Var<$f> {
            type Output = Var<$f>;
            #[inline]
            fn div(self, rhs: $f) -> Var<$f> {
                let inv: $f = 1.0 / rhs;
                unary(self, self.value * inv, inv)
            }
        }

        impl Div<Var<$f>> for $f {
            type Output = Var<$f>;
            #[inline]
            fn div(self, rhs: Var<$f>) -> Var<$f> {
                let inv: $f = 1.0 / rhs.value;
                unary(rhs, self * inv, -self * inv * inv)
            }
        }
    };
}

impl_var_scalar_ops!(f32);
impl_var_scalar_ops!(f64);

// ──────────────────────────────────────────────
//  Elementary functions
// ──────────────────────────────────────────────

impl<F: Float + TapeThreadLocal> Var<F> {
    /// `e^x`
    #[inline]
    pub fn exp(self) -> Self {
        let e = self.value.exp();
        unary(self, e, e)
    }

    /// Natural logarithm.
    #[inline]
    pub fn ln(self) -> Self {
        unary(self, self.value.ln(), F::one() / self.value)
    }

    /// `ln(1 + x)`, accurate near zero.
    #[inline]
    pub fn ln_1p(self) -> Self {
        unary(self, self.value.ln_1p(), F::one() / (F::one() + self.value))
    }

    /// Square root.
    #[inline]
    pub fn sqrt(self) -> Self {
        let s = self.value.sqrt();
        let two = F::one() + F::one();
        unary(self, s, F::one() / (two * s))
    }

    /// Reciprocal `1/x`.
    #[inline]
    pub fn recip(self) -> Self {
        let inv = F::one() / self.value;
        unary(self, inv, -inv * inv)
    }

    /// Integer power.
    #[inline]
    pub fn powi(self, n: i32) -> Self {
        let value = self.value.powi(n);
        let partial = F::from_i32(n).unwrap() * self.value.powi(n - 1);
        unary(self, value, partial)
    }

    /// Real power with a differentiable exponent.
    #[inline]
    pub fn powf(self, n: Self) -> Self {
        let value = self.value.powf(n.value);
        let dx = n.value * self.value.powf(n.value - F::one());
        let dy = value * self.value.ln();
        binary(self, n, value, dx, dy)
    }

    /// Absolute value. The partial at zero follows `signum`.
    #[inline]
    pub fn abs(self) -> Self {
        unary(self, self.value.abs(), self.value.signum())
    }

    /// Sine.
    #[inline]
    pub fn sin(self) -> Self {
        unary(self, self.value.sin(), self.value.cos())
    }

    /// Cosine.
    #[inline]
    pub fn cos(self) -> Self {
        unary(self, self.value.cos(), -self.value.sin())
    }

    /// Hyperbolic tangent.
    #[inline]
    pub fn tanh(self) -> Self {
        let t = self.value.tanh();
        unary(self, t, F::one() - t * t)
    }
}

// Comparisons look only at values; tape indices are identity, not order.

impl<F: Float> PartialEq for Var<F> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<F: Float> PartialOrd for Var<F> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.value.partial_cmp(&other.value)
    }
}
