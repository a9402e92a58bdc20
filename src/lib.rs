pub mod adj_jac;
pub mod api;
pub mod arena;
pub mod check;
pub mod device;
pub mod error;
pub mod float;
pub mod fun;
pub mod node;
pub mod ops;
pub mod scalar;
pub mod tape;
pub mod var;

pub use adj_jac::{adj_jac_apply, AdjJacOp, Operand};
pub use api::{grad, grad_val, value_of, vjp};
pub use arena::{Arena, ArenaSlice};
pub use error::{Error, Result};
pub use float::Float;
pub use scalar::Scalar;
pub use tape::{Tape, TapeGuard};
pub use var::Var;

/// Type alias for reverse-mode variables over `f64`.
pub type Var64 = Var<f64>;
/// Type alias for reverse-mode variables over `f32`.
pub type Var32 = Var<f32>;
