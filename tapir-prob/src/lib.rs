//! Probability functions built on the `tapir` reverse-mode AD engine.

pub mod hmm;

pub use hmm::{hmm_marginal_lpdf, MatrixOperand, VectorOperand};
