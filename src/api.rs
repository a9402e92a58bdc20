use crate::float::Float;
use crate::scalar::Scalar;
use crate::tape::{Tape, TapeGuard, TapeThreadLocal};
use crate::var::Var;

/// Compute the gradient of a scalar function `f : R^n → R` using reverse mode.
///
/// ```
/// let g = tapir::grad(|x: &[tapir::Var<f64>]| {
///     x[0] * x[0] + x[1] * x[1]
/// }, &[3.0, 4.0]);
/// assert!((g[0] - 6.0).abs() < 1e-10);
/// assert!((g[1] - 8.0).abs() < 1e-10);
/// ```
pub fn grad<F: Float + TapeThreadLocal>(
    f: impl FnOnce(&[Var<F>]) -> Var<F>,
    x: &[F],
) -> Vec<F> {
    grad_val(f, x).1
}

/// Like [`grad`], but also returns the function value.
pub fn grad_val<F: Float + TapeThreadLocal>(
    f: impl FnOnce(&[Var<F>]) -> Var<F>,
    x: &[F],
) -> (F, Vec<F>) {
    let n = x.len();
    let mut tape = Tape::with_capacity(n * 10);

    // Create input variables.
    let inputs: Vec<Var<F>> = x
        .iter()
        .map(|&val| {
            let (idx, v) = tape.new_variable(val);
            Var::from_tape(v, idx)
        })
        .collect();

    let _guard = TapeGuard::new(&mut tape);
    let output = f(&inputs);

    // Run reverse sweep and extract the input adjoints (indices 0..n).
    tape.reverse(output.index());
    let g = (0..n as u32).map(|i| tape.adjoint(i)).collect();
    (output.value(), g)
}

/// Vector-Jacobian product (reverse mode): `(f(x), wᵀ·J)`.
///
/// Evaluates `f` at `x` and runs a single reverse sweep seeded with the
/// weights `w` — reverse mode is linear in the seed, so multiple outputs
/// cost one sweep.
pub fn vjp<F: Float + TapeThreadLocal>(
    f: impl FnOnce(&[Var<F>]) -> Vec<Var<F>>,
    x: &[F],
    w: &[F],
) -> (Vec<F>, Vec<F>) {
    let n = x.len();
    let mut tape = Tape::with_capacity(n * 10);

    let inputs: Vec<Var<F>> = x
        .iter()
        .map(|&val| {
            let (idx, v) = tape.new_variable(val);
            Var::from_tape(v, idx)
        })
        .collect();

    let _guard = TapeGuard::new(&mut tape);
    let outputs = f(&inputs);

    assert_eq!(
        outputs.len(),
        w.len(),
        "output length must match weight vector length"
    );

    let values: Vec<F> = outputs.iter().map(|r| r.value()).collect();

    let seeds: Vec<(u32, F)> = outputs
        .iter()
        .zip(w.iter())
        .map(|(r, &wi)| (r.index(), wi))
        .collect();
    tape.reverse_seeded(&seeds);

    let g: Vec<F> = (0..n as u32).map(|i| tape.adjoint(i)).collect();
    (values, g)
}

/// Strip all graph structure from a slice of scalars, returning plain values.
///
/// The value-extraction side of the API: results leave the episode as plain
/// numbers, never dragging the tape along.
pub fn value_of<T: Scalar>(xs: &[T]) -> Vec<T::Float> {
    xs.iter().map(|x| x.value()).collect()
}
