//! `hmm_marginal_lpdf`: values against brute-force path enumeration,
//! gradients against finite differences, precondition behavior, and the
//! single-step boundary case.

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};
use tapir::tape::{Tape, TapeGuard};
use tapir::{Error, Var};
use tapir_prob::{hmm_marginal_lpdf, MatrixOperand, VectorOperand};

/// Reference log marginal by direct summation over every latent state path.
/// Only feasible for tiny chains; no rescaling anywhere.
fn lp_by_path_enumeration(log_omegas: &DMatrix<f64>, gamma: &DMatrix<f64>, rho: &DVector<f64>) -> f64 {
    let k = log_omegas.nrows();
    let steps = log_omegas.ncols();
    let n_paths = k.pow(steps as u32);
    let mut total = 0.0;
    for mut code in 0..n_paths {
        let mut path = Vec::with_capacity(steps);
        for _ in 0..steps {
            path.push(code % k);
            code /= k;
        }
        let mut p = rho[path[0]] * log_omegas[(path[0], 0)].exp();
        for n in 1..steps {
            p *= gamma[(path[n - 1], path[n])] * log_omegas[(path[n], n)].exp();
        }
        total += p;
    }
    total.ln()
}

/// Reference log marginal by a log-space forward recursion; stable for long
/// chains and algorithmically unrelated to max-coefficient rescaling.
fn lp_by_log_space_recursion(
    log_omegas: &DMatrix<f64>,
    gamma: &DMatrix<f64>,
    rho: &DVector<f64>,
) -> f64 {
    let k = log_omegas.nrows();
    let steps = log_omegas.ncols();
    let mut la: Vec<f64> = (0..k)
        .map(|j| rho[j].ln() + log_omegas[(j, 0)])
        .collect();
    for n in 1..steps {
        la = (0..k)
            .map(|j| {
                let terms: Vec<f64> = (0..k)
                    .map(|i| la[i] + gamma[(i, j)].ln())
                    .collect();
                let m = terms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                log_omegas[(j, n)] + m + terms.iter().map(|t| (t - m).exp()).sum::<f64>().ln()
            })
            .collect();
    }
    let m = la.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    m + la.iter().map(|t| (t - m).exp()).sum::<f64>().ln()
}

fn fixture() -> (DMatrix<f64>, DMatrix<f64>, DVector<f64>) {
    let log_omegas =
        DMatrix::from_row_slice(2, 3, &[-1.3, -0.4, -2.0, -0.7, -1.1, -0.2]);
    let gamma = DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.2, 0.8]);
    let rho = DVector::from_column_slice(&[0.5, 0.5]);
    (log_omegas, gamma, rho)
}

/// Evaluate with all operands constant except none; plain value.
fn lp_value(log_omegas: &DMatrix<f64>, gamma: &DMatrix<f64>, rho: &DVector<f64>) -> f64 {
    let mut tape: Tape<f64> = Tape::new();
    let _guard = TapeGuard::new(&mut tape);
    hmm_marginal_lpdf(
        MatrixOperand::Consts(log_omegas),
        MatrixOperand::Consts(gamma),
        VectorOperand::Consts(rho),
    )
    .unwrap()
    .value()
}

fn lift_matrix(tape: &mut Tape<f64>, m: &DMatrix<f64>) -> DMatrix<Var<f64>> {
    DMatrix::from_column_slice(
        m.nrows(),
        m.ncols(),
        &m.as_slice()
            .iter()
            .map(|&v| {
                let (i, val) = tape.new_variable(v);
                Var::from_tape(val, i)
            })
            .collect::<Vec<_>>(),
    )
}

fn lift_vector(tape: &mut Tape<f64>, v: &DVector<f64>) -> DVector<Var<f64>> {
    DVector::from_column_slice(
        &v.as_slice()
            .iter()
            .map(|&x| {
                let (i, val) = tape.new_variable(x);
                Var::from_tape(val, i)
            })
            .collect::<Vec<_>>(),
    )
}

#[test]
fn matches_path_enumeration_on_two_state_chain() {
    let (log_omegas, gamma, rho) = fixture();
    let expected = lp_by_path_enumeration(&log_omegas, &gamma, &rho);
    let lp = lp_value(&log_omegas, &gamma, &rho);
    assert_relative_eq!(lp, expected, epsilon = 1e-9);
}

#[test]
fn matches_log_space_recursion_on_long_chain() {
    // 200 steps would underflow an unscaled recursion; the max-coefficient
    // rescaling must carry it.
    let steps = 200;
    let log_omegas = DMatrix::from_fn(2, steps, |j, n| {
        -40.0 - 0.3 * (j as f64) - 0.01 * (n as f64)
    });
    let gamma = DMatrix::from_row_slice(2, 2, &[0.95, 0.05, 0.3, 0.7]);
    let rho = DVector::from_column_slice(&[0.4, 0.6]);

    let expected = lp_by_log_space_recursion(&log_omegas, &gamma, &rho);
    let lp = lp_value(&log_omegas, &gamma, &rho);
    assert!(lp.is_finite());
    assert_relative_eq!(lp, expected, max_relative = 1e-9);
}

#[test]
fn gradients_match_finite_differences_for_all_operands() {
    let (log_omegas, gamma, rho) = fixture();

    let mut tape = Tape::new();
    let lw = lift_matrix(&mut tape, &log_omegas);
    let gm = lift_matrix(&mut tape, &gamma);
    let rh = lift_vector(&mut tape, &rho);
    let _guard = TapeGuard::new(&mut tape);

    let lp = hmm_marginal_lpdf(
        MatrixOperand::Vars(&lw),
        MatrixOperand::Vars(&gm),
        VectorOperand::Vars(&rh),
    )
    .unwrap();
    tape.reverse(lp.index());

    let h = 1e-6;

    // log_omegas entries.
    for idx in 0..6 {
        let mut hi = log_omegas.clone();
        let mut lo = log_omegas.clone();
        hi.as_mut_slice()[idx] += h;
        lo.as_mut_slice()[idx] -= h;
        let fd = (lp_by_path_enumeration(&hi, &gamma, &rho)
            - lp_by_path_enumeration(&lo, &gamma, &rho))
            / (2.0 * h);
        let ad = tape.adjoint(lw.as_slice()[idx].index());
        assert_relative_eq!(ad, fd, max_relative = 1e-6, epsilon = 1e-9);
    }

    // gamma entries (the reference enumeration has no simplex constraint, so
    // off-simplex perturbations are well-defined).
    for idx in 0..4 {
        let mut hi = gamma.clone();
        let mut lo = gamma.clone();
        hi.as_mut_slice()[idx] += h;
        lo.as_mut_slice()[idx] -= h;
        let fd = (lp_by_path_enumeration(&log_omegas, &hi, &rho)
            - lp_by_path_enumeration(&log_omegas, &lo, &rho))
            / (2.0 * h);
        let ad = tape.adjoint(gm.as_slice()[idx].index());
        assert_relative_eq!(ad, fd, max_relative = 1e-6, epsilon = 1e-9);
    }

    // rho entries.
    for idx in 0..2 {
        let mut hi = rho.clone();
        let mut lo = rho.clone();
        hi[idx] += h;
        lo[idx] -= h;
        let fd = (lp_by_path_enumeration(&log_omegas, &gamma, &hi)
            - lp_by_path_enumeration(&log_omegas, &gamma, &lo))
            / (2.0 * h);
        let ad = tape.adjoint(rh[idx].index());
        assert_relative_eq!(ad, fd, max_relative = 1e-6, epsilon = 1e-9);
    }
}

#[test]
fn constant_operands_get_no_adjoints_and_variables_still_do() {
    let (log_omegas, gamma, rho) = fixture();

    let mut tape = Tape::new();
    let lw = lift_matrix(&mut tape, &log_omegas);
    let _guard = TapeGuard::new(&mut tape);

    let lp = hmm_marginal_lpdf(
        MatrixOperand::Vars(&lw),
        MatrixOperand::Consts(&gamma),
        VectorOperand::Consts(&rho),
    )
    .unwrap();
    tape.reverse(lp.index());

    let h = 1e-6;
    for idx in 0..6 {
        let mut hi = log_omegas.clone();
        let mut lo = log_omegas.clone();
        hi.as_mut_slice()[idx] += h;
        lo.as_mut_slice()[idx] -= h;
        let fd = (lp_by_path_enumeration(&hi, &gamma, &rho)
            - lp_by_path_enumeration(&lo, &gamma, &rho))
            / (2.0 * h);
        let ad = tape.adjoint(lw.as_slice()[idx].index());
        assert_relative_eq!(ad, fd, max_relative = 1e-6, epsilon = 1e-9);
    }
}

#[test]
fn single_step_boundary_case() {
    // n_transitions == 0: closed-form adjoints, no kappa recursion.
    let log_omegas = DMatrix::from_row_slice(2, 1, &[-0.9, -0.4]);
    let gamma = DMatrix::from_row_slice(2, 2, &[0.6, 0.4, 0.3, 0.7]);
    let rho = DVector::from_column_slice(&[0.25, 0.75]);

    let expected = lp_by_path_enumeration(&log_omegas, &gamma, &rho);
    assert_relative_eq!(lp_value(&log_omegas, &gamma, &rho), expected, epsilon = 1e-9);

    let mut tape = Tape::new();
    let lw = lift_matrix(&mut tape, &log_omegas);
    let rh = lift_vector(&mut tape, &rho);
    let _guard = TapeGuard::new(&mut tape);

    let lp = hmm_marginal_lpdf(
        MatrixOperand::Vars(&lw),
        MatrixOperand::Consts(&gamma),
        VectorOperand::Vars(&rh),
    )
    .unwrap();
    tape.reverse(lp.index());

    let h = 1e-7;
    for idx in 0..2 {
        let mut hi = log_omegas.clone();
        let mut lo = log_omegas.clone();
        hi.as_mut_slice()[idx] += h;
        lo.as_mut_slice()[idx] -= h;
        let fd = (lp_by_path_enumeration(&hi, &gamma, &rho)
            - lp_by_path_enumeration(&lo, &gamma, &rho))
            / (2.0 * h);
        assert_relative_eq!(
            tape.adjoint(lw.as_slice()[idx].index()),
            fd,
            max_relative = 1e-6
        );

        let mut hi = rho.clone();
        let mut lo = rho.clone();
        hi[idx] += h;
        lo[idx] -= h;
        let fd = (lp_by_path_enumeration(&log_omegas, &gamma, &hi)
            - lp_by_path_enumeration(&log_omegas, &gamma, &lo))
            / (2.0 * h);
        assert_relative_eq!(tape.adjoint(rh[idx].index()), fd, max_relative = 1e-6);
    }
}

// ── Preconditions ──

#[test]
fn invalid_transition_row_fails_before_any_recording() {
    let (log_omegas, _, rho) = fixture();
    let bad_gamma = DMatrix::from_row_slice(2, 2, &[0.9, 0.6, 0.2, 0.8]); // row 0 sums to 1.5

    let mut tape: Tape<f64> = Tape::new();
    let _guard = TapeGuard::new(&mut tape);
    let err = hmm_marginal_lpdf(
        MatrixOperand::Consts(&log_omegas),
        MatrixOperand::Consts(&bad_gamma),
        VectorOperand::Consts(&rho),
    )
    .unwrap_err();

    match err {
        Error::NotSimplex { name, sum, .. } => {
            assert_eq!(name, "gamma[0, ]");
            assert_relative_eq!(sum, 1.5, max_relative = 1e-12);
        }
        other => panic!("expected NotSimplex, got {other:?}"),
    }
    // No forward-pass arithmetic ran: nothing on the tape, nothing in the
    // arena.
    assert_eq!(tape.len(), 0);
    assert_eq!(tape.arena().len(), 0);
}

#[test]
fn non_square_transition_matrix_is_rejected() {
    let (log_omegas, _, rho) = fixture();
    let bad_gamma = DMatrix::from_row_slice(2, 3, &[0.5, 0.3, 0.2, 0.2, 0.4, 0.4]);

    let mut tape: Tape<f64> = Tape::new();
    let _guard = TapeGuard::new(&mut tape);
    let err = hmm_marginal_lpdf(
        MatrixOperand::Consts(&log_omegas),
        MatrixOperand::Consts(&bad_gamma),
        VectorOperand::Consts(&rho),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NotSquare { .. }));
    assert_eq!(tape.len(), 0);
}

#[test]
fn negative_transition_entry_is_rejected() {
    let (log_omegas, _, rho) = fixture();
    let bad_gamma = DMatrix::from_row_slice(2, 2, &[1.1, -0.1, 0.2, 0.8]);

    let mut tape: Tape<f64> = Tape::new();
    let _guard = TapeGuard::new(&mut tape);
    let err = hmm_marginal_lpdf(
        MatrixOperand::Consts(&log_omegas),
        MatrixOperand::Consts(&bad_gamma),
        VectorOperand::Consts(&rho),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Negative { .. }));
    assert_eq!(tape.len(), 0);
}

#[test]
fn initial_distribution_is_validated() {
    let (log_omegas, gamma, _) = fixture();

    let mut tape: Tape<f64> = Tape::new();
    let _guard = TapeGuard::new(&mut tape);

    // Wrong length.
    let short_rho = DVector::from_column_slice(&[1.0]);
    let err = hmm_marginal_lpdf(
        MatrixOperand::Consts(&log_omegas),
        MatrixOperand::Consts(&gamma),
        VectorOperand::Consts(&short_rho),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InconsistentSize { .. }));

    // Not a simplex.
    let bad_rho = DVector::from_column_slice(&[0.7, 0.7]);
    let err = hmm_marginal_lpdf(
        MatrixOperand::Consts(&log_omegas),
        MatrixOperand::Consts(&gamma),
        VectorOperand::Consts(&bad_rho),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NotSimplex { .. }));
    assert_eq!(tape.len(), 0);
}
