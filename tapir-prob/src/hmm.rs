//! Hidden-Markov-model marginal log-likelihood with exact adjoints.
//!
//! For a chain of discrete latent states with transition matrix `gamma`
//! (rows are simplexes: `gamma[i, j]` is the probability of moving from
//! state `i` to state `j`), initial distribution `rho`, and per-step
//! log observation densities `log_omegas` (`log_omegas[j, n]` is the log
//! density of observation `n` given state `j`), computes
//! `log p(y | gamma, rho, log_omegas)` by the forward recursion and its
//! gradient by the adjoint (backward) recursion.
//!
//! Both recursions rescale by the running maximum coefficient and carry the
//! scale in log space, so chains of thousands of steps neither underflow
//! nor overflow. The whole operator records as a single adjoint-Jacobian
//! node: the forward pass caches its normalized `alpha` columns, log
//! normalizers, and exponentiated densities in the episode arena, and the
//! backward `kappa` recursion reconciles its independently rescaled
//! quantities through per-step correction factors.

use nalgebra::{DMatrix, DVector};

use tapir::adj_jac::{adj_jac_apply, AdjJacOp, Operand};
use tapir::arena::{Arena, ArenaSlice};
use tapir::check::{check_consistent_size, check_nonzero_size, check_simplex, check_square};
use tapir::{Result, Var};

/// A matrix argument: differentiable or constant.
#[derive(Clone, Copy)]
pub enum MatrixOperand<'a> {
    Vars(&'a DMatrix<Var<f64>>),
    Consts(&'a DMatrix<f64>),
}

impl<'a> MatrixOperand<'a> {
    fn nrows(&self) -> usize {
        match self {
            MatrixOperand::Vars(m) => m.nrows(),
            MatrixOperand::Consts(m) => m.nrows(),
        }
    }

    fn ncols(&self) -> usize {
        match self {
            MatrixOperand::Vars(m) => m.ncols(),
            MatrixOperand::Consts(m) => m.ncols(),
        }
    }

    fn row_values(&self, i: usize) -> Vec<f64> {
        match self {
            MatrixOperand::Vars(m) => m.row(i).iter().map(|v| v.value()).collect(),
            MatrixOperand::Consts(m) => m.row(i).iter().copied().collect(),
        }
    }

    fn operand(&self) -> Operand<'a, f64> {
        match *self {
            MatrixOperand::Vars(m) => Operand::Vars(m.as_slice()),
            MatrixOperand::Consts(m) => Operand::Consts(m.as_slice()),
        }
    }
}

/// A vector argument: differentiable or constant.
#[derive(Clone, Copy)]
pub enum VectorOperand<'a> {
    Vars(&'a DVector<Var<f64>>),
    Consts(&'a DVector<f64>),
}

impl<'a> VectorOperand<'a> {
    fn len(&self) -> usize {
        match self {
            VectorOperand::Vars(v) => v.len(),
            VectorOperand::Consts(v) => v.len(),
        }
    }

    fn values(&self) -> Vec<f64> {
        match self {
            VectorOperand::Vars(v) => v.iter().map(|x| x.value()).collect(),
            VectorOperand::Consts(v) => v.iter().copied().collect(),
        }
    }

    fn operand(&self) -> Operand<'a, f64> {
        match *self {
            VectorOperand::Vars(v) => Operand::Vars(v.as_slice()),
            VectorOperand::Consts(v) => Operand::Consts(v.as_slice()),
        }
    }
}

/// Forward/adjoint state for one `hmm_marginal_lpdf` invocation.
///
/// Operand order is `[log_omegas, gamma, rho]` throughout.
struct HmmMarginalOp {
    n_states: usize,
    n_transitions: usize,
    omegas: ArenaSlice,
    alphas: ArenaSlice,
    alpha_log_norms: ArenaSlice,
    gamma: ArenaSlice,
    rho: ArenaSlice,
}

impl HmmMarginalOp {
    fn new(n_states: usize, n_transitions: usize) -> Self {
        HmmMarginalOp {
            n_states,
            n_transitions,
            omegas: ArenaSlice::EMPTY,
            alphas: ArenaSlice::EMPTY,
            alpha_log_norms: ArenaSlice::EMPTY,
            gamma: ArenaSlice::EMPTY,
            rho: ArenaSlice::EMPTY,
        }
    }
}

impl AdjJacOp<f64> for HmmMarginalOp {
    fn forward(&mut self, arena: &mut Arena<f64>, inputs: &[&[f64]]) -> Vec<f64> {
        let k = self.n_states;
        let t = self.n_transitions;
        let log_omegas = DMatrix::from_column_slice(k, t + 1, inputs[0]);
        let gamma = DMatrix::from_column_slice(k, k, inputs[1]);
        let rho = DVector::from_column_slice(inputs[2]);

        let omegas = log_omegas.map(f64::exp);
        let gamma_t = gamma.transpose();
        let mut alphas = DMatrix::zeros(k, t + 1);
        let mut alpha_log_norms = vec![0.0; t + 1];

        // Unnormalized forward probabilities, rescaled each step by the
        // column maximum; the scale accumulates additively in log space.
        let mut col = omegas.column(0).component_mul(&rho);
        let norm = col.max();
        col /= norm;
        alpha_log_norms[0] = norm.ln();
        alphas.set_column(0, &col);

        for n in 0..t {
            let mut next = omegas.column(n + 1).component_mul(&(&gamma_t * &col));
            let norm = next.max();
            next /= norm;
            alpha_log_norms[n + 1] = norm.ln() + alpha_log_norms[n];
            alphas.set_column(n + 1, &next);
            col = next;
        }

        let lp = alphas.column(t).sum().ln() + alpha_log_norms[t];

        self.omegas = arena.alloc_copy(omegas.as_slice());
        self.alphas = arena.alloc_copy(alphas.as_slice());
        self.alpha_log_norms = arena.alloc_copy(&alpha_log_norms);
        self.gamma = arena.alloc_copy(inputs[1]);
        self.rho = arena.alloc_copy(inputs[2]);

        vec![lp]
    }

    fn multiply_adjoint_jacobian(
        &self,
        arena: &Arena<f64>,
        active: &[bool],
        adj: &[f64],
    ) -> Vec<Vec<f64>> {
        let k = self.n_states;
        let t = self.n_transitions;
        let seed = adj[0];

        let omegas = DMatrix::from_column_slice(k, t + 1, arena.slice(self.omegas));
        let alphas = DMatrix::from_column_slice(k, t + 1, arena.slice(self.alphas));
        let alpha_log_norms = arena.slice(self.alpha_log_norms);
        let gamma = DMatrix::from_column_slice(k, k, arena.slice(self.gamma));
        let rho = DVector::from_column_slice(arena.slice(self.rho));

        let norm_norm = alpha_log_norms[t];
        let unnormed_marginal = alphas.column(t).sum();

        // Backward kappa recursion with its own max-coefficient rescaling;
        // grad_corr reconciles the two independently rescaled recursions.
        let mut kappa = vec![DVector::zeros(k); t];
        let mut kappa_log_norms = vec![0.0; t];
        let mut grad_corr = vec![0.0; t];

        if t > 0 {
            kappa[t - 1] = DVector::repeat(k, 1.0);
            kappa_log_norms[t - 1] = 0.0;
            grad_corr[t - 1] = (alpha_log_norms[t - 1] - norm_norm).exp();
        }

        for n in (0..t.saturating_sub(1)).rev() {
            let mut v = &gamma * omegas.column(n + 2).component_mul(&kappa[n + 1]);
            let norm = v.max();
            v /= norm;
            kappa_log_norms[n] = norm.ln() + kappa_log_norms[n + 1];
            grad_corr[n] = (alpha_log_norms[n] + kappa_log_norms[n] - norm_norm).exp();
            kappa[n] = v;
        }

        let active_omega = active[0];
        let active_gamma = active[1];
        let active_rho = active[2];

        let mut d_log_omegas = Vec::new();
        let mut d_gamma = Vec::new();
        let mut d_rho = Vec::new();

        if active_gamma {
            let mut jac = DMatrix::zeros(k, k);
            for n in (0..t).rev() {
                let w = kappa[n].component_mul(&omegas.column(n + 1));
                jac += (alphas.column(n) * w.transpose()) * grad_corr[n];
            }
            jac = jac / unnormed_marginal * seed;
            d_gamma = jac.as_slice().to_vec();
        }

        if active_omega || active_rho {
            if t == 0 {
                let exp_lp = unnormed_marginal * norm_norm.exp();
                if active_omega {
                    let col = omegas.column(0).component_mul(&rho) / exp_lp * seed;
                    d_log_omegas = col.as_slice().to_vec();
                }
                if active_rho {
                    let dr = omegas.column(0) / exp_lp * seed;
                    d_rho = dr.as_slice().to_vec();
                }
            } else {
                let grad_corr_boundary = (kappa_log_norms[0] - norm_norm).exp();
                let c = &gamma * omegas.column(1).component_mul(&kappa[0]);

                if active_omega {
                    let gamma_t = gamma.transpose();
                    let mut jac = DMatrix::zeros(k, t + 1);
                    for n in (0..t).rev() {
                        let col = kappa[n].component_mul(&(&gamma_t * alphas.column(n)))
                            * grad_corr[n];
                        jac.set_column(n + 1, &col);
                    }
                    jac.set_column(0, &(c.component_mul(&rho) * grad_corr_boundary));
                    jac = jac.component_mul(&omegas) / unnormed_marginal * seed;
                    d_log_omegas = jac.as_slice().to_vec();
                }

                if active_rho {
                    let dr = c.component_mul(&omegas.column(0)) * grad_corr_boundary
                        / unnormed_marginal
                        * seed;
                    d_rho = dr.as_slice().to_vec();
                }
            }
        }

        vec![d_log_omegas, d_gamma, d_rho]
    }
}

/// Log marginal density of the observations of a hidden Markov model.
///
/// `log_omegas` is `n_states x (n_transitions + 1)`: entry `(j, n)` is the
/// log density of observation `n` given latent state `j`. Each argument may
/// independently be differentiable or constant; constants receive no adjoint
/// work.
///
/// # Errors
///
/// Fails before any tape or arena allocation if `gamma` is not square with
/// one row per state, if any row of `gamma` or `rho` is not a probability
/// simplex, or if `rho`'s length does not match the number of states.
pub fn hmm_marginal_lpdf(
    log_omegas: MatrixOperand<'_>,
    gamma: MatrixOperand<'_>,
    rho: VectorOperand<'_>,
) -> Result<Var<f64>> {
    const FN: &str = "hmm_marginal_lpdf";
    let n_states = log_omegas.nrows();

    check_nonzero_size(FN, "log_omegas", n_states * log_omegas.ncols())?;
    let n_transitions = log_omegas.ncols() - 1;

    check_square(FN, "gamma", gamma.nrows(), gamma.ncols())?;
    check_consistent_size(FN, "gamma", gamma.nrows(), n_states)?;
    for i in 0..n_states {
        check_simplex(FN, &format!("gamma[{}, ]", i), &gamma.row_values(i))?;
    }

    check_consistent_size(FN, "rho", rho.len(), n_states)?;
    check_simplex(FN, "rho", &rho.values())?;

    let out = adj_jac_apply(
        HmmMarginalOp::new(n_states, n_transitions),
        &[log_omegas.operand(), gamma.operand(), rho.operand()],
    );
    Ok(out[0])
}
