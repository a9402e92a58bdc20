//! Episode tape for reverse-mode AD.
//!
//! The tape owns the node slab, the adjoint-Jacobian adapter table, and the
//! scratch [`Arena`] for one differentiation episode. Nodes are appended in
//! creation order during the forward pass; because a node can only reference
//! operands that already exist, walking the slab backward is a valid
//! reverse-topological traversal and the backward sweep visits every node
//! exactly once.
//!
//! A tape is an explicit per-episode object. [`TapeGuard`] activates it on
//! the current thread for the scope of a recording closure so that operator
//! overloads can reach it; independent episodes (one per thread) are just
//! independent `Tape` instances.

use std::cell::Cell;

use crate::adj_jac::AdjJacOp;
use crate::arena::Arena;
use crate::float::Float;
use crate::node::{Node, Op, CONSTANT};

/// One registered adjoint-Jacobian operator invocation.
///
/// `edges[k]` holds the node indices of the k-th operand's elements, or
/// `None` when that operand is constant (no adjoint work for it). The
/// operator's output slots occupy `[first_out, first_out + n_out)` on the
/// tape, directly after the controller node.
struct AdapterEntry<F: Float> {
    op: Box<dyn AdjJacOp<F>>,
    edges: Vec<Option<Vec<u32>>>,
    first_out: u32,
    n_out: u32,
}

/// Episode-scoped node tape.
///
/// Append-only during the forward pass, walked backward by
/// [`reverse`](Tape::reverse). [`reset`](Tape::reset) drops all nodes,
/// adapters, and scratch storage at once; nothing is freed individually.
pub struct Tape<F: Float> {
    nodes: Vec<Node<F>>,
    adapters: Vec<AdapterEntry<F>>,
    scratch: Arena<F>,
}

impl<F: Float> Default for Tape<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> Tape<F> {
    /// Create an empty tape.
    pub fn new() -> Self {
        Tape {
            nodes: Vec::new(),
            adapters: Vec::new(),
            scratch: Arena::new(),
        }
    }

    /// Create a tape with pre-allocated node capacity.
    pub fn with_capacity(est_nodes: usize) -> Self {
        Tape {
            nodes: Vec::with_capacity(est_nodes),
            adapters: Vec::new(),
            scratch: Arena::new(),
        }
    }

    /// Number of nodes recorded so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no nodes have been recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The episode's scratch arena.
    #[inline]
    pub fn arena(&self) -> &Arena<F> {
        &self.scratch
    }

    /// Mutable access to the episode's scratch arena.
    #[inline]
    pub fn arena_mut(&mut self) -> &mut Arena<F> {
        &mut self.scratch
    }

    /// Drop all nodes, adapters, and scratch storage. Capacity is retained.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.adapters.clear();
        self.scratch.reset();
    }

    #[inline]
    fn push_node(&mut self, value: F, op: Op<F>) -> u32 {
        let idx = self.nodes.len() as u32;
        self.nodes.push(Node::new(value, op));
        idx
    }

    /// Register a new independent variable. Returns `(index, value)`.
    #[inline]
    pub fn new_variable(&mut self, value: F) -> (u32, F) {
        (self.push_node(value, Op::Leaf), value)
    }

    /// Record a unary operation `result = f(arg)` with precomputed
    /// `partial = df/d(arg)`. A constant operand records nothing and the
    /// result is itself a constant.
    #[inline]
    pub fn push_unary(&mut self, value: F, arg: u32, partial: F) -> u32 {
        if arg == CONSTANT {
            return CONSTANT;
        }
        self.push_node(value, Op::Unary { arg, partial })
    }

    /// Record a binary operation with precomputed partials. Constant
    /// operands (index [`CONSTANT`]) select the smaller one-sided node
    /// variants; if both operands are constant nothing is recorded.
    #[inline]
    pub fn push_binary(&mut self, value: F, lhs: u32, lhs_partial: F, rhs: u32, rhs_partial: F) -> u32 {
        match (lhs == CONSTANT, rhs == CONSTANT) {
            (false, false) => self.push_node(
                value,
                Op::Binary {
                    lhs,
                    rhs,
                    lhs_partial,
                    rhs_partial,
                },
            ),
            (true, false) => self.push_node(value, Op::LeftConst { rhs, rhs_partial }),
            (false, true) => self.push_node(value, Op::RightConst { lhs, lhs_partial }),
            (true, true) => CONSTANT,
        }
    }

    /// Record an adjoint-Jacobian operator: one controller node followed by
    /// one leaf node per output element. Returns the index of the first
    /// output slot (== controller index + 1, even when `out_values` is
    /// empty).
    pub(crate) fn push_adj_jac(
        &mut self,
        op: Box<dyn AdjJacOp<F>>,
        edges: Vec<Option<Vec<u32>>>,
        out_values: &[F],
    ) -> u32 {
        let id = self.adapters.len() as u32;
        self.push_node(F::zero(), Op::AdjJac { id });
        let first_out = self.nodes.len() as u32;
        for &v in out_values {
            self.push_node(v, Op::Leaf);
        }
        self.adapters.push(AdapterEntry {
            op,
            edges,
            first_out,
            n_out: out_values.len() as u32,
        });
        first_out
    }

    /// Forward value stored at a node.
    #[inline]
    pub fn value(&self, index: u32) -> F {
        self.nodes[index as usize].value
    }

    /// Accumulated adjoint of a node after a reverse sweep. Constants have
    /// no adjoint slot and report zero.
    #[inline]
    pub fn adjoint(&self, index: u32) -> F {
        if index == CONSTANT {
            F::zero()
        } else {
            self.nodes[index as usize].adjoint
        }
    }

    /// Run the reverse sweep with the adjoint of `seed_index` seeded to 1.
    ///
    /// All adjoints are re-zeroed first, so repeated sweeps on the same tape
    /// do not accumulate across calls. Seeding a constant leaves every
    /// adjoint zero.
    pub fn reverse(&mut self, seed_index: u32) {
        self.zero_adjoints();
        if seed_index == CONSTANT {
            return;
        }
        self.nodes[seed_index as usize].adjoint = F::one();
        self.sweep();
    }

    /// Run the reverse sweep with custom adjoint seeds (summed before the
    /// single sweep; reverse mode is linear in the seed).
    pub fn reverse_seeded(&mut self, seeds: &[(u32, F)]) {
        self.zero_adjoints();
        for &(index, seed) in seeds {
            if index != CONSTANT {
                let node = &mut self.nodes[index as usize];
                node.adjoint = node.adjoint + seed;
            }
        }
        self.sweep();
    }

    fn zero_adjoints(&mut self) {
        for node in &mut self.nodes {
            node.adjoint = F::zero();
        }
    }

    /// Walk the tape last-created to first-created, propagating each node's
    /// adjoint into its operands exactly once.
    fn sweep(&mut self) {
        let Tape {
            nodes,
            adapters,
            scratch,
        } = self;

        for i in (0..nodes.len()).rev() {
            let a = nodes[i].adjoint;
            let op = nodes[i].op;
            match op {
                Op::Leaf => {}
                Op::Unary { arg, partial } => {
                    if a != F::zero() {
                        let n = &mut nodes[arg as usize];
                        n.adjoint = n.adjoint + partial * a;
                    }
                }
                Op::Binary {
                    lhs,
                    rhs,
                    lhs_partial,
                    rhs_partial,
                } => {
                    if a != F::zero() {
                        let n = &mut nodes[lhs as usize];
                        n.adjoint = n.adjoint + lhs_partial * a;
                        let n = &mut nodes[rhs as usize];
                        n.adjoint = n.adjoint + rhs_partial * a;
                    }
                }
                Op::LeftConst { rhs, rhs_partial } => {
                    if a != F::zero() {
                        let n = &mut nodes[rhs as usize];
                        n.adjoint = n.adjoint + rhs_partial * a;
                    }
                }
                Op::RightConst { lhs, lhs_partial } => {
                    if a != F::zero() {
                        let n = &mut nodes[lhs as usize];
                        n.adjoint = n.adjoint + lhs_partial * a;
                    }
                }
                Op::AdjJac { id } => {
                    // The controller's output slots sit directly after it on
                    // the tape, so their consumers have all run by now and
                    // the adjoints read here are final.
                    let entry = &adapters[id as usize];
                    let first = entry.first_out as usize;
                    let out_adj: Vec<F> = nodes[first..first + entry.n_out as usize]
                        .iter()
                        .map(|n| n.adjoint)
                        .collect();
                    if out_adj.iter().all(|&v| v == F::zero()) {
                        continue;
                    }
                    let active: Vec<bool> = entry.edges.iter().map(|e| e.is_some()).collect();
                    let input_adj = entry.op.multiply_adjoint_jacobian(scratch, &active, &out_adj);
                    for (edge, adj) in entry.edges.iter().zip(input_adj.iter()) {
                        if let Some(ids) = edge {
                            for (&nid, &d) in ids.iter().zip(adj.iter()) {
                                if nid != CONSTANT {
                                    let n = &mut nodes[nid as usize];
                                    n.adjoint = n.adjoint + d;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

// Thread-local active tape pointer.
thread_local! {
    static TAPE_F32: Cell<*mut Tape<f32>> = const { Cell::new(std::ptr::null_mut()) };
    static TAPE_F64: Cell<*mut Tape<f64>> = const { Cell::new(std::ptr::null_mut()) };
}

/// Trait to select the correct thread-local for a given float type.
pub trait TapeThreadLocal: Float {
    fn cell() -> &'static std::thread::LocalKey<Cell<*mut Tape<Self>>>;
}

impl TapeThreadLocal for f32 {
    fn cell() -> &'static std::thread::LocalKey<Cell<*mut Tape<Self>>> {
        &TAPE_F32
    }
}

impl TapeThreadLocal for f64 {
    fn cell() -> &'static std::thread::LocalKey<Cell<*mut Tape<Self>>> {
        &TAPE_F64
    }
}

/// Access the active tape for the current thread. Panics if no tape is active.
#[inline]
pub fn with_active_tape<F: TapeThreadLocal, R>(f: impl FnOnce(&mut Tape<F>) -> R) -> R {
    F::cell().with(|cell| {
        let ptr = cell.get();
        assert!(
            !ptr.is_null(),
            "No active tape. Use tapir::grad() or activate one with TapeGuard."
        );
        // SAFETY: The TapeGuard guarantees the pointer is valid for the
        // duration of the closure-based API scope, and only one mutable
        // reference exists at a time (single-threaded access via thread-local).
        let tape = unsafe { &mut *ptr };
        f(tape)
    })
}

/// RAII guard that sets a tape as the thread-local active tape and restores
/// the previous one on drop.
pub struct TapeGuard<F: TapeThreadLocal> {
    prev: *mut Tape<F>,
}

impl<F: TapeThreadLocal> TapeGuard<F> {
    /// Activate `tape` as the thread-local tape. Returns a guard that restores
    /// the previous tape on drop.
    pub fn new(tape: &mut Tape<F>) -> Self {
        let prev = F::cell().with(|cell| {
            let prev = cell.get();
            cell.set(tape as *mut Tape<F>);
            prev
        });
        TapeGuard { prev }
    }
}

impl<F: TapeThreadLocal> Drop for TapeGuard<F> {
    fn drop(&mut self) {
        F::cell().with(|cell| {
            cell.set(self.prev);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl<F: Float> Tape<F> {
        /// Operand indices of node `i`, for structural checks.
        fn operands_of(&self, i: usize) -> Vec<u32> {
            match self.nodes[i].op {
                Op::Leaf => vec![],
                Op::Unary { arg, .. } => vec![arg],
                Op::Binary { lhs, rhs, .. } => vec![lhs, rhs],
                Op::LeftConst { rhs, .. } => vec![rhs],
                Op::RightConst { lhs, .. } => vec![lhs],
                Op::AdjJac { id } => self.adapters[id as usize]
                    .edges
                    .iter()
                    .flatten()
                    .flatten()
                    .copied()
                    .filter(|&n| n != CONSTANT)
                    .collect(),
            }
        }
    }

    /// Every operand reference points strictly earlier on the tape, which is
    /// what makes the backward walk a valid reverse-topological order.
    #[test]
    fn operands_precede_their_consumers() {
        let mut tape = Tape::<f64>::new();
        let (x, xv) = tape.new_variable(2.0);
        let (y, yv) = tape.new_variable(3.0);
        let p = tape.push_binary(xv * yv, x, yv, y, xv);
        let s = tape.push_binary(xv * yv + xv, p, 1.0, x, 1.0);
        let _ = tape.push_unary((xv * yv + xv).sqrt(), s, 0.5 / (xv * yv + xv).sqrt());

        for i in 0..tape.len() {
            for arg in tape.operands_of(i) {
                assert!(
                    (arg as usize) < i,
                    "node {} references operand {} at or after itself",
                    i,
                    arg
                );
            }
        }
    }

    #[test]
    fn constant_operands_record_nothing() {
        let mut tape = Tape::<f64>::new();
        let before = tape.len();
        let idx = tape.push_binary(5.0, CONSTANT, 1.0, CONSTANT, 1.0);
        assert_eq!(idx, CONSTANT);
        assert_eq!(tape.len(), before);
        assert_eq!(tape.adjoint(CONSTANT), 0.0);
    }

    #[test]
    fn repeated_sweeps_do_not_accumulate() {
        let mut tape = Tape::<f64>::new();
        let (x, xv) = tape.new_variable(4.0);
        let y = tape.push_binary(xv * xv, x, xv, x, xv);
        tape.reverse(y);
        assert_eq!(tape.adjoint(x), 8.0);
        tape.reverse(y);
        assert_eq!(tape.adjoint(x), 8.0);
    }
}
