//! Opaque accelerated-backend interface with asynchronous completion.
//!
//! The engine never implements kernels; it consumes a backend through
//! [`DeviceBackend`], whose every operation is "enqueued, completes
//! independently" and returns a completion handle. [`DeviceMatrix`] layers
//! the required producer/consumer ordering on top: it tracks the pending
//! write and all pending reads per buffer and hands the right wait list to
//! each enqueue, so a buffer is never read before its last write completes,
//! and never overwritten while reads are outstanding.
//!
//! [`HostBackend`] is a synchronous reference implementation used to
//! exercise the tracking discipline in tests.

use crate::error::{Error, Result};

/// Which triangular part of a matrix participates in a product.
///
/// Backends with triangularity-aware kernels skip the zero half; `Full`
/// multiplies the whole matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriangularView {
    Full,
    Lower,
    Upper,
}

/// An accelerated device offering size-checked copies and dense products,
/// all returning only after enqueuing, with completion tracked by `Event`.
pub trait DeviceBackend {
    /// Device-resident buffer handle.
    type Buffer;
    /// Asynchronous completion handle for one enqueued operation.
    type Event: Clone;

    /// Allocate an uninitialized `rows x cols` device buffer.
    fn alloc(&mut self, rows: usize, cols: usize) -> Result<Self::Buffer>;

    /// Enqueue a host-to-device copy after `wait` completes.
    fn copy_in(
        &mut self,
        dst: &mut Self::Buffer,
        src: &[f64],
        wait: &[Self::Event],
    ) -> Result<Self::Event>;

    /// Enqueue a device-to-host copy after `wait` completes.
    fn copy_out(
        &mut self,
        src: &Self::Buffer,
        dst: &mut [f64],
        wait: &[Self::Event],
    ) -> Result<Self::Event>;

    /// Enqueue a device-to-device copy after `wait` completes.
    fn copy(
        &mut self,
        src: &Self::Buffer,
        dst: &mut Self::Buffer,
        wait: &[Self::Event],
    ) -> Result<Self::Event>;

    /// Enqueue `dst = a · b` after `wait` completes, honoring the declared
    /// triangular views of `a` and `b`.
    #[allow(clippy::too_many_arguments)]
    fn matmul(
        &mut self,
        a: &Self::Buffer,
        a_view: TriangularView,
        b: &Self::Buffer,
        b_view: TriangularView,
        dst: &mut Self::Buffer,
        m: usize,
        k: usize,
        n: usize,
        wait: &[Self::Event],
    ) -> Result<Self::Event>;

    /// Block until `event` completes.
    fn wait(&mut self, event: &Self::Event);
}

/// A device matrix plus its outstanding-operation markers.
///
/// Writers wait on the pending write and on all pending reads; readers wait
/// on the pending write only. Completing a host read blocks, so host-visible
/// data is always final.
pub struct DeviceMatrix<B: DeviceBackend> {
    buf: B::Buffer,
    rows: usize,
    cols: usize,
    write_event: Option<B::Event>,
    read_events: Vec<B::Event>,
}

impl<B: DeviceBackend> DeviceMatrix<B> {
    /// Allocate a `rows x cols` device matrix with no pending operations.
    pub fn new(backend: &mut B, rows: usize, cols: usize) -> Result<Self> {
        Ok(DeviceMatrix {
            buf: backend.alloc(rows, cols)?,
            rows,
            cols,
            write_event: None,
            read_events: Vec::new(),
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Whether a write is still in flight.
    pub fn has_pending_write(&self) -> bool {
        self.write_event.is_some()
    }

    /// Number of reads still in flight.
    pub fn pending_reads(&self) -> usize {
        self.read_events.len()
    }

    fn check_len(&self, op: &'static str, len: usize) -> Result<()> {
        if len != self.rows * self.cols {
            return Err(Error::SizeMismatch {
                function: op,
                lhs_name: "host buffer".to_string(),
                lhs_len: len,
                rhs_name: "device matrix".to_string(),
                rhs_len: self.rows * self.cols,
            });
        }
        Ok(())
    }

    /// Wait list for an operation that writes this buffer: the pending
    /// write plus every pending read.
    fn write_deps(&self) -> Vec<B::Event> {
        let mut deps = self.read_events.clone();
        if let Some(e) = &self.write_event {
            deps.push(e.clone());
        }
        deps
    }

    /// Wait list for an operation that reads this buffer: the pending write.
    fn read_deps(&self) -> Vec<B::Event> {
        self.write_event.iter().cloned().collect()
    }

    fn record_write(&mut self, event: B::Event) {
        self.write_event = Some(event);
        self.read_events.clear();
    }

    /// Enqueue a size-checked host-to-device transfer.
    pub fn write_from_host(&mut self, backend: &mut B, src: &[f64]) -> Result<()> {
        self.check_len("copy_in", src.len())?;
        let deps = self.write_deps();
        let event = backend.copy_in(&mut self.buf, src, &deps)?;
        self.record_write(event);
        Ok(())
    }

    /// Size-checked device-to-host transfer. Blocks until the data is final.
    pub fn read_to_host(&mut self, backend: &mut B, dst: &mut [f64]) -> Result<()> {
        self.check_len("copy_out", dst.len())?;
        let deps = self.read_deps();
        let event = backend.copy_out(&self.buf, dst, &deps)?;
        backend.wait(&event);
        Ok(())
    }

    /// Enqueue a size-checked device-to-device copy from `src` into `self`.
    pub fn copy_from(&mut self, backend: &mut B, src: &mut DeviceMatrix<B>) -> Result<()> {
        if (self.rows, self.cols) != (src.rows, src.cols) {
            return Err(Error::SizeMismatch {
                function: "copy",
                lhs_name: "src".to_string(),
                lhs_len: src.rows * src.cols,
                rhs_name: "dst".to_string(),
                rhs_len: self.rows * self.cols,
            });
        }
        let mut deps = src.read_deps();
        deps.extend(self.write_deps());
        let event = backend.copy(&src.buf, &mut self.buf, &deps)?;
        src.read_events.push(event.clone());
        self.record_write(event);
        Ok(())
    }

    /// Enqueue `self = a · b`, honoring triangular views. Shapes must agree
    /// (`a: m x k`, `b: k x n`, `self: m x n`).
    pub fn multiply_into(
        &mut self,
        backend: &mut B,
        a: &mut DeviceMatrix<B>,
        a_view: TriangularView,
        b: &mut DeviceMatrix<B>,
        b_view: TriangularView,
    ) -> Result<()> {
        if a.cols != b.rows || self.rows != a.rows || self.cols != b.cols {
            return Err(Error::SizeMismatch {
                function: "matrix_multiply",
                lhs_name: "a".to_string(),
                lhs_len: a.cols,
                rhs_name: "b".to_string(),
                rhs_len: b.rows,
            });
        }
        let mut deps = a.read_deps();
        deps.extend(b.read_deps());
        deps.extend(self.write_deps());
        let event = backend.matmul(
            &a.buf, a_view, &b.buf, b_view, &mut self.buf, a.rows, a.cols, b.cols, &deps,
        )?;
        a.read_events.push(event.clone());
        b.read_events.push(event.clone());
        self.record_write(event);
        Ok(())
    }
}

// ──────────────────────────────────────────────
//  Host reference backend
// ──────────────────────────────────────────────

/// Synchronous in-process backend: every operation completes at enqueue.
///
/// Events are sequence numbers and the wait lists received by each enqueue
/// are logged, so tests can assert the exact dependency discipline.
#[derive(Default)]
pub struct HostBackend {
    next_event: u64,
    /// `(operation, wait list)` per enqueue, in order.
    pub log: Vec<(&'static str, Vec<u64>)>,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&mut self, op: &'static str, wait: &[u64]) -> u64 {
        self.log.push((op, wait.to_vec()));
        let e = self.next_event;
        self.next_event += 1;
        e
    }
}

impl DeviceBackend for HostBackend {
    type Buffer = Vec<f64>;
    type Event = u64;

    fn alloc(&mut self, rows: usize, cols: usize) -> Result<Self::Buffer> {
        Ok(vec![0.0; rows * cols])
    }

    fn copy_in(&mut self, dst: &mut Vec<f64>, src: &[f64], wait: &[u64]) -> Result<u64> {
        dst.copy_from_slice(src);
        Ok(self.enqueue("copy_in", wait))
    }

    fn copy_out(&mut self, src: &Vec<f64>, dst: &mut [f64], wait: &[u64]) -> Result<u64> {
        dst.copy_from_slice(src);
        Ok(self.enqueue("copy_out", wait))
    }

    fn copy(&mut self, src: &Vec<f64>, dst: &mut Vec<f64>, wait: &[u64]) -> Result<u64> {
        dst.copy_from_slice(src);
        Ok(self.enqueue("copy", wait))
    }

    fn matmul(
        &mut self,
        a: &Vec<f64>,
        a_view: TriangularView,
        b: &Vec<f64>,
        b_view: TriangularView,
        dst: &mut Vec<f64>,
        m: usize,
        k: usize,
        n: usize,
        wait: &[u64],
    ) -> Result<u64> {
        // Column-major, masking the excluded triangle of each operand.
        let a_at = |r: usize, c: usize| match a_view {
            TriangularView::Full => a[c * m + r],
            TriangularView::Lower if r >= c => a[c * m + r],
            TriangularView::Upper if r <= c => a[c * m + r],
            _ => 0.0,
        };
        let b_at = |r: usize, c: usize| match b_view {
            TriangularView::Full => b[c * k + r],
            TriangularView::Lower if r >= c => b[c * k + r],
            TriangularView::Upper if r <= c => b[c * k + r],
            _ => 0.0,
        };
        for j in 0..n {
            for i in 0..m {
                let mut acc = 0.0;
                for l in 0..k {
                    acc += a_at(i, l) * b_at(l, j);
                }
                dst[j * m + i] = acc;
            }
        }
        Ok(self.enqueue("matmul", wait))
    }

    fn wait(&mut self, _event: &u64) {}
}
