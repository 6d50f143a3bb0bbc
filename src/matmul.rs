//! Small GEMM wrapper used by the dense layers.
//!
//! `gemm` computes `C = alpha * op(A) * op(B) + beta * C` on row-major tensors,
//! where `op` is either identity or transpose (expressed through strides, no copies).
//!
//! - default: a simple, safe triple-loop implementation
//! - optional: a faster backend via the `matrixmultiply` feature

use crate::Tensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    N,
    T,
}

impl Op {
    /// Logical `(rows, cols)` of `op(t)`.
    #[inline]
    fn dims(self, t: &Tensor) -> (usize, usize) {
        match self {
            Op::N => (t.rows(), t.cols()),
            Op::T => (t.cols(), t.rows()),
        }
    }

    /// Row/column strides of `op(t)` over the row-major buffer of `t`.
    #[inline]
    fn strides(self, t: &Tensor) -> (usize, usize) {
        match self {
            Op::N => (t.cols(), 1),
            Op::T => (1, t.cols()),
        }
    }
}

/// `c = alpha * op_a(a) * op_b(b) + beta * c`.
///
/// Shapes are treated as programmer error here; public callers validate first.
pub(crate) fn gemm(alpha: f32, a: &Tensor, op_a: Op, b: &Tensor, op_b: Op, beta: f32, c: &mut Tensor) {
    let (m, k) = op_a.dims(a);
    let (k2, n) = op_b.dims(b);
    assert_eq!(k, k2, "gemm inner dims differ: {k} vs {k2}");
    assert_eq!(
        c.shape(),
        (m, n),
        "gemm output shape {:?} does not match ({m}, {n})",
        c.shape()
    );
    if m == 0 || n == 0 {
        return;
    }
    if k == 0 {
        for v in c.as_mut_slice() {
            *v *= beta;
        }
        return;
    }

    let (rsa, csa) = op_a.strides(a);
    let (rsb, csb) = op_b.strides(b);
    let rsc = n;
    gemm_f32(
        m,
        n,
        k,
        alpha,
        a.as_slice(),
        rsa,
        csa,
        b.as_slice(),
        rsb,
        csb,
        beta,
        c.as_mut_slice(),
        rsc,
        1,
    );
}

#[allow(clippy::too_many_arguments)]
#[inline]
fn gemm_f32(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    rsa: usize,
    csa: usize,
    b: &[f32],
    rsb: usize,
    csb: usize,
    beta: f32,
    c: &mut [f32],
    rsc: usize,
    csc: usize,
) {
    debug_assert!(m > 0 && n > 0 && k > 0);

    #[cfg(feature = "matrixmultiply")]
    {
        // matrixmultiply supports arbitrary strides.
        unsafe {
            matrixmultiply::sgemm(
                m,
                k,
                n,
                alpha,
                a.as_ptr(),
                rsa as isize,
                csa as isize,
                b.as_ptr(),
                rsb as isize,
                csb as isize,
                beta,
                c.as_mut_ptr(),
                rsc as isize,
                csc as isize,
            );
        }
    }

    #[cfg(not(feature = "matrixmultiply"))]
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0_f32;
            let a0 = i * rsa;
            let b0 = j * csb;

            for p in 0..k {
                let av = a[a0 + p * csa];
                let bv = b[p * rsb + b0];
                acc = av.mul_add(bv, acc);
            }

            let idx = i * rsc + j * csc;
            c[idx] = alpha * acc + beta * c[idx];
        }
    }
}
