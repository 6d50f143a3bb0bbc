//! Dense 2D tensors.
//!
//! Every value flowing through a model is a row-major `(rows, cols)` matrix of `f32`:
//! a batch of samples is one row per sample. Vectors are `(1, n)` or `(n, 1)`.

use std::fmt;

use crate::matmul::{Op, gemm};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl Tensor {
    #[inline]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Build a tensor from a flat row-major buffer with shape `(rows, cols)`.
    pub fn from_vec(data: Vec<f32>, rows: usize, cols: usize) -> Result<Self> {
        let expected = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::InvalidShape("tensor shape overflow".to_owned()))?;
        if data.len() != expected {
            return Err(Error::InvalidShape(format!(
                "buffer length {} does not match rows * cols ({rows} * {cols})",
                data.len()
            )));
        }
        Ok(Self { data, rows, cols })
    }

    /// Build a tensor from per-row vectors (copies into contiguous storage).
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::InvalidShape(format!(
                    "row {i} has len {}, expected {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            data,
            rows: rows.len(),
            cols,
        })
    }

    /// A `(n, 1)` column.
    #[inline]
    pub fn column(values: Vec<f32>) -> Self {
        let rows = values.len();
        Self {
            data: values,
            rows,
            cols: 1,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[inline]
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Returns row `r`. Panics if `r >= rows`.
    #[inline]
    pub fn row(&self, r: usize) -> &[f32] {
        let start = r * self.cols;
        &self.data[start..start + self.cols]
    }

    /// Returns element `(r, c)`. Panics when out of bounds.
    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f32 {
        assert!(c < self.cols, "column {c} out of bounds for {} cols", self.cols);
        self.data[r * self.cols + c]
    }

    #[inline]
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor {
            data: self.data.iter().map(|&v| f(v)).collect(),
            rows: self.rows,
            cols: self.cols,
        }
    }

    /// `self * other`.
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        self.product(Op::N, other, Op::N)
    }

    /// `self * other^T`.
    pub fn matmul_t(&self, other: &Tensor) -> Result<Tensor> {
        self.product(Op::N, other, Op::T)
    }

    /// `self^T * other`.
    pub fn t_matmul(&self, other: &Tensor) -> Result<Tensor> {
        self.product(Op::T, other, Op::N)
    }

    fn product(&self, op_a: Op, other: &Tensor, op_b: Op) -> Result<Tensor> {
        let (m, k) = match op_a {
            Op::N => (self.rows, self.cols),
            Op::T => (self.cols, self.rows),
        };
        let (k2, n) = match op_b {
            Op::N => (other.rows, other.cols),
            Op::T => (other.cols, other.rows),
        };
        if k != k2 {
            return Err(Error::InvalidShape(format!(
                "cannot multiply ({m}, {k}) by ({k2}, {n})"
            )));
        }
        let mut out = Tensor::zeros(m, n);
        gemm(1.0, self, op_a, other, op_b, 0.0, &mut out);
        Ok(out)
    }

    /// Adds `row` to every row of `self`.
    pub fn add_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.cols {
            return Err(Error::InvalidShape(format!(
                "row of len {} cannot broadcast over {} cols",
                row.len(),
                self.cols
            )));
        }
        for chunk in self.data.chunks_exact_mut(self.cols.max(1)) {
            for (v, &b) in chunk.iter_mut().zip(row) {
                *v += b;
            }
        }
        Ok(())
    }

    /// Column sums, i.e. the reduction over the batch dimension.
    pub fn sum_rows(&self) -> Vec<f32> {
        let mut out = vec![0.0_f32; self.cols];
        for r in 0..self.rows {
            for (acc, &v) in out.iter_mut().zip(self.row(r)) {
                *acc += v;
            }
        }
        out
    }

    /// Column `c` as a `(rows, 1)` tensor.
    pub fn select_column(&self, c: usize) -> Result<Tensor> {
        if c >= self.cols {
            return Err(Error::InvalidShape(format!(
                "column {c} out of bounds for {} cols",
                self.cols
            )));
        }
        Ok(Tensor::column(
            (0..self.rows).map(|r| self.data[r * self.cols + c]).collect(),
        ))
    }

    pub fn reshape(self, rows: usize, cols: usize) -> Result<Tensor> {
        if rows * cols != self.data.len() {
            return Err(Error::InvalidShape(format!(
                "cannot reshape ({}, {}) into ({rows}, {cols})",
                self.rows, self.cols
            )));
        }
        Ok(Tensor {
            data: self.data,
            rows,
            cols,
        })
    }

    /// First `k` rows (fewer if the tensor is shorter).
    pub fn head(&self, k: usize) -> Tensor {
        let rows = k.min(self.rows);
        Tensor {
            data: self.data[..rows * self.cols].to_vec(),
            rows,
            cols: self.cols,
        }
    }

    /// Largest element-wise absolute difference; `f32::INFINITY` on shape mismatch.
    pub fn max_abs_diff(&self, other: &Tensor) -> f32 {
        if self.shape() != other.shape() {
            return f32::INFINITY;
        }
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor([")?;
        for r in 0..self.rows {
            if r > 0 {
                write!(f, ",\n        ")?;
            }
            write!(f, "[")?;
            for (c, v) in self.row(r).iter().enumerate() {
                if c > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{v:.4}")?;
            }
            write!(f, "]")?;
        }
        write!(f, "])")
    }
}
