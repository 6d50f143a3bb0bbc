//! Datasets.
//!
//! A `Dataset` pairs an input matrix `(len, input_dim)` with a target matrix
//! `(len, target_dim)`, both stored as row-major [`Tensor`]s so the whole set goes
//! through a model in one forward pass.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::{Error, Result, Tensor};

/// A supervised dataset: inputs (X) and targets (Y).
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: Tensor,
    targets: Tensor,
}

impl Dataset {
    /// Build a dataset from flat buffers.
    ///
    /// `inputs` is `(len, input_dim)` and `targets` is `(len, target_dim)`.
    pub fn from_flat(
        inputs: Vec<f32>,
        targets: Vec<f32>,
        input_dim: usize,
        target_dim: usize,
    ) -> Result<Self> {
        if input_dim == 0 {
            return Err(Error::InvalidData("input_dim must be > 0".to_owned()));
        }
        if target_dim == 0 {
            return Err(Error::InvalidData("target_dim must be > 0".to_owned()));
        }
        if !inputs.len().is_multiple_of(input_dim) {
            return Err(Error::InvalidData(format!(
                "inputs length {} is not divisible by input_dim {input_dim}",
                inputs.len()
            )));
        }

        let len = inputs.len() / input_dim;
        if targets.len() != len * target_dim {
            return Err(Error::InvalidData(format!(
                "targets length {} does not match len * target_dim ({len} * {target_dim})",
                targets.len()
            )));
        }

        Self::from_tensors(
            Tensor::from_vec(inputs, len, input_dim)?,
            Tensor::from_vec(targets, len, target_dim)?,
        )
    }

    /// Build a dataset from per-sample rows.
    ///
    /// This is a convenience constructor (it copies into contiguous storage).
    pub fn from_rows(inputs: &[Vec<f32>], targets: &[Vec<f32>]) -> Result<Self> {
        if inputs.len() != targets.len() {
            return Err(Error::InvalidData(format!(
                "inputs/targets length mismatch: {} vs {}",
                inputs.len(),
                targets.len()
            )));
        }
        Self::from_tensors(Tensor::from_rows(inputs)?, Tensor::from_rows(targets)?)
    }

    pub fn from_tensors(inputs: Tensor, targets: Tensor) -> Result<Self> {
        if inputs.rows() != targets.rows() {
            return Err(Error::InvalidData(format!(
                "inputs have {} rows but targets have {}",
                inputs.rows(),
                targets.rows()
            )));
        }
        if inputs.is_empty() || targets.is_empty() {
            return Err(Error::InvalidData("dataset must not be empty".to_owned()));
        }
        Ok(Self { inputs, targets })
    }

    #[inline]
    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.inputs.rows()
    }

    #[inline]
    /// Returns true if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.inputs.cols()
    }

    #[inline]
    pub fn target_dim(&self) -> usize {
        self.targets.cols()
    }

    #[inline]
    pub fn inputs(&self) -> &Tensor {
        &self.inputs
    }

    #[inline]
    pub fn targets(&self) -> &Tensor {
        &self.targets
    }

    #[inline]
    /// Returns the `idx`-th input row.
    ///
    /// Panics if `idx >= len`.
    pub fn input(&self, idx: usize) -> &[f32] {
        self.inputs.row(idx)
    }

    #[inline]
    /// Returns the `idx`-th target row.
    ///
    /// Panics if `idx >= len`.
    pub fn target(&self, idx: usize) -> &[f32] {
        self.targets.row(idx)
    }
}

/// A train/test pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Dataset,
    pub test: Dataset,
}

/// Squared radius of the disc: its area `π r²` is one half of the unit square.
pub const DISC_RADIUS_SQ: f32 = 1.0 / (2.0 * std::f32::consts::PI);

/// Label of a point in the unit square: `1.0` inside the centred disc, `0.0` outside.
#[inline]
pub fn disc_label(x: f32, y: f32) -> f32 {
    let (dx, dy) = (x - 0.5, y - 0.5);
    if dx * dx + dy * dy < DISC_RADIUS_SQ {
        1.0
    } else {
        0.0
    }
}

/// Points drawn uniformly in `[0, 1]²`, labelled by [`disc_label`].
///
/// About half the points fall inside the disc, so the two classes are balanced.
/// Targets have a single column.
pub fn disc_split(n_train: usize, n_test: usize, seed: u64) -> Result<Split> {
    if n_train == 0 || n_test == 0 {
        return Err(Error::InvalidConfig(format!(
            "disc split sizes must be > 0, got train={n_train} test={n_test}"
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let train = disc_points(n_train, &mut rng)?;
    let test = disc_points(n_test, &mut rng)?;
    Ok(Split { train, test })
}

fn disc_points(n: usize, rng: &mut StdRng) -> Result<Dataset> {
    let dist = Uniform::new(0.0_f32, 1.0);
    let mut inputs = Vec::with_capacity(n * 2);
    let mut targets = Vec::with_capacity(n);
    for _ in 0..n {
        let x = dist.sample(rng);
        let y = dist.sample(rng);
        inputs.push(x);
        inputs.push(y);
        targets.push(disc_label(x, y));
    }
    Dataset::from_flat(inputs, targets, 2, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_from_flat_validates_shapes() {
        let ok = Dataset::from_flat(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0], 2, 1);
        assert!(ok.is_ok());

        let err = Dataset::from_flat(vec![0.0, 1.0, 2.0], vec![0.0], 2, 1);
        assert!(err.is_err());

        let err = Dataset::from_flat(vec![0.0, 1.0, 2.0, 3.0], vec![0.0], 2, 1);
        assert!(err.is_err());
    }

    #[test]
    fn from_rows_rejects_ragged_or_mismatched() {
        assert!(Dataset::from_rows(&[vec![0.0, 1.0]], &[vec![1.0], vec![0.0]]).is_err());
        assert!(Dataset::from_rows(&[vec![0.0, 1.0], vec![0.0]], &[vec![1.0], vec![0.0]]).is_err());
    }

    #[test]
    fn disc_label_centre_and_corner() {
        assert_eq!(disc_label(0.5, 0.5), 1.0);
        assert_eq!(disc_label(0.0, 0.0), 0.0);
        assert_eq!(disc_label(1.0, 1.0), 0.0);
    }

    #[test]
    fn disc_split_is_seeded_and_roughly_balanced() {
        let a = disc_split(1000, 1000, 7).unwrap();
        let b = disc_split(1000, 1000, 7).unwrap();
        assert_eq!(a, b);

        assert_eq!(a.train.input_dim(), 2);
        assert_eq!(a.train.target_dim(), 1);
        assert_eq!(a.test.len(), 1000);

        let inside: f32 = a.train.targets().as_slice().iter().sum();
        let frac = inside / a.train.len() as f32;
        assert!((0.4..0.6).contains(&frac), "fraction inside = {frac}");

        assert!(a.train.inputs().as_slice().iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn disc_split_rejects_empty_sizes() {
        assert!(disc_split(0, 10, 0).is_err());
    }
}
