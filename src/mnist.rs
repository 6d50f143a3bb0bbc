//! MNIST digit-pair comparison data.
//!
//! Each sample is a pair of MNIST digits, both 2x2 average-pooled down to 14x14 and
//! flattened side by side into 392 features. The target is `1` when the first digit is
//! less than or equal to the second.
//!
//! The raw data is read with the `mnist` crate from the four uncompressed IDX files
//! (`train-images-idx3-ubyte`, `train-labels-idx1-ubyte`, `t10k-images-idx3-ubyte`,
//! `t10k-labels-idx1-ubyte`) in one directory.

use std::path::Path;

use mnist::{Mnist, MnistBuilder};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use tracing::debug;

use crate::{Dataset, Error, Result, Split};

pub const IMAGE_SIDE: usize = 28;
pub const POOLED_SIDE: usize = IMAGE_SIDE / 2;
/// Features of one pair: two pooled images.
pub const PAIR_FEATURES: usize = 2 * POOLED_SIDE * POOLED_SIDE;

pub const FILES: [&str; 4] = [
    "train-images-idx3-ubyte",
    "train-labels-idx1-ubyte",
    "t10k-images-idx3-ubyte",
    "t10k-labels-idx1-ubyte",
];

const TRAIN_LEN: u32 = 60_000;
const TEST_LEN: u32 = 10_000;

/// Digit images scaled to `[0, 1]`, one row of `28 * 28` pixels per image.
#[derive(Debug, Clone)]
pub struct Images {
    pixels: Vec<f32>,
    labels: Vec<u8>,
}

impl Images {
    pub fn new(pixels: Vec<f32>, labels: Vec<u8>) -> Result<Self> {
        if pixels.len() != labels.len() * IMAGE_SIDE * IMAGE_SIDE {
            return Err(Error::InvalidData(format!(
                "{} pixels do not make {} images of {IMAGE_SIDE}x{IMAGE_SIDE}",
                pixels.len(),
                labels.len()
            )));
        }
        Ok(Self { pixels, labels })
    }

    fn from_bytes(pixels: Vec<u8>, labels: Vec<u8>) -> Result<Self> {
        Self::new(
            pixels.into_iter().map(|p| f32::from(p) / 255.0).collect(),
            labels,
        )
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn image(&self, idx: usize) -> &[f32] {
        let n = IMAGE_SIDE * IMAGE_SIDE;
        &self.pixels[idx * n..(idx + 1) * n]
    }

    #[inline]
    pub fn label(&self, idx: usize) -> u8 {
        self.labels[idx]
    }
}

/// Reads the MNIST train and test images from `dir`.
pub fn load(dir: &Path) -> Result<(Images, Images)> {
    for file in FILES {
        let path = dir.join(file);
        if !path.is_file() {
            return Err(Error::InvalidData(format!(
                "failed to read {}: file not found",
                path.display()
            )));
        }
    }
    let base = dir.to_str().ok_or_else(|| {
        Error::InvalidData(format!("mnist path {} is not valid UTF-8", dir.display()))
    })?;

    debug!(dir = base, "loading mnist");
    let Mnist {
        trn_img,
        trn_lbl,
        tst_img,
        tst_lbl,
        ..
    } = MnistBuilder::new()
        .label_format_digit()
        .training_set_length(TRAIN_LEN)
        .validation_set_length(0)
        .test_set_length(TEST_LEN)
        .base_path(base)
        .finalize();

    Ok((
        Images::from_bytes(trn_img, trn_lbl)?,
        Images::from_bytes(tst_img, tst_lbl)?,
    ))
}

/// 2x2 average pooling of a `28 x 28` image.
pub fn pool_2x2(image: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(POOLED_SIDE * POOLED_SIDE);
    for r in 0..POOLED_SIDE {
        for c in 0..POOLED_SIDE {
            let at = |dr: usize, dc: usize| image[(2 * r + dr) * IMAGE_SIDE + 2 * c + dc];
            out.push((at(0, 0) + at(0, 1) + at(1, 0) + at(1, 1)) / 4.0);
        }
    }
    out
}

/// A digit-pair dataset together with the two digit classes of every sample.
#[derive(Debug, Clone)]
pub struct PairSet {
    pub data: Dataset,
    pub classes: Vec<(u8, u8)>,
}

/// Draws `n` disjoint pairs from `images` using a random permutation.
pub fn pairs(images: &Images, n: usize, rng: &mut StdRng) -> Result<PairSet> {
    if n == 0 || 2 * n > images.len() {
        return Err(Error::InvalidConfig(format!(
            "cannot draw {n} pairs from {} images",
            images.len()
        )));
    }

    let picked = index::sample(rng, images.len(), 2 * n).into_vec();
    let mut inputs = Vec::with_capacity(n * PAIR_FEATURES);
    let mut targets = Vec::with_capacity(n);
    let mut classes = Vec::with_capacity(n);
    for pair in picked.chunks_exact(2) {
        let (a, b) = (pair[0], pair[1]);
        inputs.extend(pool_2x2(images.image(a)));
        inputs.extend(pool_2x2(images.image(b)));

        let (ca, cb) = (images.label(a), images.label(b));
        targets.push(if ca <= cb { 1.0 } else { 0.0 });
        classes.push((ca, cb));
    }

    Ok(PairSet {
        data: Dataset::from_flat(inputs, targets, PAIR_FEATURES, 1)?,
        classes,
    })
}

#[derive(Debug, Clone)]
pub struct MnistPairs {
    pub train: PairSet,
    pub test: PairSet,
}

impl MnistPairs {
    pub fn split(&self) -> Split {
        Split {
            train: self.train.data.clone(),
            test: self.test.data.clone(),
        }
    }
}

/// Builds `n` training pairs from the MNIST training images and `n` test pairs from the
/// test images.
pub fn load_pairs(dir: &Path, n: usize, seed: u64) -> Result<MnistPairs> {
    let (train, test) = load(dir)?;
    pairs_from(&train, &test, n, seed)
}

pub fn pairs_from(train: &Images, test: &Images, n: usize, seed: u64) -> Result<MnistPairs> {
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(MnistPairs {
        train: pairs(train, n, &mut rng)?,
        test: pairs(test, n, &mut rng)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(labels: &[u8]) -> Images {
        let mut pixels = Vec::new();
        for &l in labels {
            pixels.extend(std::iter::repeat_n(f32::from(l) / 10.0, IMAGE_SIDE * IMAGE_SIDE));
        }
        Images::new(pixels, labels.to_vec()).unwrap()
    }

    #[test]
    fn pooling_averages_blocks() {
        let image: Vec<f32> = (0..IMAGE_SIDE * IMAGE_SIDE).map(|i| (i % 2) as f32).collect();
        let pooled = pool_2x2(&image);
        assert_eq!(pooled.len(), POOLED_SIDE * POOLED_SIDE);
        assert!(pooled.iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn pairs_label_first_le_second() {
        let images = synthetic(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let mut rng = StdRng::seed_from_u64(3);
        let set = pairs(&images, 5, &mut rng).unwrap();

        assert_eq!(set.data.len(), 5);
        assert_eq!(set.data.input_dim(), PAIR_FEATURES);
        for (i, &(a, b)) in set.classes.iter().enumerate() {
            let expected = if a <= b { 1.0 } else { 0.0 };
            assert_eq!(set.data.target(i), &[expected]);
            assert!((set.data.input(i)[0] - f32::from(a) / 10.0).abs() < 1e-6);
        }

        // Disjoint pairs use every image exactly once.
        let mut seen: Vec<u8> = set.classes.iter().flat_map(|&(a, b)| [a, b]).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn too_many_pairs_is_an_error() {
        let images = synthetic(&[1, 2, 3]);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(pairs(&images, 2, &mut rng).is_err());
    }

    #[test]
    fn missing_files_are_reported() {
        let err = load(Path::new("/nonexistent/mnist")).unwrap_err();
        assert!(matches!(err, Error::InvalidData(ref m) if m.contains("train-images-idx3-ubyte")));
    }
}
