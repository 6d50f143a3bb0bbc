//! Harness configuration.
//!
//! Defaults are the constants the demo scenarios were designed around. A few of them can
//! be overridden from the environment:
//!
//! - `MINI_DL_SEED`: base seed for data generation and parameter initialization
//! - `MINI_DL_MNIST_DIR`: directory holding the uncompressed MNIST IDX files
//! - `MINI_DL_HISTORY_DIR`: when set, training histories are written there as JSON
//! - `MINI_DL_VERBOSE`: any value other than `0`/`false` enables debug logging

use std::path::PathBuf;

use crate::{Error, Result};

pub const ENV_SEED: &str = "MINI_DL_SEED";
pub const ENV_MNIST_DIR: &str = "MINI_DL_MNIST_DIR";
pub const ENV_HISTORY_DIR: &str = "MINI_DL_HISTORY_DIR";
pub const ENV_VERBOSE: &str = "MINI_DL_VERBOSE";

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub seed: u64,
    pub verbose: bool,

    /// Disc-in-square split sizes.
    pub disc_train: usize,
    pub disc_test: usize,

    /// Module library vs reference framework loss trajectories.
    pub compare_epochs: usize,
    pub compare_lr: f32,
    pub compare_log_every: usize,

    /// Accuracy-tracking training on the disc data.
    pub train_epochs: usize,
    pub train_lr: f32,
    pub train_log_every: usize,

    pub mnist_dir: Option<PathBuf>,
    /// Number of digit pairs in each of the MNIST train and test sets.
    pub mnist_pairs: usize,
    pub mnist_epochs: usize,
    pub mnist_reference_lr: f32,

    pub history_dir: Option<PathBuf>,

    /// Width and height of the terminal plots.
    pub plot_width: usize,
    pub plot_height: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            verbose: false,
            disc_train: 1000,
            disc_test: 1000,
            compare_epochs: 301,
            compare_lr: 0.01,
            compare_log_every: 100,
            train_epochs: 301,
            train_lr: 0.001,
            train_log_every: 50,
            mnist_dir: None,
            mnist_pairs: 1000,
            mnist_epochs: 300,
            mnist_reference_lr: 0.01,
            history_dir: None,
            plot_width: 60,
            plot_height: 12,
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by the `MINI_DL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `MINI_DL_*` keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(seed) = lookup(ENV_SEED) {
            cfg.seed = seed.trim().parse().map_err(|e| {
                Error::InvalidConfig(format!("{ENV_SEED} must be an unsigned integer: {e}"))
            })?;
        }
        if let Some(dir) = lookup(ENV_MNIST_DIR).filter(|d| !d.is_empty()) {
            cfg.mnist_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup(ENV_HISTORY_DIR).filter(|d| !d.is_empty()) {
            cfg.history_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = lookup(ENV_VERBOSE) {
            cfg.verbose = !matches!(v.trim(), "" | "0" | "false");
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.disc_train == 0 || self.disc_test == 0 {
            return Err(Error::InvalidConfig(
                "disc split sizes must be > 0".to_owned(),
            ));
        }
        if self.mnist_pairs == 0 {
            return Err(Error::InvalidConfig("mnist_pairs must be > 0".to_owned()));
        }
        if self.plot_width == 0 || self.plot_height == 0 {
            return Err(Error::InvalidConfig(
                "plot dimensions must be > 0".to_owned(),
            ));
        }
        Ok(())
    }
}
