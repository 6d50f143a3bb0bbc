//! Layer snapshots.
//!
//! A snapshot is a flat, engine-independent description of a model: the ordered list of
//! layers with their current parameters. It is what the reference engine mirrors to start
//! from identical initial parameters, and what the harness prints before training.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::fmt;

use crate::{Activation, Error, Module, Result, Tensor};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
#[derive(Debug, Clone, PartialEq)]
pub enum LayerSnapshot {
    Linear {
        name: String,
        in_dim: usize,
        out_dim: usize,
        /// Row-major (out_dim, in_dim).
        weights: Vec<f32>,
        biases: Vec<f32>,
    },
    Activation {
        name: String,
        activation: Activation,
    },
}

impl LayerSnapshot {
    pub fn name(&self) -> &str {
        match self {
            LayerSnapshot::Linear { name, .. } | LayerSnapshot::Activation { name, .. } => name,
        }
    }

    fn validate(&self) -> Result<()> {
        let LayerSnapshot::Linear {
            name,
            in_dim,
            out_dim,
            weights,
            biases,
        } = self
        else {
            return Ok(());
        };

        if *in_dim == 0 || *out_dim == 0 {
            return Err(Error::InvalidData(format!(
                "layer '{name}' dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }
        let expected_w = in_dim
            .checked_mul(*out_dim)
            .ok_or_else(|| Error::InvalidData("layer weight shape overflow".to_owned()))?;
        if weights.len() != expected_w {
            return Err(Error::InvalidData(format!(
                "layer '{name}' weights length {} does not match out_dim * in_dim ({out_dim} * {in_dim})",
                weights.len()
            )));
        }
        if biases.len() != *out_dim {
            return Err(Error::InvalidData(format!(
                "layer '{name}' biases length {} does not match out_dim {out_dim}",
                biases.len()
            )));
        }
        Ok(())
    }
}

/// Ordered layers of a model.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSnapshot {
    pub layers: Vec<LayerSnapshot>,
}

impl ModelSnapshot {
    pub fn of(model: &dyn Module) -> Result<Self> {
        let snap = Self {
            layers: model.snapshot(),
        };
        snap.validate()?;
        Ok(snap)
    }

    /// Checks per-layer shapes and that consecutive linear layers chain.
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::InvalidData(
                "model snapshot must have at least one layer".to_owned(),
            ));
        }

        let mut prev_out: Option<usize> = None;
        for layer in &self.layers {
            layer.validate()?;
            if let LayerSnapshot::Linear {
                name,
                in_dim,
                out_dim,
                ..
            } = layer
            {
                match prev_out {
                    Some(prev) if prev != *in_dim => {
                        return Err(Error::InvalidData(format!(
                            "layer '{name}' in_dim {in_dim} does not match previous out_dim {prev}"
                        )));
                    }
                    _ => {}
                }
                prev_out = Some(*out_dim);
            }
        }
        Ok(())
    }

    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .map(|l| match l {
                LayerSnapshot::Linear {
                    weights, biases, ..
                } => weights.len() + biases.len(),
                LayerSnapshot::Activation { .. } => 0,
            })
            .sum()
    }
}

/// Prints parameters the way torch prints `named_parameters()`.
impl fmt::Display for ModelSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for layer in &self.layers {
            match layer {
                LayerSnapshot::Linear {
                    name,
                    in_dim,
                    out_dim,
                    weights,
                    biases,
                } => {
                    let w = Tensor::from_vec(weights.clone(), *out_dim, *in_dim)
                        .map_err(|_| fmt::Error)?;
                    let b = Tensor::from_vec(biases.clone(), 1, *out_dim)
                        .map_err(|_| fmt::Error)?;
                    writeln!(f, "{name}.weight: Parameter containing:\n{w}")?;
                    writeln!(f, "{name}.bias: Parameter containing:\n{b}")?;
                }
                LayerSnapshot::Activation { name, activation } => {
                    writeln!(f, "{name}: {activation:?}()")?;
                }
            }
        }
        Ok(())
    }
}
