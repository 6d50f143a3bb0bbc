//! Activation functions.
//!
//! An activation layer applies a non-linearity element-wise: `y = activation(x)`.
//!
//! The layer caches the *post-activation* output `y` as its saved-for-backward state.
//! During backprop `dL/dx` is computed from `dL/dy` using `y` only, so no separate
//! pre-activation buffer is kept.

use crate::module::Mode;
use crate::snapshot::LayerSnapshot;
use crate::{Error, Module, Result, Tensor};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Element-wise activation function.
pub enum Activation {
    ReLU,
    Tanh,
    Sigmoid,
}

impl Activation {
    /// Name used when the layer is not given an explicit one.
    pub fn default_name(self) -> &'static str {
        match self {
            Activation::ReLU => "relu",
            Activation::Tanh => "tanh",
            Activation::Sigmoid => "sigmoid",
        }
    }

    #[inline]
    pub fn forward(self, x: f32) -> f32 {
        match self {
            Activation::ReLU => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => stable_sigmoid(x),
        }
    }

    /// Derivative of the activation with respect to its input, expressed in terms
    /// of the cached post-activation output `y`.
    #[inline]
    pub fn grad_from_output(self, y: f32) -> f32 {
        match self {
            Activation::ReLU => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Tanh => 1.0 - y * y,
            Activation::Sigmoid => y * (1.0 - y),
        }
    }
}

#[inline]
pub(crate) fn stable_sigmoid(x: f32) -> f32 {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// A parameterless layer applying an [`Activation`].
#[derive(Debug, Clone)]
pub struct ActivationLayer {
    name: String,
    activation: Activation,
    saved_output: Option<Tensor>,
    mode: Mode,
}

impl ActivationLayer {
    /// Layer named after its activation (`"relu"`, `"tanh"`, `"sigmoid"`).
    pub fn new(activation: Activation) -> Self {
        Self {
            name: activation.default_name().to_owned(),
            activation,
            saved_output: None,
            mode: Mode::Train,
        }
    }

    /// Layer with an explicit name, needed when a `Sequential` holds the same
    /// activation more than once.
    pub fn named(name: &str, activation: Activation) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::new(activation)
        }
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }
}

/// `ActivationLayer::new(Activation::ReLU)`.
pub fn relu() -> ActivationLayer {
    ActivationLayer::new(Activation::ReLU)
}

/// `ActivationLayer::new(Activation::Tanh)`.
pub fn tanh() -> ActivationLayer {
    ActivationLayer::new(Activation::Tanh)
}

/// `ActivationLayer::new(Activation::Sigmoid)`.
pub fn sigmoid() -> ActivationLayer {
    ActivationLayer::new(Activation::Sigmoid)
}

impl Module for ActivationLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let act = self.activation;
        let out = input.map(|x| act.forward(x));
        if self.mode == Mode::Train {
            self.saved_output = Some(out.clone());
        }
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let output = self.saved_output.as_ref().ok_or_else(|| {
            Error::Contract(format!(
                "backward called on '{}' before any forward pass",
                self.name
            ))
        })?;
        if grad_output.shape() != output.shape() {
            return Err(Error::InvalidShape(format!(
                "'{}' grad_output shape {:?} does not match output shape {:?}",
                self.name,
                grad_output.shape(),
                output.shape()
            )));
        }

        let act = self.activation;
        let grad: Vec<f32> = grad_output
            .as_slice()
            .iter()
            .zip(output.as_slice())
            .map(|(&g, &y)| g * act.grad_from_output(y))
            .collect();
        Tensor::from_vec(grad, output.rows(), output.cols())
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn saved_for_backward(&self) -> Option<&Tensor> {
        self.saved_output.as_ref()
    }

    fn output_activation(&self) -> Option<Activation> {
        Some(self.activation)
    }

    fn snapshot(&self) -> Vec<LayerSnapshot> {
        vec![LayerSnapshot::Activation {
            name: self.name.clone(),
            activation: self.activation,
        }]
    }
}
