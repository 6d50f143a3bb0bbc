//! The `Module` contract.
//!
//! A module is a differentiable building block with an explicit forward/backward pair:
//!
//! - `forward(input)` computes the output and, in [`Mode::Train`], keeps whatever it
//!   needs for the backward pass (its *saved-for-backward* state)
//! - `backward(grad_output)` consumes `dL/d(output)`, accumulates `dL/d(param)` into
//!   the parameter gradients and returns `dL/d(input)`
//!
//! In [`Mode::Eval`] a forward pass never touches the saved state, so evaluating a model
//! between a training forward and its backward does not corrupt the gradients.

use crate::snapshot::LayerSnapshot;
use crate::{Activation, Result, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// Read-only view of a named parameter and its accumulated gradient.
#[derive(Debug)]
pub struct Parameter<'a> {
    pub name: String,
    pub value: &'a Tensor,
    pub grad: &'a Tensor,
}

/// Mutable view of a named parameter and its accumulated gradient.
#[derive(Debug)]
pub struct ParameterMut<'a> {
    pub name: String,
    pub value: &'a mut Tensor,
    pub grad: &'a mut Tensor,
}

pub trait Module {
    fn name(&self) -> &str;

    fn forward(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Returns `dL/d(input)`.
    ///
    /// Fails with [`crate::Error::Contract`] if no training-mode forward pass happened yet.
    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor>;

    fn parameters(&self) -> Vec<Parameter<'_>> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<ParameterMut<'_>> {
        Vec::new()
    }

    fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.grad.fill(0.0);
        }
    }

    fn mode(&self) -> Mode;

    fn set_mode(&mut self, mode: Mode);

    fn train(&mut self) {
        self.set_mode(Mode::Train);
    }

    fn eval(&mut self) {
        self.set_mode(Mode::Eval);
    }

    /// State captured by the last training-mode forward pass, if any.
    fn saved_for_backward(&self) -> Option<&Tensor> {
        None
    }

    /// The activation applied by the last layer, if it is an activation layer.
    fn output_activation(&self) -> Option<Activation> {
        None
    }

    fn children(&self) -> Vec<&dyn Module> {
        Vec::new()
    }

    /// Flattened description of the layers and their current parameters.
    fn snapshot(&self) -> Vec<LayerSnapshot>;

    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.value.len()).sum()
    }
}
