//! Optimizers.
//!
//! Optimizers update a [`Module`]'s parameters from the gradients its backward pass
//! accumulated.
//!
//! Design notes:
//! - Optimizer *state* (momentum/Adam moments) lives outside the model, one buffer per
//!   parameter in `Module::parameters()` order.
//! - The training loop owns the optimizer state and reuses it across steps.

use crate::{Error, Module, ParameterMut, Result};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
/// Optimizer choice for training.
pub enum Optimizer {
    /// Plain SGD.
    #[default]
    Sgd,
    /// SGD with momentum (torch formulation: `v = m * v + g`, `p -= lr * v`).
    SgdMomentum { momentum: f32 },
    /// Adam (bias-corrected).
    Adam { beta1: f32, beta2: f32, eps: f32 },
}

impl Optimizer {
    /// Validate optimizer hyperparameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Optimizer::Sgd => Ok(()),
            Optimizer::SgdMomentum { momentum } => {
                if !(momentum.is_finite() && (0.0..1.0).contains(&momentum)) {
                    return Err(Error::InvalidConfig(format!(
                        "momentum must be finite and in [0,1), got {momentum}"
                    )));
                }
                Ok(())
            }
            Optimizer::Adam { beta1, beta2, eps } => {
                if !(beta1.is_finite() && (0.0..1.0).contains(&beta1)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta1 must be finite and in [0,1), got {beta1}"
                    )));
                }
                if !(beta2.is_finite() && (0.0..1.0).contains(&beta2)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta2 must be finite and in [0,1), got {beta2}"
                    )));
                }
                if !(eps.is_finite() && eps > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "adam eps must be finite and > 0, got {eps}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Allocate optimizer state for `model`.
    pub fn state(self, model: &dyn Module) -> Result<OptimizerState> {
        self.validate()?;

        match self {
            Optimizer::Sgd => Ok(OptimizerState::Sgd),
            Optimizer::SgdMomentum { momentum } => Ok(OptimizerState::SgdMomentum {
                momentum,
                velocity: zeros_like_params(model),
            }),
            Optimizer::Adam { beta1, beta2, eps } => Ok(OptimizerState::Adam {
                beta1,
                beta2,
                eps,
                beta1_pow: 1.0,
                beta2_pow: 1.0,
                m: zeros_like_params(model),
                v: zeros_like_params(model),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Owned optimizer state.
pub enum OptimizerState {
    /// Plain SGD (no state).
    #[default]
    Sgd,
    SgdMomentum {
        momentum: f32,
        velocity: Vec<Vec<f32>>,
    },
    Adam {
        beta1: f32,
        beta2: f32,
        eps: f32,
        beta1_pow: f32,
        beta2_pow: f32,
        m: Vec<Vec<f32>>,
        v: Vec<Vec<f32>>,
    },
}

impl OptimizerState {
    /// Apply one optimizer step.
    ///
    /// `lr` is passed in by the training loop. Fails if the model's parameter layout
    /// differs from the one the state was allocated for.
    pub fn step(&mut self, model: &mut dyn Module, lr: f32) -> Result<()> {
        if !(lr.is_finite() && lr > 0.0) {
            return Err(Error::InvalidConfig(
                "learning rate must be finite and > 0".to_owned(),
            ));
        }

        match self {
            OptimizerState::Sgd => {
                for p in model.parameters_mut() {
                    for (w, &g) in p.value.as_mut_slice().iter_mut().zip(p.grad.as_slice()) {
                        *w -= lr * g;
                    }
                }
            }
            OptimizerState::SgdMomentum { momentum, velocity } => {
                let mut params = model.parameters_mut();
                check_layout(velocity, &params)?;

                for (p, vel) in params.iter_mut().zip(velocity.iter_mut()) {
                    for ((w, &g), v) in p
                        .value
                        .as_mut_slice()
                        .iter_mut()
                        .zip(p.grad.as_slice())
                        .zip(vel.iter_mut())
                    {
                        *v = (*momentum) * *v + g;
                        *w -= lr * *v;
                    }
                }
            }
            OptimizerState::Adam {
                beta1,
                beta2,
                eps,
                beta1_pow,
                beta2_pow,
                m,
                v,
            } => {
                let mut params = model.parameters_mut();
                check_layout(m, &params)?;
                check_layout(v, &params)?;

                *beta1_pow *= *beta1;
                *beta2_pow *= *beta2;
                let corr1 = 1.0 - *beta1_pow;
                let corr2 = 1.0 - *beta2_pow;

                for ((p, mp), vp) in params.iter_mut().zip(m.iter_mut()).zip(v.iter_mut()) {
                    let grads = p.grad.as_slice();
                    let values = p.value.as_mut_slice();
                    for i in 0..values.len() {
                        let g = grads[i];
                        mp[i] = (*beta1) * mp[i] + (1.0 - *beta1) * g;
                        vp[i] = (*beta2) * vp[i] + (1.0 - *beta2) * (g * g);

                        let m_hat = mp[i] / corr1;
                        let v_hat = vp[i] / corr2;
                        values[i] -= lr * m_hat / (v_hat.sqrt() + *eps);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Stochastic gradient descent with a fixed learning rate.
///
/// ```rust
/// use mini_dl::{Criterion, Linear, Loss, Module, Sgd, Tensor};
///
/// # fn main() -> mini_dl::Result<()> {
/// let mut model = Linear::new_with_seed("fc1", 2, 1, 0)?;
/// let mut criterion = Criterion::new(Loss::Mse);
/// let mut optimizer = Sgd::new(0.01)?;
///
/// let x = Tensor::from_rows(&[vec![0.5, -0.5]])?;
/// let t = Tensor::column(vec![1.0]);
///
/// optimizer.zero_grad(&mut model);
/// let y = model.forward(&x)?;
/// let _loss = criterion.forward(&y, &t)?;
/// model.backward(&criterion.backward()?)?;
/// optimizer.step(&mut model)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f32,
    state: OptimizerState,
}

impl Sgd {
    #[inline]
    /// Construct an SGD optimizer.
    ///
    /// Returns an error if `lr` is not finite or `lr <= 0`.
    pub fn new(lr: f32) -> Result<Self> {
        if !(lr.is_finite() && lr > 0.0) {
            return Err(Error::InvalidConfig(
                "learning rate must be finite and > 0".to_owned(),
            ));
        }
        Ok(Self {
            lr,
            state: OptimizerState::Sgd,
        })
    }

    /// SGD with momentum; allocates a velocity buffer per parameter of `model`.
    pub fn with_momentum(model: &dyn Module, lr: f32, momentum: f32) -> Result<Self> {
        let mut opt = Self::new(lr)?;
        opt.state = Optimizer::SgdMomentum { momentum }.state(model)?;
        Ok(opt)
    }

    #[inline]
    /// Returns the learning rate.
    pub fn lr(&self) -> f32 {
        self.lr
    }

    #[inline]
    pub fn zero_grad(&self, model: &mut dyn Module) {
        model.zero_grad();
    }

    #[inline]
    /// Apply one optimizer step: `param -= lr * d_param`.
    pub fn step(&mut self, model: &mut dyn Module) -> Result<()> {
        self.state.step(model, self.lr)
    }
}

fn zeros_like_params(model: &dyn Module) -> Vec<Vec<f32>> {
    model
        .parameters()
        .iter()
        .map(|p| vec![0.0; p.value.len()])
        .collect()
}

fn check_layout(buffers: &[Vec<f32>], params: &[ParameterMut<'_>]) -> Result<()> {
    if buffers.len() != params.len() {
        return Err(Error::InvalidConfig(format!(
            "optimizer state holds {} parameter buffers, model has {} parameters",
            buffers.len(),
            params.len()
        )));
    }
    for (buf, p) in buffers.iter().zip(params) {
        if buf.len() != p.value.len() {
            return Err(Error::InvalidConfig(format!(
                "optimizer state for {} holds {} values, parameter has {}",
                p.name,
                buf.len(),
                p.value.len()
            )));
        }
    }
    Ok(())
}
