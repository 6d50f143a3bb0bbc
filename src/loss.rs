//! Loss functions.
//!
//! The kernels are small, allocation-free helpers over slices and follow torch's
//! conventions (mean reduction over every element). [`Criterion`] wraps a kernel with the
//! stateful `forward`/`backward` contract the training loop uses:
//!
//! - run `model.forward(...)`
//! - `criterion.forward(output, target)` returns the loss and remembers its inputs
//! - `criterion.backward()` returns `dL/d(output)`
//! - `model.backward(grad)`, then step an optimizer

use crate::activation::stable_sigmoid;
use crate::{Activation, Error, Module, Result, Tensor};

/// Smallest log value BCE will produce, matching torch's clamp.
const LOG_CLAMP: f32 = -100.0;
const BCE_GRAD_EPS: f32 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Supported loss functions.
pub enum Loss {
    /// Mean squared error.
    Mse,
    /// Binary cross-entropy on probabilities.
    ///
    /// Predictions must lie in `[0, 1]`, so the model has to end with a sigmoid layer.
    Bce,
    /// Binary cross-entropy with logits.
    ///
    /// This expects raw logits as predictions and targets in `[0, 1]`.
    BceWithLogits,
}

impl Loss {
    /// Compute a loss value.
    ///
    /// Shape contract: `pred.len() == target.len()`.
    #[inline]
    pub fn forward(self, pred: &[f32], target: &[f32]) -> f32 {
        match self {
            Loss::Mse => mse(pred, target),
            Loss::Bce => bce(pred, target),
            Loss::BceWithLogits => bce_with_logits(pred, target),
        }
    }

    /// Compute loss + gradient w.r.t `pred`.
    ///
    /// Writes `d_pred = dL/d(pred)` into `d_pred` and returns the loss.
    #[inline]
    pub fn backward(self, pred: &[f32], target: &[f32], d_pred: &mut [f32]) -> f32 {
        match self {
            Loss::Mse => mse_backward(pred, target, d_pred),
            Loss::Bce => bce_backward(pred, target, d_pred),
            Loss::BceWithLogits => bce_with_logits_backward(pred, target, d_pred),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Loss::Mse => "MSELoss",
            Loss::Bce => "BCELoss",
            Loss::BceWithLogits => "BCEWithLogitsLoss",
        }
    }
}

/// Mean squared error (MSE) loss.
///
/// Returns `mean((pred - target)^2)`.
#[inline]
pub fn mse(pred: &[f32], target: &[f32]) -> f32 {
    assert_same_len(pred, target);
    if pred.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / pred.len() as f32;
    let mut sum_sq = 0.0_f32;
    for i in 0..pred.len() {
        let diff = pred[i] - target[i];
        sum_sq = diff.mul_add(diff, sum_sq);
    }
    sum_sq * inv_n
}

/// MSE loss + gradient w.r.t. `pred`.
///
/// With `L = mean((pred - target)^2)`, the gradient is `2 * (pred[i] - target[i]) / N`.
#[inline]
pub fn mse_backward(pred: &[f32], target: &[f32], d_pred: &mut [f32]) -> f32 {
    assert_same_len(pred, target);
    assert_same_len(pred, d_pred);
    if pred.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / pred.len() as f32;
    let mut sum_sq = 0.0_f32;
    for i in 0..pred.len() {
        let diff = pred[i] - target[i];
        sum_sq = diff.mul_add(diff, sum_sq);
        d_pred[i] = 2.0 * diff * inv_n;
    }
    sum_sq * inv_n
}

/// Binary cross-entropy on probabilities.
///
/// Per element: `L = -(t * ln(p) + (1 - t) * ln(1 - p))`, each log clamped at -100.
#[inline]
pub fn bce(prob: &[f32], target: &[f32]) -> f32 {
    assert_same_len(prob, target);
    if prob.is_empty() {
        return 0.0;
    }

    let mut sum = 0.0_f32;
    for i in 0..prob.len() {
        sum += bce_term(prob[i], target[i]);
    }
    sum / prob.len() as f32
}

/// BCE loss + gradient w.r.t probabilities.
///
/// Gradient: `dL/dp = (p - t) / max(p * (1 - p), 1e-12) / N`.
#[inline]
pub fn bce_backward(prob: &[f32], target: &[f32], d_prob: &mut [f32]) -> f32 {
    assert_same_len(prob, target);
    assert_same_len(prob, d_prob);
    if prob.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / prob.len() as f32;
    let mut sum = 0.0_f32;
    for i in 0..prob.len() {
        let p = prob[i];
        let t = target[i];
        sum += bce_term(p, t);
        d_prob[i] = (p - t) / (p * (1.0 - p)).max(BCE_GRAD_EPS) * inv_n;
    }
    sum * inv_n
}

#[inline]
fn bce_term(p: f32, t: f32) -> f32 {
    let log_p = p.ln().max(LOG_CLAMP);
    let log_1mp = (1.0 - p).ln().max(LOG_CLAMP);
    -(t * log_p + (1.0 - t) * log_1mp)
}

/// Binary cross-entropy loss with logits.
///
/// Per element (with `t` in [0,1]):
///
/// - `L = max(x, 0) - x * t + ln(1 + exp(-|x|))`
///
/// This is numerically stable for large |x|.
#[inline]
pub fn bce_with_logits(logits: &[f32], target: &[f32]) -> f32 {
    assert_same_len(logits, target);
    if logits.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / logits.len() as f32;
    let mut sum = 0.0_f32;
    for i in 0..logits.len() {
        let x = logits[i];
        let t = target[i];
        sum += x.max(0.0) - x * t + (-x.abs()).exp().ln_1p();
    }
    sum * inv_n
}

/// BCE-with-logits loss + gradient w.r.t logits.
///
/// Gradient: `dL/dx = (sigmoid(x) - t) / N`.
#[inline]
pub fn bce_with_logits_backward(logits: &[f32], target: &[f32], d_logits: &mut [f32]) -> f32 {
    assert_same_len(logits, target);
    assert_same_len(logits, d_logits);
    if logits.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / logits.len() as f32;
    let mut sum = 0.0_f32;
    for i in 0..logits.len() {
        let x = logits[i];
        let t = target[i];
        sum += x.max(0.0) - x * t + (-x.abs()).exp().ln_1p();
        d_logits[i] = (stable_sigmoid(x) - t) * inv_n;
    }
    sum * inv_n
}

#[inline]
fn assert_same_len(a: &[f32], b: &[f32]) {
    assert_eq!(
        a.len(),
        b.len(),
        "pred len {} does not match len {}",
        a.len(),
        b.len()
    );
}

/// A loss with saved state, used like a module at the end of a model.
#[derive(Debug, Clone)]
pub struct Criterion {
    loss: Loss,
    saved: Option<(Tensor, Tensor)>,
}

impl Criterion {
    pub fn new(loss: Loss) -> Self {
        Self { loss, saved: None }
    }

    #[inline]
    pub fn loss(&self) -> Loss {
        self.loss
    }

    /// Checks that `model` produces what this loss expects.
    ///
    /// BCE needs probabilities, so the model's last layer must be a sigmoid.
    pub fn check_model(&self, model: &dyn Module) -> Result<()> {
        if self.loss == Loss::Bce && model.output_activation() != Some(Activation::Sigmoid) {
            return Err(Error::Contract(format!(
                "{} expects probabilities but '{}' does not end with a sigmoid layer; \
                 add one or use {}",
                Loss::Bce.label(),
                model.name(),
                Loss::BceWithLogits.label()
            )));
        }
        Ok(())
    }

    /// Computes the loss and keeps `output`/`target` for [`Criterion::backward`].
    pub fn forward(&mut self, output: &Tensor, target: &Tensor) -> Result<f32> {
        if output.shape() != target.shape() {
            return Err(Error::InvalidShape(format!(
                "output shape {:?} does not match target shape {:?}",
                output.shape(),
                target.shape()
            )));
        }
        if self.loss == Loss::Bce
            && output
                .as_slice()
                .iter()
                .any(|p| !(0.0..=1.0).contains(p))
        {
            return Err(Error::Contract(format!(
                "{} got values outside [0, 1]; the model must end with a sigmoid layer",
                Loss::Bce.label()
            )));
        }

        let value = self.loss.forward(output.as_slice(), target.as_slice());
        self.saved = Some((output.clone(), target.clone()));
        Ok(value)
    }

    /// Returns `dL/d(output)` for the last [`Criterion::forward`] call.
    pub fn backward(&self) -> Result<Tensor> {
        let (output, target) = self.saved.as_ref().ok_or_else(|| {
            Error::Contract(format!(
                "{} backward called before forward",
                self.loss.label()
            ))
        })?;

        let mut grad = Tensor::zeros(output.rows(), output.cols());
        self.loss
            .backward(output.as_slice(), target.as_slice(), grad.as_mut_slice());
        Ok(grad)
    }
}
