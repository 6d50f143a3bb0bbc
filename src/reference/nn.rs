//! Models on the reference engine.
//!
//! A [`RefModel`] is built from a [`ModelSnapshot`], so it starts from exactly the
//! parameters of the module it mirrors. It is trained with plain SGD only, one graph per
//! epoch over the full batch.

use tracing::{debug, info};

use super::engine::Var;
use crate::snapshot::{LayerSnapshot, ModelSnapshot};
use crate::train::{FitConfig, History};
use crate::{Activation, Dataset, Error, Loss, Metric, Module, Optimizer, Result, Split, Tensor};

/// Lower bound of the logs inside BCE, as for the module library.
const LOG_CLAMP: f64 = -100.0;

#[derive(Debug)]
enum RefLayer {
    Linear {
        name: String,
        in_dim: usize,
        out_dim: usize,
        /// Row-major (out_dim, in_dim).
        weights: Vec<Var>,
        biases: Vec<Var>,
    },
    Activation { name: String, activation: Activation },
}

impl RefLayer {
    fn forward(&self, x: &[Var]) -> Vec<Var> {
        match self {
            RefLayer::Linear {
                in_dim,
                out_dim,
                weights,
                biases,
                ..
            } => (0..*out_dim)
                .map(|o| Var::affine(&weights[o * in_dim..(o + 1) * in_dim], x, &biases[o]))
                .collect(),
            RefLayer::Activation { activation, .. } => x
                .iter()
                .map(|v| match activation {
                    Activation::ReLU => v.relu(),
                    Activation::Tanh => v.tanh(),
                    Activation::Sigmoid => v.sigmoid(),
                })
                .collect(),
        }
    }

    fn forward_values(&self, x: &[f64]) -> Vec<f64> {
        match self {
            RefLayer::Linear {
                in_dim,
                out_dim,
                weights,
                biases,
                ..
            } => (0..*out_dim)
                .map(|o| {
                    let row = &weights[o * in_dim..(o + 1) * in_dim];
                    row.iter()
                        .zip(x)
                        .fold(biases[o].value(), |acc, (w, &xi)| acc + w.value() * xi)
                })
                .collect(),
            RefLayer::Activation { activation, .. } => x
                .iter()
                .map(|&v| match activation {
                    Activation::ReLU => v.max(0.0),
                    Activation::Tanh => v.tanh(),
                    Activation::Sigmoid => 1.0 / (1.0 + (-v).exp()),
                })
                .collect(),
        }
    }
}

/// Feed-forward model on the reference engine.
#[derive(Debug)]
pub struct RefModel {
    layers: Vec<RefLayer>,
    in_dim: usize,
    out_dim: usize,
}

/// Named gradient of one parameter tensor, flattened row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedGrad {
    pub name: String,
    pub grad: Vec<f64>,
}

impl RefModel {
    /// Builds the equivalent model with the current parameters of `model`.
    pub fn mirror(model: &dyn Module) -> Result<Self> {
        Self::from_snapshot(&ModelSnapshot::of(model)?)
    }

    pub fn from_snapshot(snapshot: &ModelSnapshot) -> Result<Self> {
        snapshot.validate()?;

        let mut dims: Option<(usize, usize)> = None;
        let layers = snapshot
            .layers
            .iter()
            .map(|layer| match layer {
                LayerSnapshot::Linear {
                    name,
                    in_dim,
                    out_dim,
                    weights,
                    biases,
                } => {
                    dims = Some(match dims {
                        None => (*in_dim, *out_dim),
                        Some((first_in, _)) => (first_in, *out_dim),
                    });
                    RefLayer::Linear {
                        name: name.clone(),
                        in_dim: *in_dim,
                        out_dim: *out_dim,
                        weights: weights.iter().map(|&w| Var::parameter(f64::from(w))).collect(),
                        biases: biases.iter().map(|&b| Var::parameter(f64::from(b))).collect(),
                    }
                }
                LayerSnapshot::Activation { name, activation } => RefLayer::Activation {
                    name: name.clone(),
                    activation: *activation,
                },
            })
            .collect();

        let (in_dim, out_dim) = dims.ok_or_else(|| {
            Error::InvalidData("reference model needs at least one linear layer".to_owned())
        })?;
        Ok(Self {
            layers,
            in_dim,
            out_dim,
        })
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    fn output_activation(&self) -> Option<Activation> {
        match self.layers.last() {
            Some(RefLayer::Activation { activation, .. }) => Some(*activation),
            _ => None,
        }
    }

    fn check(&self, loss: Loss, data: &Dataset) -> Result<()> {
        if loss == Loss::Bce && self.output_activation() != Some(Activation::Sigmoid) {
            return Err(Error::Contract(format!(
                "{} expects probabilities but the reference model does not end with a sigmoid",
                loss.label()
            )));
        }
        if data.input_dim() != self.in_dim || data.target_dim() != self.out_dim {
            return Err(Error::InvalidShape(format!(
                "dataset ({}, {}) does not fit reference model ({}, {})",
                data.input_dim(),
                data.target_dim(),
                self.in_dim,
                self.out_dim
            )));
        }
        Ok(())
    }

    /// Builds the loss graph over the whole dataset (mean over every output element).
    pub fn loss_var(&self, data: &Dataset, loss: Loss) -> Result<Var> {
        self.check(loss, data)?;

        let mut terms = Vec::with_capacity(data.len() * self.out_dim);
        for i in 0..data.len() {
            let mut x: Vec<Var> = data
                .input(i)
                .iter()
                .map(|&v| Var::constant(f64::from(v)))
                .collect();
            for layer in &self.layers {
                x = layer.forward(&x);
            }
            for (out, &t) in x.iter().zip(data.target(i)) {
                terms.push(element_loss(loss, out, f64::from(t)));
            }
        }
        Ok(Var::mean(&terms))
    }

    pub fn loss(&self, data: &Dataset, loss: Loss) -> Result<f64> {
        Ok(self.loss_var(data, loss)?.value())
    }

    /// Gradient of the loss over `data` for every parameter, in module parameter order.
    pub fn gradients(&self, data: &Dataset, loss: Loss) -> Result<Vec<NamedGrad>> {
        self.zero_grad();
        self.loss_var(data, loss)?.backward();
        Ok(self
            .named_parameters()
            .map(|(name, vars)| NamedGrad {
                name,
                grad: vars.iter().map(Var::grad).collect(),
            })
            .collect())
    }

    /// Plain forward pass without building a graph.
    pub fn predict(&self, inputs: &Tensor) -> Result<Tensor> {
        if inputs.cols() != self.in_dim {
            return Err(Error::InvalidShape(format!(
                "reference model expects {} input features, got {}",
                self.in_dim,
                inputs.cols()
            )));
        }

        let mut out = Vec::with_capacity(inputs.rows() * self.out_dim);
        for r in 0..inputs.rows() {
            let mut x: Vec<f64> = inputs.row(r).iter().map(|&v| f64::from(v)).collect();
            for layer in &self.layers {
                x = layer.forward_values(&x);
            }
            out.extend(x.into_iter().map(|v| v as f32));
        }
        Tensor::from_vec(out, inputs.rows(), self.out_dim)
    }

    pub fn zero_grad(&self) {
        for (_, vars) in self.named_parameters() {
            vars.iter().for_each(Var::zero_grad);
        }
    }

    fn sgd_step(&self, lr: f64) {
        for (_, vars) in self.named_parameters() {
            for v in vars {
                v.set_value(v.value() - lr * v.grad());
            }
        }
    }

    fn named_parameters(&self) -> impl Iterator<Item = (String, &[Var])> + '_ {
        self.layers.iter().flat_map(|layer| match layer {
            RefLayer::Linear {
                name,
                weights,
                biases,
                ..
            } => vec![
                (format!("{name}.weight"), weights.as_slice()),
                (format!("{name}.bias"), biases.as_slice()),
            ],
            RefLayer::Activation { .. } => Vec::new(),
        })
    }

    /// Current parameters, in the same layout as the module library's snapshots.
    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            layers: self
                .layers
                .iter()
                .map(|layer| match layer {
                    RefLayer::Linear {
                        name,
                        in_dim,
                        out_dim,
                        weights,
                        biases,
                    } => LayerSnapshot::Linear {
                        name: name.clone(),
                        in_dim: *in_dim,
                        out_dim: *out_dim,
                        weights: weights.iter().map(|w| w.value() as f32).collect(),
                        biases: biases.iter().map(|b| b.value() as f32).collect(),
                    },
                    RefLayer::Activation { name, activation } => LayerSnapshot::Activation {
                        name: name.clone(),
                        activation: *activation,
                    },
                })
                .collect(),
        }
    }

    /// Trains with plain SGD and returns the loss of every epoch.
    pub fn fit_trajectory(&mut self, data: &Dataset, loss: Loss, cfg: FitConfig) -> Result<Vec<f32>> {
        let lr = check_config(&cfg)?;

        let mut losses = Vec::with_capacity(cfg.epochs);
        for e in 0..cfg.epochs {
            self.zero_grad();
            let l = self.loss_var(data, loss)?;
            let value = l.value() as f32;
            losses.push(value);

            if cfg.should_log(e) {
                info!("e = {e}, loss = {value:.5}");
            }

            l.backward();
            self.sgd_step(lr);
        }
        Ok(losses)
    }

    /// Trains with plain SGD, tracking loss and train/test accuracy every epoch.
    pub fn fit(&mut self, loss: Loss, metric: Metric, split: &Split, cfg: FitConfig) -> Result<History> {
        let lr = check_config(&cfg)?;

        let mut history = History::with_capacity(cfg.epochs);
        for e in 0..cfg.epochs {
            self.zero_grad();
            let l = self.loss_var(&split.train, loss)?;
            let value = l.value() as f32;
            history.loss.push(value);

            let test_acc = metric.score(&self.predict(split.test.inputs())?, split.test.targets())?;
            history.test_accuracy.push(test_acc);
            let train_acc =
                metric.score(&self.predict(split.train.inputs())?, split.train.targets())?;
            history.train_accuracy.push(train_acc);

            if cfg.should_log(e) {
                info!("e = {e}, loss = {value:.5}");
                debug!(train_acc, test_acc, "accuracy");
            }

            l.backward();
            self.sgd_step(lr);
        }
        Ok(history)
    }
}

fn check_config(cfg: &FitConfig) -> Result<f64> {
    cfg.validate()?;
    if cfg.optimizer != Optimizer::Sgd {
        return Err(Error::InvalidConfig(format!(
            "the reference model trains with plain SGD only, got {:?}",
            cfg.optimizer
        )));
    }
    Ok(f64::from(cfg.lr))
}

fn element_loss(loss: Loss, out: &Var, t: f64) -> Var {
    match loss {
        Loss::Mse => out.sub(&Var::constant(t)).powi(2),
        Loss::Bce => {
            // -(t ln p + (1 - t) ln(1 - p))
            let log_p = out.ln_clamped(LOG_CLAMP);
            let log_1mp = Var::constant(1.0).sub(out).ln_clamped(LOG_CLAMP);
            log_p.scale(t).add(&log_1mp.scale(1.0 - t)).neg()
        }
        Loss::BceWithLogits => {
            // max(x, 0) - x t + ln(1 + e^{-|x|})
            let softplus = out.abs().neg().exp().ln_1p();
            out.relu().sub(&out.scale(t)).add(&softplus)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::{relu, sigmoid, tanh};
    use crate::{Linear, sequential};

    fn tiny_data() -> Dataset {
        Dataset::from_rows(
            &[vec![0.1, 0.9], vec![0.7, 0.2], vec![0.5, 0.5]],
            &[vec![1.0], vec![0.0], vec![1.0]],
        )
        .unwrap()
    }

    #[test]
    fn mirror_copies_parameters_exactly() {
        let model = sequential![
            Linear::new_with_seed("fc1", 2, 3, 1).unwrap(),
            relu(),
            Linear::new_with_seed("fc2", 3, 1, 2).unwrap(),
            sigmoid(),
        ]
        .unwrap();
        let r = RefModel::mirror(&model).unwrap();
        assert_eq!((r.in_dim(), r.out_dim()), (2, 1));
        assert_eq!(r.snapshot(), ModelSnapshot::of(&model).unwrap());
    }

    #[test]
    fn snapshot_keeps_explicit_activation_names() {
        let model = sequential![
            Linear::new_with_seed("fc1", 2, 3, 1).unwrap(),
            tanh(),
            Linear::new_with_seed("fc2", 3, 1, 2).unwrap(),
            crate::ActivationLayer::named("tanh2", Activation::Tanh),
        ]
        .unwrap();
        let snapshot = RefModel::mirror(&model).unwrap().snapshot();
        assert!(matches!(
            snapshot.layers.last(),
            Some(LayerSnapshot::Activation { name, .. }) if name == "tanh2"
        ));
        assert_eq!(snapshot, ModelSnapshot::of(&model).unwrap());
    }

    #[test]
    fn predict_matches_module_forward() {
        let mut model = sequential![
            Linear::new_with_seed("fc1", 2, 4, 3).unwrap(),
            tanh(),
            Linear::new_with_seed("fc2", 4, 1, 4).unwrap(),
        ]
        .unwrap();
        let r = RefModel::mirror(&model).unwrap();
        let data = tiny_data();
        let ours = model.forward(data.inputs()).unwrap();
        let theirs = r.predict(data.inputs()).unwrap();
        assert!(ours.max_abs_diff(&theirs) < 1e-5);
    }

    #[test]
    fn bce_requires_final_sigmoid() {
        let model = Linear::new_with_seed("fc1", 2, 1, 0).unwrap();
        let r = RefModel::mirror(&model).unwrap();
        assert!(r.loss(&tiny_data(), Loss::Bce).unwrap_err().is_contract());
        assert!(r.loss(&tiny_data(), Loss::BceWithLogits).is_ok());
    }

    #[test]
    fn mse_gradient_of_single_linear_is_closed_form() {
        // L = mean((w x + b - t)^2) over one sample: dL/db = 2 (y - t)
        let model = Linear::from_parts(
            "fc1",
            Tensor::from_vec(vec![0.5, -0.5], 1, 2).unwrap(),
            Tensor::from_vec(vec![0.1], 1, 1).unwrap(),
        )
        .unwrap();
        let r = RefModel::mirror(&model).unwrap();
        let data = Dataset::from_rows(&[vec![1.0, 2.0]], &[vec![1.0]]).unwrap();
        let grads = r.gradients(&data, Loss::Mse).unwrap();

        let y = 0.5 - 1.0 + 0.1;
        let dy = 2.0 * (y - 1.0);
        assert_eq!(grads[0].name, "fc1.weight");
        assert!((grads[0].grad[0] - dy * 1.0).abs() < 1e-6);
        assert!((grads[0].grad[1] - dy * 2.0).abs() < 1e-6);
        assert!((grads[1].grad[0] - dy).abs() < 1e-6);
    }

    #[test]
    fn fit_trajectory_rejects_non_sgd() {
        let model = Linear::new_with_seed("fc1", 2, 1, 0).unwrap();
        let mut r = RefModel::mirror(&model).unwrap();
        let cfg = FitConfig::new(3, 0.1).with_optimizer(Optimizer::SgdMomentum { momentum: 0.5 });
        assert!(r.fit_trajectory(&tiny_data(), Loss::Mse, cfg).is_err());
    }
}
