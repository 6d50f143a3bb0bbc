//! Full-batch training loops.
//!
//! Every epoch runs the whole training set through the model once:
//!
//! 1. `zero_grad`
//! 2. forward + loss
//! 3. (for [`fit`]) eval-mode accuracy on the test and training sets
//! 4. `criterion.backward()` then `model.backward(grad)`
//! 5. optimizer step

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use std::path::Path;

use tracing::{debug, info};

use crate::{Criterion, Dataset, Error, Metric, Module, Optimizer, Result, Split};

#[derive(Debug, Clone, Copy)]
pub struct FitConfig {
    pub epochs: usize,
    pub lr: f32,
    pub optimizer: Optimizer,
    /// Log the loss every `log_every` epochs; `0` disables epoch logging.
    pub log_every: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 300,
            lr: 1e-3,
            optimizer: Optimizer::Sgd,
            log_every: 50,
        }
    }
}

impl FitConfig {
    pub fn new(epochs: usize, lr: f32) -> Self {
        Self {
            epochs,
            lr,
            ..Self::default()
        }
    }

    pub fn with_log_every(mut self, log_every: usize) -> Self {
        self.log_every = log_every;
        self
    }

    pub fn with_optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::InvalidConfig("lr must be finite and > 0".to_owned()));
        }
        self.optimizer.validate()
    }

    #[inline]
    pub(crate) fn should_log(&self, epoch: usize) -> bool {
        self.log_every > 0 && epoch.is_multiple_of(self.log_every)
    }
}

/// Per-epoch training curves.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub loss: Vec<f32>,
    pub train_accuracy: Vec<f32>,
    pub test_accuracy: Vec<f32>,
}

impl History {
    pub fn with_capacity(epochs: usize) -> Self {
        Self {
            loss: Vec::with_capacity(epochs),
            train_accuracy: Vec::with_capacity(epochs),
            test_accuracy: Vec::with_capacity(epochs),
        }
    }

    pub fn len(&self) -> usize {
        self.loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loss.is_empty()
    }

    pub fn final_loss(&self) -> Option<f32> {
        self.loss.last().copied()
    }

    pub fn final_test_accuracy(&self) -> Option<f32> {
        self.test_accuracy.last().copied()
    }
}

#[cfg(feature = "serde")]
impl History {
    /// Save the curves to a JSON file (pretty-printed).
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let s = serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidData(format!("failed to serialize history: {e}")))?;
        let p = path.as_ref();
        std::fs::write(p, s)
            .map_err(|e| Error::InvalidData(format!("failed to write {}: {e}", p.display())))?;
        Ok(())
    }
}

/// Trains `model` on `data` and returns the loss of every epoch.
///
/// The loss at index `e` is measured before the `e`-th parameter update.
pub fn fit_trajectory(
    model: &mut dyn Module,
    criterion: &mut Criterion,
    data: &Dataset,
    cfg: FitConfig,
) -> Result<Vec<f32>> {
    cfg.validate()?;
    criterion.check_model(model)?;

    let mut opt = cfg.optimizer.state(model)?;
    let mut losses = Vec::with_capacity(cfg.epochs);

    for e in 0..cfg.epochs {
        model.zero_grad();
        let output = model.forward(data.inputs())?;
        let loss = criterion.forward(&output, data.targets())?;
        losses.push(loss);

        if cfg.should_log(e) {
            info!("e = {e}, loss = {loss:.5}");
        }

        let grad = criterion.backward()?;
        model.backward(&grad)?;
        opt.step(model, cfg.lr)?;
    }

    Ok(losses)
}

/// Trains `model` on `split.train`, tracking loss and train/test accuracy every epoch.
///
/// Accuracy is measured with eval-mode forwards between the training forward and its
/// backward pass.
pub fn fit(
    model: &mut dyn Module,
    criterion: &mut Criterion,
    metric: Metric,
    split: &Split,
    cfg: FitConfig,
) -> Result<History> {
    cfg.validate()?;
    criterion.check_model(model)?;

    let mut opt = cfg.optimizer.state(model)?;
    let mut history = History::with_capacity(cfg.epochs);

    for e in 0..cfg.epochs {
        model.zero_grad();
        let output = model.forward(split.train.inputs())?;
        let loss = criterion.forward(&output, split.train.targets())?;
        history.loss.push(loss);

        let test_acc = metric.evaluate(model, &split.test)?;
        history.test_accuracy.push(test_acc);
        let train_acc = metric.evaluate(model, &split.train)?;
        history.train_accuracy.push(train_acc);

        if cfg.should_log(e) {
            info!("e = {e}, loss = {loss:.5}");
            debug!(train_acc, test_acc, "accuracy");
        }

        let grad = criterion.backward()?;
        model.backward(&grad)?;
        opt.step(model, cfg.lr)?;
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::{relu, sigmoid, tanh};
    use crate::{Linear, Loss, data, sequential};

    fn disc_model(seed: u64) -> crate::Sequential {
        sequential![
            Linear::new_with_seed("fc1", 2, 6, seed).unwrap(),
            relu(),
            Linear::new_with_seed("fc2", 6, 4, seed + 1).unwrap(),
            tanh(),
            Linear::new_with_seed("fc3", 4, 1, seed + 2).unwrap(),
            sigmoid(),
        ]
        .unwrap()
    }

    #[test]
    fn fit_config_validation() {
        assert!(FitConfig::new(0, 0.1).validate().is_err());
        assert!(FitConfig::new(1, 0.0).validate().is_err());
        assert!(FitConfig::new(1, f32::NAN).validate().is_err());
        assert!(FitConfig::default().validate().is_ok());
    }

    #[test]
    fn trajectory_has_one_loss_per_epoch_and_decreases() {
        let split = data::disc_split(200, 50, 3).unwrap();
        let mut model = disc_model(10);
        let mut criterion = Criterion::new(Loss::Mse);
        let losses = fit_trajectory(
            &mut model,
            &mut criterion,
            &split.train,
            FitConfig::new(200, 0.5).with_log_every(0),
        )
        .unwrap();
        assert_eq!(losses.len(), 200);
        assert!(losses.iter().all(|l| l.is_finite()));
        assert!(losses[199] < losses[0]);
    }

    #[test]
    fn fit_records_every_curve() {
        let split = data::disc_split(100, 40, 4).unwrap();
        let mut model = disc_model(20);
        let mut criterion = Criterion::new(Loss::Bce);
        let history = fit(
            &mut model,
            &mut criterion,
            Metric::Accuracy,
            &split,
            FitConfig::new(5, 1e-3),
        )
        .unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history.train_accuracy.len(), 5);
        assert_eq!(history.test_accuracy.len(), 5);
        assert!(
            history
                .test_accuracy
                .iter()
                .all(|a| (0.0..=1.0).contains(a))
        );
    }

    #[test]
    fn fit_rejects_bce_without_sigmoid() {
        let split = data::disc_split(10, 10, 5).unwrap();
        let mut model = sequential![
            Linear::new_with_seed("fc1", 2, 3, 0).unwrap(),
            tanh(),
            Linear::new_with_seed("fc2", 3, 1, 1).unwrap(),
        ]
        .unwrap();
        let before = model.parameters()[0].value.clone();

        let err = fit(
            &mut model,
            &mut Criterion::new(Loss::Bce),
            Metric::Accuracy,
            &split,
            FitConfig::new(3, 1e-3),
        )
        .unwrap_err();
        assert!(err.is_contract());
        assert_eq!(model.parameters()[0].value, &before);
    }

    #[test]
    fn momentum_trains_too() {
        let split = data::disc_split(100, 10, 6).unwrap();
        let mut model = disc_model(30);
        let losses = fit_trajectory(
            &mut model,
            &mut Criterion::new(Loss::Mse),
            &split.train,
            FitConfig::new(50, 0.1)
                .with_optimizer(Optimizer::SgdMomentum { momentum: 0.9 })
                .with_log_every(0),
        )
        .unwrap();
        assert!(losses[49] < losses[0]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn history_serializes_curves() {
        let h = History {
            loss: vec![0.5],
            train_accuracy: vec![0.25],
            test_accuracy: vec![0.75],
        };
        let json = serde_json::to_string(&h).unwrap();
        assert!(json.contains("\"train_accuracy\":[0.25]"));
    }
}
