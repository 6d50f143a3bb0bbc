//! Metrics.
//!
//! Metrics are evaluation helpers (they do not participate in backprop). Evaluating a
//! model switches it to [`Mode::Eval`] for the forward pass, so calling a metric between
//! a training forward and its backward leaves the saved-for-backward state intact.

use crate::module::Mode;
use crate::{Dataset, Error, Module, Result, Tensor, loss};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Supported evaluation metrics.
pub enum Metric {
    /// Mean squared error.
    Mse,
    /// Classification accuracy on probabilities.
    ///
    /// - For `output_dim == 1`: binary accuracy, predicting `output >= 0.5`.
    /// - For `output_dim > 1`: multiclass accuracy (argmax).
    Accuracy,
    /// Binary accuracy on logits, predicting `sigmoid(output) >= 0.5`.
    LogitAccuracy,
}

impl Metric {
    /// Metric to report for a model trained with `loss`.
    pub fn for_loss(loss: loss::Loss) -> Self {
        match loss {
            loss::Loss::Mse => Metric::Mse,
            loss::Loss::Bce => Metric::Accuracy,
            loss::Loss::BceWithLogits => Metric::LogitAccuracy,
        }
    }

    /// Per-sample boolean predictions (class 1 / "true").
    ///
    /// For multi-column outputs under [`Metric::Accuracy`] this is `argmax != 0`; use
    /// [`argmax_rows`] for the class index.
    pub fn predict(self, outputs: &Tensor) -> Vec<bool> {
        match self {
            Metric::LogitAccuracy => outputs.as_slice().iter().map(|&x| x >= 0.0).collect(),
            Metric::Accuracy | Metric::Mse if outputs.cols() == 1 => {
                outputs.as_slice().iter().map(|&p| p >= 0.5).collect()
            }
            Metric::Accuracy | Metric::Mse => {
                argmax_rows(outputs).into_iter().map(|c| c != 0).collect()
            }
        }
    }

    /// Scores `outputs` against `targets` (both `(len, dim)`).
    pub fn score(self, outputs: &Tensor, targets: &Tensor) -> Result<f32> {
        if outputs.shape() != targets.shape() {
            return Err(Error::InvalidShape(format!(
                "outputs shape {:?} does not match targets shape {:?}",
                outputs.shape(),
                targets.shape()
            )));
        }
        if outputs.is_empty() {
            return Err(Error::InvalidData("cannot score an empty batch".to_owned()));
        }

        match self {
            Metric::Mse => Ok(loss::mse(outputs.as_slice(), targets.as_slice())),
            Metric::Accuracy if outputs.cols() > 1 => {
                let pred = argmax_rows(outputs);
                let truth = argmax_rows(targets);
                Ok(fraction_equal(&pred, &truth))
            }
            Metric::Accuracy | Metric::LogitAccuracy => {
                let pred = self.predict(outputs);
                let truth: Vec<bool> = targets.as_slice().iter().map(|&t| t >= 0.5).collect();
                Ok(fraction_equal(&pred, &truth))
            }
        }
    }

    /// Runs an eval-mode forward over `data` and scores it.
    ///
    /// The model's mode is restored afterwards.
    pub fn evaluate(self, model: &mut dyn Module, data: &Dataset) -> Result<f32> {
        let outputs = predict(model, data.inputs())?;
        self.score(&outputs, data.targets())
    }
}

/// Eval-mode forward pass; restores the model's previous mode.
pub fn predict(model: &mut dyn Module, inputs: &Tensor) -> Result<Tensor> {
    let previous = model.mode();
    model.set_mode(Mode::Eval);
    let outputs = model.forward(inputs);
    model.set_mode(previous);
    outputs
}

/// Index of the largest value in each row.
pub fn argmax_rows(t: &Tensor) -> Vec<usize> {
    (0..t.rows())
        .map(|r| {
            let row = t.row(r);
            let mut best = 0;
            for (c, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = c;
                }
            }
            best
        })
        .collect()
}

fn fraction_equal<T: PartialEq>(a: &[T], b: &[T]) -> f32 {
    let hits = a.iter().zip(b).filter(|(x, y)| x == y).count();
    hits as f32 / a.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Linear;

    #[test]
    fn binary_accuracy_thresholds_at_half() {
        let out = Tensor::column(vec![0.9, 0.4, 0.5, 0.1]);
        let tgt = Tensor::column(vec![1.0, 1.0, 1.0, 0.0]);
        assert!((Metric::Accuracy.score(&out, &tgt).unwrap() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn logit_accuracy_thresholds_at_zero() {
        let out = Tensor::column(vec![2.0, -0.1, 0.0, -3.0]);
        let tgt = Tensor::column(vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(
            Metric::LogitAccuracy.predict(&out),
            vec![true, false, true, false]
        );
        assert!((Metric::LogitAccuracy.score(&out, &tgt).unwrap() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn multiclass_accuracy_uses_argmax() {
        let out = Tensor::from_rows(&[vec![0.1, 0.7, 0.2], vec![0.8, 0.1, 0.1]]).unwrap();
        let tgt = Tensor::from_rows(&[vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]]).unwrap();
        assert!((Metric::Accuracy.score(&out, &tgt).unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn score_rejects_shape_mismatch() {
        let out = Tensor::column(vec![0.0, 1.0]);
        let tgt = Tensor::column(vec![0.0]);
        assert!(Metric::Mse.score(&out, &tgt).is_err());
    }

    #[test]
    fn evaluate_restores_train_mode() {
        let mut model = Linear::new_with_seed("fc1", 2, 1, 0).unwrap();
        let data = Dataset::from_rows(&[vec![0.1, 0.2]], &[vec![1.0]]).unwrap();
        Metric::Mse.evaluate(&mut model, &data).unwrap();
        assert_eq!(model.mode(), Mode::Train);
        assert!(model.saved_for_backward().is_none());
    }
}
