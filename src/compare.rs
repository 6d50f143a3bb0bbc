//! Cross-checks between the module library and the reference framework.

use tracing::{debug, info};

use crate::metrics::predict;
use crate::reference::RefModel;
use crate::train::{self, FitConfig};
use crate::{Criterion, Dataset, Error, Module, Result};

/// Two loss trajectories side by side.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryComparison {
    pub custom: Vec<f32>,
    pub reference: Vec<f32>,
    pub max_abs_diff: f32,
    /// Epoch at which the trajectories differ the most.
    pub worst_epoch: usize,
}

impl TrajectoryComparison {
    #[inline]
    pub fn within(&self, tol: f32) -> bool {
        self.max_abs_diff <= tol
    }
}

pub fn compare_trajectories(custom: &[f32], reference: &[f32]) -> Result<TrajectoryComparison> {
    if custom.len() != reference.len() {
        return Err(Error::InvalidData(format!(
            "trajectory lengths differ: {} vs {}",
            custom.len(),
            reference.len()
        )));
    }

    let (worst_epoch, max_abs_diff) = custom
        .iter()
        .zip(reference)
        .map(|(a, b)| (a - b).abs())
        .enumerate()
        .fold((0, 0.0_f32), |best, (e, d)| if d > best.1 { (e, d) } else { best });

    Ok(TrajectoryComparison {
        custom: custom.to_vec(),
        reference: reference.to_vec(),
        max_abs_diff,
        worst_epoch,
    })
}

/// Mirrors `model` onto the reference framework, trains both copies the same way and
/// compares their per-epoch losses.
pub fn train_custom_and_reference(
    model: &mut dyn Module,
    criterion: &mut Criterion,
    data: &Dataset,
    cfg: FitConfig,
) -> Result<TrajectoryComparison> {
    let mut reference = RefModel::mirror(model)?;

    info!("working with the module library");
    let custom = train::fit_trajectory(model, criterion, data, cfg)?;

    info!("working with the reference framework");
    let theirs = reference.fit_trajectory(data, criterion.loss(), cfg)?;

    let cmp = compare_trajectories(&custom, &theirs)?;
    debug!(
        max_abs_diff = cmp.max_abs_diff,
        worst_epoch = cmp.worst_epoch,
        "trajectory comparison"
    );
    Ok(cmp)
}

/// Per-parameter gradient differences.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientComparison {
    /// `(parameter name, max |custom - reference|)` in parameter order.
    pub per_parameter: Vec<(String, f32)>,
    pub max_abs_diff: f32,
}

impl GradientComparison {
    #[inline]
    pub fn within(&self, tol: f32) -> bool {
        self.max_abs_diff <= tol
    }
}

/// One forward/backward pass on both engines from the same parameters.
///
/// The model's gradients are zeroed first and hold the fresh gradients afterwards.
pub fn compare_gradients(
    model: &mut dyn Module,
    criterion: &mut Criterion,
    data: &Dataset,
) -> Result<GradientComparison> {
    let reference = RefModel::mirror(model)?.gradients(data, criterion.loss())?;

    criterion.check_model(model)?;
    model.zero_grad();
    let output = model.forward(data.inputs())?;
    criterion.forward(&output, data.targets())?;
    model.backward(&criterion.backward()?)?;

    let params = model.parameters();
    if params.len() != reference.len() {
        return Err(Error::InvalidData(format!(
            "model has {} parameters, reference has {}",
            params.len(),
            reference.len()
        )));
    }

    let mut per_parameter = Vec::with_capacity(params.len());
    for (p, r) in params.iter().zip(&reference) {
        if p.name != r.name || p.grad.len() != r.grad.len() {
            return Err(Error::InvalidData(format!(
                "parameter '{}' does not line up with reference '{}'",
                p.name, r.name
            )));
        }
        let diff = p
            .grad
            .as_slice()
            .iter()
            .zip(&r.grad)
            .map(|(&a, &b)| (f64::from(a) - b).abs() as f32)
            .fold(0.0, f32::max);
        per_parameter.push((p.name.clone(), diff));
    }

    let max_abs_diff = per_parameter.iter().map(|(_, d)| *d).fold(0.0, f32::max);
    Ok(GradientComparison {
        per_parameter,
        max_abs_diff,
    })
}

/// Central finite differences of the loss over `data`, one vector per parameter.
///
/// Forwards run in eval mode, so the model's saved-for-backward state and gradients are
/// left alone. Parameters are restored after each probe.
pub fn numeric_gradients(
    model: &mut dyn Module,
    criterion: &Criterion,
    data: &Dataset,
    eps: f32,
) -> Result<Vec<(String, Vec<f32>)>> {
    if !(eps.is_finite() && eps > 0.0) {
        return Err(Error::InvalidConfig(format!(
            "finite difference step must be finite and > 0, got {eps}"
        )));
    }
    criterion.check_model(model)?;

    let loss = criterion.loss();
    let names: Vec<(String, usize)> = model
        .parameters()
        .iter()
        .map(|p| (p.name.clone(), p.value.len()))
        .collect();

    let mut out = Vec::with_capacity(names.len());
    for (i, (name, len)) in names.into_iter().enumerate() {
        let mut grad = Vec::with_capacity(len);
        for j in 0..len {
            let original = nudge(model, i, j, None);

            nudge(model, i, j, Some(original + eps));
            let plus = loss.forward(predict(model, data.inputs())?.as_slice(), data.targets().as_slice());
            nudge(model, i, j, Some(original - eps));
            let minus = loss.forward(predict(model, data.inputs())?.as_slice(), data.targets().as_slice());
            nudge(model, i, j, Some(original));

            grad.push((plus - minus) / (2.0 * eps));
        }
        out.push((name, grad));
    }
    Ok(out)
}

/// Reads element `j` of parameter `i`, optionally overwriting it; returns the old value.
fn nudge(model: &mut dyn Module, i: usize, j: usize, value: Option<f32>) -> f32 {
    let mut params = model.parameters_mut();
    let slot = &mut params[i].value.as_mut_slice()[j];
    let old = *slot;
    if let Some(v) = value {
        *slot = v;
    }
    old
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trajectories_report_worst_epoch() {
        let cmp = compare_trajectories(&[1.0, 0.5, 0.25], &[1.0, 0.4, 0.26]).unwrap();
        assert_eq!(cmp.worst_epoch, 1);
        assert!((cmp.max_abs_diff - 0.1).abs() < 1e-6);
        assert!(cmp.within(0.11));
        assert!(!cmp.within(0.05));
    }

    #[test]
    fn trajectories_must_have_equal_length() {
        assert!(compare_trajectories(&[1.0], &[1.0, 2.0]).is_err());
    }
}
