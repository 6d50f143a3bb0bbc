//! End-to-end demo scenarios.
//!
//! Each scenario builds a small model, runs it and logs what happened. Scenarios that
//! demonstrate a forbidden use return the caught error; if the forbidden call succeeds
//! they fail with [`Error::UnexpectedSuccess`].

use tracing::{error, info, warn};

use crate::activation::{relu, sigmoid, tanh};
use crate::compare::{self, TrajectoryComparison};
use crate::config::HarnessConfig;
use crate::metrics::predict;
use crate::mnist;
use crate::reference::RefModel;
use crate::snapshot::ModelSnapshot;
use crate::train::{self, FitConfig, History};
use crate::{
    Activation, ActivationLayer, Criterion, Error, Linear, Loss, Metric, Module, Result,
    Sequential, Split, Tensor, data, sequential, viz,
};

/// Rows of saved-for-backward state shown in the logs.
const SHOWN_ROWS: usize = 3;

fn banner(title: &str) {
    info!("{}", "-".repeat(75));
    info!("{title}");
}

fn linear(name: &str, in_dim: usize, out_dim: usize, seed: u64) -> Result<Linear> {
    Linear::new_with_seed(name, in_dim, out_dim, seed)
}

/// Turns the outcome of a call that must fail into the error it raised.
fn expect_contract_error<T>(what: &str, outcome: Result<T>) -> Result<Error> {
    match outcome {
        Ok(_) => Err(Error::UnexpectedSuccess(what.to_owned())),
        Err(e) if e.is_contract() => {
            warn!("{e}");
            Ok(e)
        }
        Err(e) => Err(e),
    }
}

fn disc(cfg: &HarnessConfig) -> Result<Split> {
    data::disc_split(cfg.disc_train, cfg.disc_test, cfg.seed)
}

fn compare_config(cfg: &HarnessConfig) -> FitConfig {
    FitConfig::new(cfg.compare_epochs, cfg.compare_lr).with_log_every(cfg.compare_log_every)
}

fn train_config(cfg: &HarnessConfig) -> FitConfig {
    FitConfig::new(cfg.train_epochs, cfg.train_lr).with_log_every(cfg.train_log_every)
}

fn report_trajectories(cmp: &TrajectoryComparison) {
    info!(
        "largest loss difference = {:.3e} at epoch {}",
        cmp.max_abs_diff, cmp.worst_epoch
    );
}

/// Logs the model's parameters next to those of its reference mirror.
fn show_models(model: &dyn Module) -> Result<ModelSnapshot> {
    let ours = ModelSnapshot::of(model)?;
    let theirs = RefModel::from_snapshot(&ours)?.snapshot();
    info!("my model:\n{ours}");
    info!("reference model:\n{theirs}");
    Ok(theirs)
}

/// A single `Linear(2, 1)` trained with MSE on both engines.
pub fn standalone_linear(cfg: &HarnessConfig) -> Result<TrajectoryComparison> {
    banner("Testing standalone linear module.");
    let split = disc(cfg)?;

    let mut model = linear("fc1", 2, 1, cfg.seed)?;
    show_models(&model)?;

    let mut criterion = Criterion::new(Loss::Mse);
    let cmp =
        compare::train_custom_and_reference(&mut model, &mut criterion, &split.train, compare_config(cfg))?;
    report_trajectories(&cmp);
    Ok(cmp)
}

/// Linear/ReLU/Linear/Tanh/Linear/Sigmoid trained with MSE on both engines.
pub fn sequential_all_activations(cfg: &HarnessConfig) -> Result<TrajectoryComparison> {
    banner("Testing sequential module with every non-linearities.");
    let split = disc(cfg)?;

    let mut model = sequential![
        linear("fc1", 2, 6, cfg.seed)?,
        relu(),
        linear("fc2", 6, 2, cfg.seed + 1)?,
        tanh(),
        linear("fc3", 2, 1, cfg.seed + 2)?,
        sigmoid(),
    ]?;
    show_models(&model)?;

    let mut criterion = Criterion::new(Loss::Mse);
    let cmp =
        compare::train_custom_and_reference(&mut model, &mut criterion, &split.train, compare_config(cfg))?;
    report_trajectories(&cmp);
    Ok(cmp)
}

/// Two unnamed sigmoid layers in one container collide on their default name.
pub fn duplicate_unnamed_layers() -> Result<Error> {
    banner("Testing contract error with multiple unnamed parameterless modules.");
    let outcome = (|| -> Result<Sequential> {
        sequential![
            linear("fc1", 2, 6, 0)?,
            relu(),
            linear("fc2", 6, 2, 1)?,
            sigmoid(),
            linear("fc3", 2, 1, 2)?,
            sigmoid(),
        ]
    })();
    expect_contract_error("two unnamed sigmoid layers were accepted", outcome)
}

/// Evaluating between a training forward and its backward leaves saved state alone.
///
/// Returns whether every layer's saved-for-backward state survived the eval pass.
pub fn eval_mode_preserves_saved_state(cfg: &HarnessConfig) -> Result<bool> {
    banner("Testing that saved-for-backward state is not changed in eval mode.");
    let split = disc(cfg)?;

    let mut model = sequential![
        linear("fc1", 2, 3, cfg.seed)?,
        tanh(),
        linear("fc2", 3, 1, cfg.seed + 1)?,
    ]?;
    let mut criterion = Criterion::new(Loss::Mse);

    let output = model.forward(split.train.inputs())?;
    criterion.forward(&output, split.train.targets())?;
    let before = saved_states(&model);
    for (name, state) in &before {
        info!(
            "after the training forward pass, '{name}' saved:\n{}",
            state.head(SHOWN_ROWS)
        );
    }

    let test_mse = Metric::Mse.evaluate(&mut model, &split.test)?;
    info!("test mse = {test_mse:.5}");

    let after = saved_states(&model);
    for (name, state) in &after {
        info!(
            "after the eval forward pass, '{name}' saved:\n{}",
            state.head(SHOWN_ROWS)
        );
    }

    let unchanged = before == after;
    if unchanged {
        info!("saved-for-backward state is unchanged");
    } else {
        warn!("saved-for-backward state was overwritten by an eval forward pass");
    }
    Ok(unchanged)
}

fn saved_states(model: &dyn Module) -> Vec<(String, Tensor)> {
    model
        .children()
        .iter()
        .filter_map(|c| {
            c.saved_for_backward()
                .map(|s| (c.name().to_owned(), s.clone()))
        })
        .collect()
}

pub fn backward_before_forward() -> Result<Error> {
    banner("Testing contract error when calling backward before any forward pass.");
    let mut model = linear("fc1", 2, 3, 0)?;
    let outcome = model.backward(&Tensor::zeros(1, 3));
    expect_contract_error("backward before forward succeeded", outcome)
}

/// BCE on a model without a final sigmoid is refused before training starts.
pub fn bce_without_sigmoid(cfg: &HarnessConfig) -> Result<Error> {
    banner("Testing contract error when using BCELoss without final sigmoid layer.");
    let split = disc(cfg)?;

    let mut model = sequential![
        linear("fc1", 2, 6, cfg.seed)?,
        relu(),
        linear("fc2", 6, 4, cfg.seed + 1)?,
        tanh(),
        linear("fc3", 4, 1, cfg.seed + 2)?,
    ]?;
    let mut criterion = Criterion::new(Loss::Bce);
    let outcome = train::fit(
        &mut model,
        &mut criterion,
        Metric::Accuracy,
        &split,
        train_config(cfg),
    );
    expect_contract_error("BCELoss trained a model without a final sigmoid", outcome)
}

pub fn train_with_bce(cfg: &HarnessConfig) -> Result<History> {
    banner("Testing BCELoss with sequential module.");
    let model = sequential![
        linear("fc1", 2, 6, cfg.seed)?,
        relu(),
        linear("fc2", 6, 4, cfg.seed + 1)?,
        tanh(),
        linear("fc3", 4, 1, cfg.seed + 2)?,
        sigmoid(),
    ]?;
    train_on_disc(cfg, model, Loss::Bce, "bce")
}

pub fn train_with_bce_with_logits(cfg: &HarnessConfig) -> Result<History> {
    banner("Testing BCEWithLogitsLoss with sequential module.");
    let model = sequential![
        linear("fc1", 2, 6, cfg.seed)?,
        relu(),
        linear("fc2", 6, 4, cfg.seed + 1)?,
        tanh(),
        linear("fc3", 4, 1, cfg.seed + 2)?,
    ]?;
    train_on_disc(cfg, model, Loss::BceWithLogits, "bce_with_logits")
}

fn train_on_disc(
    cfg: &HarnessConfig,
    mut model: Sequential,
    loss: Loss,
    tag: &str,
) -> Result<History> {
    let split = disc(cfg)?;
    let metric = Metric::for_loss(loss);

    show_predictions(
        cfg,
        &mut model,
        metric,
        &split,
        "initial untrained model predictions on train and test",
    )?;

    let mut criterion = Criterion::new(loss);
    let history = train::fit(&mut model, &mut criterion, metric, &split, train_config(cfg))?;
    info!(
        "\n{}",
        viz::history(
            &history,
            &format!("custom framework, training with {}", loss.label()),
            cfg.plot_width,
            cfg.plot_height
        )
    );

    show_predictions(
        cfg,
        &mut model,
        metric,
        &split,
        "model predictions on train and test after training",
    )?;

    let test_acc = metric.evaluate(&mut model, &split.test)?;
    info!("final test accuracy = {test_acc:.4}");
    save_history(cfg, tag, &history)?;
    Ok(history)
}

fn show_predictions(
    cfg: &HarnessConfig,
    model: &mut dyn Module,
    metric: Metric,
    split: &Split,
    title: &str,
) -> Result<()> {
    let mut points = Vec::with_capacity(split.train.len() + split.test.len());
    let mut labels = Vec::with_capacity(points.capacity());
    for set in [&split.train, &split.test] {
        let out = predict(model, set.inputs())?;
        labels.extend(metric.predict(&out));
        points.extend((0..set.len()).map(|i| set.input(i).to_vec()));
    }
    let plot = viz::scatter(
        &Tensor::from_rows(&points)?,
        &labels,
        title,
        cfg.plot_width,
        cfg.plot_height,
    )?;
    info!("\n{plot}");
    Ok(())
}

/// Architecture and custom learning rate of an MNIST run.
#[derive(Debug, Clone, Copy)]
struct MnistRun {
    hidden1: usize,
    hidden2: usize,
    custom_lr: f32,
}

/// Reduced MNIST pair comparison, hidden layers of 10 and 6 units.
///
/// Returns `None` when no MNIST directory is configured.
pub fn mnist_pairs(cfg: &HarnessConfig) -> Result<Option<(History, History)>> {
    banner("Testing framework on (reduced) MNIST dataset.");
    run_mnist(
        cfg,
        MnistRun {
            hidden1: 10,
            hidden2: 6,
            custom_lr: 0.001,
        },
        "mnist",
    )
}

/// Reduced MNIST pair comparison with a wider model and a much smaller custom learning
/// rate.
pub fn mnist_pairs_stable(cfg: &HarnessConfig) -> Result<Option<(History, History)>> {
    banner("Testing framework on (reduced) MNIST dataset, stable training conditions.");
    run_mnist(
        cfg,
        MnistRun {
            hidden1: 50,
            hidden2: 40,
            custom_lr: 1e-5,
        },
        "mnist_stable",
    )
}

fn run_mnist(cfg: &HarnessConfig, run: MnistRun, tag: &str) -> Result<Option<(History, History)>> {
    let Some(dir) = cfg.mnist_dir.as_deref() else {
        info!("no MNIST directory configured, skipping");
        return Ok(None);
    };

    let pairs = mnist::load_pairs(dir, cfg.mnist_pairs, cfg.seed)?;
    let split = pairs.split();
    let input_size = split.train.input_dim();

    let mut model = sequential![
        linear("fc1", input_size, run.hidden1, cfg.seed)?,
        relu(),
        linear("fc2", run.hidden1, run.hidden2, cfg.seed + 1)?,
        tanh(),
        linear("fc3", run.hidden2, 1, cfg.seed + 2)?,
        ActivationLayer::named("tanh2", Activation::Tanh),
    ]?;
    let mut reference = RefModel::mirror(&model)?;
    let loss = Loss::BceWithLogits;
    let metric = Metric::for_loss(loss);

    info!("working with the module library");
    let mut criterion = Criterion::new(loss);
    let custom_cfg = FitConfig::new(cfg.mnist_epochs, run.custom_lr).with_log_every(cfg.train_log_every);
    let custom = train::fit(&mut model, &mut criterion, metric, &split, custom_cfg)?;
    info!(
        "\n{}",
        viz::history(
            &custom,
            &format!(
                "custom framework, {}, reduced MNIST, lr={}",
                loss.label(),
                run.custom_lr
            ),
            cfg.plot_width,
            cfg.plot_height
        )
    );
    let test_acc = metric.evaluate(&mut model, &split.test)?;
    info!("final test accuracy = {test_acc:.4}");

    info!("working with the reference framework");
    let reference_cfg =
        FitConfig::new(cfg.mnist_epochs, cfg.mnist_reference_lr).with_log_every(cfg.train_log_every);
    let theirs = reference.fit(loss, metric, &split, reference_cfg)?;
    info!(
        "\n{}",
        viz::history(
            &theirs,
            &format!(
                "reference framework, {}, reduced MNIST, lr={}",
                loss.label(),
                cfg.mnist_reference_lr
            ),
            cfg.plot_width,
            cfg.plot_height
        )
    );
    let ref_acc = metric.score(&reference.predict(split.test.inputs())?, split.test.targets())?;
    info!("final test accuracy with the reference = {ref_acc:.4}");

    save_history(cfg, tag, &custom)?;
    save_history(cfg, &format!("{tag}_reference"), &theirs)?;
    Ok(Some((custom, theirs)))
}

#[cfg(feature = "serde")]
fn save_history(cfg: &HarnessConfig, tag: &str, history: &History) -> Result<()> {
    let Some(dir) = cfg.history_dir.as_deref() else {
        return Ok(());
    };
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::InvalidData(format!("failed to create {}: {e}", dir.display())))?;
    let path = dir.join(format!("{tag}.json"));
    history.save_json(&path)?;
    info!("history written to {}", path.display());
    Ok(())
}

#[cfg(not(feature = "serde"))]
fn save_history(cfg: &HarnessConfig, _tag: &str, _history: &History) -> Result<()> {
    if cfg.history_dir.is_some() {
        warn!("history directory set but the `serde` feature is disabled; not saving");
    }
    Ok(())
}

/// Logs a demo whose forbidden call went through and counts it; other errors propagate.
fn tally(failures: &mut usize, outcome: Result<Error>) -> Result<()> {
    match outcome {
        Ok(_) => Ok(()),
        Err(e @ Error::UnexpectedSuccess(_)) => {
            error!("{e}");
            *failures += 1;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Runs every scenario in order.
///
/// A forbidden call that succeeds, or an eval pass that changes saved state, is logged
/// and counted, and the remaining scenarios still run. Any other error stops the run.
/// Returns the number of misbehaving scenarios.
pub fn run_all(cfg: &HarnessConfig) -> Result<usize> {
    let mut failures = 0;
    standalone_linear(cfg)?;
    sequential_all_activations(cfg)?;
    tally(&mut failures, duplicate_unnamed_layers())?;
    if !eval_mode_preserves_saved_state(cfg)? {
        error!("uncorrect behavior: an eval-mode forward pass changed saved-for-backward state");
        failures += 1;
    }
    tally(&mut failures, backward_before_forward())?;
    tally(&mut failures, bce_without_sigmoid(cfg))?;
    train_with_bce(cfg)?;
    train_with_bce_with_logits(cfg)?;
    mnist_pairs(cfg)?;
    mnist_pairs_stable(cfg)?;
    Ok(failures)
}
