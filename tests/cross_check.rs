use mini_dl::activation::{relu, sigmoid, tanh};
use mini_dl::compare::{compare_gradients, numeric_gradients, train_custom_and_reference};
use mini_dl::mnist::{self, Images};
use mini_dl::reference::RefModel;
use mini_dl::{
    Activation, ActivationLayer, Criterion, Dataset, FitConfig, Linear, Loss, Metric, Module,
    Sequential, Tensor, data, sequential, train,
};

fn lin(name: &str, i: usize, o: usize, seed: u64) -> Linear {
    Linear::new_with_seed(name, i, o, seed).unwrap()
}

fn all_activations(seed: u64) -> Sequential {
    sequential![
        lin("fc1", 2, 6, seed),
        relu(),
        lin("fc2", 6, 2, seed + 1),
        tanh(),
        lin("fc3", 2, 1, seed + 2),
        sigmoid(),
    ]
    .unwrap()
}

fn disc_train(n: usize, seed: u64) -> Dataset {
    data::disc_split(n, 10, seed).unwrap().train
}

#[test]
fn duplicate_unnamed_activations_are_a_contract_error() {
    let err = sequential![
        lin("fc1", 2, 6, 0),
        relu(),
        lin("fc2", 6, 2, 1),
        sigmoid(),
        lin("fc3", 2, 1, 2),
        sigmoid(),
    ]
    .unwrap_err();
    assert!(err.is_contract(), "{err}");
}

#[test]
fn backward_before_forward_is_a_contract_error() {
    let mut layer = lin("fc1", 2, 3, 0);
    assert!(layer.backward(&Tensor::zeros(1, 3)).unwrap_err().is_contract());

    let mut model = all_activations(0);
    assert!(model.backward(&Tensor::zeros(1, 1)).unwrap_err().is_contract());
}

#[test]
fn bce_without_final_sigmoid_is_a_contract_error() {
    let split = data::disc_split(20, 20, 1).unwrap();
    let mut model = sequential![
        lin("fc1", 2, 6, 0),
        relu(),
        lin("fc2", 6, 4, 1),
        tanh(),
        lin("fc3", 4, 1, 2),
    ]
    .unwrap();

    let mut criterion = Criterion::new(Loss::Bce);
    assert!(criterion.check_model(&model).unwrap_err().is_contract());

    let err = train::fit(
        &mut model,
        &mut criterion,
        Metric::Accuracy,
        &split,
        FitConfig::new(301, 0.001),
    )
    .unwrap_err();
    assert!(err.is_contract());
}

#[test]
fn eval_forward_keeps_saved_state_and_gradients() {
    let data = disc_train(64, 2);
    let mut model = sequential![lin("fc1", 2, 3, 0), tanh(), lin("fc2", 3, 1, 1)].unwrap();
    let mut criterion = Criterion::new(Loss::Mse);

    // Gradients from an uninterrupted forward/backward.
    let out = model.forward(data.inputs()).unwrap();
    criterion.forward(&out, data.targets()).unwrap();
    model.backward(&criterion.backward().unwrap()).unwrap();
    let clean: Vec<Tensor> = model.parameters().iter().map(|p| p.grad.clone()).collect();

    // Same pass with an eval-mode forward on other data in between.
    model.zero_grad();
    let out = model.forward(data.inputs()).unwrap();
    criterion.forward(&out, data.targets()).unwrap();
    let saved: Vec<Tensor> = model
        .children()
        .iter()
        .map(|c| c.saved_for_backward().unwrap().clone())
        .collect();

    Metric::Mse.evaluate(&mut model, &disc_train(16, 3)).unwrap();

    let saved_after: Vec<Tensor> = model
        .children()
        .iter()
        .map(|c| c.saved_for_backward().unwrap().clone())
        .collect();
    assert_eq!(saved, saved_after);

    model.backward(&criterion.backward().unwrap()).unwrap();
    let interrupted: Vec<Tensor> = model.parameters().iter().map(|p| p.grad.clone()).collect();
    assert_eq!(clean, interrupted);
}

#[test]
fn standalone_linear_trajectory_matches_reference() {
    let data = disc_train(300, 4);
    let mut model = lin("fc1", 2, 1, 5);
    let cmp = train_custom_and_reference(
        &mut model,
        &mut Criterion::new(Loss::Mse),
        &data,
        FitConfig::new(301, 0.01).with_log_every(0),
    )
    .unwrap();
    assert_eq!(cmp.custom.len(), 301);
    assert!(cmp.within(1e-4), "max diff {} at {}", cmp.max_abs_diff, cmp.worst_epoch);
}

#[test]
fn sequential_trajectory_matches_reference() {
    let data = disc_train(300, 6);
    let mut model = all_activations(7);
    let cmp = train_custom_and_reference(
        &mut model,
        &mut Criterion::new(Loss::Mse),
        &data,
        FitConfig::new(200, 0.01).with_log_every(0),
    )
    .unwrap();
    assert!(cmp.within(1e-4), "max diff {} at {}", cmp.max_abs_diff, cmp.worst_epoch);
}

#[test]
fn bce_trajectories_match_reference() {
    let data = disc_train(200, 8);

    let mut with_sigmoid = all_activations(9);
    let cmp = train_custom_and_reference(
        &mut with_sigmoid,
        &mut Criterion::new(Loss::Bce),
        &data,
        FitConfig::new(100, 0.01).with_log_every(0),
    )
    .unwrap();
    assert!(cmp.within(1e-4), "bce: {}", cmp.max_abs_diff);

    let mut logits = sequential![
        lin("fc1", 2, 6, 10),
        relu(),
        lin("fc2", 6, 4, 11),
        tanh(),
        lin("fc3", 4, 1, 12),
    ]
    .unwrap();
    let cmp = train_custom_and_reference(
        &mut logits,
        &mut Criterion::new(Loss::BceWithLogits),
        &data,
        FitConfig::new(100, 0.01).with_log_every(0),
    )
    .unwrap();
    assert!(cmp.within(1e-4), "bce with logits: {}", cmp.max_abs_diff);
}

#[test]
fn gradients_match_reference_for_every_loss() {
    let data = disc_train(50, 13);
    for loss in [Loss::Mse, Loss::Bce, Loss::BceWithLogits] {
        let mut model = all_activations(14);
        let cmp = compare_gradients(&mut model, &mut Criterion::new(loss), &data).unwrap();
        assert_eq!(cmp.per_parameter.len(), 6);
        assert!(cmp.within(1e-5), "{loss:?}: {:?}", cmp.per_parameter);
    }
}

#[test]
fn analytic_gradients_match_finite_differences() {
    let data = disc_train(40, 15);
    let mut model = sequential![lin("fc1", 2, 4, 16), tanh(), lin("fc2", 4, 1, 17), sigmoid()]
        .unwrap();
    let mut criterion = Criterion::new(Loss::Mse);

    model.zero_grad();
    let out = model.forward(data.inputs()).unwrap();
    criterion.forward(&out, data.targets()).unwrap();
    model.backward(&criterion.backward().unwrap()).unwrap();
    let analytic: Vec<Vec<f32>> = model
        .parameters()
        .iter()
        .map(|p| p.grad.as_slice().to_vec())
        .collect();

    let numeric = numeric_gradients(&mut model, &criterion, &data, 1e-2).unwrap();
    for ((name, num), ana) in numeric.iter().zip(&analytic) {
        for (n, a) in num.iter().zip(ana) {
            assert!((n - a).abs() < 2e-3, "{name}: numeric {n} vs analytic {a}");
        }
    }
}

#[test]
fn mnist_pair_model_matches_reference_on_synthetic_digits() {
    // Ten flat "digits" whose pixel value encodes the class.
    let labels: Vec<u8> = (0..40).map(|i| (i % 10) as u8).collect();
    let pixels: Vec<f32> = labels
        .iter()
        .flat_map(|&l| std::iter::repeat_n(f32::from(l) / 9.0, mnist::IMAGE_SIDE * mnist::IMAGE_SIDE))
        .collect();
    let images = Images::new(pixels, labels).unwrap();
    let pairs = mnist::pairs_from(&images, &images, 10, 0).unwrap();
    let split = pairs.split();

    let mut model = sequential![
        lin("fc1", mnist::PAIR_FEATURES, 10, 1),
        relu(),
        lin("fc2", 10, 6, 2),
        tanh(),
        lin("fc3", 6, 1, 3),
        ActivationLayer::named("tanh2", Activation::Tanh),
    ]
    .unwrap();
    let mut reference = RefModel::mirror(&model).unwrap();

    let cfg = FitConfig::new(30, 0.01).with_log_every(0);
    let ours = train::fit(
        &mut model,
        &mut Criterion::new(Loss::BceWithLogits),
        Metric::LogitAccuracy,
        &split,
        cfg,
    )
    .unwrap();
    let theirs = reference
        .fit(Loss::BceWithLogits, Metric::LogitAccuracy, &split, cfg)
        .unwrap();

    let diff = ours
        .loss
        .iter()
        .zip(&theirs.loss)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0_f32, f32::max);
    assert!(diff < 1e-4, "max loss diff {diff}");
    assert_eq!(ours.test_accuracy.len(), theirs.test_accuracy.len());
}
