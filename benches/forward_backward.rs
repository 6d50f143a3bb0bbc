use criterion::{Criterion, black_box, criterion_group, criterion_main};

use mini_dl::activation::{relu, sigmoid, tanh};
use mini_dl::reference::RefModel;
use mini_dl::{Linear, Loss, Module, Sequential, data, loss, sequential};

fn disc_model() -> Sequential {
    sequential![
        Linear::new_with_seed("fc1", 2, 64, 0).unwrap(),
        relu(),
        Linear::new_with_seed("fc2", 64, 64, 1).unwrap(),
        tanh(),
        Linear::new_with_seed("fc3", 64, 1, 2).unwrap(),
        sigmoid(),
    ]
    .unwrap()
}

fn sequential_forward_bench(c: &mut Criterion) {
    let mut model = disc_model();
    let split = data::disc_split(1000, 10, 0).unwrap();

    c.bench_function("sequential_forward_1000x2_64_64_1", |b| {
        b.iter(|| {
            let out = model.forward(black_box(split.train.inputs())).unwrap();
            black_box(out);
        })
    });
}

fn sequential_backward_bench(c: &mut Criterion) {
    let mut model = disc_model();
    let split = data::disc_split(1000, 10, 0).unwrap();
    let out = model.forward(split.train.inputs()).unwrap();
    let mut grad = out.clone();
    loss::mse_backward(out.as_slice(), split.train.targets().as_slice(), grad.as_mut_slice());

    c.bench_function("sequential_backward_1000x2_64_64_1", |b| {
        b.iter(|| {
            model.zero_grad();
            let d_input = model.backward(black_box(&grad)).unwrap();
            black_box(d_input);
        })
    });
}

fn reference_gradients_bench(c: &mut Criterion) {
    let model = sequential![
        Linear::new_with_seed("fc1", 2, 6, 0).unwrap(),
        relu(),
        Linear::new_with_seed("fc2", 6, 1, 1).unwrap(),
        sigmoid(),
    ]
    .unwrap();
    let reference = RefModel::mirror(&model).unwrap();
    let split = data::disc_split(200, 10, 0).unwrap();

    c.bench_function("reference_gradients_200x2_6_1", |b| {
        b.iter(|| {
            let grads = reference.gradients(black_box(&split.train), Loss::Mse).unwrap();
            black_box(grads);
        })
    });
}

criterion_group!(
    benches,
    sequential_forward_bench,
    sequential_backward_bench,
    reference_gradients_bench
);
criterion_main!(benches);
