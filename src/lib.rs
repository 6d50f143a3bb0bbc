//! A small neural network module library and the harness that validates it.
//!
//! `mini-dl` builds feed-forward models out of modules with an explicit forward/backward
//! pair (no autograd), trains them with a hand-rolled optimizer and cross-checks losses,
//! gradients and accuracy against the same model on an independent reverse-mode autodiff
//! engine ([`reference`]).
//!
//! # Module contract
//!
//! - `forward` in [`Mode::Train`] keeps the state `backward` needs; in [`Mode::Eval`] it
//!   leaves that state untouched.
//! - `backward` before any training forward is a [`Error::Contract`] violation.
//! - Gradients accumulate across backward passes until `zero_grad`.
//! - Containers key their children by name: two unnamed activation layers of the same kind
//!   in one [`Sequential`] are rejected.
//! - [`Loss::Bce`] requires a model that ends with a sigmoid layer.
//!
//! # Data layout and shapes
//!
//! - Scalars are `f32` (the reference engine computes in `f64`).
//! - A batch is a row-major [`Tensor`] with one sample per row.
//! - Linear weights are row-major with shape `(out_dim, in_dim)`, biases `(1, out_dim)`.
//!
//! # MSRV
//!
//! This crate's minimum supported Rust version (MSRV) is specified in `Cargo.toml`.

//! # Quick start
//!
//! ```rust
//! use mini_dl::activation::{relu, sigmoid};
//! use mini_dl::{Criterion, FitConfig, Linear, Loss, Metric, data, sequential, train};
//!
//! # fn main() -> mini_dl::Result<()> {
//! let split = data::disc_split(200, 100, 0)?;
//!
//! let mut model = sequential![
//!     Linear::new_with_seed("fc1", 2, 8, 0)?,
//!     relu(),
//!     Linear::new_with_seed("fc2", 8, 1, 1)?,
//!     sigmoid(),
//! ]?;
//! let mut criterion = Criterion::new(Loss::Bce);
//!
//! let history = train::fit(
//!     &mut model,
//!     &mut criterion,
//!     Metric::Accuracy,
//!     &split,
//!     FitConfig::new(20, 0.1),
//! )?;
//! assert_eq!(history.len(), 20);
//! # Ok(())
//! # }
//! ```

//! # Cross-checking against the reference engine
//!
//! ```rust
//! use mini_dl::activation::tanh;
//! use mini_dl::compare::compare_gradients;
//! use mini_dl::{Criterion, Linear, Loss, data, sequential};
//!
//! # fn main() -> mini_dl::Result<()> {
//! let split = data::disc_split(50, 10, 1)?;
//! let mut model = sequential![
//!     Linear::new_with_seed("fc1", 2, 3, 2)?,
//!     tanh(),
//!     Linear::new_with_seed("fc2", 3, 1, 3)?,
//! ]?;
//!
//! let cmp = compare_gradients(&mut model, &mut Criterion::new(Loss::Mse), &split.train)?;
//! assert!(cmp.within(1e-4));
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod compare;
pub mod config;
pub mod data;
pub mod error;
pub mod linear;
pub mod loss;
pub(crate) mod matmul;
pub mod metrics;
pub mod mnist;
pub mod module;
pub mod optim;
pub mod reference;
pub mod scenarios;
pub mod sequential;
pub mod snapshot;
pub mod tensor;
pub mod train;
pub mod viz;

pub use activation::{Activation, ActivationLayer};
pub use config::HarnessConfig;
pub use data::{Dataset, Split};
pub use error::{Error, Result};
pub use linear::{Init, Linear};
pub use loss::{Criterion, Loss};
pub use metrics::Metric;
pub use module::{Mode, Module, Parameter, ParameterMut};
pub use optim::{Optimizer, OptimizerState, Sgd};
pub use sequential::Sequential;
pub use snapshot::{LayerSnapshot, ModelSnapshot};
pub use tensor::Tensor;
pub use train::{FitConfig, History};
