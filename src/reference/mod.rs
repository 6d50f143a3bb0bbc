//! Reference framework.
//!
//! An independent implementation of the same models on a scalar reverse-mode autodiff
//! engine. It shares no forward/backward code with the module library: gradients come
//! from the chain rule over a recorded graph instead of hand-written backward passes,
//! which makes it a meaningful yardstick for the library's losses and gradients.

mod engine;
mod nn;

pub use engine::Var;
pub use nn::{NamedGrad, RefModel};
