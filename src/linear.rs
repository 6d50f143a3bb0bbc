//! Fully connected layer.

use rand::Rng;
use rand::SeedableRng;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;

use crate::matmul::{Op, gemm};
use crate::module::{Mode, Parameter, ParameterMut};
use crate::snapshot::LayerSnapshot;
use crate::{Error, Module, Result, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Weight initialization scheme.
pub enum Init {
    /// `U(-1/sqrt(in), 1/sqrt(in))` for weights and biases (torch's `nn.Linear` default).
    #[default]
    FanIn,
    /// Xavier/Glorot uniform, zero biases.
    Xavier,
    /// He/Kaiming uniform, zero biases.
    He,
}

/// `y = x * W^T + b`.
///
/// `W` has shape `(out_dim, in_dim)` and `b` has shape `(1, out_dim)`.
#[derive(Debug, Clone)]
pub struct Linear {
    name: String,
    weight: Tensor,
    bias: Tensor,
    d_weight: Tensor,
    d_bias: Tensor,
    saved_input: Option<Tensor>,
    mode: Mode,
}

impl Linear {
    pub fn new_with_seed(name: &str, in_dim: usize, out_dim: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new_with_rng(name, in_dim, out_dim, Init::FanIn, &mut rng)
    }

    pub fn new_with_rng<R: Rng + ?Sized>(
        name: &str,
        in_dim: usize,
        out_dim: usize,
        init: Init,
        rng: &mut R,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "linear '{name}' dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }

        let (w_bound, b_bound) = match init {
            Init::FanIn => {
                let bound = 1.0 / (in_dim as f32).sqrt();
                (bound, bound)
            }
            Init::Xavier => ((6.0 / (in_dim + out_dim) as f32).sqrt(), 0.0),
            Init::He => ((6.0 / in_dim as f32).sqrt(), 0.0),
        };

        let w_dist = Uniform::new_inclusive(-w_bound, w_bound);
        let weights = (0..in_dim * out_dim).map(|_| w_dist.sample(rng)).collect();
        let biases = if b_bound > 0.0 {
            let b_dist = Uniform::new_inclusive(-b_bound, b_bound);
            (0..out_dim).map(|_| b_dist.sample(rng)).collect()
        } else {
            vec![0.0; out_dim]
        };

        Self::from_parts(
            name,
            Tensor::from_vec(weights, out_dim, in_dim)?,
            Tensor::from_vec(biases, 1, out_dim)?,
        )
    }

    /// Build a layer from explicit parameters.
    ///
    /// `weight` is `(out_dim, in_dim)`, `bias` is `(1, out_dim)`; all values must be finite.
    pub fn from_parts(name: &str, weight: Tensor, bias: Tensor) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidConfig("linear layer name must not be empty".to_owned()));
        }
        if weight.is_empty() {
            return Err(Error::InvalidShape(format!("linear '{name}' has an empty weight")));
        }
        if bias.shape() != (1, weight.rows()) {
            return Err(Error::InvalidShape(format!(
                "linear '{name}' bias shape {:?} does not match (1, {})",
                bias.shape(),
                weight.rows()
            )));
        }
        if weight.as_slice().iter().chain(bias.as_slice()).any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(format!(
                "linear '{name}' parameters must be finite"
            )));
        }

        let d_weight = Tensor::zeros(weight.rows(), weight.cols());
        let d_bias = Tensor::zeros(1, bias.cols());
        Ok(Self {
            name: name.to_owned(),
            weight,
            bias,
            d_weight,
            d_bias,
            saved_input: None,
            mode: Mode::Train,
        })
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.weight.cols()
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.weight.rows()
    }

    #[inline]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    #[inline]
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    #[inline]
    pub fn weight_grad(&self) -> &Tensor {
        &self.d_weight
    }

    #[inline]
    pub fn bias_grad(&self) -> &Tensor {
        &self.d_bias
    }
}

impl Module for Linear {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.cols() != self.in_dim() {
            return Err(Error::InvalidShape(format!(
                "linear '{}' expects {} input features, got {}",
                self.name,
                self.in_dim(),
                input.cols()
            )));
        }

        let mut out = input.matmul_t(&self.weight)?;
        out.add_row(self.bias.as_slice())?;

        if self.mode == Mode::Train {
            self.saved_input = Some(input.clone());
        }
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self.saved_input.as_ref().ok_or_else(|| {
            Error::Contract(format!(
                "backward called on '{}' before any forward pass",
                self.name
            ))
        })?;
        if grad_output.shape() != (input.rows(), self.out_dim()) {
            return Err(Error::InvalidShape(format!(
                "linear '{}' grad_output shape {:?} does not match ({}, {})",
                self.name,
                grad_output.shape(),
                input.rows(),
                self.out_dim()
            )));
        }

        // dW += g^T * x, db += sum over the batch of g
        gemm(1.0, grad_output, Op::T, input, Op::N, 1.0, &mut self.d_weight);
        for (acc, g) in self.d_bias.as_mut_slice().iter_mut().zip(grad_output.sum_rows()) {
            *acc += g;
        }

        grad_output.matmul(&self.weight)
    }

    fn parameters(&self) -> Vec<Parameter<'_>> {
        vec![
            Parameter {
                name: format!("{}.weight", self.name),
                value: &self.weight,
                grad: &self.d_weight,
            },
            Parameter {
                name: format!("{}.bias", self.name),
                value: &self.bias,
                grad: &self.d_bias,
            },
        ]
    }

    fn parameters_mut(&mut self) -> Vec<ParameterMut<'_>> {
        vec![
            ParameterMut {
                name: format!("{}.weight", self.name),
                value: &mut self.weight,
                grad: &mut self.d_weight,
            },
            ParameterMut {
                name: format!("{}.bias", self.name),
                value: &mut self.bias,
                grad: &mut self.d_bias,
            },
        ]
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn saved_for_backward(&self) -> Option<&Tensor> {
        self.saved_input.as_ref()
    }

    fn snapshot(&self) -> Vec<LayerSnapshot> {
        vec![LayerSnapshot::Linear {
            name: self.name.clone(),
            in_dim: self.in_dim(),
            out_dim: self.out_dim(),
            weights: self.weight.as_slice().to_vec(),
            biases: self.bias.as_slice().to_vec(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer() -> Linear {
        Linear::from_parts(
            "fc1",
            Tensor::from_rows(&[vec![1.0, 2.0], vec![-1.0, 0.5]]).unwrap(),
            Tensor::from_rows(&[vec![0.1, -0.2]]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn fan_in_init_respects_bound() {
        let l = Linear::new_with_seed("fc", 16, 4, 7).unwrap();
        let bound = 0.25 + 1e-6;
        assert!(l.weight().as_slice().iter().all(|w| w.abs() <= bound));
        assert!(l.bias().as_slice().iter().all(|b| b.abs() <= bound));
        assert_eq!(l.weight().shape(), (4, 16));
    }

    #[test]
    fn forward_computes_affine_map() {
        let mut l = layer();
        let x = Tensor::from_rows(&[vec![1.0, 1.0], vec![0.0, 2.0]]).unwrap();
        let y = l.forward(&x).unwrap();
        let expected = Tensor::from_rows(&[vec![3.1, -0.7], vec![4.1, 0.8]]).unwrap();
        assert!(y.max_abs_diff(&expected) < 1e-6);
    }

    #[test]
    fn backward_before_forward_is_a_contract_error() {
        let mut l = Linear::new_with_seed("fc1", 2, 3, 0).unwrap();
        let err = l.backward(&Tensor::zeros(1, 3)).unwrap_err();
        assert!(err.is_contract());
        assert!(err.to_string().contains("fc1"));
    }

    #[test]
    fn backward_accumulates_until_zero_grad() {
        let mut l = layer();
        let x = Tensor::from_rows(&[vec![1.0, 2.0]]).unwrap();
        let g = Tensor::from_rows(&[vec![1.0, 0.0]]).unwrap();
        l.forward(&x).unwrap();
        let dx = l.backward(&g).unwrap();
        assert_eq!(dx.row(0), &[1.0, 2.0]);
        assert_eq!(l.weight_grad().row(0), &[1.0, 2.0]);

        l.backward(&g).unwrap();
        assert_eq!(l.weight_grad().row(0), &[2.0, 4.0]);
        assert_eq!(l.bias_grad().as_slice(), &[2.0, 0.0]);

        l.zero_grad();
        assert!(l.weight_grad().as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn eval_forward_keeps_saved_input() {
        let mut l = layer();
        let x = Tensor::from_rows(&[vec![1.0, 2.0]]).unwrap();
        l.forward(&x).unwrap();
        l.eval();
        l.forward(&Tensor::from_rows(&[vec![9.0, 9.0]]).unwrap()).unwrap();
        assert_eq!(l.saved_for_backward(), Some(&x));
    }
}
