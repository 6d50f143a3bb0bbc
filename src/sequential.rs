//! Ordered container of modules.

use std::collections::HashSet;

use crate::module::{Mode, Parameter, ParameterMut};
use crate::snapshot::LayerSnapshot;
use crate::{Activation, Error, Module, Result, Tensor};

/// Runs its children one after the other.
///
/// Children are keyed by name, and names must be unique. Parameterless layers get a
/// default name from their activation, so a model holding two `sigmoid()` layers is
/// rejected until one of them is given an explicit name.
pub struct Sequential {
    name: String,
    children: Vec<Box<dyn Module>>,
    forwarded: bool,
    mode: Mode,
}

impl Sequential {
    pub fn new(children: Vec<Box<dyn Module>>) -> Result<Self> {
        Self::named("sequential", children)
    }

    pub fn named(name: &str, children: Vec<Box<dyn Module>>) -> Result<Self> {
        if children.is_empty() {
            return Err(Error::InvalidConfig(
                "sequential must have at least one child".to_owned(),
            ));
        }

        let mut seen = HashSet::with_capacity(children.len());
        for child in &children {
            if !seen.insert(child.name()) {
                return Err(Error::Contract(format!(
                    "module name '{}' is used more than once in '{name}'; \
                     give repeated parameterless layers an explicit name",
                    child.name()
                )));
            }
        }

        Ok(Self {
            name: name.to_owned(),
            children,
            forwarded: false,
            mode: Mode::Train,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child(&self, name: &str) -> Option<&dyn Module> {
        self.children
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }
}

impl std::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequential")
            .field("name", &self.name)
            .field(
                "children",
                &self.children.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("mode", &self.mode)
            .finish()
    }
}

impl Module for Sequential {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut children = self.children.iter_mut();
        let mut x = match children.next() {
            Some(first) => first.forward(input)?,
            None => return Err(Error::InvalidConfig("sequential has no children".to_owned())),
        };
        for child in children {
            x = child.forward(&x)?;
        }

        if self.mode == Mode::Train {
            self.forwarded = true;
        }
        Ok(x)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        if !self.forwarded {
            return Err(Error::Contract(format!(
                "backward called on '{}' before any forward pass",
                self.name
            )));
        }

        let mut grad = grad_output.clone();
        for child in self.children.iter_mut().rev() {
            grad = child.backward(&grad)?;
        }
        Ok(grad)
    }

    fn parameters(&self) -> Vec<Parameter<'_>> {
        self.children.iter().flat_map(|c| c.parameters()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<ParameterMut<'_>> {
        self.children
            .iter_mut()
            .flat_map(|c| c.parameters_mut())
            .collect()
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        for child in &mut self.children {
            child.set_mode(mode);
        }
    }

    fn output_activation(&self) -> Option<Activation> {
        self.children.last().and_then(|c| c.output_activation())
    }

    fn children(&self) -> Vec<&dyn Module> {
        self.children.iter().map(|c| c.as_ref()).collect()
    }

    fn snapshot(&self) -> Vec<LayerSnapshot> {
        self.children.iter().flat_map(|c| c.snapshot()).collect()
    }
}

/// Build a [`Sequential`] from modules, boxing each one.
///
/// ```rust
/// use mini_dl::activation::{relu, sigmoid};
/// use mini_dl::{Linear, sequential};
///
/// # fn main() -> mini_dl::Result<()> {
/// let model = sequential![
///     Linear::new_with_seed("fc1", 2, 6, 0)?,
///     relu(),
///     Linear::new_with_seed("fc2", 6, 1, 1)?,
///     sigmoid(),
/// ]?;
/// assert_eq!(model.len(), 4);
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! sequential {
    ($($layer:expr),* $(,)?) => {
        $crate::Sequential::new(vec![
            $(Box::new($layer) as Box<dyn $crate::Module>),*
        ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::{ActivationLayer, relu, sigmoid, tanh};
    use crate::Linear;

    fn lin(name: &str, i: usize, o: usize, seed: u64) -> Linear {
        Linear::new_with_seed(name, i, o, seed).unwrap()
    }

    #[test]
    fn duplicate_default_names_are_rejected() {
        let err = sequential![
            lin("fc1", 2, 6, 0),
            relu(),
            lin("fc2", 6, 2, 1),
            sigmoid(),
            lin("fc3", 2, 1, 2),
            sigmoid(),
        ]
        .err()
        .unwrap();
        assert!(err.is_contract());
        assert!(err.to_string().contains("sigmoid"));
    }

    #[test]
    fn explicit_name_resolves_collision() {
        let model = sequential![
            lin("fc1", 2, 6, 0),
            relu(),
            lin("fc2", 6, 2, 1),
            tanh(),
            lin("fc3", 2, 1, 2),
            ActivationLayer::named("tanh2", Activation::Tanh),
        ];
        assert!(model.is_ok());
    }

    #[test]
    fn backward_before_forward_fails() {
        let mut model = sequential![lin("fc1", 2, 3, 0), tanh()].unwrap();
        let err = model.backward(&Tensor::zeros(1, 3)).unwrap_err();
        assert!(err.is_contract());
    }

    #[test]
    fn mode_propagates_and_eval_keeps_saved_state() {
        let mut model = sequential![lin("fc1", 2, 3, 0), tanh(), lin("fc2", 3, 1, 1)].unwrap();
        let x = Tensor::from_rows(&[vec![0.1, 0.2], vec![0.3, -0.4]]).unwrap();
        model.forward(&x).unwrap();
        let before: Vec<Tensor> = model
            .children()
            .iter()
            .map(|c| c.saved_for_backward().unwrap().clone())
            .collect();

        model.eval();
        assert!(model.children().iter().all(|c| c.mode() == Mode::Eval));
        model.forward(&Tensor::zeros(5, 2)).unwrap();

        let after: Vec<Tensor> = model
            .children()
            .iter()
            .map(|c| c.saved_for_backward().unwrap().clone())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn output_activation_comes_from_last_child() {
        let with_sigmoid = sequential![lin("fc1", 2, 1, 0), sigmoid()].unwrap();
        assert_eq!(with_sigmoid.output_activation(), Some(Activation::Sigmoid));

        let without = sequential![lin("fc1", 2, 3, 0), relu(), lin("fc2", 3, 1, 1)].unwrap();
        assert_eq!(without.output_activation(), None);
    }

    #[test]
    fn parameters_are_collected_in_order() {
        let model = sequential![lin("fc1", 2, 3, 0), relu(), lin("fc2", 3, 1, 1)].unwrap();
        let names: Vec<String> = model.parameters().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["fc1.weight", "fc1.bias", "fc2.weight", "fc2.bias"]);
        assert_eq!(model.num_parameters(), 6 + 3 + 3 + 1);
    }
}
