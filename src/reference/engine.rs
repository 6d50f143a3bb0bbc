//! Scalar reverse-mode automatic differentiation.
//!
//! Every [`Var`] is a node of a dynamically built graph holding an `f64` value, its
//! accumulated gradient and, for non-leaf nodes, its parents together with the local
//! derivative `d(self)/d(parent)`. [`Var::backward`] walks the graph in reverse
//! topological order and applies the chain rule.
//!
//! Nodes are numbered at creation and a node is always created after its parents, so
//! sorting the reachable nodes by decreasing id is a valid reverse topological order.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

struct Node {
    id: usize,
    value: f64,
    grad: f64,
    requires_grad: bool,
    parents: Vec<(Var, f64)>,
}

#[derive(Clone)]
pub struct Var(Rc<RefCell<Node>>);

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0.borrow();
        f.debug_struct("Var")
            .field("value", &n.value)
            .field("grad", &n.grad)
            .finish()
    }
}

impl Var {
    fn with_parents(value: f64, parents: Vec<(Var, f64)>) -> Var {
        let parents: Vec<(Var, f64)> = parents
            .into_iter()
            .filter(|(p, _)| p.requires_grad())
            .collect();
        let requires_grad = !parents.is_empty();
        Var(Rc::new(RefCell::new(Node {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            value,
            grad: 0.0,
            requires_grad,
            parents,
        })))
    }

    fn leaf(value: f64, requires_grad: bool) -> Var {
        Var(Rc::new(RefCell::new(Node {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            value,
            grad: 0.0,
            requires_grad,
            parents: Vec::new(),
        })))
    }

    /// A trainable leaf.
    pub fn parameter(value: f64) -> Var {
        Var::leaf(value, true)
    }

    /// A leaf that never receives a gradient (inputs, targets).
    pub fn constant(value: f64) -> Var {
        Var::leaf(value, false)
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.0.borrow().value
    }

    #[inline]
    pub fn grad(&self) -> f64 {
        self.0.borrow().grad
    }

    #[inline]
    pub fn requires_grad(&self) -> bool {
        self.0.borrow().requires_grad
    }

    pub fn set_value(&self, value: f64) {
        self.0.borrow_mut().value = value;
    }

    pub fn zero_grad(&self) {
        self.0.borrow_mut().grad = 0.0;
    }

    pub fn add(&self, other: &Var) -> Var {
        Var::with_parents(
            self.value() + other.value(),
            vec![(self.clone(), 1.0), (other.clone(), 1.0)],
        )
    }

    pub fn sub(&self, other: &Var) -> Var {
        Var::with_parents(
            self.value() - other.value(),
            vec![(self.clone(), 1.0), (other.clone(), -1.0)],
        )
    }

    pub fn mul(&self, other: &Var) -> Var {
        let (a, b) = (self.value(), other.value());
        Var::with_parents(a * b, vec![(self.clone(), b), (other.clone(), a)])
    }

    pub fn scale(&self, k: f64) -> Var {
        Var::with_parents(self.value() * k, vec![(self.clone(), k)])
    }

    pub fn neg(&self) -> Var {
        self.scale(-1.0)
    }

    pub fn exp(&self) -> Var {
        let y = self.value().exp();
        Var::with_parents(y, vec![(self.clone(), y)])
    }

    pub fn ln(&self) -> Var {
        let x = self.value();
        Var::with_parents(x.ln(), vec![(self.clone(), 1.0 / x)])
    }

    /// `max(ln(x), min)`; the gradient is zero where the clamp is active.
    pub fn ln_clamped(&self, min: f64) -> Var {
        let x = self.value();
        let y = x.ln();
        if y > min {
            Var::with_parents(y, vec![(self.clone(), 1.0 / x)])
        } else {
            Var::with_parents(min, vec![(self.clone(), 0.0)])
        }
    }

    /// `ln(1 + x)`.
    pub fn ln_1p(&self) -> Var {
        let x = self.value();
        Var::with_parents(x.ln_1p(), vec![(self.clone(), 1.0 / (1.0 + x))])
    }

    pub fn abs(&self) -> Var {
        let x = self.value();
        let d = if x > 0.0 {
            1.0
        } else if x < 0.0 {
            -1.0
        } else {
            0.0
        };
        Var::with_parents(x.abs(), vec![(self.clone(), d)])
    }

    pub fn powi(&self, n: i32) -> Var {
        let x = self.value();
        Var::with_parents(
            x.powi(n),
            vec![(self.clone(), f64::from(n) * x.powi(n - 1))],
        )
    }

    pub fn relu(&self) -> Var {
        let x = self.value();
        let (y, d) = if x > 0.0 { (x, 1.0) } else { (0.0, 0.0) };
        Var::with_parents(y, vec![(self.clone(), d)])
    }

    pub fn tanh(&self) -> Var {
        let y = self.value().tanh();
        Var::with_parents(y, vec![(self.clone(), 1.0 - y * y)])
    }

    pub fn sigmoid(&self) -> Var {
        let x = self.value();
        let y = if x >= 0.0 {
            1.0 / (1.0 + (-x).exp())
        } else {
            let z = x.exp();
            z / (1.0 + z)
        };
        Var::with_parents(y, vec![(self.clone(), y * (1.0 - y))])
    }

    /// `sum_i w_i * x_i + b` as a single node.
    ///
    /// Panics if `weights` and `inputs` differ in length.
    pub fn affine(weights: &[Var], inputs: &[Var], bias: &Var) -> Var {
        assert_eq!(
            weights.len(),
            inputs.len(),
            "affine: {} weights for {} inputs",
            weights.len(),
            inputs.len()
        );

        let mut value = bias.value();
        let mut parents = Vec::with_capacity(2 * weights.len() + 1);
        for (w, x) in weights.iter().zip(inputs) {
            let (wv, xv) = (w.value(), x.value());
            value += wv * xv;
            parents.push((w.clone(), xv));
            parents.push((x.clone(), wv));
        }
        parents.push((bias.clone(), 1.0));
        Var::with_parents(value, parents)
    }

    /// Sum of `terms` as a single node. The sum of nothing is the constant `0`.
    pub fn sum(terms: &[Var]) -> Var {
        let value = terms.iter().map(Var::value).sum();
        Var::with_parents(value, terms.iter().map(|t| (t.clone(), 1.0)).collect())
    }

    /// Arithmetic mean of `terms`.
    pub fn mean(terms: &[Var]) -> Var {
        let n = terms.len().max(1) as f64;
        let value = terms.iter().map(Var::value).sum::<f64>() / n;
        Var::with_parents(
            value,
            terms.iter().map(|t| (t.clone(), 1.0 / n)).collect(),
        )
    }

    /// Accumulates `d(self)/d(v)` into the gradient of every node `v` reachable from
    /// `self`.
    ///
    /// Only this call's contributions flow through the graph, so calling it twice on the
    /// same graph doubles every gradient.
    pub fn backward(&self) {
        let mut order = self.reachable();
        order.sort_unstable_by_key(|v| std::cmp::Reverse(v.id()));

        let mut pending: HashMap<usize, f64> = HashMap::with_capacity(order.len());
        pending.insert(self.id(), 1.0);
        for v in &order {
            let mut node = v.0.borrow_mut();
            let g = pending.remove(&node.id).unwrap_or(0.0);
            if g == 0.0 {
                continue;
            }
            node.grad += g;
            for (parent, local) in &node.parents {
                *pending.entry(parent.id()).or_insert(0.0) += g * local;
            }
        }
    }

    fn id(&self) -> usize {
        self.0.borrow().id
    }

    fn reachable(&self) -> Vec<Var> {
        let mut seen: HashSet<usize> = HashSet::new();
        seen.insert(self.id());
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(v) = stack.pop() {
            for (parent, _) in &v.0.borrow().parents {
                if seen.insert(parent.id()) {
                    stack.push(parent.clone());
                }
            }
            out.push(v);
        }
        out
    }
}

impl std::ops::Add for &Var {
    type Output = Var;

    fn add(self, rhs: &Var) -> Var {
        Var::add(self, rhs)
    }
}

impl std::ops::Sub for &Var {
    type Output = Var;

    fn sub(self, rhs: &Var) -> Var {
        Var::sub(self, rhs)
    }
}

impl std::ops::Mul for &Var {
    type Output = Var;

    fn mul(self, rhs: &Var) -> Var {
        Var::mul(self, rhs)
    }
}

impl std::ops::Neg for &Var {
    type Output = Var;

    fn neg(self) -> Var {
        Var::neg(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn product_rule_and_shared_nodes() {
        let x = Var::parameter(3.0);
        let y = Var::parameter(-2.0);
        // z = x*y + x*x
        let z = &(&x * &y) + &(&x * &x);
        z.backward();
        assert!(close(z.value(), 3.0));
        assert!(close(x.grad(), -2.0 + 6.0));
        assert!(close(y.grad(), 3.0));
    }

    #[test]
    fn repeated_backward_accumulates_once_per_call() {
        let x = Var::parameter(0.7);
        let y = x.scale(3.0).tanh();
        y.backward();
        let once = x.grad();
        y.backward();
        assert!(close(x.grad(), 2.0 * once), "{} vs {}", x.grad(), 2.0 * once);

        let w = Var::parameter(1.5);
        let z = Var::sum(&[&w * &w, w.exp()]);
        z.backward();
        z.backward();
        assert!(close(w.grad(), 2.0 * (2.0 * 1.5 + 1.5_f64.exp())));
    }

    #[test]
    fn shared_leaves_are_visited_once() {
        let w = Var::parameter(0.5);
        let terms: Vec<Var> = (0..100).map(|i| w.scale(f64::from(i))).collect();
        let total = Var::sum(&terms);
        // total, 100 scaled nodes, w
        assert_eq!(total.reachable().len(), 102);
    }

    #[test]
    fn constants_get_no_gradient() {
        let w = Var::parameter(2.0);
        let c = Var::constant(5.0);
        let out = &w * &c;
        out.backward();
        assert!(close(w.grad(), 5.0));
        assert!(close(c.grad(), 0.0));
        assert!(!Var::constant(1.0).add(&Var::constant(1.0)).requires_grad());
    }

    #[test]
    fn unary_derivatives() {
        let x = Var::parameter(0.3);
        x.tanh().backward();
        assert!(close(x.grad(), 1.0 - 0.3_f64.tanh().powi(2)));

        let x = Var::parameter(0.0);
        x.sigmoid().backward();
        assert!(close(x.grad(), 0.25));

        let x = Var::parameter(-1.5);
        x.relu().backward();
        assert!(close(x.grad(), 0.0));

        let x = Var::parameter(2.0);
        x.ln().exp().backward();
        assert!(close(x.grad(), 1.0));

        let x = Var::parameter(-4.0);
        x.abs().backward();
        assert!(close(x.grad(), -1.0));
    }

    #[test]
    fn clamped_log_stops_gradient() {
        let x = Var::parameter(0.0);
        let y = x.ln_clamped(-100.0);
        assert!(close(y.value(), -100.0));
        y.backward();
        assert!(close(x.grad(), 0.0));
    }

    #[test]
    fn affine_matches_expanded_graph() {
        let w = [Var::parameter(0.5), Var::parameter(-1.0)];
        let x = [Var::parameter(2.0), Var::parameter(3.0)];
        let b = Var::parameter(0.25);
        let y = Var::affine(&w, &x, &b);
        assert!(close(y.value(), 1.0 - 3.0 + 0.25));
        y.backward();
        assert!(close(w[0].grad(), 2.0));
        assert!(close(w[1].grad(), 3.0));
        assert!(close(x[0].grad(), 0.5));
        assert!(close(x[1].grad(), -1.0));
        assert!(close(b.grad(), 1.0));
    }

    #[test]
    fn gradients_accumulate_until_zeroed() {
        let x = Var::parameter(1.0);
        x.scale(3.0).backward();
        x.scale(3.0).backward();
        assert!(close(x.grad(), 6.0));
        x.zero_grad();
        assert!(close(x.grad(), 0.0));
    }

    #[test]
    fn mean_spreads_gradient_evenly() {
        let xs: Vec<Var> = (0..4).map(|i| Var::parameter(f64::from(i))).collect();
        let m = Var::mean(&xs);
        assert!(close(m.value(), 1.5));
        m.backward();
        assert!(xs.iter().all(|x| close(x.grad(), 0.25)));
    }
}
