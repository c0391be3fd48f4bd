//! The differentiable operation abstraction.
//!
//! # Operations
//!
//! An [`Op`] is an opaque differentiable primitive over a fixed number of
//! input values and output slots. The engine never inspects how an
//! operation computes; it only calls [`Op::apply_with_grad`] and later
//! invokes the returned [`GradFn`] exactly once per backward traversal.
//!
//! The gradient function receives one `Option<V>` per output slot. `Some`
//! carries the accumulated upstream gradient for that slot; `None` means
//! the slot is the final differentiated quantity and no explicit gradient
//! was supplied, so the operation must treat it as the identity seed
//! (see [`Accumulate::unit`](crate::accumulate::Accumulate::unit)).
//!
//! Operations must be pure: identical inputs yield identical outputs and
//! identical gradient contributions.
//!
//! [`op1`], [`op2`] and [`op3`] build operations directly from functions
//! that return `(output, gradient closure)` pairs, which is the natural
//! shape for hand-written primitives. For numeric primitives with named
//! derivatives, see [`crate::num`].

use smallvec::{SmallVec, smallvec};

/// Fixed-arity collection of values, one per slot.
pub type Values<V> = SmallVec<[V; 2]>;

/// One-shot joint gradient function of a node: maps the accumulated
/// upstream gradient of every output slot to one gradient per input slot.
pub type GradFn<V> = Box<dyn FnOnce(&[Option<V>]) -> Values<V>>;

/// Gradient closure of a single-output, single-input operation.
pub type GradFn1<V> = Box<dyn FnOnce(Option<&V>) -> V>;

/// Gradient closure of a single-output, two-input operation.
pub type GradFn2<V> = Box<dyn FnOnce(Option<&V>) -> (V, V)>;

/// Gradient closure of a single-output, three-input operation.
pub type GradFn3<V> = Box<dyn FnOnce(Option<&V>) -> (V, V, V)>;

/// A differentiable primitive: forward evaluation plus a vector–Jacobian
/// product, over `inputs()` input slots and `outputs()` output slots.
pub trait Op<V> {
    /// Number of input slots the operation consumes.
    fn inputs(&self) -> usize;

    /// Number of output slots the operation produces.
    fn outputs(&self) -> usize {
        1
    }

    /// Short name used in log output and panic messages.
    fn name(&self) -> &'static str {
        "op"
    }

    /// Forward evaluation only.
    fn apply(&self, inputs: &[V]) -> Values<V> {
        self.apply_with_grad(inputs).0
    }

    /// Forward evaluation plus the gradient function for this application.
    ///
    /// # Panics
    ///
    /// Panics if `inputs.len()` does not match [`Op::inputs`].
    fn apply_with_grad(&self, inputs: &[V]) -> (Values<V>, GradFn<V>);
}

/// Operation built from a one-argument function. See [`op1`].
pub struct Op1<F> {
    name: &'static str,
    run: F,
}

impl<F> Op1<F> {
    /// Replaces the name reported by [`Op::name`].
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

/// Builds an operation from a one-argument function returning the output
/// together with its gradient closure.
pub fn op1<V, F>(run: F) -> Op1<F>
where
    F: Fn(&V) -> (V, GradFn1<V>),
{
    Op1 { name: "op1", run }
}

impl<V: 'static, F> Op<V> for Op1<F>
where
    F: Fn(&V) -> (V, GradFn1<V>),
{
    fn inputs(&self) -> usize {
        1
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn apply_with_grad(&self, inputs: &[V]) -> (Values<V>, GradFn<V>) {
        assert_eq!(
            inputs.len(),
            1,
            "operation `{}` expects 1 argument, got {}",
            self.name,
            inputs.len()
        );
        let (out, back) = (self.run)(&inputs[0]);
        (
            smallvec![out],
            Box::new(move |upstream: &[Option<V>]| smallvec![back(upstream[0].as_ref())]),
        )
    }
}

/// Operation built from a two-argument function. See [`op2`].
pub struct Op2<F> {
    name: &'static str,
    run: F,
}

impl<F> Op2<F> {
    /// Replaces the name reported by [`Op::name`].
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

/// Builds an operation from a two-argument function returning the output
/// together with its gradient closure.
pub fn op2<V, F>(run: F) -> Op2<F>
where
    F: Fn(&V, &V) -> (V, GradFn2<V>),
{
    Op2 { name: "op2", run }
}

impl<V: 'static, F> Op<V> for Op2<F>
where
    F: Fn(&V, &V) -> (V, GradFn2<V>),
{
    fn inputs(&self) -> usize {
        2
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn apply_with_grad(&self, inputs: &[V]) -> (Values<V>, GradFn<V>) {
        assert_eq!(
            inputs.len(),
            2,
            "operation `{}` expects 2 arguments, got {}",
            self.name,
            inputs.len()
        );
        let (out, back) = (self.run)(&inputs[0], &inputs[1]);
        (
            smallvec![out],
            Box::new(move |upstream: &[Option<V>]| {
                let (da, db) = back(upstream[0].as_ref());
                smallvec![da, db]
            }),
        )
    }
}

/// Operation built from a three-argument function. See [`op3`].
pub struct Op3<F> {
    name: &'static str,
    run: F,
}

impl<F> Op3<F> {
    /// Replaces the name reported by [`Op::name`].
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

/// Builds an operation from a three-argument function returning the output
/// together with its gradient closure.
pub fn op3<V, F>(run: F) -> Op3<F>
where
    F: Fn(&V, &V, &V) -> (V, GradFn3<V>),
{
    Op3 { name: "op3", run }
}

impl<V: 'static, F> Op<V> for Op3<F>
where
    F: Fn(&V, &V, &V) -> (V, GradFn3<V>),
{
    fn inputs(&self) -> usize {
        3
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn apply_with_grad(&self, inputs: &[V]) -> (Values<V>, GradFn<V>) {
        assert_eq!(
            inputs.len(),
            3,
            "operation `{}` expects 3 arguments, got {}",
            self.name,
            inputs.len()
        );
        let (out, back) = (self.run)(&inputs[0], &inputs[1], &inputs[2]);
        (
            smallvec![out],
            Box::new(move |upstream: &[Option<V>]| {
                let (da, db, dc) = back(upstream[0].as_ref());
                smallvec![da, db, dc]
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op1_wires_forward_and_backward() {
        let double = op1(|x: &f64| {
            let x = *x;
            (
                x * 2.0,
                Box::new(move |up: Option<&f64>| up.copied().unwrap_or(1.0) * 2.0) as GradFn1<f64>,
            )
        })
        .named("double");

        assert_eq!(double.name(), "double");
        let (out, back) = double.apply_with_grad(&[3.0]);
        assert_eq!(out[0], 6.0);
        let grads = back(&[Some(5.0)]);
        assert_eq!(grads[0], 10.0);
    }

    #[test]
    fn op2_reports_both_input_gradients() {
        let mul = op2(|a: &f64, b: &f64| {
            let (a, b) = (*a, *b);
            (
                a * b,
                Box::new(move |up: Option<&f64>| {
                    let g = up.copied().unwrap_or(1.0);
                    (g * b, g * a)
                }) as GradFn2<f64>,
            )
        });

        let (out, back) = mul.apply_with_grad(&[2.0, 3.0]);
        assert_eq!(out[0], 6.0);
        assert_eq!(back(&[None]).as_slice(), &[3.0, 2.0]);
    }

    #[test]
    fn op3_reports_all_three_gradients() {
        let fma = op3(|a: &f64, b: &f64, c: &f64| {
            let (a, b, c) = (*a, *b, *c);
            (
                a * b + c,
                Box::new(move |up: Option<&f64>| {
                    let g = up.copied().unwrap_or(1.0);
                    (g * b, g * a, g)
                }) as GradFn3<f64>,
            )
        })
        .named("fma");

        let (out, back) = fma.apply_with_grad(&[2.0, 3.0, 4.0]);
        assert_eq!(out[0], 10.0);
        assert_eq!(back(&[Some(2.0)]).as_slice(), &[6.0, 4.0, 2.0]);
    }

    #[test]
    fn arity_mismatch_panics() {
        let op = op1(|x: &f64| (*x, Box::new(move |_: Option<&f64>| 1.0) as GradFn1<f64>));
        let result = std::panic::catch_unwind(|| {
            op.apply(&[1.0, 2.0]);
        });
        assert!(result.is_err());
    }
}
