//! Ready-made numeric operations.
//!
//! # Numeric Primitives
//!
//! Differentiable arithmetic for value types with ordinary operator
//! support, plus [`unary`] and [`binary`] constructors that build an
//! operation from a forward function and its named derivatives — the
//! chain rule against the upstream gradient is applied here, so the
//! derivative closures only state the local Jacobian entries.
//!
//! Transcendental operations are bounded by [`num_traits::Float`] and work
//! for `f32` and `f64` alike.

use std::ops::{Add, Mul, Neg, Sub};

use num_traits::Float;
use smallvec::smallvec;

use crate::accumulate::Accumulate;
use crate::op::{GradFn, Op, Values};

/// Operation built from a named derivative. See [`unary`].
pub struct Unary<F, D> {
    name: &'static str,
    forward: F,
    derivative: D,
}

/// Builds a one-argument operation from a forward function and its
/// derivative; the gradient is `upstream * derivative(x)`, with a missing
/// upstream treated as the identity.
pub fn unary<V, F, D>(name: &'static str, forward: F, derivative: D) -> Unary<F, D>
where
    F: Fn(&V) -> V,
    D: Fn(&V) -> V,
{
    Unary {
        name,
        forward,
        derivative,
    }
}

impl<V, F, D> Op<V> for Unary<F, D>
where
    V: Accumulate + Mul<Output = V> + 'static,
    F: Fn(&V) -> V,
    D: Fn(&V) -> V,
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
        let out = (self.forward)(&inputs[0]);
        // The local derivative is evaluated at forward time; the gradient
        // closure only has to close over it.
        let local = (self.derivative)(&inputs[0]);
        (
            smallvec![out],
            Box::new(move |upstream: &[Option<V>]| {
                let g = upstream[0].clone().unwrap_or_else(V::unit);
                smallvec![g * local]
            }),
        )
    }
}

/// Operation built from two named partial derivatives. See [`binary`].
pub struct Binary<F, Da, Db> {
    name: &'static str,
    forward: F,
    da: Da,
    db: Db,
}

/// Builds a two-argument operation from a forward function and its two
/// partial derivatives, chain-ruled against the upstream gradient.
pub fn binary<V, F, Da, Db>(name: &'static str, forward: F, da: Da, db: Db) -> Binary<F, Da, Db>
where
    F: Fn(&V, &V) -> V,
    Da: Fn(&V, &V) -> V,
    Db: Fn(&V, &V) -> V,
{
    Binary {
        name,
        forward,
        da,
        db,
    }
}

impl<V, F, Da, Db> Op<V> for Binary<F, Da, Db>
where
    V: Accumulate + Mul<Output = V> + 'static,
    F: Fn(&V, &V) -> V,
    Da: Fn(&V, &V) -> V,
    Db: Fn(&V, &V) -> V,
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
        let out = (self.forward)(&inputs[0], &inputs[1]);
        let la = (self.da)(&inputs[0], &inputs[1]);
        let lb = (self.db)(&inputs[0], &inputs[1]);
        (
            smallvec![out],
            Box::new(move |upstream: &[Option<V>]| {
                let g = upstream[0].clone().unwrap_or_else(V::unit);
                smallvec![g.clone() * la, g * lb]
            }),
        )
    }
}

struct AddOp;

impl<V> Op<V> for AddOp
where
    V: Accumulate + Add<Output = V> + 'static,
{
    fn inputs(&self) -> usize {
        2
    }

    fn name(&self) -> &'static str {
        "add"
    }

    fn apply_with_grad(&self, inputs: &[V]) -> (Values<V>, GradFn<V>) {
        let out = inputs[0].clone() + inputs[1].clone();
        (
            smallvec![out],
            Box::new(|upstream: &[Option<V>]| {
                let g = upstream[0].clone().unwrap_or_else(V::unit);
                smallvec![g.clone(), g]
            }),
        )
    }
}

/// Addition; the upstream gradient passes through to both operands.
pub fn add<V>() -> impl Op<V>
where
    V: Accumulate + Add<Output = V> + 'static,
{
    AddOp
}

struct SubOp;

impl<V> Op<V> for SubOp
where
    V: Accumulate + Sub<Output = V> + Neg<Output = V> + 'static,
{
    fn inputs(&self) -> usize {
        2
    }

    fn name(&self) -> &'static str {
        "sub"
    }

    fn apply_with_grad(&self, inputs: &[V]) -> (Values<V>, GradFn<V>) {
        let out = inputs[0].clone() - inputs[1].clone();
        (
            smallvec![out],
            Box::new(|upstream: &[Option<V>]| {
                let g = upstream[0].clone().unwrap_or_else(V::unit);
                smallvec![g.clone(), -g]
            }),
        )
    }
}

/// Subtraction; the subtrahend's gradient is negated.
pub fn sub<V>() -> impl Op<V>
where
    V: Accumulate + Sub<Output = V> + Neg<Output = V> + 'static,
{
    SubOp
}

struct NegOp;

impl<V> Op<V> for NegOp
where
    V: Accumulate + Neg<Output = V> + 'static,
{
    fn inputs(&self) -> usize {
        1
    }

    fn name(&self) -> &'static str {
        "neg"
    }

    fn apply_with_grad(&self, inputs: &[V]) -> (Values<V>, GradFn<V>) {
        let out = -inputs[0].clone();
        (
            smallvec![out],
            Box::new(|upstream: &[Option<V>]| {
                let g = upstream[0].clone().unwrap_or_else(V::unit);
                smallvec![-g]
            }),
        )
    }
}

/// Negation.
pub fn neg<V>() -> impl Op<V>
where
    V: Accumulate + Neg<Output = V> + 'static,
{
    NegOp
}

struct MulOp;

impl<V> Op<V> for MulOp
where
    V: Accumulate + Mul<Output = V> + 'static,
{
    fn inputs(&self) -> usize {
        2
    }

    fn name(&self) -> &'static str {
        "mul"
    }

    fn apply_with_grad(&self, inputs: &[V]) -> (Values<V>, GradFn<V>) {
        let (a, b) = (inputs[0].clone(), inputs[1].clone());
        let out = a.clone() * b.clone();
        (
            smallvec![out],
            Box::new(move |upstream: &[Option<V>]| {
                let g = upstream[0].clone().unwrap_or_else(V::unit);
                smallvec![g.clone() * b, g * a]
            }),
        )
    }
}

/// Multiplication; each operand's gradient is the upstream times the other
/// operand's forward value.
pub fn mul<V>() -> impl Op<V>
where
    V: Accumulate + Mul<Output = V> + 'static,
{
    MulOp
}

/// Division over floats.
pub fn div<V>() -> impl Op<V>
where
    V: Accumulate + Float + 'static,
{
    binary(
        "div",
        |a: &V, b: &V| *a / *b,
        |_, b| b.recip(),
        |a, b| -(*a / (*b * *b)),
    )
}

/// Squaring, as a primitive with derivative `2x`.
pub fn square<V>() -> impl Op<V>
where
    V: Accumulate + Add<Output = V> + Mul<Output = V> + 'static,
{
    unary(
        "square",
        |x: &V| x.clone() * x.clone(),
        |x| x.clone() + x.clone(),
    )
}

/// Reciprocal, derivative `-1/x²`.
pub fn recip<V>() -> impl Op<V>
where
    V: Accumulate + Float + 'static,
{
    unary("recip", |x: &V| x.recip(), |x| -(x.recip() * x.recip()))
}

/// Sine.
pub fn sin<V>() -> impl Op<V>
where
    V: Accumulate + Float + 'static,
{
    unary("sin", |x: &V| x.sin(), |x| x.cos())
}

/// Cosine.
pub fn cos<V>() -> impl Op<V>
where
    V: Accumulate + Float + 'static,
{
    unary("cos", |x: &V| x.cos(), |x| -x.sin())
}

/// Exponential, its own derivative.
pub fn exp<V>() -> impl Op<V>
where
    V: Accumulate + Float + 'static,
{
    unary("exp", |x: &V| x.exp(), |x| x.exp())
}

/// Natural logarithm, derivative `1/x`.
pub fn ln<V>() -> impl Op<V>
where
    V: Accumulate + Float + 'static,
{
    unary("ln", |x: &V| x.ln(), |x| x.recip())
}

/// Square root, derivative `1/(2√x)`.
pub fn sqrt<V>() -> impl Op<V>
where
    V: Accumulate + Float + 'static,
{
    unary("sqrt", |x: &V| x.sqrt(), |x| {
        (x.sqrt() + x.sqrt()).recip()
    })
}
