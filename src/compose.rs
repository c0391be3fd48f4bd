//! Sub-graph composition drivers.
//!
//! # Nesting Differentiation Passes
//!
//! [`run_nested`] builds an entirely independent graph over its own input
//! tuple, runs the forward pass, and hands back the result together with a
//! one-shot gradient closure over that graph. Wrapping the pair in an
//! operation ([`nested`]) splices the whole sub-computation into an outer
//! graph as a single node, with neither graph's internals leaking into the
//! other.
//!
//! [`split`] and [`join`] decompose an aggregate value into independently
//! tracked parts and reassemble it, from a manually supplied bidirectional
//! mapping. Together with [`nested`] they cover running arbitrary user
//! logic against extracted fields of a value.

use smallvec::{SmallVec, smallvec};

use crate::accumulate::Accumulate;
use crate::graph::{Graph, Ref, run_forward};
use crate::op::{GradFn, Op, Values};

/// One-shot gradient closure over a nested graph: feeds an output gradient
/// backward through it, exactly once. `None` means the identity seed.
pub type NestedGradFn<V> = Box<dyn FnOnce(Option<&V>) -> Vec<V>>;

/// Builds and evaluates an independent graph over `inputs`, returning the
/// forward result and the gradient closure of that nested pass.
pub fn run_nested<V, F>(inputs: Vec<V>, build: F) -> (V, NestedGradFn<V>)
where
    V: Accumulate + 'static,
    F: for<'g> FnOnce(&mut Graph<'g, V>, &[Ref<'g, V>]) -> Ref<'g, V>,
{
    let (value, tape) = run_forward(inputs, build);
    (value, Box::new(move |seed| tape.backward(seed.cloned())))
}

/// A self-contained differentiable sub-computation packaged as a single
/// operation. See [`nested`].
pub struct Nested<F> {
    input_count: usize,
    name: &'static str,
    build: F,
}

impl<F> Nested<F> {
    /// Replaces the name reported by [`Op::name`].
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

/// Wraps a graph-building closure over `input_count` values as an
/// operation. Each application runs its own nested forward pass; the
/// gradient function runs the nested backward pass, once.
pub fn nested<V, F>(input_count: usize, build: F) -> Nested<F>
where
    V: Accumulate + 'static,
    F: for<'g> Fn(&mut Graph<'g, V>, &[Ref<'g, V>]) -> Ref<'g, V>,
{
    Nested {
        input_count,
        name: "nested",
        build,
    }
}

impl<V, F> Op<V> for Nested<F>
where
    V: Accumulate + 'static,
    F: for<'g> Fn(&mut Graph<'g, V>, &[Ref<'g, V>]) -> Ref<'g, V>,
{
    fn inputs(&self) -> usize {
        self.input_count
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn apply_with_grad(&self, inputs: &[V]) -> (Values<V>, GradFn<V>) {
        let (value, grad) = run_nested(inputs.to_vec(), &self.build);
        (
            smallvec![value],
            Box::new(move |upstream: &[Option<V>]| {
                SmallVec::from_vec(grad(upstream[0].as_ref()))
            }),
        )
    }
}

/// Decomposes an aggregate into independently tracked parts. See [`split`].
pub struct Split<S, J> {
    parts: usize,
    split: S,
    join: J,
}

/// Builds a one-input, `parts`-output operation from a manually supplied
/// bidirectional mapping: `split` extracts the parts of the aggregate, and
/// `join` reassembles the parts' gradients into one aggregate gradient.
///
/// `join` receives one `Option<V>` per part; `None` marks a part that was
/// the declared output itself and must be treated as the identity
/// gradient, while an unconsumed part arrives as an explicit zero.
pub fn split<V, S, J>(parts: usize, split: S, join: J) -> Split<S, J>
where
    S: Fn(&V) -> Values<V>,
    J: Fn(&[Option<V>]) -> V + Clone + 'static,
{
    Split { parts, split, join }
}

impl<V, S, J> Op<V> for Split<S, J>
where
    V: Accumulate + 'static,
    S: Fn(&V) -> Values<V>,
    J: Fn(&[Option<V>]) -> V + Clone + 'static,
{
    fn inputs(&self) -> usize {
        1
    }

    fn outputs(&self) -> usize {
        self.parts
    }

    fn name(&self) -> &'static str {
        "split"
    }

    fn apply_with_grad(&self, inputs: &[V]) -> (Values<V>, GradFn<V>) {
        assert_eq!(
            inputs.len(),
            1,
            "split expects 1 argument, got {}",
            inputs.len()
        );
        let parts = (self.split)(&inputs[0]);
        assert_eq!(
            parts.len(),
            self.parts,
            "split produced {} parts, declared {}",
            parts.len(),
            self.parts
        );
        let join = self.join.clone();
        (
            parts,
            Box::new(move |upstream: &[Option<V>]| smallvec![join(upstream)]),
        )
    }
}

/// Reassembles independently tracked parts into an aggregate. See [`join`].
pub struct Join<J, S> {
    parts: usize,
    join: J,
    split: S,
}

/// Builds a `parts`-input, one-output operation from a manually supplied
/// bidirectional mapping: `join` assembles the aggregate from its parts,
/// and `split` scatters the aggregate's upstream gradient (`None` meaning
/// the identity) back onto the parts.
pub fn join<V, J, S>(parts: usize, join: J, split: S) -> Join<J, S>
where
    J: Fn(&[V]) -> V,
    S: Fn(Option<&V>) -> Values<V> + Clone + 'static,
{
    Join { parts, join, split }
}

impl<V, J, S> Op<V> for Join<J, S>
where
    V: Accumulate + 'static,
    J: Fn(&[V]) -> V,
    S: Fn(Option<&V>) -> Values<V> + Clone + 'static,
{
    fn inputs(&self) -> usize {
        self.parts
    }

    fn name(&self) -> &'static str {
        "join"
    }

    fn apply_with_grad(&self, inputs: &[V]) -> (Values<V>, GradFn<V>) {
        assert_eq!(
            inputs.len(),
            self.parts,
            "join expects {} arguments, got {}",
            self.parts,
            inputs.len()
        );
        let value = (self.join)(inputs);
        let split = self.split.clone();
        (
            smallvec![value],
            Box::new(move |upstream: &[Option<V>]| split(upstream[0].as_ref())),
        )
    }
}
