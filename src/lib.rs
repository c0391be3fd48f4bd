//! pullback: a reverse-mode automatic differentiation engine in Rust.
//!
//! Builds the dependency graph of a computation dynamically while the
//! forward pass runs, then propagates gradients backward through it with
//! memoized, fan-out-aware pulls. Gradients are combined under a pluggable
//! accumulation policy, so the engine differentiates any value type that
//! forms a commutative monoid, not just floats.
//!
//! # Features
//!
//! - Dynamic graph construction: operations applied to tracked references
//!   wire the graph as a side effect of ordinary forward evaluation.
//! - Inline expressions: single-output applications allocate nothing until
//!   first consumed, then promote to one shared node for all use sites.
//! - Memoized backward pass: every node's joint gradient function runs at
//!   most once per traversal, regardless of fan-out.
//! - Pluggable accumulation ([`Accumulate`]): scalars, tuples, or any
//!   user-supplied monoid.
//! - Sub-graph composition ([`compose`]): nest an entire differentiation
//!   pass inside another graph as a single opaque operation.
//!
//! # Modules
//!
//! - [`accumulate`] — The gradient accumulation policy.
//! - [`op`] — The differentiable operation abstraction and constructors.
//! - [`num`] — Ready-made numeric primitives.
//! - [`graph`] — Forward-pass graph construction.
//! - [`tape`] — The sealed graph and its backward traversal.
//! - [`compose`] — Nesting, splitting and joining sub-computations.
//!
//! # Example
//!
//! ```rust
//! use pullback::{differentiate, num};
//!
//! // f(x, y) = (x + y)², at x = 3, y = 4.
//! let (value, grads) = differentiate(vec![3.0_f64, 4.0], |g, xs| {
//!     let sum = g.apply(num::add(), &[xs[0].clone(), xs[1].clone()]);
//!     g.apply(num::square(), &[sum])
//! });
//! assert_eq!(value, 49.0);
//! assert_eq!(grads, vec![14.0, 14.0]);
//! ```

pub mod accumulate;
pub mod compose;
pub mod graph;
pub mod num;
pub mod op;
pub mod tape;

pub use accumulate::Accumulate;
pub use compose::{NestedGradFn, join, nested, run_nested, split};
pub use graph::{Graph, Ref};
pub use op::{GradFn, GradFn1, GradFn2, GradFn3, Op, Values, op1, op2, op3};
pub use tape::Tape;

/// Differentiates a computation over `inputs`, returning the output value
/// together with one gradient per input, positionally aligned.
///
/// The builder closure receives the graph and one tracked reference per
/// input, and returns the reference to differentiate. The output is seeded
/// with the identity gradient; use [`differentiate_with`] to supply one.
pub fn differentiate<V, F>(inputs: Vec<V>, build: F) -> (V, Vec<V>)
where
    V: Accumulate + 'static,
    F: for<'g> FnOnce(&mut Graph<'g, V>, &[Ref<'g, V>]) -> Ref<'g, V>,
{
    let (value, tape) = graph::run_forward(inputs, build);
    let grads = tape.backward(None);
    (value, grads)
}

/// Like [`differentiate`], but seeds the output with an explicit upstream
/// gradient instead of the identity.
pub fn differentiate_with<V, F>(inputs: Vec<V>, seed: V, build: F) -> (V, Vec<V>)
where
    V: Accumulate + 'static,
    F: for<'g> FnOnce(&mut Graph<'g, V>, &[Ref<'g, V>]) -> Ref<'g, V>,
{
    let (value, tape) = graph::run_forward(inputs, build);
    let grads = tape.backward(Some(seed));
    (value, grads)
}

/// Runs the forward pass only and discards the graph.
pub fn eval_only<V, F>(inputs: Vec<V>, build: F) -> V
where
    V: Accumulate + 'static,
    F: for<'g> FnOnce(&mut Graph<'g, V>, &[Ref<'g, V>]) -> Ref<'g, V>,
{
    graph::run_forward(inputs, build).0
}

/// Differentiates a computation and returns only the input gradients.
pub fn gradient<V, F>(inputs: Vec<V>, build: F) -> Vec<V>
where
    V: Accumulate + 'static,
    F: for<'g> FnOnce(&mut Graph<'g, V>, &[Ref<'g, V>]) -> Ref<'g, V>,
{
    differentiate(inputs, build).1
}
