//! Backward traversal: memoized gradient pulls over a sealed graph.
//!
//! # Pulling Gradients
//!
//! Once the forward pass is over, the graph is frozen into a [`Tape`]. The
//! traversal then *pulls*: the gradient of a value is the fold, under its
//! accumulation policy, of the contributions reported by every consumer
//! edge recorded during construction. Each node's joint gradient function
//! runs at most once per traversal — its result is cached — so a graph
//! with `V` nodes and `E` consumer edges costs exactly `O(V)` gradient
//! invocations and `O(E)` edge traversals regardless of fan-out.
//!
//! The declared output's fan-out record is marked terminal before the
//! pulls begin. A terminal slot without an explicit seed is forwarded to
//! the node's gradient function as `None`, meaning the identity gradient.

use std::mem;
use std::rc::Rc;

use log::{debug, trace};
use smallvec::SmallVec;

use crate::accumulate::Accumulate;
use crate::graph::{Edges, FanOut, Node, NodeId};
use crate::op::Values;

/// Where the session's declared output lives.
pub(crate) enum Root {
    /// One output slot of a materialized node.
    Node(NodeId, usize),
    /// A top-level input returned as-is (an identity computation).
    Input(usize),
    /// A constant: nothing to close off, every input gradient is zero.
    Detached,
}

/// A sealed graph, ready for exactly one backward traversal.
///
/// Produced by the forward pass; consumed by [`Tape::backward`]. All
/// mutable state here (fan-out records, gradient caches) lives and dies
/// with the differentiation call that created it.
pub struct Tape<V> {
    nodes: Vec<Node<V>>,
    inputs: Vec<FanOut<V>>,
    root: Root,
}

impl<V: Accumulate + 'static> Tape<V> {
    pub(crate) fn new(nodes: Vec<Node<V>>, inputs: Vec<FanOut<V>>, root: Root) -> Self {
        Tape {
            nodes,
            inputs,
            root,
        }
    }

    /// Runs the backward traversal once, returning one gradient per
    /// top-level input, positionally aligned with the input tuple.
    ///
    /// `seed` is the upstream gradient of the declared output; `None`
    /// means the identity gradient ([`Accumulate::unit`]).
    pub fn backward(mut self, seed: Option<V>) -> Vec<V> {
        debug!(
            "backward traversal over {} nodes, {} inputs",
            self.nodes.len(),
            self.inputs.len()
        );
        self.close_off(seed);
        let count = self.inputs.len();
        let mut grads = Vec::with_capacity(count);
        for index in 0..count {
            let record = mem::replace(&mut self.inputs[index], FanOut::Terminal(None));
            let grad = match record {
                // The input was returned as-is: the stored seed, or the
                // identity when none was given.
                FanOut::Terminal(seed) => seed.unwrap_or_else(V::unit),
                FanOut::Internal(edges) => self.sum_edges(edges),
            };
            grads.push(grad);
        }
        grads
    }

    /// Marks the declared output slot as the terminal of the traversal.
    fn close_off(&mut self, seed: Option<V>) {
        match self.root {
            Root::Node(node, slot) => self.nodes[node.0].fanout[slot] = FanOut::Terminal(seed),
            Root::Input(index) => self.inputs[index] = FanOut::Terminal(seed),
            Root::Detached => {}
        }
    }

    /// Folds the contributions of every recorded consumer edge under the
    /// accumulation policy. An empty edge list means the value was computed
    /// but never consumed toward the output: its gradient is zero.
    fn sum_edges(&mut self, edges: Edges) -> V {
        let mut total = V::zero();
        for edge in edges {
            let grads = self.pull(edge.consumer);
            total = total.accumulate(grads[edge.input_slot].clone());
        }
        total
    }

    /// Computes, or returns the cached, input-gradient tuple of a node.
    ///
    /// The node's gradient function is invoked at most once per traversal
    /// no matter how many consumers pull through it.
    fn pull(&mut self, id: NodeId) -> Rc<Values<V>> {
        if let Some(cached) = &self.nodes[id.0].grad_cache {
            trace!("gradient cache hit for node {}", id.0);
            return Rc::clone(cached);
        }
        let slots = self.nodes[id.0].fanout.len();
        let mut upstream: SmallVec<[Option<V>; 2]> = SmallVec::with_capacity(slots);
        for slot in 0..slots {
            let record = mem::replace(&mut self.nodes[id.0].fanout[slot], FanOut::empty());
            let grad = match record {
                // A missing terminal seed stays absent: the gradient
                // function substitutes the identity.
                FanOut::Terminal(seed) => seed,
                FanOut::Internal(edges) => Some(self.sum_edges(edges)),
            };
            upstream.push(grad);
        }
        let grad_fn = self.nodes[id.0]
            .grad_fn
            .take()
            .expect("node gradient function already consumed");
        let grads = Rc::new(grad_fn(&upstream));
        self.nodes[id.0].grad_cache = Some(Rc::clone(&grads));
        grads
    }
}
