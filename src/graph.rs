//! Graph construction: references, nodes and the single-pass builder.
//!
//! # Building the Dependency Graph
//!
//! The graph is discovered dynamically: as the caller's builder closure
//! applies operations to [`Ref`]s, the [`Graph`] wires each consumer back
//! onto its producers. Applying a single-output operation allocates
//! nothing — it yields an *inline* reference — and the application is
//! promoted to a materialized [`Node`] at the first point it is consumed.
//! Every later consumer of the same inline reference shares that node, so
//! each operation's forward pass runs at most once.
//!
//! References carry an invariant lifetime brand ([`Session`]) tying them
//! to the builder session that created them. The builder is only reachable
//! through a `for<'g>` closure, so handing a reference from one
//! differentiation call to another call's builder does not compile.
//!
//! Data flows strictly forward here (values only); once
//! [`Graph::finish`] seals the session into a [`Tape`], the graph shape is
//! frozen and only gradients move, strictly backward.

use std::cell::Cell;
use std::marker::PhantomData;
use std::rc::Rc;

use log::trace;
use smallvec::SmallVec;

use crate::accumulate::Accumulate;
use crate::op::{GradFn, Op, Values};
use crate::tape::{Root, Tape};

/// Invariant lifetime brand shared by a builder and its references.
pub(crate) type Session<'g> = PhantomData<fn(&'g ()) -> &'g ()>;

/// Index of a materialized node in the session's node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeId(pub(crate) usize);

/// A consumer edge: which node consumed a value, and through which of the
/// consumer's input slots the gradient will eventually be reported.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Edge {
    pub(crate) consumer: NodeId,
    pub(crate) input_slot: usize,
}

pub(crate) type Edges = SmallVec<[Edge; 2]>;

/// Per-output-slot fan-out record.
pub(crate) enum FanOut<V> {
    /// Every consumer edge recorded so far. The number of edges equals the
    /// number of times the slot was used as an argument.
    Internal(Edges),
    /// The slot is a root of the backward pass. Holds the upstream gradient
    /// if one was supplied explicitly; `None` means the identity seed.
    Terminal(Option<V>),
}

impl<V> FanOut<V> {
    pub(crate) fn empty() -> Self {
        FanOut::Internal(SmallVec::new())
    }
}

/// The materialized result of running one operation once.
///
/// `values` never change after creation; `grad_cache` is filled at most
/// once, during the backward traversal.
pub(crate) struct Node<V> {
    pub(crate) values: Values<V>,
    pub(crate) fanout: SmallVec<[FanOut<V>; 1]>,
    pub(crate) grad_fn: Option<GradFn<V>>,
    pub(crate) grad_cache: Option<Rc<Values<V>>>,
}

/// An unmaterialized application of an operation to argument references.
///
/// Evaluating it does not allocate a node; consuming it does, exactly once.
pub(crate) struct InlineExpr<'g, V> {
    op: Rc<dyn Op<V>>,
    args: Vec<Ref<'g, V>>,
    materialized: Cell<Option<NodeId>>,
}

#[derive(Clone)]
enum RefKind<'g, V> {
    /// Index into the top-level argument tuple of the differentiation call.
    Input(usize),
    /// Embedded value with no gradient path.
    Constant(V),
    /// One output slot of an already-materialized node.
    Node { node: NodeId, slot: usize },
    /// Unmaterialized inline application, shared across its use sites.
    Inline(Rc<InlineExpr<'g, V>>),
}

/// A handle to a value tracked by one differentiation session.
///
/// References are cheap to clone and never outlive their session; the
/// brand lifetime `'g` makes cross-session misuse a compile error.
#[derive(Clone)]
pub struct Ref<'g, V> {
    kind: RefKind<'g, V>,
    session: Session<'g>,
}

/// Single-pass builder owning the node table and the per-input fan-out
/// records of one differentiation call.
pub struct Graph<'g, V> {
    nodes: Vec<Node<V>>,
    input_values: Vec<V>,
    input_fanout: Vec<FanOut<V>>,
    session: Session<'g>,
}

impl<'g, V: Accumulate + 'static> Graph<'g, V> {
    fn new(input_values: Vec<V>) -> Self {
        let input_fanout = input_values.iter().map(|_| FanOut::empty()).collect();
        Graph {
            nodes: Vec::new(),
            input_values,
            input_fanout,
            session: PhantomData,
        }
    }

    /// Reference to one of the session's top-level inputs.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range for the input tuple.
    pub fn input(&self, index: usize) -> Ref<'g, V> {
        assert!(
            index < self.input_values.len(),
            "input index {index} out of range ({} inputs)",
            self.input_values.len()
        );
        Ref {
            kind: RefKind::Input(index),
            session: self.session,
        }
    }

    /// Embeds a value with no gradient path; it resolves to itself and
    /// contributes nothing during the backward traversal.
    pub fn constant(&self, value: V) -> Ref<'g, V> {
        Ref {
            kind: RefKind::Constant(value),
            session: self.session,
        }
    }

    /// Applies a single-output operation to the given references.
    ///
    /// No node is allocated yet: the result is an inline reference that is
    /// promoted to a shared node at its first point of consumption.
    ///
    /// # Panics
    ///
    /// Panics if the argument count does not match the operation's arity,
    /// or if the operation has more than one output slot (use
    /// [`Graph::apply_multi`] for those).
    pub fn apply(&self, op: impl Op<V> + 'static, args: &[Ref<'g, V>]) -> Ref<'g, V> {
        let op: Rc<dyn Op<V>> = Rc::new(op);
        assert_eq!(
            args.len(),
            op.inputs(),
            "operation `{}` expects {} arguments, got {}",
            op.name(),
            op.inputs(),
            args.len()
        );
        assert_eq!(
            op.outputs(),
            1,
            "operation `{}` has {} output slots; use apply_multi",
            op.name(),
            op.outputs()
        );
        Ref {
            kind: RefKind::Inline(Rc::new(InlineExpr {
                op,
                args: args.to_vec(),
                materialized: Cell::new(None),
            })),
            session: self.session,
        }
    }

    /// Applies a multi-output operation, materializing its node immediately
    /// and returning one reference per output slot.
    ///
    /// # Panics
    ///
    /// Panics if the argument count does not match the operation's arity.
    pub fn apply_multi(&mut self, op: impl Op<V> + 'static, args: &[Ref<'g, V>]) -> Vec<Ref<'g, V>> {
        let op: Rc<dyn Op<V>> = Rc::new(op);
        assert_eq!(
            args.len(),
            op.inputs(),
            "operation `{}` expects {} arguments, got {}",
            op.name(),
            op.inputs(),
            args.len()
        );
        let slots = op.outputs();
        let node = self.materialize_application(&op, args);
        (0..slots)
            .map(|slot| Ref {
                kind: RefKind::Node { node, slot },
                session: self.session,
            })
            .collect()
    }

    /// Forces an inline expression into a materialized node, returning a
    /// node reference; other reference kinds are returned unchanged.
    ///
    /// Inline expressions already share one node across all their use
    /// sites, so this is only needed to pin down the evaluation point.
    pub fn bind(&mut self, reference: &Ref<'g, V>) -> Ref<'g, V> {
        match &reference.kind {
            RefKind::Inline(expr) => {
                let node = self.materialize(expr);
                Ref {
                    kind: RefKind::Node { node, slot: 0 },
                    session: self.session,
                }
            }
            _ => reference.clone(),
        }
    }

    /// Resolves a reference to its forward value.
    ///
    /// Materialized nodes are read from their cache and never re-run. An
    /// unmaterialized inline expression is evaluated in place, without
    /// allocating a node.
    fn resolve(&self, reference: &Ref<'g, V>) -> V {
        match &reference.kind {
            RefKind::Input(index) => self.input_values[*index].clone(),
            RefKind::Constant(value) => value.clone(),
            RefKind::Node { node, slot } => self.nodes[node.0].values[*slot].clone(),
            RefKind::Inline(expr) => match expr.materialized.get() {
                Some(node) => self.nodes[node.0].values[0].clone(),
                None => {
                    let args: Vec<V> = expr.args.iter().map(|arg| self.resolve(arg)).collect();
                    let out = expr.op.apply(&args);
                    debug_assert_eq!(out.len(), 1);
                    out.into_iter()
                        .next()
                        .expect("single-output operation produced no value")
                }
            },
        }
    }

    /// Records that `edge.consumer` reads from `producer`, routing on the
    /// producer's reference kind. Consuming an inline expression is what
    /// promotes it to a node.
    fn register(&mut self, edge: Edge, producer: &Ref<'g, V>) {
        match &producer.kind {
            RefKind::Input(index) => match &mut self.input_fanout[*index] {
                FanOut::Internal(edges) => edges.push(edge),
                FanOut::Terminal(_) => unreachable!("input fan-out sealed during construction"),
            },
            RefKind::Constant(_) => {}
            RefKind::Node { node, slot } => self.push_edge(*node, *slot, edge),
            RefKind::Inline(expr) => {
                let node = self.materialize(expr);
                self.push_edge(node, 0, edge);
            }
        }
    }

    fn push_edge(&mut self, node: NodeId, slot: usize, edge: Edge) {
        match &mut self.nodes[node.0].fanout[slot] {
            FanOut::Internal(edges) => edges.push(edge),
            FanOut::Terminal(_) => unreachable!("node fan-out sealed during construction"),
        }
    }

    /// Promotes an inline expression to a node, once; every later consumer
    /// shares the result.
    fn materialize(&mut self, expr: &Rc<InlineExpr<'g, V>>) -> NodeId {
        if let Some(node) = expr.materialized.get() {
            return node;
        }
        let node = self.materialize_application(&expr.op, &expr.args);
        expr.materialized.set(Some(node));
        node
    }

    /// Runs an operation over resolved arguments and wires the resulting
    /// node into the graph. Shared by inline promotion and `apply_multi`.
    fn materialize_application(&mut self, op: &Rc<dyn Op<V>>, args: &[Ref<'g, V>]) -> NodeId {
        // Promote inline arguments before reading them, so a shared inline
        // argument is evaluated exactly once.
        for arg in args {
            if let RefKind::Inline(inner) = &arg.kind {
                self.materialize(inner);
            }
        }
        let values: Vec<V> = args.iter().map(|arg| self.resolve(arg)).collect();
        let (outputs, grad_fn) = op.apply_with_grad(&values);
        assert_eq!(
            outputs.len(),
            op.outputs(),
            "operation `{}` produced {} outputs, declared {}",
            op.name(),
            outputs.len(),
            op.outputs()
        );
        let node = NodeId(self.nodes.len());
        let fanout = (0..outputs.len()).map(|_| FanOut::empty()).collect();
        self.nodes.push(Node {
            values: outputs,
            fanout,
            grad_fn: Some(grad_fn),
            grad_cache: None,
        });
        trace!(
            "materialized `{}` as node {} over {} arguments",
            op.name(),
            node.0,
            args.len()
        );
        for (input_slot, arg) in args.iter().enumerate() {
            self.register(
                Edge {
                    consumer: node,
                    input_slot,
                },
                arg,
            );
        }
        node
    }

    /// Seals the session: materializes the output if it is still inline and
    /// hands the frozen graph to the backward phase.
    fn finish(mut self, output: Ref<'g, V>) -> (V, Tape<V>) {
        let (root, value) = match output.kind {
            RefKind::Inline(expr) => {
                let node = self.materialize(&expr);
                (Root::Node(node, 0), self.nodes[node.0].values[0].clone())
            }
            RefKind::Node { node, slot } => {
                let value = self.nodes[node.0].values[slot].clone();
                (Root::Node(node, slot), value)
            }
            RefKind::Input(index) => (Root::Input(index), self.input_values[index].clone()),
            RefKind::Constant(value) => (Root::Detached, value),
        };
        (value, Tape::new(self.nodes, self.input_fanout, root))
    }
}

/// Runs one forward pass: builds a fresh branded session over
/// `input_values`, lets `build` construct the graph, and seals it.
pub(crate) fn run_forward<V, F>(input_values: Vec<V>, build: F) -> (V, Tape<V>)
where
    V: Accumulate + 'static,
    F: for<'g> FnOnce(&mut Graph<'g, V>, &[Ref<'g, V>]) -> Ref<'g, V>,
{
    let mut graph = Graph::new(input_values);
    let inputs: Vec<Ref<'_, V>> = (0..graph.input_values.len())
        .map(|index| graph.input(index))
        .collect();
    let output = build(&mut graph, &inputs);
    graph.finish(output)
}
