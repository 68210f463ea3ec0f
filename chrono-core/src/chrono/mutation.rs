//! Mutation Implementation
//!
//! A mutation (calculation node) reads a fixed set of input nodes, applies a
//! pure function to their payloads, and writes the single result into every
//! output node.
//!
//! # Input Shapes
//!
//! Inputs are either keyed (a name to node mapping) or positional (an ordered
//! list). The shape is fixed when the mutation is built, and the calculation
//! function's signature is tied to it:
//!
//! - keyed inputs call the function once with the whole name to value map
//! - positional inputs call the function with the values as a slice
//!
//! # Effects
//!
//! A calculation may return `Computation::Effect` instead of a value. The
//! propagation engine then suspends, asks the effect resolver for a
//! resolution, and feeds it to the continuation carried by the effect.

use std::fmt::Debug;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use smallvec::SmallVec;

use super::effect::Effect;
use crate::error::CalcError;
use crate::graph::NodeId;

/// Output of one calculation step.
pub type CalcResult = Result<Computation, CalcError>;

/// Resumes a calculation with the resolution of the effect it requested.
pub type Continuation = Box<dyn FnOnce(Value) -> CalcResult + Send>;

/// Outputs of a mutation. Most mutations write one or two nodes.
pub type Outputs = SmallVec<[NodeId; 2]>;

/// What a calculation step produced.
pub enum Computation {
    /// The calculation finished with a value.
    Done(Value),

    /// The calculation needs an effect resolved before it can continue.
    Effect(Effect, Continuation),
}

impl Computation {
    /// Request `effect` and continue with `resume` once it is resolved.
    pub fn effect<F>(effect: Effect, resume: F) -> Self
    where
        F: FnOnce(Value) -> CalcResult + Send + 'static,
    {
        Self::Effect(effect, Box::new(resume))
    }
}

impl From<Value> for Computation {
    fn from(value: Value) -> Self {
        Self::Done(value)
    }
}

impl Debug for Computation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done(value) => f.debug_tuple("Done").field(value).finish(),
            Self::Effect(effect, _) => f.debug_tuple("Effect").field(effect).finish(),
        }
    }
}

/// Input shape of a mutation, generic over what each input slot holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Inputs<T> {
    Keyed(IndexMap<String, T>),
    Positional(Vec<T>),
}

impl<T> Inputs<T> {
    /// Apply `f` to every slot, preserving the shape (same keys, same order).
    pub fn map_input<U, F>(&self, mut f: F) -> Inputs<U>
    where
        F: FnMut(&T) -> U,
    {
        match self {
            Inputs::Keyed(map) => {
                Inputs::Keyed(map.iter().map(|(key, slot)| (key.clone(), f(slot))).collect())
            }
            Inputs::Positional(list) => Inputs::Positional(list.iter().map(f).collect()),
        }
    }

    /// Iterate the slots in shape order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            Inputs::Keyed(map) => Box::new(map.values()),
            Inputs::Positional(list) => Box::new(list.iter()),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        match self {
            Inputs::Keyed(map) => map.len(),
            Inputs::Positional(list) => list.len(),
        }
    }

    /// Whether there are no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inputs<Value> {
    /// Render the input values as JSON, for diagnostics.
    pub fn to_json(&self) -> Value {
        match self {
            Inputs::Keyed(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
            Inputs::Positional(list) => Value::Array(list.clone()),
        }
    }
}

type KeyedFn = Arc<dyn Fn(&IndexMap<String, Value>) -> CalcResult + Send + Sync>;
type PositionalFn = Arc<dyn Fn(&[Value]) -> CalcResult + Send + Sync>;

/// The calculation function, shaped like the inputs it accepts.
#[derive(Clone)]
enum Calculation {
    Keyed(KeyedFn),
    Positional(PositionalFn),
}

/// A calculation node: inputs, outputs, and the function between them.
///
/// # Example
///
/// ```rust
/// use chrono_core::chrono::Mutation;
/// use chrono_core::graph::NodeId;
/// use serde_json::json;
///
/// let a = NodeId::from(0);
/// let b = NodeId::from(1);
/// let out = NodeId::from(2);
///
/// let product = Mutation::positional([a, b], [out], |args| {
///     let product = args[0].as_i64().unwrap_or(0) * args[1].as_i64().unwrap_or(0);
///     Ok(json!(product).into())
/// });
/// assert_eq!(product.from_edges().len(), 2);
/// ```
#[derive(Clone)]
pub struct Mutation {
    input: Inputs<NodeId>,
    outputs: Outputs,
    calculation: Calculation,
}

impl Mutation {
    /// Build a mutation over named inputs.
    pub fn keyed<I, K, O, F>(input: I, outputs: O, calculation: F) -> Self
    where
        I: IntoIterator<Item = (K, NodeId)>,
        K: Into<String>,
        O: IntoIterator<Item = NodeId>,
        F: Fn(&IndexMap<String, Value>) -> CalcResult + Send + Sync + 'static,
    {
        Self {
            input: Inputs::Keyed(input.into_iter().map(|(key, node)| (key.into(), node)).collect()),
            outputs: outputs.into_iter().collect(),
            calculation: Calculation::Keyed(Arc::new(calculation)),
        }
    }

    /// Build a mutation over positional inputs.
    pub fn positional<I, O, F>(input: I, outputs: O, calculation: F) -> Self
    where
        I: IntoIterator<Item = NodeId>,
        O: IntoIterator<Item = NodeId>,
        F: Fn(&[Value]) -> CalcResult + Send + Sync + 'static,
    {
        Self {
            input: Inputs::Positional(input.into_iter().collect()),
            outputs: outputs.into_iter().collect(),
            calculation: Calculation::Positional(Arc::new(calculation)),
        }
    }

    /// The input nodes, in their declared shape.
    pub fn input(&self) -> &Inputs<NodeId> {
        &self.input
    }

    /// The output nodes, in order.
    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Apply `f` to every input node, preserving the input shape.
    pub fn map_input<U, F>(&self, f: F) -> Inputs<U>
    where
        F: FnMut(&NodeId) -> U,
    {
        self.input.map_input(f)
    }

    /// The nodes this mutation reads from, deduplicated.
    pub fn from_edges(&self) -> IndexSet<NodeId> {
        self.input.iter().copied().collect()
    }

    /// The nodes this mutation writes to, deduplicated.
    pub fn to_edges(&self) -> IndexSet<NodeId> {
        self.outputs.iter().copied().collect()
    }

    /// Run the calculation over already-read input values.
    ///
    /// `values` must have been produced by `map_input` on this mutation.
    pub fn calculate(&self, values: &Inputs<Value>) -> CalcResult {
        match (&self.calculation, values) {
            (Calculation::Keyed(f), Inputs::Keyed(map)) => f(map),
            (Calculation::Positional(f), Inputs::Positional(list)) => f(list),
            _ => Err("input values do not match the shape of the mutation".into()),
        }
    }
}

impl Debug for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("input", &self.input)
            .field("outputs", &self.outputs)
            .finish()
    }
}
