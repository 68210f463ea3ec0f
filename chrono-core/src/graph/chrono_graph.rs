//! Chrono Graph
//!
//! `ChronoGraph` owns every node in an arena and is the only way to reach
//! them. It provides:
//!
//! - node allocation (atoms, versions, references, mutations, graphs)
//! - graph membership (`add_node`, `remove_node`) and ownership
//!   (`join_graph`, `unjoin_graph`), plus the `enter_graph`/`leave_graph`
//!   composites used by entities
//! - reads, time-travel reads and writes
//! - the frontier: nodes written since the last commit
//!
//! Propagation over the frontier lives in the `propagation` module.
//!
//! # Root Graph
//!
//! Every `ChronoGraph` is created with one graph node, the root. Propagation
//! defaults to the root, and only nodes transitively contained in the
//! propagated graph take part in a pass.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::trace;

use super::id::Version;
use super::node::{DirtyState, GraphMember, GraphNode, MutationNode, Node, NodeId, NodeKind};
use crate::chrono::{
    AcceptAll, Atom, Computation, EffectRequest, EffectResolver, Inputs, Mutation, Resolution,
    VersionedNode, VersionedReference,
};
use crate::config::PropagationConfig;
use crate::error::{CalcError, ChronoError, ChronoResult};

/// State of a node before its first write in a journaled span.
#[derive(Debug)]
struct Snapshot {
    kind: NodeKind,
    writes: u64,
}

/// Undo log: the first snapshot recorded per node wins.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    entries: IndexMap<NodeId, Snapshot>,
}

impl Journal {
    /// Record `node` unless already recorded. Returns `true` if recorded now.
    fn record(&mut self, id: NodeId, node: &Node) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(
            id,
            Snapshot {
                kind: node.kind().clone(),
                writes: node.write_count(),
            },
        );
        true
    }

    pub(crate) fn forget(&mut self, id: NodeId) {
        self.entries.shift_remove(&id);
    }

    /// Move every record into `other`, keeping any record it already holds.
    pub(crate) fn absorb_into(self, other: &mut Journal) {
        for (id, snapshot) in self.entries {
            other.entries.entry(id).or_insert(snapshot);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Restore every recorded node, newest record first.
    pub(crate) fn rollback(self, nodes: &mut [Node]) {
        for (id, snapshot) in self.entries.into_iter().rev() {
            if let Some(node) = nodes.get_mut(id.index()) {
                node.restore(snapshot.kind, snapshot.writes);
            }
        }
    }
}

/// The outermost graph reached from `graph` by following owners.
pub(crate) fn outermost_graph(nodes: &[Node], graph: NodeId) -> NodeId {
    let mut current = graph;
    // Owner links can loop; never take more hops than there are nodes.
    for _ in 0..nodes.len() {
        let owner = nodes
            .get(current.index())
            .and_then(|node| node.graph())
            .filter(|&owner| owner != current)
            .filter(|owner| nodes.get(owner.index()).and_then(Node::as_graph).is_some());
        match owner {
            Some(owner) => current = owner,
            None => break,
        }
    }
    current
}

/// The open stamp shared by every graph nested under the same outermost
/// graph as `graph`.
pub(crate) fn graph_version(nodes: &[Node], graph: NodeId) -> Version {
    nodes
        .get(outermost_graph(nodes, graph).index())
        .and_then(Node::as_graph)
        .map(GraphNode::version)
        .unwrap_or_else(Version::fresh)
}

/// The version a bump of `id` should carry outside a pass: the open stamp
/// of its outermost owning graph when joined, a freestanding stamp otherwise.
pub(crate) fn next_version(nodes: &[Node], id: NodeId) -> Version {
    match nodes.get(id.index()).and_then(|node| node.graph()) {
        Some(owner) => graph_version(nodes, owner),
        None => Version::fresh(),
    }
}

/// Apply one write, recording the prior state in `journal`.
///
/// Returns `true` when the payload changed. Equal writes to observable
/// nodes are skipped and leave no journal entry.
pub(crate) fn apply_write(
    nodes: &mut [Node],
    id: NodeId,
    value: Value,
    version: Version,
    journal: &mut Journal,
) -> ChronoResult<bool> {
    let node = nodes.get_mut(id.index()).ok_or(ChronoError::UnknownNode(id))?;
    let recorded = journal.record(id, node);

    let result = match node.kind_mut() {
        NodeKind::Atom(atom) => atom.write(value).map_err(|err| match err {
            ChronoError::AlreadySet => ChronoError::ImmutableNode(id),
            ChronoError::ReadOnly => ChronoError::NotWritable(id),
            other => other,
        }),
        NodeKind::Reference(reference) => Ok(reference.set_at(value, version)),
        NodeKind::Version(_) => Err(ChronoError::ImmutableNode(id)),
        NodeKind::Mutation(_) | NodeKind::Graph(_) => Err(ChronoError::NotWritable(id)),
    };

    match result {
        Ok(true) => {
            node.count_write();
            trace!(node = %id, %version, "write applied");
            Ok(true)
        }
        Ok(false) => {
            if recorded {
                journal.forget(id);
            }
            trace!(node = %id, "equal write skipped");
            Ok(false)
        }
        Err(err) => {
            if recorded {
                journal.forget(id);
            }
            Err(err)
        }
    }
}

/// An arena of versioned nodes rooted at a graph node.
///
/// # Example
///
/// ```rust
/// use chrono_core::chrono::{Atom, Mutation};
/// use chrono_core::graph::ChronoGraph;
/// use serde_json::json;
///
/// let mut graph = ChronoGraph::new();
/// let root = graph.root();
///
/// let a = graph.create_atom(Atom::observable());
/// let b = graph.create_atom(Atom::observable());
/// let double = graph
///     .create_mutation(Mutation::positional([a], [b], |args| {
///         Ok(json!(args[0].as_i64().unwrap_or(0) * 2).into())
///     }))
///     .unwrap();
/// graph.add_nodes(root, &[a, b, double]).unwrap();
///
/// graph.write(a, json!(5)).unwrap();
/// graph.propagate().unwrap();
/// assert_eq!(graph.get(b), Some(&json!(10)));
/// ```
#[derive(Debug)]
pub struct ChronoGraph {
    pub(super) nodes: Vec<Node>,
    pub(super) root: NodeId,
    pub(super) frontier: IndexSet<NodeId>,
    pub(super) pending: Journal,
    pub(super) config: PropagationConfig,
}

impl ChronoGraph {
    /// Create an empty graph with the default configuration.
    pub fn new() -> Self {
        Self::with_config(PropagationConfig::default())
    }

    /// Create an empty graph with `config`.
    pub fn with_config(config: PropagationConfig) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            root: NodeId::from(0),
            frontier: IndexSet::new(),
            pending: Journal::default(),
            config,
        };
        graph.root = graph.push(NodeKind::Graph(GraphNode::new()));
        graph
    }

    /// The root graph node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The propagation configuration.
    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Number of nodes in the arena, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId::from(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind));
        id
    }

    /// Get a node.
    pub fn node(&self, id: NodeId) -> ChronoResult<&Node> {
        self.nodes.get(id.index()).ok_or(ChronoError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> ChronoResult<&mut Node> {
        self.nodes.get_mut(id.index()).ok_or(ChronoError::UnknownNode(id))
    }

    fn graph_node(&self, graph: NodeId) -> ChronoResult<&GraphNode> {
        self.node(graph)?.as_graph().ok_or(ChronoError::NotAGraph(graph))
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocate an atom.
    pub fn create_atom(&mut self, atom: Atom) -> NodeId {
        self.push(NodeKind::Atom(atom))
    }

    /// Allocate a node pinned to one immutable version.
    pub fn create_version(&mut self, version: Arc<VersionedNode>) -> NodeId {
        self.push(NodeKind::Version(version))
    }

    /// Allocate a reference.
    pub fn create_reference(&mut self, reference: VersionedReference) -> NodeId {
        self.push(NodeKind::Reference(reference))
    }

    /// Allocate an empty graph node.
    pub fn create_graph(&mut self) -> NodeId {
        self.push(NodeKind::Graph(GraphNode::new()))
    }

    /// Allocate a calculation node.
    ///
    /// Every input must be readable and every output writable. The node
    /// starts dirty, so the next pass covering it runs it once.
    pub fn create_mutation(&mut self, mutation: Mutation) -> ChronoResult<NodeId> {
        for &input in mutation.from_edges().iter() {
            if !self.node(input)?.is_readable() {
                return Err(ChronoError::NotReadable(input));
            }
        }
        for &output in mutation.to_edges().iter() {
            match self.node(output)?.kind() {
                NodeKind::Atom(atom) if atom.capabilities().writable => {}
                NodeKind::Reference(_) => {}
                NodeKind::Version(_) => return Err(ChronoError::ImmutableNode(output)),
                _ => return Err(ChronoError::NotWritable(output)),
            }
        }

        let inputs = mutation.from_edges();
        let id = self.push(NodeKind::Mutation(MutationNode {
            mutation,
            dirty: DirtyState::Dirty,
        }));
        for input in inputs {
            self.node_mut(input)?.add_observer(id);
        }
        Ok(id)
    }

    /// Attach a diagnostic label to a node.
    pub fn set_label(&mut self, id: NodeId, label: impl Into<String>) -> ChronoResult<()> {
        self.node_mut(id)?.set_label(label.into());
        Ok(())
    }

    /// The label of a node, or its kind and handle when unlabeled.
    pub fn label_of(&self, id: NodeId) -> String {
        match self.nodes.get(id.index()) {
            Some(node) => match node.label() {
                Some(label) => label.to_string(),
                None => format!("{} {}", node.kind().name(), id),
            },
            None => id.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Whether `node` is a direct member of `graph`.
    pub fn has_node(&self, graph: NodeId, node: NodeId) -> ChronoResult<bool> {
        Ok(self.graph_node(graph)?.members().contains(&node))
    }

    /// The direct members of `graph`.
    pub fn members(&self, graph: NodeId) -> ChronoResult<&IndexSet<NodeId>> {
        Ok(self.graph_node(graph)?.members())
    }

    /// Add `node` to the members of `graph`.
    ///
    /// Fails with `DuplicateNode` if it is already a member.
    pub fn add_node(&mut self, graph: NodeId, node: NodeId) -> ChronoResult<()> {
        self.node(node)?;
        let members = self
            .node_mut(graph)?
            .as_graph_mut()
            .ok_or(ChronoError::NotAGraph(graph))?
            .members_mut();
        if !members.insert(node) {
            return Err(ChronoError::DuplicateNode { graph, node });
        }
        self.node_mut(node)?.add_observer(graph);
        Ok(())
    }

    /// Add each node in turn, stopping at the first failure.
    pub fn add_nodes(&mut self, graph: NodeId, nodes: &[NodeId]) -> ChronoResult<()> {
        nodes.iter().try_for_each(|&node| self.add_node(graph, node))
    }

    /// Remove `node` from the members of `graph`.
    ///
    /// Fails with `MissingNode` if it is not a member.
    pub fn remove_node(&mut self, graph: NodeId, node: NodeId) -> ChronoResult<()> {
        let members = self
            .node_mut(graph)?
            .as_graph_mut()
            .ok_or(ChronoError::NotAGraph(graph))?
            .members_mut();
        if !members.shift_remove(&node) {
            return Err(ChronoError::MissingNode { graph, node });
        }
        self.node_mut(node)?.remove_observer(graph);
        Ok(())
    }

    /// Remove each node in turn, stopping at the first failure.
    pub fn remove_nodes(&mut self, graph: NodeId, nodes: &[NodeId]) -> ChronoResult<()> {
        nodes.iter().try_for_each(|&node| self.remove_node(graph, node))
    }

    /// The graph `node` has joined, if any.
    pub fn graph_of(&self, node: NodeId) -> ChronoResult<Option<NodeId>> {
        Ok(self.node(node)?.graph())
    }

    /// Record `graph` as the owner of `node`, replacing any previous owner.
    ///
    /// Membership sets are untouched.
    pub fn join_graph(&mut self, node: NodeId, graph: NodeId) -> ChronoResult<()> {
        self.graph_node(graph)?;
        self.node_mut(node)?.join_graph(graph);
        Ok(())
    }

    /// Forget the owner of `node`. Membership sets are untouched.
    pub fn unjoin_graph(&mut self, node: NodeId) -> ChronoResult<()> {
        self.node_mut(node)?.unjoin_graph();
        Ok(())
    }

    /// Move `node` into `graph`: leave the previous owner's member set,
    /// join `graph`, and become its member.
    pub fn enter_graph(&mut self, node: NodeId, graph: NodeId) -> ChronoResult<()> {
        self.graph_node(graph)?;
        if let Some(previous) = self.node(node)?.graph() {
            if previous != graph && self.has_node(previous, node).unwrap_or(false) {
                self.remove_node(previous, node)?;
            }
        }
        if !self.has_node(graph, node)? {
            self.add_node(graph, node)?;
        }
        self.join_graph(node, graph)
    }

    /// Leave the owning graph: drop out of its member set and unjoin.
    pub fn leave_graph(&mut self, node: NodeId) -> ChronoResult<()> {
        if let Some(graph) = self.node(node)?.graph() {
            if self.has_node(graph, node).unwrap_or(false) {
                self.remove_node(graph, node)?;
            }
        }
        self.unjoin_graph(node)
    }

    // ------------------------------------------------------------------
    // Reads and writes
    // ------------------------------------------------------------------

    /// The current payload of a readable node.
    pub fn read(&self, id: NodeId) -> ChronoResult<Option<&Value>> {
        let node = self.node(id)?;
        if !matches!(
            node.kind(),
            NodeKind::Atom(_) | NodeKind::Version(_) | NodeKind::Reference(_)
        ) {
            return Err(ChronoError::NotReadable(id));
        }
        Ok(node.value())
    }

    /// The current payload, or `None` for missing, empty or unreadable nodes.
    pub fn get(&self, id: NodeId) -> Option<&Value> {
        self.nodes.get(id.index()).and_then(Node::value)
    }

    /// The payload as of `version`, for references and pinned versions.
    pub fn read_as_of(&self, id: NodeId, version: Version) -> ChronoResult<Option<&Value>> {
        match self.node(id)?.kind() {
            NodeKind::Reference(reference) => Ok(reference.get_as_of(version)),
            NodeKind::Version(node) => Ok(node.as_of(version).map(|node| node.value())),
            _ => Err(ChronoError::NotVersioned(id)),
        }
    }

    /// Write a payload and add the node to the frontier of the next pass.
    ///
    /// Returns `false` when an observable node skipped an equal value; the
    /// frontier is left alone in that case.
    pub fn write(&mut self, id: NodeId, value: Value) -> ChronoResult<bool> {
        let version = next_version(&self.nodes, id);
        let changed = apply_write(&mut self.nodes, id, value, version, &mut self.pending)?;
        if changed {
            self.frontier.insert(id);
        }
        Ok(changed)
    }

    /// Nodes written since the last commit that no pass has consumed yet.
    pub fn frontier(&self) -> &IndexSet<NodeId> {
        &self.frontier
    }

    /// Roll back every write made since the last commit and clear the
    /// frontier.
    pub fn discard_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        trace!(nodes = pending.len(), "discarding pending writes");
        pending.rollback(&mut self.nodes);
        self.frontier.clear();
    }

    /// The current input values of a mutation, absent values read as null.
    pub(crate) fn input_values(&self, mutation: &Mutation) -> Inputs<Value> {
        mutation.map_input(|&input| self.get(input).cloned().unwrap_or(Value::Null))
    }

    /// Run one calculation node outside a pass and write its outputs.
    ///
    /// Effects are resolved with `AcceptAll`. Written outputs join the
    /// frontier like any other write. If any output refuses the value, none
    /// of them are written.
    pub fn run_calculation(&mut self, id: NodeId) -> ChronoResult<Value> {
        let mutation = self
            .node(id)?
            .as_mutation()
            .map(|node| node.mutation().clone())
            .ok_or(ChronoError::NotAMutation(id))?;
        let inputs = self.input_values(&mutation);
        let calc_error = |source: CalcError| ChronoError::Calculation {
            node: id,
            label: self.label_of(id),
            inputs: inputs.to_json(),
            source,
        };

        let mut step = mutation.calculate(&inputs).map_err(calc_error)?;
        let mut round = 0;
        let value = loop {
            match step {
                Computation::Done(value) => break value,
                Computation::Effect(effect, resume) => {
                    if round >= self.config.max_effects_per_node {
                        return Err(ChronoError::EffectLimitExceeded {
                            node: id,
                            limit: self.config.max_effects_per_node,
                        });
                    }
                    let request = EffectRequest {
                        node: id,
                        label: self.label_of(id),
                        round,
                        effect,
                    };
                    let resolved = match AcceptAll.resolve(&request) {
                        Resolution::Resume(value) => value,
                        Resolution::Reject(reason) => {
                            return Err(ChronoError::EffectRejected {
                                node: id,
                                kind: request.effect.kind,
                                reason,
                            })
                        }
                    };
                    step = resume(resolved).map_err(calc_error)?;
                    round += 1;
                }
            }
        };

        // Outputs land together or not at all.
        let mut journal = Journal::default();
        let mut changed = Vec::new();
        for &output in mutation.outputs() {
            let version = next_version(&self.nodes, output);
            match apply_write(&mut self.nodes, output, value.clone(), version, &mut journal) {
                Ok(true) => changed.push(output),
                Ok(false) => {}
                Err(err) => {
                    journal.rollback(&mut self.nodes);
                    return Err(err);
                }
            }
        }
        journal.absorb_into(&mut self.pending);
        self.frontier.extend(changed);
        Ok(value)
    }
}

impl Default for ChronoGraph {
    fn default() -> Self {
        Self::new()
    }
}
