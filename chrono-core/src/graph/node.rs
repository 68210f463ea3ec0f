//! Graph Nodes
//!
//! This module defines the nodes that live in a `ChronoGraph` arena.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use serde_json::Value;

use super::id::{ChronoId, Version};
use crate::chrono::{Atom, Identified, Mutation, Readable, VersionedNode, VersionedReference};

/// Handle of a node in a `ChronoGraph` arena.
///
/// Handles are plain indices. They are only meaningful for the graph that
/// issued them; other graphs report them as unknown or address another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// Get the raw index.
    pub fn raw(&self) -> u32 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for NodeId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Dirty state of a calculation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The outputs reflect the current inputs.
    Clean,

    /// An upstream node changed, but the inputs of this node may still end
    /// up equal. Resolved when the pass reaches the node.
    MaybeDirty,

    /// The node must recompute. New calculation nodes start here.
    Dirty,
}

/// A graph-as-node: observes its members and can itself be a member.
#[derive(Debug, Clone)]
pub struct GraphNode {
    id: ChronoId,
    version: Version,
    members: IndexSet<NodeId>,
}

impl GraphNode {
    pub(crate) fn new() -> Self {
        Self {
            id: ChronoId::new(),
            version: Version::fresh(),
            members: IndexSet::new(),
        }
    }

    /// The version stamp shared by every bump made under this graph until
    /// the next commit.
    pub fn version(&self) -> Version {
        self.version
    }

    pub(crate) fn advance_version(&mut self) {
        self.version = Version::fresh();
    }

    /// The member nodes (the graph's "from" edges).
    pub fn members(&self) -> &IndexSet<NodeId> {
        &self.members
    }

    pub(crate) fn members_mut(&mut self) -> &mut IndexSet<NodeId> {
        &mut self.members
    }
}

impl Identified for GraphNode {
    fn id(&self) -> ChronoId {
        self.id
    }
}

/// A calculation node together with its dirty state.
#[derive(Debug, Clone)]
pub struct MutationNode {
    pub(crate) mutation: Mutation,
    pub(crate) dirty: DirtyState,
}

impl MutationNode {
    /// The mutation this node runs.
    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Current dirty state.
    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }
}

/// The concrete kinds of node an arena holds.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A plain or observable value cell.
    Atom(Atom),

    /// A pinned, immutable version.
    Version(Arc<VersionedNode>),

    /// A stable slot pointing at the current version of a node.
    Reference(VersionedReference),

    /// A calculation over other nodes.
    Mutation(MutationNode),

    /// A graph owning a set of member nodes.
    Graph(GraphNode),
}

impl NodeKind {
    /// Short name of the kind, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Atom(_) => "atom",
            NodeKind::Version(_) => "version",
            NodeKind::Reference(_) => "reference",
            NodeKind::Mutation(_) => "mutation",
            NodeKind::Graph(_) => "graph",
        }
    }
}

/// Access to the owning graph of a node.
pub trait GraphMember {
    /// The graph this node has joined, if any.
    fn graph(&self) -> Option<NodeId>;

    /// Record `graph` as the owner, replacing any previous owner.
    fn join_graph(&mut self, graph: NodeId);

    /// Forget the owner. Membership in the owner's set is untouched.
    fn unjoin_graph(&mut self);
}

/// A node in the arena.
#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,

    /// Owning graph. A plain handle: ownership flows graph -> member only.
    graph: Option<NodeId>,

    /// Nodes whose "from" edges contain this node (reverse edges).
    observed_by: IndexSet<NodeId>,

    label: Option<String>,

    /// Writes applied through the graph, excluding rolled-back ones.
    writes: u64,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            graph: None,
            observed_by: IndexSet::new(),
            label: None,
            writes: 0,
        }
    }

    /// The node's kind and payload.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    /// The diagnostic label, if one was set.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn set_label(&mut self, label: String) {
        self.label = Some(label);
    }

    /// The current payload, for readable kinds.
    pub fn value(&self) -> Option<&Value> {
        match &self.kind {
            NodeKind::Atom(atom) => atom.get(),
            NodeKind::Version(version) => version.get(),
            NodeKind::Reference(reference) => reference.get(),
            NodeKind::Mutation(_) | NodeKind::Graph(_) => None,
        }
    }

    /// Whether the node has a payload at all (atoms, versions, references).
    pub fn is_readable(&self) -> bool {
        match &self.kind {
            NodeKind::Atom(atom) => atom.capabilities().readable,
            NodeKind::Version(_) | NodeKind::Reference(_) => true,
            NodeKind::Mutation(_) | NodeKind::Graph(_) => false,
        }
    }

    /// Nodes this node observes directly.
    pub fn from_edges(&self) -> IndexSet<NodeId> {
        match &self.kind {
            NodeKind::Mutation(node) => node.mutation.from_edges(),
            NodeKind::Graph(graph) => graph.members.clone(),
            _ => IndexSet::new(),
        }
    }

    /// Nodes this node writes to.
    pub fn to_edges(&self) -> IndexSet<NodeId> {
        match &self.kind {
            NodeKind::Mutation(node) => node.mutation.to_edges(),
            _ => IndexSet::new(),
        }
    }

    /// Nodes observing this node.
    pub fn observed_by(&self) -> &IndexSet<NodeId> {
        &self.observed_by
    }

    pub(crate) fn add_observer(&mut self, observer: NodeId) {
        self.observed_by.insert(observer);
    }

    pub(crate) fn remove_observer(&mut self, observer: NodeId) {
        self.observed_by.shift_remove(&observer);
    }

    /// Number of writes applied to this node.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    pub(crate) fn count_write(&mut self) {
        self.writes += 1;
    }

    /// Put back a payload and write count captured before a rolled-back
    /// write.
    pub(crate) fn restore(&mut self, kind: NodeKind, writes: u64) {
        self.kind = kind;
        self.writes = writes;
    }

    /// The calculation part of a mutation node.
    pub fn as_mutation(&self) -> Option<&MutationNode> {
        match &self.kind {
            NodeKind::Mutation(node) => Some(node),
            _ => None,
        }
    }

    pub(crate) fn as_mutation_mut(&mut self) -> Option<&mut MutationNode> {
        match &mut self.kind {
            NodeKind::Mutation(node) => Some(node),
            _ => None,
        }
    }

    /// The graph part of a graph node.
    pub fn as_graph(&self) -> Option<&GraphNode> {
        match &self.kind {
            NodeKind::Graph(graph) => Some(graph),
            _ => None,
        }
    }

    pub(crate) fn as_graph_mut(&mut self) -> Option<&mut GraphNode> {
        match &mut self.kind {
            NodeKind::Graph(graph) => Some(graph),
            _ => None,
        }
    }

    /// The reference part of a reference node.
    pub fn as_reference(&self) -> Option<&VersionedReference> {
        match &self.kind {
            NodeKind::Reference(reference) => Some(reference),
            _ => None,
        }
    }
}

impl GraphMember for Node {
    fn graph(&self) -> Option<NodeId> {
        self.graph
    }

    fn join_graph(&mut self, graph: NodeId) {
        if self.graph.is_some() {
            self.unjoin_graph();
        }
        self.graph = Some(graph);
    }

    fn unjoin_graph(&mut self) {
        self.graph = None;
    }
}
