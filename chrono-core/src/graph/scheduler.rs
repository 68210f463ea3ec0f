//! Update Scheduler
//!
//! The scheduler determines which calculation nodes a pass must visit and in
//! which order. It ensures that a calculation always runs after every
//! calculation writing one of its inputs.
//!
//! # Algorithm
//!
//! 1. Collect the scope: every node transitively contained in the graph
//!    being propagated (members of members included).
//! 2. Seed the affected set with the in-scope calculations that observe a
//!    frontier node, plus in-scope calculations that are already dirty.
//! 3. Walk downstream: the outputs of an affected calculation make every
//!    in-scope calculation observing them affected too.
//! 4. Sort topologically with Kahn's algorithm over the calculation-level
//!    edges (A -> B when an output of A is an input of B). Nodes left with a
//!    non-zero in-degree sit on or behind a cycle.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexSet;

use super::node::{DirtyState, Node, NodeId, NodeKind};
use crate::config::CycleCheck;
use crate::error::{ChronoError, ChronoResult};

/// Recompute plan of one pass.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Affected calculation nodes, dependencies before dependents.
    pub order: Vec<NodeId>,

    /// Every node transitively contained in the propagated graph.
    pub scope: IndexSet<NodeId>,
}

/// Read-only planner over an arena.
pub(crate) struct Scheduler<'a> {
    nodes: &'a [Node],
}

impl<'a> Scheduler<'a> {
    pub(crate) fn new(nodes: &'a [Node]) -> Self {
        Self { nodes }
    }

    fn node(&self, id: NodeId) -> Option<&'a Node> {
        self.nodes.get(id.index())
    }

    fn is_mutation(&self, id: NodeId) -> bool {
        matches!(self.node(id).map(Node::kind), Some(NodeKind::Mutation(_)))
    }

    /// Build the plan for propagating `graph` from `frontier`.
    pub(crate) fn plan(
        &self,
        graph: NodeId,
        frontier: &IndexSet<NodeId>,
        cycle_check: CycleCheck,
    ) -> ChronoResult<Plan> {
        let scope = self.scope(graph);
        let affected = self.affected(&scope, frontier);

        let order = match cycle_check {
            CycleCheck::Scope => {
                let all: IndexSet<NodeId> = scope
                    .iter()
                    .copied()
                    .filter(|id| self.is_mutation(*id))
                    .collect();
                self.topological_sort(&all)?
                    .into_iter()
                    .filter(|id| affected.contains(id))
                    .collect()
            }
            CycleCheck::Affected => self.topological_sort(&affected)?,
        };

        Ok(Plan { order, scope })
    }

    /// Every node transitively contained in `graph`, excluding `graph`.
    pub(crate) fn scope(&self, graph: NodeId) -> IndexSet<NodeId> {
        let mut scope = IndexSet::new();
        let mut queue = VecDeque::from([graph]);

        while let Some(id) = queue.pop_front() {
            let Some(members) = self.node(id).and_then(Node::as_graph).map(|g| g.members()) else {
                continue;
            };
            for &member in members {
                if member != graph && scope.insert(member) {
                    queue.push_back(member);
                }
            }
        }

        scope
    }

    /// In-scope calculations reachable from the frontier, plus dirty ones
    /// and everything downstream of them.
    fn affected(&self, scope: &IndexSet<NodeId>, frontier: &IndexSet<NodeId>) -> IndexSet<NodeId> {
        let mut affected = IndexSet::new();
        let mut queue = VecDeque::new();

        for &id in frontier {
            if let Some(node) = self.node(id) {
                queue.extend(node.observed_by().iter().copied());
            }
        }
        for &id in scope {
            let dirty = self
                .node(id)
                .and_then(Node::as_mutation)
                .is_some_and(|m| m.dirty_state() == DirtyState::Dirty);
            if dirty {
                queue.push_back(id);
            }
        }

        // BFS over observer edges, restricted to in-scope calculations
        while let Some(id) = queue.pop_front() {
            if !scope.contains(&id) || !self.is_mutation(id) || !affected.insert(id) {
                continue;
            }
            for output in self.node(id).map(Node::to_edges).unwrap_or_default() {
                if let Some(out) = self.node(output) {
                    queue.extend(out.observed_by().iter().copied());
                }
            }
        }

        affected
    }

    /// Calculations within `set` that directly depend on `id`.
    fn dependents(&self, id: NodeId, set: &IndexSet<NodeId>) -> IndexSet<NodeId> {
        let mut dependents = IndexSet::new();
        for output in self.node(id).map(Node::to_edges).unwrap_or_default() {
            if let Some(out) = self.node(output) {
                dependents.extend(out.observed_by().iter().copied().filter(|d| set.contains(d)));
            }
        }
        dependents
    }

    /// Sort `set` so that dependencies come before dependents.
    ///
    /// Fails with `CycleDetected` listing the calculations that could not be
    /// ordered.
    pub(crate) fn topological_sort(&self, set: &IndexSet<NodeId>) -> ChronoResult<Vec<NodeId>> {
        let mut in_degree: HashMap<NodeId, usize> = set.iter().map(|&id| (id, 0)).collect();
        let edges: HashMap<NodeId, IndexSet<NodeId>> =
            set.iter().map(|&id| (id, self.dependents(id, set))).collect();

        for dependents in edges.values() {
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree += 1;
                }
            }
        }

        let mut queue: VecDeque<NodeId> =
            set.iter().copied().filter(|id| in_degree[id] == 0).collect();
        let mut result = Vec::with_capacity(set.len());

        // Kahn's algorithm
        while let Some(id) = queue.pop_front() {
            result.push(id);

            for dependent in &edges[&id] {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        if result.len() < set.len() {
            let mut nodes: Vec<NodeId> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(id, _)| id)
                .collect();
            nodes.sort();
            return Err(ChronoError::CycleDetected { nodes });
        }

        Ok(result)
    }
}
