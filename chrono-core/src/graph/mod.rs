//! Versioned Dependency Graph
//!
//! This module implements the arena that owns every node, the scheduler that
//! orders calculations, and the propagation passes that run them.
//!
//! # Overview
//!
//! The dependency graph is a directed graph where:
//!
//! - Atoms, references and pinned versions hold payloads
//! - Calculation (mutation) nodes read input nodes and write output nodes
//! - Graph nodes own a set of members and may themselves be members
//!
//! Edges run from an input to the calculation observing it, and from a
//! calculation to the nodes it writes. Every node also records the nodes
//! observing it (`observed_by`), so the graph can be walked downstream from
//! a write.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a single arena addressed by `NodeId`. Back-references
//!    (owning graph, observers) are plain handles.
//!
//! 2. Writes between passes collect into a frontier. A pass plans from the
//!    frontier, so a burst of writes costs one pass.
//!
//! 3. A pass borrows the graph mutably for its whole lifetime, including
//!    while it is suspended on an effect.

mod chrono_graph;
mod id;
mod node;
mod propagation;
mod scheduler;

pub use chrono_graph::ChronoGraph;
pub use id::{ChronoId, Version};
pub use node::{DirtyState, GraphMember, GraphNode, MutationNode, Node, NodeId, NodeKind};
pub use propagation::{Commit, PassState, PropagationPass, PropagationResult, Step};
pub use scheduler::Plan;
