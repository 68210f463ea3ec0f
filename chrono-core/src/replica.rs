//! Replica and Entities
//!
//! A replica is a `ChronoGraph` that tracks entities. An entity is a graph
//! node whose members are its fields: atoms, references and the calculations
//! between them.
//!
//! Entities take part in propagation while they are members of the root
//! graph. `add_entity` makes that permanent. `try_propagate_with_entities`
//! brings entities in for a single pass and sends them away again afterwards,
//! which keeps scratch entities out of the regular passes.

use std::future::Future;
use std::ops::{Deref, DerefMut};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::chrono::{AcceptAll, EffectRequest, EffectResolver, Resolution};
use crate::config::PropagationConfig;
use crate::error::ChronoResult;
use crate::graph::{ChronoGraph, NodeId, PropagationResult};

/// Callback run after a pass with temporarily joined entities, while they
/// are still joined.
pub type Hatch<'a> = &'a mut dyn FnMut(&ChronoGraph, &PropagationResult);

/// A named group of field nodes owned by one graph node.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    node: NodeId,
    name: String,
    fields: IndexMap<String, NodeId>,
}

impl Entity {
    /// The graph node holding the fields.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node behind a field.
    pub fn field(&self, name: &str) -> Option<NodeId> {
        self.fields.get(name).copied()
    }

    /// Every field, in the order they were added.
    pub fn fields(&self) -> &IndexMap<String, NodeId> {
        &self.fields
    }
}

/// A graph with entity bookkeeping. Dereferences to the underlying
/// `ChronoGraph`.
#[derive(Debug, Default)]
pub struct Replica {
    graph: ChronoGraph,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PropagationConfig) -> Self {
        Self {
            graph: ChronoGraph::with_config(config),
        }
    }

    /// Unwrap into the underlying graph.
    pub fn into_inner(self) -> ChronoGraph {
        self.graph
    }

    /// Create an empty entity. It is not part of the replica yet.
    pub fn create_entity(&mut self, name: impl Into<String>) -> ChronoResult<Entity> {
        let name = name.into();
        let node = self.graph.create_graph();
        self.graph.set_label(node, name.clone())?;
        Ok(Entity {
            node,
            name,
            fields: IndexMap::new(),
        })
    }

    /// Move `field` into `entity` under `name`.
    pub fn add_field(
        &mut self,
        entity: &mut Entity,
        name: impl Into<String>,
        field: NodeId,
    ) -> ChronoResult<()> {
        let name = name.into();
        self.graph.enter_graph(field, entity.node)?;
        self.graph
            .set_label(field, format!("{}.{}", entity.name, name))?;
        entity.fields.insert(name, field);
        Ok(())
    }

    /// The current payload of a field, `None` for unknown or empty fields.
    pub fn read_field(&self, entity: &Entity, name: &str) -> Option<&Value> {
        entity.field(name).and_then(|field| self.graph.get(field))
    }

    /// Whether the entity is currently part of the replica.
    pub fn has_entity(&self, entity: &Entity) -> bool {
        self.graph
            .has_node(self.graph.root(), entity.node)
            .unwrap_or(false)
    }

    /// Make the entity part of the replica.
    pub fn add_entity(&mut self, entity: &Entity) -> ChronoResult<()> {
        let root = self.graph.root();
        self.graph.enter_graph(entity.node, root)
    }

    pub fn add_entities(&mut self, entities: &[Entity]) -> ChronoResult<()> {
        entities.iter().try_for_each(|entity| self.add_entity(entity))
    }

    /// Take the entity out of the replica.
    pub fn remove_entity(&mut self, entity: &Entity) -> ChronoResult<()> {
        self.graph.leave_graph(entity.node)
    }

    pub fn remove_entities(&mut self, entities: &[Entity]) -> ChronoResult<()> {
        entities.iter().try_for_each(|entity| self.remove_entity(entity))
    }

    /// Propagate with `entities` temporarily joined to the replica.
    ///
    /// Entities already in the replica stay. The others join for the pass
    /// and leave once `hatch` has seen the result, whether or not the pass
    /// committed. Effects go to `resolver`, or are all accepted without one.
    pub fn try_propagate_with_entities(
        &mut self,
        resolver: Option<&mut dyn EffectResolver>,
        entities: &[Entity],
        hatch: Option<Hatch<'_>>,
    ) -> PropagationResult {
        let joined = self.join_entities(entities)?;

        let result = match resolver {
            Some(resolver) => self.graph.propagate_with(resolver),
            None => self.graph.propagate_with(&mut AcceptAll),
        };
        if let Some(hatch) = hatch {
            hatch(&self.graph, &result);
        }

        self.leave_entities(&joined);
        result
    }

    /// Async counterpart of `try_propagate_with_entities`.
    pub async fn try_propagate_with_entities_async<F, Fut>(
        &mut self,
        resolver: F,
        entities: &[Entity],
        hatch: Option<Hatch<'_>>,
    ) -> PropagationResult
    where
        F: FnMut(EffectRequest) -> Fut,
        Fut: Future<Output = Resolution>,
    {
        let joined = self.join_entities(entities)?;

        let result = self.graph.propagate_async(resolver).await;
        if let Some(hatch) = hatch {
            hatch(&self.graph, &result);
        }

        self.leave_entities(&joined);
        result
    }

    /// Join every entity not already in the replica. Returns the ones that
    /// were joined; on failure those are sent away again.
    fn join_entities(&mut self, entities: &[Entity]) -> ChronoResult<Vec<NodeId>> {
        let root = self.graph.root();
        let mut joined = Vec::new();

        for entity in entities {
            if self.graph.has_node(root, entity.node)? {
                continue;
            }
            if let Err(err) = self.graph.enter_graph(entity.node, root) {
                self.leave_entities(&joined);
                return Err(err);
            }
            joined.push(entity.node);
        }

        debug!(joined = joined.len(), "entities joined for propagation");
        Ok(joined)
    }

    fn leave_entities(&mut self, joined: &[NodeId]) {
        for &node in joined {
            if let Err(err) = self.graph.leave_graph(node) {
                warn!(entity = %node, error = %err, "entity failed to leave the replica");
            }
        }
    }
}

impl Deref for Replica {
    type Target = ChronoGraph;

    fn deref(&self) -> &ChronoGraph {
        &self.graph
    }
}

impl DerefMut for Replica {
    fn deref_mut(&mut self) -> &mut ChronoGraph {
        &mut self.graph
    }
}
