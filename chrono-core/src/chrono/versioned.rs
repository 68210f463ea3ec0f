//! Versioned Nodes and References
//!
//! A `VersionedNode` is one immutable point in the history of a logical
//! node. Writing never mutates it: `bump` allocates a successor that shares
//! the identity, carries a newer version, and links back through `previous`.
//! The chain of `previous` links only ever points to older versions, so it
//! cannot cycle, and a version is freed once nothing references it.
//!
//! A `VersionedReference` is the stable, mutable slot that dependents refer
//! to. Each write bumps the current pointee and repoints the slot, leaving the
//! old pointee reachable through the chain for time-travel reads.

use std::sync::Arc;

use serde_json::Value;

use super::atom::{Comparator, Readable, Writable};
use crate::error::ChronoResult;
use crate::graph::{ChronoId, Version};

/// Access to a stable identity.
pub trait Identified {
    fn id(&self) -> ChronoId;
}

/// Access to a position in a version chain.
pub trait Versioned: Identified {
    /// The version stamp of this node.
    fn version(&self) -> Version;

    /// The immediately preceding version of the same identity.
    fn previous(&self) -> Option<&Arc<VersionedNode>>;
}

/// One immutable version of a logical node.
#[derive(Debug)]
pub struct VersionedNode {
    id: ChronoId,
    version: Version,
    previous: Option<Arc<VersionedNode>>,
    value: Value,
}

impl VersionedNode {
    /// Create the first version of a new identity.
    pub fn new(value: Value) -> Arc<Self> {
        Self::first(ChronoId::new(), value, Version::fresh())
    }

    /// Create the first version of an existing identity.
    pub fn first(id: ChronoId, value: Value, version: Version) -> Arc<Self> {
        Arc::new(Self {
            id,
            version,
            previous: None,
            value,
        })
    }

    /// Allocate a successor using a freestanding version stamp.
    pub fn bump(self: &Arc<Self>, value: Value) -> Arc<Self> {
        self.bump_at(value, Version::fresh())
    }

    /// Allocate a successor carrying `version`. `self` is left untouched.
    pub fn bump_at(self: &Arc<Self>, value: Value, version: Version) -> Arc<Self> {
        Arc::new(Self {
            id: self.id,
            version,
            previous: Some(Arc::clone(self)),
            value,
        })
    }

    /// The payload of this version.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The newest version in this chain stamped at or before `version`.
    pub fn as_of(self: &Arc<Self>, version: Version) -> Option<&Arc<Self>> {
        let mut cursor = Some(self);
        while let Some(node) = cursor {
            if node.version <= version {
                return Some(node);
            }
            cursor = node.previous.as_ref();
        }
        None
    }

    /// Iterate the chain from this version back to the first one.
    pub fn history(self: &Arc<Self>) -> History<'_> {
        History { cursor: Some(self) }
    }
}

impl Readable for VersionedNode {
    fn get(&self) -> Option<&Value> {
        Some(&self.value)
    }
}

impl Identified for VersionedNode {
    fn id(&self) -> ChronoId {
        self.id
    }
}

impl Versioned for VersionedNode {
    fn version(&self) -> Version {
        self.version
    }

    fn previous(&self) -> Option<&Arc<VersionedNode>> {
        self.previous.as_ref()
    }
}

/// Iterator over a version chain, newest first.
pub struct History<'a> {
    cursor: Option<&'a Arc<VersionedNode>>,
}

impl<'a> Iterator for History<'a> {
    type Item = &'a Arc<VersionedNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cursor?;
        self.cursor = node.previous.as_ref();
        Some(node)
    }
}

/// A stable slot whose payload is the current version of a node.
#[derive(Debug, Clone)]
pub struct VersionedReference {
    id: ChronoId,
    value: Option<Arc<VersionedNode>>,
    previous: Option<Arc<VersionedNode>>,
    comparator: Option<Comparator>,
}

impl VersionedReference {
    /// Create an empty reference with a new identity.
    pub fn new() -> Self {
        Self {
            id: ChronoId::new(),
            value: None,
            previous: None,
            comparator: None,
        }
    }

    /// Create an empty reference that skips writes equal under `comparator`.
    pub fn observable(comparator: Comparator) -> Self {
        Self {
            comparator: Some(comparator),
            ..Self::new()
        }
    }

    /// The version currently pointed to.
    pub fn current(&self) -> Option<&Arc<VersionedNode>> {
        self.value.as_ref()
    }

    /// The version pointed to before the last write.
    pub fn previous(&self) -> Option<&Arc<VersionedNode>> {
        self.previous.as_ref()
    }

    /// The version stamp of the current pointee.
    pub fn version(&self) -> Option<Version> {
        self.value.as_ref().map(|node| node.version)
    }

    /// The payload as it was at `version`.
    pub fn get_as_of(&self, version: Version) -> Option<&Value> {
        self.value
            .as_ref()
            .and_then(|node| node.as_of(version))
            .map(|node| &node.value)
    }

    /// Write `value` as a version stamped `version`. Returns `true` when the
    /// write was applied.
    ///
    /// An existing pointee is bumped and kept as `previous`; an empty
    /// reference gets a first version sharing the reference's identity.
    pub fn set_at(&mut self, value: Value, version: Version) -> bool {
        if let Some(comparator) = &self.comparator {
            if !comparator.differs(self.get(), &value) {
                return false;
            }
        }
        let next = match self.value.take() {
            Some(current) => {
                let next = current.bump_at(value, version);
                self.previous = Some(current);
                next
            }
            None => VersionedNode::first(self.id, value, version),
        };
        self.value = Some(next);
        true
    }

    /// Number of versions in the chain behind this reference.
    pub fn write_count(&self) -> u64 {
        self.value
            .as_ref()
            .map(|node| node.history().count() as u64)
            .unwrap_or(0)
    }
}

impl Default for VersionedReference {
    fn default() -> Self {
        Self::new()
    }
}

impl Readable for VersionedReference {
    fn get(&self) -> Option<&Value> {
        self.value.as_ref().map(|node| &node.value)
    }
}

impl Writable for VersionedReference {
    fn set(&mut self, value: Value) -> ChronoResult<&mut Self> {
        self.set_at(value, Version::fresh());
        Ok(self)
    }
}

impl Identified for VersionedReference {
    fn id(&self) -> ChronoId {
        self.id
    }
}
