//! In-progress node storage
//!
//! Nodes are sharded by id and each one sits behind its own mutex, so work
//! on one test never waits for work on another. A shard lock is only held
//! long enough to clone the node handle out of the map.
use crate::error::LifecycleError;
use crate::id::NodeId;
use crate::node::{Node, NodeKind};
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A node that has been taken out of storage leaves `Sealed` behind, so a
/// caller still holding the handle observes it as finished.
enum Cell {
    Live(Node),
    Sealed,
}

type Handle = Arc<Mutex<Cell>>;

pub struct Storage {
    shards: Vec<RwLock<HashMap<NodeId, Handle>>>,
}

impl Storage {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, id: &NodeId) -> &RwLock<HashMap<NodeId, Handle>> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn handle(&self, id: &NodeId) -> Result<Handle, LifecycleError> {
        self.shard(id)
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))
    }

    /// Store a new node. An id that is still in progress is never replaced.
    pub fn insert(&self, id: NodeId, node: Node) -> Result<(), LifecycleError> {
        let mut shard = self.shard(&id).write();
        if shard.contains_key(&id) {
            return Err(LifecycleError::DuplicateId(id));
        }
        shard.insert(id, Arc::new(Mutex::new(Cell::Live(node))));
        Ok(())
    }

    /// Run `f` against the node while holding its lock
    pub fn with<R>(
        &self,
        id: &NodeId,
        f: impl FnOnce(&mut Node) -> Result<R, LifecycleError>,
    ) -> Result<R, LifecycleError> {
        let handle = self.handle(id)?;
        let mut cell = handle.lock();
        match &mut *cell {
            Cell::Live(node) => f(node),
            Cell::Sealed => Err(LifecycleError::ImmutableNode(id.clone())),
        }
    }

    pub fn kind(&self, id: &NodeId) -> Result<NodeKind, LifecycleError> {
        self.with(id, |node| Ok(node.kind()))
    }

    /// Take the node out of storage, provided it is of the expected kind.
    ///
    /// The node is sealed under its own lock before it leaves the map, so
    /// no mutation can land on it after this returns.
    pub fn take(&self, id: &NodeId, expected: Option<NodeKind>) -> Result<Node, LifecycleError> {
        let handle = self.handle(id)?;
        let node = {
            let mut cell = handle.lock();
            if let (Cell::Live(node), Some(expected)) = (&*cell, expected) {
                if node.kind() != expected {
                    return Err(LifecycleError::WrongKind {
                        id: id.clone(),
                        expected: expected.as_str(),
                        actual: node.kind().as_str(),
                    });
                }
            }
            match std::mem::replace(&mut *cell, Cell::Sealed) {
                Cell::Live(node) => node,
                Cell::Sealed => return Err(LifecycleError::ImmutableNode(id.clone())),
            }
        };

        let mut shard = self.shard(id).write();
        if shard.get(id).is_some_and(|h| Arc::ptr_eq(h, &handle)) {
            shard.remove(id);
        }
        Ok(node)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.shard(id).read().contains_key(id)
    }

    /// Number of nodes in progress
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::StepNode;
    use tally_model::{Parameter, StepResult};

    fn step(uuid: &str) -> Node {
        Node::Step(StepNode {
            result: StepResult::new(uuid, uuid),
            children: Vec::new(),
            parent: None,
        })
    }

    #[test]
    fn test_insert_and_get() {
        let storage = Storage::new(4);
        let id = NodeId::from("s1");
        storage.insert(id.clone(), step("s1")).unwrap();

        assert_eq!(storage.kind(&id).unwrap(), NodeKind::Step);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_duplicate_id_keeps_original() {
        let storage = Storage::default();
        let id = NodeId::from("s1");
        storage.insert(id.clone(), step("s1")).unwrap();
        storage
            .with(&id, |n| n.add_parameter(Parameter::new("a", "1")))
            .unwrap();

        let err = storage.insert(id.clone(), step("s1")).unwrap_err();
        assert_eq!(err, LifecycleError::DuplicateId(id.clone()));

        let Node::Step(node) = storage.take(&id, None).unwrap() else {
            panic!("not a step")
        };
        assert_eq!(node.result.parameters.len(), 1);
    }

    #[test]
    fn test_take_removes_node() {
        let storage = Storage::default();
        let id = NodeId::from("s1");
        storage.insert(id.clone(), step("s1")).unwrap();

        storage.take(&id, Some(NodeKind::Step)).unwrap();
        assert!(!storage.contains(&id));
        assert_eq!(storage.take(&id, None).unwrap_err(), LifecycleError::NotFound(id));
    }

    #[test]
    fn test_take_checks_kind() {
        let storage = Storage::default();
        let id = NodeId::from("s1");
        storage.insert(id.clone(), step("s1")).unwrap();

        let err = storage.take(&id, Some(NodeKind::Test)).unwrap_err();
        assert!(matches!(err, LifecycleError::WrongKind { actual: "step", .. }));
        assert!(storage.contains(&id));
    }

    #[test]
    fn test_missing_node() {
        let storage = Storage::default();
        let id = NodeId::from("nope");
        let err = storage.with(&id, |_| Ok(())).unwrap_err();
        assert_eq!(err, LifecycleError::NotFound(id));
    }
}
