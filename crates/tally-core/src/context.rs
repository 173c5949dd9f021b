//! Execution contexts: which node is "current" for each thread of control
//!
//! A context key names a logical thread of control. Each key owns a stack
//! of node ids, top = current. The registry only ever holds ids, never the
//! nodes themselves. Stacks are created on first push and dropped as soon
//! as they become empty.
use crate::error::LifecycleError;
use crate::id::NodeId;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

/// Opaque key of a logical thread of control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    /// Derived from the calling OS thread
    Thread(ThreadId),
    /// Handed out explicitly, e.g. one per simulated fiber in tests
    Explicit(u64),
}

impl ContextKey {
    /// Key of the calling thread
    pub fn current_thread() -> Self {
        ContextKey::Thread(std::thread::current().id())
    }

    /// A key no other caller has been given
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContextKey::Explicit(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ContextKey::Thread(id) => write!(f, "{:?}", id),
            ContextKey::Explicit(n) => write!(f, "ctx-{}", n),
        }
    }
}

type Stacks = HashMap<ContextKey, Vec<NodeId>>;

/// Sharded map from context key to node stack
pub struct ContextRegistry {
    shards: Vec<Mutex<Stacks>>,
}

impl ContextRegistry {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &ContextKey) -> &Mutex<Stacks> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Snapshot of the stack, bottom first
    pub fn current_stack(&self, key: &ContextKey) -> Vec<NodeId> {
        self.shard(key).lock().get(key).cloned().unwrap_or_default()
    }

    pub fn top(&self, key: &ContextKey) -> Option<NodeId> {
        self.shard(key).lock().get(key).and_then(|s| s.last().cloned())
    }

    pub fn depth(&self, key: &ContextKey) -> usize {
        self.shard(key).lock().get(key).map_or(0, |s| s.len())
    }

    pub fn push(&self, key: &ContextKey, id: NodeId) {
        self.shard(key).lock().entry(*key).or_default().push(id);
    }

    pub fn pop(&self, key: &ContextKey) -> Result<NodeId, LifecycleError> {
        let mut stacks = self.shard(key).lock();
        let popped = stacks.get_mut(key).and_then(|s| s.pop());
        if stacks.get(key).is_some_and(|s| s.is_empty()) {
            stacks.remove(key);
        }
        popped.ok_or_else(|| LifecycleError::EmptyContext {
            context: key.to_string(),
        })
    }

    /// Remove `id` and everything above it from the stack of `key`.
    ///
    /// Returns the ids that were above `id`, top first, or `None` when `id`
    /// is not on that stack (nothing is changed then).
    pub fn unwind_to(&self, key: &ContextKey, id: &NodeId) -> Option<Vec<NodeId>> {
        let mut stacks = self.shard(key).lock();
        let stack = stacks.get_mut(key)?;
        let position = stack.iter().rposition(|entry| entry == id)?;

        let mut above = stack.split_off(position + 1);
        stack.truncate(position);
        above.reverse();

        if stack.is_empty() {
            stacks.remove(key);
        }
        Some(above)
    }

    /// Remove `id` and everything above it from every stack it appears on.
    ///
    /// Returns the ids that were above `id`, top first within each stack.
    pub fn unwind_everywhere(&self, id: &NodeId) -> Vec<NodeId> {
        let mut above = Vec::new();
        for shard in &self.shards {
            let mut stacks = shard.lock();
            stacks.retain(|_, stack| {
                if let Some(position) = stack.iter().rposition(|entry| entry == id) {
                    let mut popped = stack.split_off(position + 1);
                    stack.truncate(position);
                    popped.reverse();
                    above.append(&mut popped);
                }
                !stack.is_empty()
            });
        }
        above
    }

    /// Number of contexts with a non-empty stack
    pub fn active_contexts(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new(16)
    }
}
