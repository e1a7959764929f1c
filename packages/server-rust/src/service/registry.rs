use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use switchyard_core::Identifier;

use super::operation::Operation;

/// Errors raised by [`OperationRegistry`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("operation already registered: {identifier}")]
    DuplicateIdentifier { identifier: Identifier },
}

// ---------------------------------------------------------------------------
// OperationRegistry
// ---------------------------------------------------------------------------

/// Concurrent map of every routable operation, keyed by identifier.
///
/// Backed by a sharded `DashMap`: lookups only contend with writers on the
/// same shard, and no lock is held once a lookup returns. Operations are
/// shared as `Arc<Operation>` so an in-flight call keeps its operation alive
/// even if it is removed concurrently.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: DashMap<Identifier, Arc<Operation>>,
}

impl OperationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            operations: DashMap::new(),
        }
    }

    /// Registers an operation under its identifier.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateIdentifier` if the identifier is
    /// taken; the existing entry is left untouched.
    pub fn register(&self, operation: Arc<Operation>) -> Result<(), RegistryError> {
        match self.operations.entry(operation.identifier.clone()) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateIdentifier {
                identifier: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(operation);
                Ok(())
            }
        }
    }

    /// Removes an operation. Returns `None` when nothing was registered.
    pub fn remove(&self, identifier: &Identifier) -> Option<Arc<Operation>> {
        self.operations.remove(identifier).map(|(_, op)| op)
    }

    /// Retrieves an operation by identifier.
    #[must_use]
    pub fn lookup(&self, identifier: &Identifier) -> Option<Arc<Operation>> {
        self.operations
            .get(identifier)
            .map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.operations.contains_key(identifier)
    }

    /// Snapshot of all operations, sorted by identifier.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Operation>> {
        let mut ops: Vec<_> = self
            .operations
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        ops.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
