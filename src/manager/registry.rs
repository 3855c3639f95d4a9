//! Pending-request registry: the per-worker map from request identifier to
//! tracking record.
//!
//! One [`PendingRequests`] instance exists per worker per operation class
//! (blob vs task), so the type parameter keeps a blob request from ever
//! being mistaken for a task request. The registry owns each
//! [`RequestRecord`] from registration until the caller removes it; the
//! blob/task records hold no pointer back -- completions are attributed
//! through the registry and applied to them by the dispatcher.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{OpResult, RequestId};

/// One tracked in-flight operation.
///
/// `target` names the blob or task the request concerns; `context` carries
/// whatever the dispatcher needs to apply the completion side effect (for
/// a blob get, the local destination path).
#[derive(Debug, Clone)]
pub struct RequestRecord<C> {
    /// The identifier the worker will echo back.
    pub id: RequestId,
    /// Identifier of the blob or task this request concerns.
    pub target: String,
    /// Operation context for completion side effects.
    pub context: C,
    /// Current result; `Pending` until a response or transport fault
    /// resolves it, exactly once.
    pub result: OpResult,
}

impl<C> RequestRecord<C> {
    /// A new record in the `Pending` state.
    pub fn new(id: RequestId, target: impl Into<String>, context: C) -> Self {
        Self {
            id,
            target: target.into(),
            context,
            result: OpResult::Pending,
        }
    }
}

/// Registry of outstanding requests for one operation class on one worker.
///
/// # Examples
///
/// ```
/// use batchswarm::manager::registry::{PendingRequests, RequestRecord};
/// use batchswarm::{OpResult, RequestId};
///
/// let mut registry: PendingRequests<()> = PendingRequests::new();
/// registry
///     .register(RequestRecord::new(RequestId(1), "abc123", ()))
///     .unwrap();
/// assert_eq!(registry.pending().count(), 1);
///
/// registry.resolve(RequestId(1), OpResult::Success);
/// assert_eq!(registry.pending().count(), 0);
/// assert!(registry.get(RequestId(1)).is_some()); // retained until removed
/// ```
#[derive(Debug)]
pub struct PendingRequests<C> {
    records: HashMap<u64, RequestRecord<C>>,
}

impl<C> Default for PendingRequests<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> PendingRequests<C> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Inserts a new record keyed by its identifier.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateRequest`] if a record with the same identifier is
    /// still registered, resolved or not.
    pub fn register(&mut self, record: RequestRecord<C>) -> Result<()> {
        if self.records.contains_key(&record.id.0) {
            return Err(Error::DuplicateRequest { id: record.id });
        }
        self.records.insert(record.id.0, record);
        Ok(())
    }

    /// Sets the record's result and returns a reference to it. The record
    /// stays registered so the caller can inspect the terminal result
    /// before discarding it with [`remove`](Self::remove).
    ///
    /// Returns `None` for an unknown identifier (already removed, or never
    /// issued); the dispatcher logs and drops those.
    pub fn resolve(&mut self, id: RequestId, result: OpResult) -> Option<&RequestRecord<C>> {
        let record = self.records.get_mut(&id.0)?;
        record.result = result;
        Some(record)
    }

    /// Removes and returns a record.
    pub fn remove(&mut self, id: RequestId) -> Option<RequestRecord<C>> {
        self.records.remove(&id.0)
    }

    /// Looks up a record without touching it.
    pub fn get(&self, id: RequestId) -> Option<&RequestRecord<C>> {
        self.records.get(&id.0)
    }

    /// Returns `true` if the identifier is registered (any result).
    pub fn contains(&self, id: RequestId) -> bool {
        self.records.contains_key(&id.0)
    }

    /// Lazy, restartable walk over the records still `Pending`.
    pub fn pending(&self) -> impl Iterator<Item = &RequestRecord<C>> {
        self.records.values().filter(|r| r.result.is_pending())
    }

    /// Returns `true` while at least one record is `Pending`.
    pub fn has_pending(&self) -> bool {
        self.pending().next().is_some()
    }

    /// The in-flight record for a target, if one exists. Enforcing the
    /// at-most-one-outstanding-per-target invariant reduces to checking
    /// this before issuing.
    pub fn pending_for(&self, target: &str) -> Option<&RequestRecord<C>> {
        self.pending().find(|r| r.target == target)
    }

    /// Resolves every pending record to the given result, returning the
    /// identifiers affected. Used when the worker's connection dies.
    pub fn resolve_all_pending(&mut self, result: OpResult) -> Vec<RequestId> {
        let mut resolved = Vec::new();
        for record in self.records.values_mut() {
            if record.result.is_pending() {
                record.result = result;
                resolved.push(record.id);
            }
        }
        resolved
    }

    /// Removes every record with a terminal result, returning them for
    /// inspection.
    pub fn drain_terminal(&mut self) -> Vec<RequestRecord<C>> {
        let terminal: Vec<u64> = self
            .records
            .iter()
            .filter(|(_, r)| r.result.is_terminal())
            .map(|(key, _)| *key)
            .collect();
        terminal
            .into_iter()
            .filter_map(|key| self.records.remove(&key))
            .collect()
    }

    /// Number of records registered, pending or resolved.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when no records are registered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
