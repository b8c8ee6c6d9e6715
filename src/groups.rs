//! Atomicity-group tracking for JSON batches.
//!
//! The JSON format expresses changesets as a shared `atomicityGroup` key on
//! consecutive requests. The tracker maps request ids to their groups,
//! decides where the synthetic `ChangesetStart`/`ChangesetEnd` events fall,
//! and flattens `dependsOn` lists into leaf request ids while enforcing the
//! reference rules: no self references, no self-group references, no
//! reaching into a foreign group without naming it, and no forward
//! references.

use std::collections::{HashMap, HashSet};

use crate::error::{BatchError, Result};

/// Request-id ↔ group-id bookkeeping for one JSON batch.
#[derive(Debug, Default)]
pub(crate) struct GroupTracker {
    active: Option<String>,
    groups: Vec<(String, Vec<String>)>,
    membership: HashMap<String, String>,
    requests: HashSet<String>,
}

impl GroupTracker {
    /// The currently open group key, if any.
    pub(crate) fn active(&self) -> Option<&str> { self.active.as_deref() }

    /// Whether the next request's group key closes the active group.
    pub(crate) fn is_end(&self, next: Option<&str>) -> bool {
        match (&self.active, next) {
            (Some(active), Some(next)) => active != next,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Open a new group. Group keys share the batch-wide id namespace, so
    /// reusing one (including resuming a closed group) is a duplicate.
    pub(crate) fn open(&mut self, key: &str) -> Result<()> {
        if self.requests.contains(key) || self.groups.iter().any(|(k, _)| k == key) {
            return Err(BatchError::DuplicateContentId { id: key.to_owned() });
        }
        self.groups.push((key.to_owned(), Vec::new()));
        self.active = Some(key.to_owned());
        Ok(())
    }

    /// Close the active group.
    pub(crate) fn close(&mut self) { self.active = None; }

    /// Record an emitted request and its group membership.
    ///
    /// # Errors
    ///
    /// Fails with [`BatchError::DuplicateContentId`] when `id` collides
    /// with a prior request or group key.
    pub(crate) fn record(&mut self, id: &str, group: Option<&str>) -> Result<()> {
        if self.requests.contains(id) || self.groups.iter().any(|(k, _)| k == id) {
            return Err(BatchError::DuplicateContentId { id: id.to_owned() });
        }
        self.requests.insert(id.to_owned());
        if let Some(group) = group {
            self.membership.insert(id.to_owned(), group.to_owned());
            if let Some((_, members)) = self.groups.iter_mut().find(|(k, _)| k == group) {
                members.push(id.to_owned());
            }
        }
        Ok(())
    }

    /// Flatten a `dependsOn` list into leaf request ids.
    ///
    /// Group references expand to their member request ids in order;
    /// request references are kept as-is. Validation fires per entry, in
    /// list order.
    pub(crate) fn flatten(
        &self,
        current_id: &str,
        current_group: Option<&str>,
        depends_on: &[String],
    ) -> Result<Vec<String>> {
        let mut flattened = Vec::new();
        for entry in depends_on {
            if entry == current_id {
                return Err(BatchError::SelfReference {
                    id: current_id.to_owned(),
                });
            }
            if current_group == Some(entry.as_str()) {
                return Err(BatchError::SelfGroupReference {
                    id: current_id.to_owned(),
                    group: entry.clone(),
                });
            }
            if let Some(group) = self.membership.get(entry) {
                if current_group != Some(group.as_str()) {
                    return Err(BatchError::MustReferenceGroup {
                        id: entry.clone(),
                        group: group.clone(),
                    });
                }
                flattened.push(entry.clone());
            } else if self.requests.contains(entry) {
                flattened.push(entry.clone());
            } else if let Some((_, members)) = self.groups.iter().find(|(k, _)| k == entry) {
                flattened.extend(members.iter().cloned());
            } else {
                return Err(BatchError::ForwardReferenceNotAllowed {
                    reference: entry.clone(),
                });
            }
        }
        Ok(flattened)
    }
}
