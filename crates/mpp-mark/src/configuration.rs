use std::collections::BTreeMap;

use mpp_core::errors::ErrorInfo;
use mpp_core::{MarkId, MppError};

use crate::mark::Mark;
use crate::memo::VoxelizedMarkMemo;

/// The set of marks under search, ordered by identifier.
///
/// Identifiers are unique by construction. `Configuration` deliberately does
/// not implement `Clone`: use [`fork`](Self::fork) to obtain an independent
/// copy whose caches start empty.
#[derive(Debug, Default)]
pub struct Configuration {
    marks: BTreeMap<MarkId, VoxelizedMarkMemo>,
    // ascending, for O(1) positional selection
    order: Vec<MarkId>,
    next_id: u64,
}

impl Configuration {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from marks, rejecting duplicate identifiers.
    pub fn from_marks(marks: impl IntoIterator<Item = Mark>) -> Result<Self, MppError> {
        let mut configuration = Self::new();
        for mark in marks {
            configuration.insert(mark)?;
        }
        Ok(configuration)
    }

    /// Number of marks.
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    /// Returns `true` when no marks are present.
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Returns `true` when a mark with `id` is present.
    pub fn contains(&self, id: MarkId) -> bool {
        self.marks.contains_key(&id)
    }

    /// Memo for `id`.
    pub fn get(&self, id: MarkId) -> Option<&VoxelizedMarkMemo> {
        self.marks.get(&id)
    }

    /// Mark for `id`.
    pub fn mark(&self, id: MarkId) -> Option<&Mark> {
        self.marks.get(&id).map(VoxelizedMarkMemo::mark)
    }

    /// Identifiers in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = MarkId> + '_ {
        self.marks.keys().copied()
    }

    /// Identifier at position `index` of the ascending order.
    pub fn id_at(&self, index: usize) -> Option<MarkId> {
        self.order.get(index).copied()
    }

    /// Memos in ascending identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &VoxelizedMarkMemo> + '_ {
        self.marks.values()
    }

    /// Marks in ascending identifier order.
    pub fn marks(&self) -> impl Iterator<Item = &Mark> + '_ {
        self.marks.values().map(VoxelizedMarkMemo::mark)
    }

    /// Smallest identifier never used by this configuration.
    pub fn next_id(&self) -> MarkId {
        MarkId::from_raw(self.next_id)
    }

    /// Adds a mark with an empty cache.
    pub fn insert(&mut self, mark: Mark) -> Result<(), MppError> {
        self.insert_memo(VoxelizedMarkMemo::new(mark))
    }

    /// Adds a memo, keeping any voxelization it already holds.
    pub fn insert_memo(&mut self, memo: VoxelizedMarkMemo) -> Result<(), MppError> {
        let id = memo.id();
        if self.marks.contains_key(&id) {
            return Err(MppError::Inconsistency(
                ErrorInfo::new("duplicate-mark-id", "mark identifier already present")
                    .with_context("mark", id.to_string()),
            ));
        }
        let after = id.as_raw().checked_add(1).ok_or_else(|| {
            MppError::Inconsistency(
                ErrorInfo::new("mark-id-exhausted", "mark identifier leaves no successor")
                    .with_context("mark", id.to_string())
                    .with_hint("renumber marks below u64::MAX before loading"),
            )
        })?;
        self.next_id = self.next_id.max(after);
        if let Err(position) = self.order.binary_search(&id) {
            self.order.insert(position, id);
        }
        self.marks.insert(id, memo);
        Ok(())
    }

    /// Removes and returns the memo for `id`.
    pub fn remove(&mut self, id: MarkId) -> Result<VoxelizedMarkMemo, MppError> {
        let memo = self.marks.remove(&id).ok_or_else(|| missing(id))?;
        if let Ok(position) = self.order.binary_search(&id) {
            self.order.remove(position);
        }
        Ok(memo)
    }

    /// Replaces the geometry of an existing mark through
    /// [`VoxelizedMarkMemo::assign_from`], invalidating its cache.
    pub fn replace_mark(&mut self, mark: Mark) -> Result<(), MppError> {
        let id = mark.id();
        let memo = self.marks.get_mut(&id).ok_or_else(|| missing(id))?;
        memo.assign_from(mark);
        Ok(())
    }

    /// Swaps in a memo for an existing identifier, returning the previous one.
    pub fn exchange_memo(&mut self, memo: VoxelizedMarkMemo) -> Result<VoxelizedMarkMemo, MppError> {
        let id = memo.id();
        let slot = self.marks.get_mut(&id).ok_or_else(|| missing(id))?;
        Ok(std::mem::replace(slot, memo))
    }

    /// Independent deep copy with empty caches.
    pub fn fork(&self) -> Configuration {
        Configuration {
            marks: self
                .marks
                .iter()
                .map(|(id, memo)| (*id, memo.duplicate_fresh()))
                .collect(),
            order: self.order.clone(),
            next_id: self.next_id,
        }
    }

    /// Checks that every key matches its mark, that the positional index lists
    /// the stored identifiers and that `next_id` is fresh.
    pub fn verify(&self) -> Result<(), MppError> {
        if !self.order.iter().eq(self.marks.keys()) {
            return Err(MppError::Inconsistency(
                ErrorInfo::new("mark-order-mismatch", "positional index disagrees with stored marks")
                    .with_context("indexed", self.order.len().to_string())
                    .with_context("stored", self.marks.len().to_string()),
            ));
        }
        for (key, memo) in &self.marks {
            if *key != memo.id() {
                return Err(MppError::Inconsistency(
                    ErrorInfo::new("mark-key-mismatch", "stored key differs from mark identifier")
                        .with_context("key", key.to_string())
                        .with_context("mark", memo.id().to_string()),
                ));
            }
            if key.as_raw() >= self.next_id {
                return Err(MppError::Inconsistency(
                    ErrorInfo::new("stale-next-id", "identifier counter is behind stored marks")
                        .with_context("mark", key.to_string()),
                ));
            }
        }
        Ok(())
    }
}

fn missing(id: MarkId) -> MppError {
    MppError::Inconsistency(
        ErrorInfo::new("missing-mark", "mark identifier not present in configuration")
            .with_context("mark", id.to_string()),
    )
}
