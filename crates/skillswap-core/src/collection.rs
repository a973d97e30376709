//! The reconciled local collection.
//!
//! Holds one copy of every record the owner has seen, whether it came from
//! the initial fetch or the live change feed. Merging is commutative and
//! idempotent per record id, so the order in which the fetch response and
//! feed events arrive does not affect the result.
//!
//! Deleted ids are remembered until the collection is cleared, so a snapshot
//! or redelivered insert that lands after the delete cannot bring the record
//! back. Record ids are never reused.

use std::collections::{HashMap, HashSet};

use crate::{
  record::{Record, RecordId},
  remote::{ChangeEvent, ChangeKind, Filter},
};

#[derive(Debug, Clone, Default)]
pub struct Collection {
  records: HashMap<RecordId, Record>,
  deleted: HashSet<RecordId>,
}

impl Collection {
  pub fn new() -> Self { Self::default() }

  pub fn len(&self) -> usize { self.records.len() }

  pub fn is_empty(&self) -> bool { self.records.is_empty() }

  pub fn get(&self, id: &RecordId) -> Option<&Record> { self.records.get(id) }

  pub fn clear(&mut self) {
    self.records.clear();
    self.deleted.clear();
  }

  /// Apply one feed event. Returns whether the collection changed.
  ///
  /// Inserts and updates share a single merge rule: a redelivered insert is a
  /// no-op, and an update for an unknown id is kept as an insert.
  pub fn apply(&mut self, event: ChangeEvent) -> bool {
    match event.kind {
      ChangeKind::Insert | ChangeKind::Update => self.merge(event.record),
      ChangeKind::Delete => {
        let removed = self.records.remove(&event.record.id).is_some();
        self.deleted.insert(event.record.id);
        removed
      }
    }
  }

  /// Merge a fetched snapshot. Returns the number of records that changed.
  pub fn merge_snapshot(
    &mut self,
    records: impl IntoIterator<Item = Record>,
  ) -> usize {
    records
      .into_iter()
      .map(|r| self.merge(r))
      .filter(|changed| *changed)
      .count()
  }

  /// Last write wins on every field except `read`, which never goes back to
  /// `false`.
  fn merge(&mut self, mut incoming: Record) -> bool {
    if self.deleted.contains(&incoming.id) {
      return false;
    }
    match self.records.get_mut(&incoming.id) {
      Some(existing) => {
        incoming.read |= existing.read;
        if *existing == incoming {
          false
        } else {
          *existing = incoming;
          true
        }
      }
      None => {
        self.records.insert(incoming.id.clone(), incoming);
        true
      }
    }
  }

  /// Set `read` on the records with the given ids. Returns how many flipped.
  pub fn mark_read_ids<'a>(
    &mut self,
    ids: impl IntoIterator<Item = &'a RecordId>,
  ) -> usize {
    ids
      .into_iter()
      .filter_map(|id| {
        self
          .records
          .get_mut(id)
          .map(|r| !std::mem::replace(&mut r.read, true))
      })
      .filter(|flipped| *flipped)
      .count()
  }

  /// A fresh, ordered snapshot of the records matching `filter`.
  pub fn records(&self, filter: &Filter) -> Vec<Record> {
    filter.select(self.records.values())
  }

  pub fn iter(&self) -> impl Iterator<Item = &Record> { self.records.values() }
}
