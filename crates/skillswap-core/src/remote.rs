//! The `RemoteCollection` port and supporting query types.
//!
//! The trait is implemented by backends (`skillswap-store-sqlite`, the
//! in-memory [`crate::memory::MemoryBackend`]). Synchronisation code depends on
//! this abstraction, never on a concrete backend or a process-wide client.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::record::{ActorId, NewRecord, Participants, Record, RecordId, Table};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Sort direction over `created_at`. Ties are broken by record id so that
/// every caller sees the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
  #[default]
  Ascending,
  Descending,
}

impl Order {
  pub fn sort(self, records: &mut [Record]) {
    records.sort_by(|a, b| {
      let ord = a
        .created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id));
      match self {
        Self::Ascending => ord,
        Self::Descending => ord.reverse(),
      }
    });
  }
}

/// Parameters for [`RemoteCollection::fetch_where`] and
/// [`RemoteCollection::update_where`]. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
  pub id:          Option<RecordId>,
  /// Sender of a direct record.
  pub sender:      Option<ActorId>,
  /// Receiver of a direct record.
  pub receiver:    Option<ActorId>,
  /// Owner of a single-owner record.
  pub owner:       Option<ActorId>,
  /// Every listed actor must be a participant.
  pub involves:    Vec<ActorId>,
  pub unread_only: bool,
  pub order:       Order,
  pub limit:       Option<usize>,
}

impl Filter {
  /// Records the viewer takes part in, optionally narrowed to a conversation
  /// with `counterpart`.
  pub fn visible_to(viewer: &ActorId, counterpart: Option<&ActorId>) -> Self {
    let mut involves = vec![viewer.clone()];
    involves.extend(counterpart.cloned());
    Self { involves, ..Self::default() }
  }

  /// Unread direct records sent by `sender` to `receiver`.
  pub fn unread_from(sender: &ActorId, receiver: &ActorId) -> Self {
    Self {
      sender: Some(sender.clone()),
      receiver: Some(receiver.clone()),
      unread_only: true,
      ..Self::default()
    }
  }

  /// Unread records owned by `owner`.
  pub fn unread_owned_by(owner: &ActorId) -> Self {
    Self {
      owner: Some(owner.clone()),
      unread_only: true,
      ..Self::default()
    }
  }

  pub fn with_id(id: &RecordId) -> Self {
    Self { id: Some(id.clone()), ..Self::default() }
  }

  pub fn order(mut self, order: Order) -> Self {
    self.order = order;
    self
  }

  pub fn limit(mut self, limit: Option<usize>) -> Self {
    self.limit = limit;
    self
  }

  /// Whether a single record satisfies every predicate. Ordering and limit
  /// are not considered.
  pub fn matches(&self, record: &Record) -> bool {
    if self.id.as_ref().is_some_and(|id| *id != record.id) {
      return false;
    }
    if self.unread_only && record.read {
      return false;
    }
    if !self.involves.iter().all(|a| record.participants.involves(a)) {
      return false;
    }
    match &record.participants {
      Participants::Direct { sender, receiver } => {
        self.owner.is_none()
          && self.sender.as_ref().is_none_or(|s| s == sender)
          && self.receiver.as_ref().is_none_or(|r| r == receiver)
      }
      Participants::Owner { owner } => {
        self.sender.is_none()
          && self.receiver.is_none()
          && self.owner.as_ref().is_none_or(|o| o == owner)
      }
    }
  }

  /// Filter, sort, and truncate `records`.
  pub fn select<'a>(
    &self,
    records: impl IntoIterator<Item = &'a Record>,
  ) -> Vec<Record> {
    let mut out: Vec<Record> = records
      .into_iter()
      .filter(|r| self.matches(r))
      .cloned()
      .collect();
    self.order.sort(&mut out);
    if let Some(limit) = self.limit {
      out.truncate(limit);
    }
    out
  }
}

// ─── Mutation ────────────────────────────────────────────────────────────────

/// The mutations a client may request. Records are otherwise immutable, and
/// the read flag is never cleared once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Patch {
  MarkRead,
}

impl Patch {
  /// Apply the patch to `record`; returns whether anything changed.
  pub fn apply(self, record: &mut Record) -> bool {
    match self {
      Self::MarkRead => !std::mem::replace(&mut record.read, true),
    }
  }
}

// ─── Change feed ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
  Insert,
  Update,
  Delete,
}

/// A row-level change published by the backend after a committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
  pub table:  Table,
  pub kind:   ChangeKind,
  pub record: Record,
}

impl ChangeEvent {
  pub fn insert(record: Record) -> Self {
    Self { table: record.payload.table(), kind: ChangeKind::Insert, record }
  }

  pub fn update(record: Record) -> Self {
    Self { table: record.payload.table(), kind: ChangeKind::Update, record }
  }

  pub fn delete(record: Record) -> Self {
    Self { table: record.payload.table(), kind: ChangeKind::Delete, record }
  }
}

/// A live subscription to one table's change feed.
///
/// Dropping the handle (or calling [`Subscription::unsubscribe`]) releases
/// it. A subscriber that falls behind the feed skips the missed events; no
/// re-fetch is attempted.
#[derive(Debug)]
pub struct Subscription {
  table: Table,
  rx:    broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
  pub fn new(table: Table, rx: broadcast::Receiver<ChangeEvent>) -> Self {
    Self { table, rx }
  }

  pub fn table(&self) -> Table { self.table }

  /// The next event for this table, or `None` once the feed is closed.
  pub async fn next(&mut self) -> Option<ChangeEvent> {
    loop {
      match self.rx.recv().await {
        Ok(event) if event.table == self.table => return Some(event),
        Ok(_) => continue,
        Err(RecvError::Lagged(missed)) => {
          tracing::warn!(
            table = %self.table,
            missed,
            "change feed lagged; missed events are not re-fetched"
          );
        }
        Err(RecvError::Closed) => return None,
      }
    }
  }

  pub fn unsubscribe(self) {}
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Request/response access to the remote record tables plus a change feed.
///
/// All methods return `Send` futures so implementations can be driven from
/// spawned tasks.
pub trait RemoteCollection: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Return every record in `table` matching `filter`, sorted and limited as
  /// the filter asks.
  fn fetch_where<'a>(
    &'a self,
    table: Table,
    filter: &'a Filter,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + 'a;

  /// Persist a new record. The backend assigns `id` and `created_at`, and
  /// publishes an insert event once committed.
  fn insert(
    &self,
    table: Table,
    record: NewRecord,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send + '_;

  /// Apply `patch` to every record in `table` matching `filter` and publish
  /// an update event per changed record. Returns the number changed.
  fn update_where<'a>(
    &'a self,
    table: Table,
    filter: &'a Filter,
    patch: Patch,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// Open a change feed for `table`. Events published after this call
  /// returns are delivered to the subscription.
  fn subscribe(
    &self,
    table: Table,
  ) -> impl Future<Output = Result<Subscription, Self::Error>> + Send + '_;
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;

  fn message(id: &str, secs: i64, from: &str, to: &str, read: bool) -> Record {
    let mut r = NewRecord::message(from, to, format!("msg {id}"))
      .into_record(id.into(), Utc.timestamp_opt(secs, 0).unwrap());
    r.read = read;
    r
  }

  #[test]
  fn visible_to_requires_both_parties() {
    let filter = Filter::visible_to(&"a".into(), Some(&"b".into()));
    assert!(filter.matches(&message("1", 1, "a", "b", false)));
    assert!(filter.matches(&message("2", 2, "b", "a", false)));
    assert!(!filter.matches(&message("3", 3, "a", "c", false)));
  }

  #[test]
  fn unread_from_is_directional() {
    let filter = Filter::unread_from(&"b".into(), &"a".into());
    assert!(filter.matches(&message("1", 1, "b", "a", false)));
    assert!(!filter.matches(&message("2", 2, "a", "b", false)));
    assert!(!filter.matches(&message("3", 3, "b", "a", true)));
  }

  #[test]
  fn owner_filter_never_matches_direct_records() {
    let filter = Filter::unread_owned_by(&"a".into());
    assert!(!filter.matches(&message("1", 1, "b", "a", false)));
  }

  #[test]
  fn select_sorts_and_limits() {
    let records = [
      message("b", 2, "a", "b", false),
      message("c", 3, "a", "b", false),
      message("a", 1, "a", "b", false),
    ];
    let filter = Filter::default().order(Order::Descending).limit(Some(2));
    let ids: Vec<_> = filter
      .select(records.iter())
      .into_iter()
      .map(|r| r.id.to_string())
      .collect();
    assert_eq!(ids, ["c", "b"]);
  }

  #[test]
  fn equal_timestamps_break_ties_by_id() {
    let mut records = vec![
      message("y", 5, "a", "b", false),
      message("x", 5, "a", "b", false),
    ];
    Order::Ascending.sort(&mut records);
    assert_eq!(records[0].id.as_str(), "x");
  }

  #[test]
  fn mark_read_reports_change_once() {
    let mut r = message("1", 1, "b", "a", false);
    assert!(Patch::MarkRead.apply(&mut r));
    assert!(!Patch::MarkRead.apply(&mut r));
    assert!(r.read);
  }

  #[tokio::test]
  async fn subscription_skips_other_tables_and_ends_on_close() {
    let (tx, rx) = broadcast::channel(8);
    let mut sub = Subscription::new(Table::ChatMessages, rx);

    let note = NewRecord::notification("a", Default::default(), "hi", None)
      .into_record("n1".into(), Utc::now());
    tx.send(ChangeEvent::insert(note)).unwrap();
    tx.send(ChangeEvent::insert(message("m1", 1, "a", "b", false)))
      .unwrap();
    drop(tx);

    let event = sub.next().await.expect("message event");
    assert_eq!(event.record.id.as_str(), "m1");
    assert!(sub.next().await.is_none());
  }
}
