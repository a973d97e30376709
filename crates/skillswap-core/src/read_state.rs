//! Read-state derivations over a reconciled [`Collection`].
//!
//! Everything here is a pure function of the collection; nothing is cached.
//! Conversation summaries are recomputed on every call.

use std::collections::HashMap;

use serde::Serialize;

use crate::{
  collection::Collection,
  record::{ActorId, Record},
  remote::Filter,
};

/// One entry in the chat list: the latest record exchanged with a
/// counterpart and how many of their records the viewer has not read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
  pub counterpart:  ActorId,
  pub last_record:  Record,
  pub unread_count: usize,
}

/// Records sent by `counterpart` to `viewer` that are still unread.
pub fn unread_count_for(
  collection: &Collection,
  viewer: &ActorId,
  counterpart: &ActorId,
) -> usize {
  let filter = Filter::unread_from(counterpart, viewer);
  collection.iter().filter(|r| filter.matches(r)).count()
}

/// Every record addressed to `viewer` that is still unread.
pub fn unread_total(collection: &Collection, viewer: &ActorId) -> usize {
  collection.iter().filter(|r| r.is_unread_by(viewer)).count()
}

/// One summary per counterpart with at least one record, most recent
/// conversation first.
pub fn conversations(
  collection: &Collection,
  viewer: &ActorId,
) -> Vec<ConversationSummary> {
  let mut by_counterpart: HashMap<&ActorId, ConversationSummary> =
    HashMap::new();

  for record in collection.iter() {
    let Some(counterpart) = record.participants.counterpart_of(viewer) else {
      continue;
    };
    let unread = usize::from(record.is_unread_by(viewer));

    by_counterpart
      .entry(counterpart)
      .and_modify(|summary| {
        summary.unread_count += unread;
        if is_newer(record, &summary.last_record) {
          summary.last_record = record.clone();
        }
      })
      .or_insert_with(|| ConversationSummary {
        counterpart:  counterpart.clone(),
        last_record:  record.clone(),
        unread_count: unread,
      });
  }

  let mut summaries: Vec<_> = by_counterpart.into_values().collect();
  summaries.sort_by(|a, b| {
    (b.last_record.created_at, &b.last_record.id)
      .cmp(&(a.last_record.created_at, &a.last_record.id))
      .then_with(|| a.counterpart.cmp(&b.counterpart))
  });
  summaries
}

fn is_newer(a: &Record, b: &Record) -> bool {
  (a.created_at, &a.id) > (b.created_at, &b.id)
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;
  use crate::record::NewRecord;

  fn message(id: &str, secs: i64, from: &str, to: &str) -> Record {
    NewRecord::message(from, to, format!("msg {id}"))
      .into_record(id.into(), Utc.timestamp_opt(secs, 0).unwrap())
  }

  fn collection(records: Vec<Record>) -> Collection {
    let mut c = Collection::new();
    c.merge_snapshot(records);
    c
  }

  #[test]
  fn unread_counts_only_incoming_messages() {
    let c = collection(vec![
      message("1", 1, "b", "a"),
      message("2", 2, "a", "b"),
      message("3", 3, "b", "a"),
      message("4", 4, "c", "a"),
    ]);
    let a = ActorId::from("a");
    assert_eq!(unread_count_for(&c, &a, &"b".into()), 2);
    assert_eq!(unread_count_for(&c, &a, &"c".into()), 1);
    assert_eq!(unread_count_for(&c, &"b".into(), &a), 1);
    assert_eq!(unread_total(&c, &a), 3);
  }

  #[test]
  fn no_records_means_zero_and_no_summary() {
    let c = Collection::new();
    let a = ActorId::from("a");
    assert_eq!(unread_count_for(&c, &a, &"b".into()), 0);
    assert!(conversations(&c, &a).is_empty());
  }

  #[test]
  fn conversations_sorted_by_latest_record() {
    let c = collection(vec![
      message("1", 1, "b", "a"),
      message("2", 5, "a", "c"),
      message("3", 3, "b", "a"),
      message("4", 9, "d", "a"),
      message("5", 2, "x", "y"),
    ]);
    let summaries = conversations(&c, &"a".into());
    let order: Vec<_> =
      summaries.iter().map(|s| s.counterpart.as_str()).collect();
    assert_eq!(order, ["d", "c", "b"]);

    let b = &summaries[2];
    assert_eq!(b.last_record.id.as_str(), "3");
    assert_eq!(b.unread_count, 2);
    assert_eq!(summaries[1].unread_count, 0);
  }
}
