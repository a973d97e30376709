//! [`MemoryBackend`], an in-process implementation of both ports.
//!
//! Used as the substitute collaborator in tests and for running the
//! synchroniser without a database. Besides plain storage it can simulate an
//! outage ([`MemoryBackend::set_unavailable`]) and hold fetch responses back
//! ([`MemoryBackend::pause_fetches`]) so interleavings of fetches and feed
//! events can be reproduced deterministically.

use std::{
  collections::HashMap,
  sync::atomic::{AtomicBool, Ordering},
};

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::{
  marketplace::{
    Direction, Marketplace, MatchRequest, MatchStatus, NewMatchRequest,
    NewSkill, Skill, SkillQuery, StatusUpdate,
  },
  record::{ActorId, NewRecord, Record, RecordId, Table},
  remote::{ChangeEvent, Filter, Patch, RemoteCollection, Subscription},
};

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum MemoryError {
  #[error("backend unavailable")]
  Unavailable,

  #[error("a {payload} record cannot be stored in {table}")]
  WrongTable { table: Table, payload: Table },
}

#[derive(Default)]
struct State {
  records:  HashMap<RecordId, Record>,
  skills:   Vec<Skill>,
  requests: Vec<MatchRequest>,
}

pub struct MemoryBackend {
  state:             Mutex<State>,
  chat_feed:         broadcast::Sender<ChangeEvent>,
  notification_feed: broadcast::Sender<ChangeEvent>,
  unavailable:       AtomicBool,
  fetches_paused:    watch::Sender<bool>,
  pending_fetches:   watch::Sender<usize>,
}

impl Default for MemoryBackend {
  fn default() -> Self { Self::new() }
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self {
      state:             Mutex::new(State::default()),
      chat_feed:         broadcast::channel(FEED_CAPACITY).0,
      notification_feed: broadcast::channel(FEED_CAPACITY).0,
      unavailable:       AtomicBool::new(false),
      fetches_paused:    watch::channel(false).0,
      pending_fetches:   watch::channel(0).0,
    }
  }

  fn feed(&self, table: Table) -> &broadcast::Sender<ChangeEvent> {
    match table {
      Table::ChatMessages => &self.chat_feed,
      Table::Notifications => &self.notification_feed,
    }
  }

  fn publish(&self, event: ChangeEvent) {
    // No receivers is not an error: nobody is listening yet.
    let _ = self.feed(event.table).send(event);
  }

  fn check(&self) -> Result<(), MemoryError> {
    if self.unavailable.load(Ordering::SeqCst) {
      Err(MemoryError::Unavailable)
    } else {
      Ok(())
    }
  }

  // ── Test hooks ────────────────────────────────────────────────────────

  /// Store a record as-is without publishing an event, as if it existed
  /// before anyone subscribed.
  pub fn seed(&self, record: Record) {
    self.state.lock().records.insert(record.id.clone(), record);
  }

  /// Store a record as-is and publish it as an insert.
  pub fn seed_live(&self, record: Record) {
    self.seed(record.clone());
    self.publish(ChangeEvent::insert(record));
  }

  /// Make every subsequent call fail with [`MemoryError::Unavailable`].
  pub fn set_unavailable(&self, unavailable: bool) {
    self.unavailable.store(unavailable, Ordering::SeqCst);
  }

  /// Hold fetch responses back until [`MemoryBackend::resume_fetches`]. The
  /// snapshot a held fetch returns is taken when the fetch is issued.
  pub fn pause_fetches(&self) { self.fetches_paused.send_replace(true); }

  pub fn resume_fetches(&self) { self.fetches_paused.send_replace(false); }

  /// Wait until at least `n` fetches are being held back.
  pub async fn wait_for_pending_fetches(&self, n: usize) {
    let mut rx = self.pending_fetches.subscribe();
    let _ = rx.wait_for(|pending| *pending >= n).await;
  }
}

// ─── RemoteCollection impl ───────────────────────────────────────────────────

impl RemoteCollection for MemoryBackend {
  type Error = MemoryError;

  async fn fetch_where(
    &self,
    table: Table,
    filter: &Filter,
  ) -> Result<Vec<Record>, MemoryError> {
    self.check()?;
    let snapshot = {
      let state = self.state.lock();
      filter.select(
        state
          .records
          .values()
          .filter(|r| r.payload.table() == table),
      )
    };

    let paused = *self.fetches_paused.borrow();
    if paused {
      self.pending_fetches.send_modify(|n| *n += 1);
      let mut rx = self.fetches_paused.subscribe();
      let _ = rx.wait_for(|paused| !*paused).await;
      self.pending_fetches.send_modify(|n| *n -= 1);
    }
    Ok(snapshot)
  }

  async fn insert(
    &self,
    table: Table,
    record: NewRecord,
  ) -> Result<Record, MemoryError> {
    self.check()?;
    let payload = record.payload.table();
    if payload != table {
      return Err(MemoryError::WrongTable { table, payload });
    }
    let record = record.into_record(RecordId::generate(), Utc::now());
    self.seed_live(record.clone());
    Ok(record)
  }

  async fn update_where(
    &self,
    table: Table,
    filter: &Filter,
    patch: Patch,
  ) -> Result<usize, MemoryError> {
    self.check()?;
    let changed: Vec<Record> = {
      let mut state = self.state.lock();
      state
        .records
        .values_mut()
        .filter(|r| r.payload.table() == table && filter.matches(r))
        .filter_map(|r| patch.apply(r).then(|| r.clone()))
        .collect()
    };
    let count = changed.len();
    for record in changed {
      self.publish(ChangeEvent::update(record));
    }
    Ok(count)
  }

  async fn subscribe(&self, table: Table) -> Result<Subscription, MemoryError> {
    self.check()?;
    Ok(Subscription::new(table, self.feed(table).subscribe()))
  }
}

// ─── Marketplace impl ────────────────────────────────────────────────────────

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> chrono::DateTime<Utc>) {
  items.sort_by_key(|item| std::cmp::Reverse(key(item)));
}

impl Marketplace for MemoryBackend {
  type Error = MemoryError;

  async fn list_skills(
    &self,
    query: &SkillQuery,
  ) -> Result<Vec<Skill>, MemoryError> {
    self.check()?;
    let mut skills: Vec<Skill> = self
      .state
      .lock()
      .skills
      .iter()
      .filter(|s| query.matches(s))
      .cloned()
      .collect();
    newest_first(&mut skills, |s| s.created_at);
    Ok(skills)
  }

  async fn get_skill(&self, skill_id: Uuid) -> Result<Option<Skill>, MemoryError> {
    self.check()?;
    let state = self.state.lock();
    Ok(state.skills.iter().find(|s| s.skill_id == skill_id).cloned())
  }

  async fn add_skill(&self, skill: NewSkill) -> Result<Skill, MemoryError> {
    self.check()?;
    let skill = skill.into_skill(Uuid::new_v4(), Utc::now());
    self.state.lock().skills.push(skill.clone());
    Ok(skill)
  }

  async fn mark_skill_verified(
    &self,
    skill_id: Uuid,
  ) -> Result<Option<Skill>, MemoryError> {
    self.check()?;
    let mut state = self.state.lock();
    Ok(state.skills.iter_mut().find(|s| s.skill_id == skill_id).map(|s| {
      s.verified = true;
      s.clone()
    }))
  }

  async fn create_match_request(
    &self,
    request: NewMatchRequest,
  ) -> Result<MatchRequest, MemoryError> {
    self.check()?;
    let request = request.into_request(Uuid::new_v4(), Utc::now());
    self.state.lock().requests.push(request.clone());
    Ok(request)
  }

  async fn get_match_request(
    &self,
    request_id: Uuid,
  ) -> Result<Option<MatchRequest>, MemoryError> {
    self.check()?;
    let state = self.state.lock();
    Ok(
      state
        .requests
        .iter()
        .find(|r| r.request_id == request_id)
        .cloned(),
    )
  }

  async fn list_match_requests(
    &self,
    viewer: ActorId,
    direction: Direction,
  ) -> Result<Vec<MatchRequest>, MemoryError> {
    self.check()?;
    let mut requests: Vec<MatchRequest> = self
      .state
      .lock()
      .requests
      .iter()
      .filter(|r| direction.includes(r, &viewer))
      .cloned()
      .collect();
    newest_first(&mut requests, |r| r.created_at);
    Ok(requests)
  }

  async fn set_match_status(
    &self,
    request_id: Uuid,
    from: MatchStatus,
    to: MatchStatus,
  ) -> Result<StatusUpdate, MemoryError> {
    self.check()?;
    let mut state = self.state.lock();
    let Some(request) =
      state.requests.iter_mut().find(|r| r.request_id == request_id)
    else {
      return Ok(StatusUpdate::Missing);
    };
    if request.status != from {
      return Ok(StatusUpdate::Conflict(request.status));
    }
    request.status = to;
    Ok(StatusUpdate::Applied(request.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn insert_publishes_to_subscribers() {
    let backend = MemoryBackend::new();
    let mut sub = backend.subscribe(Table::ChatMessages).await.unwrap();

    let record = backend
      .insert(Table::ChatMessages, NewRecord::message("a", "b", "hi"))
      .await
      .unwrap();
    assert!(!record.read);

    let event = sub.next().await.unwrap();
    assert_eq!(event.record, record);
  }

  #[tokio::test]
  async fn insert_into_wrong_table_is_rejected() {
    let backend = MemoryBackend::new();
    let err = backend
      .insert(Table::Notifications, NewRecord::message("a", "b", "hi"))
      .await
      .unwrap_err();
    assert!(matches!(err, MemoryError::WrongTable { .. }));
  }

  #[tokio::test]
  async fn update_publishes_only_changed_records() {
    let backend = MemoryBackend::new();
    backend
      .insert(Table::ChatMessages, NewRecord::message("b", "a", "one"))
      .await
      .unwrap();
    let mut sub = backend.subscribe(Table::ChatMessages).await.unwrap();

    let filter = Filter::unread_from(&"b".into(), &"a".into());
    let n = backend
      .update_where(Table::ChatMessages, &filter, Patch::MarkRead)
      .await
      .unwrap();
    assert_eq!(n, 1);
    let n = backend
      .update_where(Table::ChatMessages, &filter, Patch::MarkRead)
      .await
      .unwrap();
    assert_eq!(n, 0);

    let event = sub.next().await.unwrap();
    assert!(event.record.read);
    drop(backend);
    assert!(sub.next().await.is_none());
  }

  #[tokio::test]
  async fn unavailable_backend_fails_every_call() {
    let backend = MemoryBackend::new();
    backend.set_unavailable(true);
    assert!(backend.subscribe(Table::ChatMessages).await.is_err());
    assert!(
      backend
        .fetch_where(Table::ChatMessages, &Filter::default())
        .await
        .is_err()
    );
    assert!(backend.list_skills(&SkillQuery::default()).await.is_err());
  }
}
