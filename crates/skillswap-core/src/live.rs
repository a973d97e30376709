//! [`LiveList`] keeps a local collection in step with a remote table.
//!
//! A session starts with [`LiveList::initialize`]: the list subscribes to the
//! table's change feed, spawns a task that applies feed events, then fetches
//! the initial snapshot and merges it. Because merging is idempotent per
//! record id (see [`Collection`]), events that overtake the fetch and fetch
//! rows that were already delivered as events both converge to the same
//! state.
//!
//! Every session carries a generation number. Tearing down or
//! re-initialising bumps it, and any fetch response, mutate confirmation, or
//! feed event tagged with an older generation is dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
  collection::Collection,
  error::{Error, Result},
  read_state::{self, ConversationSummary},
  record::{ActorId, NewRecord, Record, RecordId, Table},
  remote::{ChangeEvent, Filter, Order, Patch, RemoteCollection, Subscription},
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Which table a list mirrors and how it presents it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListSpec {
  pub table: Table,
  pub order: Order,
  /// Cap on both the initial fetch and the visible records.
  pub limit: Option<usize>,
}

impl ListSpec {
  pub fn new(table: Table, order: Order) -> Self {
    Self { table, order, limit: None }
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStatus {
  /// No session, or the session was torn down.
  #[default]
  Idle,
  /// Initial fetch in flight; feed events are already being applied.
  Loading,
  Ready,
  /// The initial fetch failed. The collection is empty; retry with
  /// [`LiveList::initialize`].
  Failed,
}

// ─── Shared state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Session {
  viewer:      ActorId,
  counterpart: Option<ActorId>,
}

impl Session {
  fn scope(&self) -> Filter {
    Filter::visible_to(&self.viewer, self.counterpart.as_ref())
  }
}

#[derive(Default)]
struct Inner {
  generation: u64,
  session:    Option<Session>,
  collection: Collection,
  status:     LoadStatus,
  pump:       Option<JoinHandle<()>>,
}

impl Inner {
  /// Drop the feed task and everything it produced.
  fn release(&mut self) {
    if let Some(pump) = self.pump.take() {
      pump.abort();
    }
    self.collection.clear();
  }

  /// Apply `event` if it belongs to `generation` and the session's scope.
  /// `None` means the generation is gone and the caller should stop.
  fn apply_scoped(
    &mut self,
    generation: u64,
    table: Table,
    event: ChangeEvent,
  ) -> Option<bool> {
    if self.generation != generation {
      return None;
    }
    let session = self.session.as_ref()?;
    if event.table != table || !session.scope().matches(&event.record) {
      return Some(false);
    }
    Some(self.collection.apply(event))
  }
}

struct Shared {
  inner:    Mutex<Inner>,
  revision: watch::Sender<u64>,
}

impl Shared {
  fn bump(&self) { self.revision.send_modify(|r| *r += 1); }
}

// ─── LiveList ────────────────────────────────────────────────────────────────

/// A local, ordered mirror of the records in one remote table that are
/// visible to the current viewer.
///
/// The collection is owned by this instance and only mutated through it.
/// All methods take `&self`, so the list can be shared (e.g. behind an
/// `Arc`) between the task driving the UI and tasks awaiting mutations.
pub struct LiveList<C> {
  client: Arc<C>,
  spec:   ListSpec,
  shared: Arc<Shared>,
}

impl<C: RemoteCollection> LiveList<C> {
  pub fn new(client: Arc<C>, spec: ListSpec) -> Self {
    let (revision, _) = watch::channel(0);
    Self {
      client,
      spec,
      shared: Arc::new(Shared { inner: Mutex::new(Inner::default()), revision }),
    }
  }

  pub fn spec(&self) -> ListSpec { self.spec }

  pub fn client(&self) -> &Arc<C> { &self.client }

  // ── Lifecycle ─────────────────────────────────────────────────────────

  /// Start a session for `viewer`, optionally narrowed to records shared
  /// with `counterpart`. Any previous session is torn down first.
  ///
  /// On fetch failure the collection is left empty and
  /// [`Error::RemoteUnavailable`] is returned. If the session is torn down
  /// or replaced while the fetch is in flight, the response is discarded and
  /// [`Error::StaleResponse`] is returned.
  pub async fn initialize(
    &self,
    viewer: ActorId,
    counterpart: Option<ActorId>,
  ) -> Result<()> {
    let session = Session { viewer, counterpart };
    let filter = session
      .scope()
      .order(self.spec.order)
      .limit(self.spec.limit);

    let generation = {
      let mut inner = self.shared.inner.lock();
      inner.release();
      inner.generation += 1;
      inner.session = Some(session);
      inner.status = LoadStatus::Loading;
      inner.generation
    };
    self.shared.bump();
    tracing::debug!(table = %self.spec.table, generation, "initialising list");

    let subscription = match self.client.subscribe(self.spec.table).await {
      Ok(subscription) => subscription,
      Err(e) => {
        self.fail(generation);
        return Err(Error::remote(e));
      }
    };
    {
      let mut inner = self.shared.inner.lock();
      if inner.generation != generation {
        return Err(Error::StaleResponse);
      }
      inner.pump = Some(tokio::spawn(pump(
        Arc::clone(&self.shared),
        generation,
        self.spec.table,
        subscription,
      )));
    }

    let fetched = self.client.fetch_where(self.spec.table, &filter).await;

    let mut inner = self.shared.inner.lock();
    if inner.generation != generation {
      tracing::debug!(
        table = %self.spec.table,
        generation,
        "discarding fetch response for a closed session"
      );
      return Err(Error::StaleResponse);
    }
    match fetched {
      Ok(records) => {
        let changed = inner.collection.merge_snapshot(records);
        inner.status = LoadStatus::Ready;
        drop(inner);
        tracing::debug!(table = %self.spec.table, changed, "initial fetch merged");
        self.shared.bump();
        Ok(())
      }
      Err(e) => {
        drop(inner);
        self.fail(generation);
        tracing::warn!(table = %self.spec.table, error = %e, "initial fetch failed");
        Err(Error::remote(e))
      }
    }
  }

  fn fail(&self, generation: u64) {
    let mut inner = self.shared.inner.lock();
    if inner.generation == generation {
      inner.release();
      inner.status = LoadStatus::Failed;
      drop(inner);
      self.shared.bump();
    }
  }

  /// Release the subscription and discard the collection. Any response still
  /// in flight for the current session is dropped when it arrives.
  pub fn teardown(&self) {
    let mut inner = self.shared.inner.lock();
    inner.generation += 1;
    inner.release();
    inner.session = None;
    inner.status = LoadStatus::Idle;
    drop(inner);
    self.shared.bump();
  }

  // ── Events ────────────────────────────────────────────────────────────

  /// Apply a change event to the current session. Events outside the
  /// session's table or scope are ignored. Returns whether anything changed.
  pub fn apply_event(&self, event: ChangeEvent) -> bool {
    let mut inner = self.shared.inner.lock();
    let generation = inner.generation;
    let changed = inner
      .apply_scoped(generation, self.spec.table, event)
      .unwrap_or(false);
    drop(inner);
    if changed {
      self.shared.bump();
    }
    changed
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  pub fn viewer(&self) -> Option<ActorId> {
    self.shared.inner.lock().session.as_ref().map(|s| s.viewer.clone())
  }

  /// The counterpart the session is narrowed to, if any.
  pub fn counterpart(&self) -> Option<ActorId> {
    let inner = self.shared.inner.lock();
    inner.session.as_ref().and_then(|s| s.counterpart.clone())
  }

  pub fn status(&self) -> LoadStatus { self.shared.inner.lock().status }

  /// Number of records held locally, regardless of scope narrowing.
  pub fn len(&self) -> usize { self.shared.inner.lock().collection.len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// A fresh ordered snapshot of the records visible to the viewer, narrowed
  /// to `counterpart` if given (in addition to the session's own narrowing).
  /// Empty when there is no session.
  pub fn visible_records(&self, counterpart: Option<&ActorId>) -> Vec<Record> {
    let inner = self.shared.inner.lock();
    let Some(session) = &inner.session else {
      return Vec::new();
    };
    let mut filter = session
      .scope()
      .order(self.spec.order)
      .limit(self.spec.limit);
    filter.involves.extend(counterpart.cloned());
    inner.collection.records(&filter)
  }

  pub fn get(&self, id: &RecordId) -> Option<Record> {
    self.shared.inner.lock().collection.get(id).cloned()
  }

  /// Unread records sent to the viewer by `counterpart`.
  pub fn unread_count_for(&self, counterpart: &ActorId) -> usize {
    let inner = self.shared.inner.lock();
    match &inner.session {
      Some(s) => {
        read_state::unread_count_for(&inner.collection, &s.viewer, counterpart)
      }
      None => 0,
    }
  }

  /// Every unread record addressed to the viewer.
  pub fn unread_count(&self) -> usize {
    let inner = self.shared.inner.lock();
    match &inner.session {
      Some(s) => read_state::unread_total(&inner.collection, &s.viewer),
      None => 0,
    }
  }

  pub fn conversations(&self) -> Vec<ConversationSummary> {
    let inner = self.shared.inner.lock();
    match &inner.session {
      Some(s) => read_state::conversations(&inner.collection, &s.viewer),
      None => Vec::new(),
    }
  }

  /// A receiver whose value increments on every local change.
  pub fn changes(&self) -> watch::Receiver<u64> { self.shared.revision.subscribe() }

  /// Wait until `pred` holds, re-checking after every local change.
  pub async fn wait_until(&self, mut pred: impl FnMut(&Self) -> bool) {
    let mut rx = self.changes();
    while !pred(self) {
      if rx.changed().await.is_err() {
        return;
      }
    }
  }

  // ── Mutations ─────────────────────────────────────────────────────────

  fn current(&self) -> Result<(u64, Session)> {
    let inner = self.shared.inner.lock();
    let session = inner.session.clone().ok_or(Error::NotAuthenticated)?;
    Ok((inner.generation, session))
  }

  /// Persist `record` and, once the backend confirms it, apply the
  /// confirmed copy locally. Nothing is inserted locally before confirmation.
  pub async fn insert(&self, record: NewRecord) -> Result<Record> {
    let (generation, _) = self.current()?;
    let confirmed = self
      .client
      .insert(self.spec.table, record)
      .await
      .map_err(Error::remote)?;

    let changed = self.shared.inner.lock().apply_scoped(
      generation,
      self.spec.table,
      ChangeEvent::insert(confirmed.clone()),
    );
    if changed == Some(true) {
      self.shared.bump();
    }
    Ok(confirmed)
  }

  /// Mark every unread record sent by `counterpart` to the viewer as read.
  /// Returns how many records changed; `0` (with no remote call) when
  /// nothing is unread.
  pub async fn mark_read(&self, counterpart: &ActorId) -> Result<usize> {
    let (_, session) = self.current()?;
    self
      .mark_read_matching(Filter::unread_from(counterpart, &session.viewer))
      .await
  }

  /// Mark every unread record owned by the viewer as read.
  pub async fn mark_all_read(&self) -> Result<usize> {
    let (_, session) = self.current()?;
    self
      .mark_read_matching(Filter::unread_owned_by(&session.viewer))
      .await
  }

  /// Mark a single record addressed to the viewer as read.
  pub async fn mark_one_read(&self, id: &RecordId) -> Result<usize> {
    let (_, session) = self.current()?;
    let record = self
      .get(id)
      .filter(|r| r.participants.recipient() == &session.viewer)
      .ok_or_else(|| Error::NotFound(format!("record {id}")))?;
    if record.read {
      return Ok(0);
    }
    let filter = Filter { unread_only: true, ..Filter::with_id(id) };
    self.mark_read_matching(filter).await
  }

  /// Mark read remotely, then flip locally only the records that were
  /// unread when the request was issued. Records that arrive while the
  /// request is in flight are left to the update events of the feed.
  async fn mark_read_matching(&self, filter: Filter) -> Result<usize> {
    let (generation, pending) = {
      let inner = self.shared.inner.lock();
      let pending: Vec<RecordId> = inner
        .collection
        .iter()
        .filter(|r| filter.matches(r))
        .map(|r| r.id.clone())
        .collect();
      if pending.is_empty() {
        return Ok(0);
      }
      (inner.generation, pending)
    };

    let marked = self
      .client
      .update_where(self.spec.table, &filter, Patch::MarkRead)
      .await
      .map_err(Error::remote)?;

    let mut inner = self.shared.inner.lock();
    if inner.generation != generation {
      return Err(Error::StaleResponse);
    }
    let flipped = inner.collection.mark_read_ids(&pending);
    drop(inner);
    if flipped > 0 {
      self.shared.bump();
    }
    tracing::debug!(table = %self.spec.table, marked, flipped, "marked read");
    Ok(marked.max(flipped))
  }
}

impl<C> Drop for LiveList<C> {
  fn drop(&mut self) {
    let mut inner = self.shared.inner.lock();
    inner.generation += 1;
    if let Some(pump) = inner.pump.take() {
      pump.abort();
    }
  }
}

/// Feed task: applies events until the feed closes or the generation moves
/// on.
async fn pump(
  shared: Arc<Shared>,
  generation: u64,
  table: Table,
  mut subscription: Subscription,
) {
  while let Some(event) = subscription.next().await {
    let applied = shared.inner.lock().apply_scoped(generation, table, event);
    match applied {
      None => break,
      Some(true) => shared.bump(),
      Some(false) => {}
    }
  }
  tracing::debug!(%table, generation, "change feed task finished");
}
