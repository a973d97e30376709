//! [`SqliteStore`], the SQLite implementation of [`RemoteCollection`] and
//! [`Marketplace`].

use std::{path::Path, sync::Arc};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use tokio::sync::broadcast;
use uuid::Uuid;

use skillswap_core::{
  marketplace::{
    Direction, Marketplace, MatchRequest, MatchStatus, NewMatchRequest,
    NewSkill, Skill, SkillQuery, StatusUpdate,
  },
  record::{ActorId, NewRecord, Record, RecordId, Table},
  remote::{ChangeEvent, Filter, Order, Patch, RemoteCollection, Subscription},
};

use crate::{
  Error, Result,
  encode::{
    REQUEST_COLUMNS, RawMatchRequest, RawRecord, RawSkill, SKILL_COLUMNS,
    columns, encode_dt, encode_uuid, record_row,
  },
  query::{order_clause, skill_where, where_clause},
  schema::SCHEMA,
};

const FEED_CAPACITY: usize = 256;

struct Feeds {
  chat:          broadcast::Sender<ChangeEvent>,
  notifications: broadcast::Sender<ChangeEvent>,
}

impl Feeds {
  fn new() -> Self {
    Self {
      chat:          broadcast::channel(FEED_CAPACITY).0,
      notifications: broadcast::channel(FEED_CAPACITY).0,
    }
  }

  fn get(&self, table: Table) -> &broadcast::Sender<ChangeEvent> {
    match table {
      Table::ChatMessages => &self.chat,
      Table::Notifications => &self.notifications,
    }
  }

  fn publish(&self, event: ChangeEvent) {
    let table = event.table;
    let id = event.record.id.clone();
    if self.get(table).send(event).is_err() {
      tracing::trace!(%table, %id, "no subscribers for change");
    }
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A SkillSwap backend stored in a single SQLite file.
///
/// Every committed insert or update on a record table is published to the
/// subscribers of that table, in commit order. Cloning is cheap and clones
/// share both the connection and the change feeds.
#[derive(Clone)]
pub struct SqliteStore {
  conn:  tokio_rusqlite::Connection,
  feeds: Arc<Feeds>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory store, as used by the tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(Self { conn, feeds: Arc::new(Feeds::new()) })
  }

  async fn insert_record(&self, record: Record) -> Result<Record> {
    let (sql, params) = record_row(&record)?;
    self
      .conn
      .call(move |conn| {
        conn.execute(sql, rusqlite::params_from_iter(params.iter()))?;
        Ok(())
      })
      .await?;

    self.feeds.publish(ChangeEvent::insert(record.clone()));
    Ok(record)
  }

  /// Store a record exactly as given, keeping its id, timestamp, and read
  /// flag, and publish it. Used to import existing data and to seed tests.
  pub async fn import(&self, record: Record) -> Result<Record> {
    self.insert_record(record).await
  }
}

// ─── RemoteCollection impl ───────────────────────────────────────────────────

impl RemoteCollection for SqliteStore {
  type Error = Error;

  async fn fetch_where(&self, table: Table, filter: &Filter) -> Result<Vec<Record>> {
    let clause = where_clause(table, filter);
    let sql = format!(
      "SELECT {} FROM {} WHERE {} {}",
      columns(table),
      table.as_ref(),
      clause.sql,
      order_clause(filter),
    );

    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(clause.params.iter()), |row| {
            RawRecord::from_row(table, row)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_record).collect()
  }

  async fn insert(&self, table: Table, record: NewRecord) -> Result<Record> {
    let payload = record.payload.table();
    if payload != table {
      return Err(Error::WrongTable { table, payload });
    }
    self
      .insert_record(record.into_record(RecordId::generate(), Utc::now()))
      .await
  }

  async fn update_where(
    &self,
    table: Table,
    filter: &Filter,
    patch: Patch,
  ) -> Result<usize> {
    // Only rows the patch actually changes are written and published.
    let (set, unchanged) = match patch {
      Patch::MarkRead => ("read = 1", "read = 0"),
      _ => return Err(Error::UnsupportedPatch(patch)),
    };
    let mut clause = where_clause(table, filter);
    clause.sql = format!("({}) AND {unchanged}", clause.sql);
    let select = format!(
      "SELECT {} FROM {} WHERE {}",
      columns(table),
      table.as_ref(),
      clause.sql,
    );
    let update = format!(
      "UPDATE {} SET {set} WHERE {}",
      table.as_ref(),
      clause.sql,
    );

    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let rows = {
          let mut stmt = tx.prepare(&select)?;
          stmt
            .query_map(rusqlite::params_from_iter(clause.params.iter()), |row| {
              RawRecord::from_row(table, row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute(&update, rusqlite::params_from_iter(clause.params.iter()))?;
        tx.commit()?;
        Ok(rows)
      })
      .await?;

    let mut changed = raws
      .into_iter()
      .map(RawRecord::into_record)
      .collect::<Result<Vec<_>>>()?;
    Order::Ascending.sort(&mut changed);
    let count = changed.len();
    for mut record in changed {
      patch.apply(&mut record);
      self.feeds.publish(ChangeEvent::update(record));
    }
    tracing::debug!(%table, count, "records marked read");
    Ok(count)
  }

  async fn subscribe(&self, table: Table) -> Result<Subscription> {
    Ok(Subscription::new(table, self.feeds.get(table).subscribe()))
  }
}

// ─── Marketplace impl ────────────────────────────────────────────────────────

impl Marketplace for SqliteStore {
  type Error = Error;

  async fn list_skills(&self, query: &SkillQuery) -> Result<Vec<Skill>> {
    let clause = skill_where(query);

    let raws: Vec<RawSkill> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SKILL_COLUMNS} FROM skills WHERE {} \
           ORDER BY created_at DESC, skill_id DESC",
          clause.sql
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params_from_iter(clause.params.iter()),
            RawSkill::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSkill::into_skill).collect()
  }

  async fn get_skill(&self, skill_id: Uuid) -> Result<Option<Skill>> {
    let id_str = encode_uuid(skill_id);

    let raw: Option<RawSkill> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {SKILL_COLUMNS} FROM skills WHERE skill_id = ?1"),
              rusqlite::params![id_str],
              RawSkill::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSkill::into_skill).transpose()
  }

  async fn add_skill(&self, skill: NewSkill) -> Result<Skill> {
    let skill = skill.into_skill(Uuid::new_v4(), Utc::now());

    let id_str     = encode_uuid(skill.skill_id);
    let owner      = skill.owner.to_string();
    let title      = skill.title.clone();
    let desc       = skill.description.clone();
    let category   = skill.category.clone();
    let level      = skill.level.to_string();
    let wanted     = serde_json::to_string(&skill.skills_wanted)?;
    let at_str     = encode_dt(skill.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO skills \
           (skill_id, owner_id, title, description, category, level, \
            skills_wanted, verified, created_at) \
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
          rusqlite::params![
            id_str, owner, title, desc, category, level, wanted, at_str
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(skill)
  }

  async fn mark_skill_verified(&self, skill_id: Uuid) -> Result<Option<Skill>> {
    let id_str = encode_uuid(skill_id);

    let raw: Option<RawSkill> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "UPDATE skills SET verified = 1 WHERE skill_id = ?1",
          rusqlite::params![id_str],
        )?;
        let raw = tx
          .query_row(
            &format!("SELECT {SKILL_COLUMNS} FROM skills WHERE skill_id = ?1"),
            rusqlite::params![id_str],
            RawSkill::from_row,
          )
          .optional()?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.map(RawSkill::into_skill).transpose()
  }

  async fn create_match_request(
    &self,
    request: NewMatchRequest,
  ) -> Result<MatchRequest> {
    let request = request.into_request(Uuid::new_v4(), Utc::now());

    let id_str        = encode_uuid(request.request_id);
    let requester     = request.requester.to_string();
    let recipient     = request.recipient.to_string();
    let offered_id    = encode_uuid(request.skill_offered.skill_id);
    let offered       = request.skill_offered.title.clone();
    let requested_id  = encode_uuid(request.skill_requested.skill_id);
    let requested     = request.skill_requested.title.clone();
    let status        = request.status.to_string();
    let at_str        = encode_dt(request.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO match_requests \
           (request_id, requester_id, recipient_id, offered_skill_id, \
            offered_title, requested_skill_id, requested_title, status, \
            created_at) \
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            id_str,
            requester,
            recipient,
            offered_id,
            offered,
            requested_id,
            requested,
            status,
            at_str
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(request)
  }

  async fn get_match_request(&self, request_id: Uuid) -> Result<Option<MatchRequest>> {
    let id_str = encode_uuid(request_id);

    let raw: Option<RawMatchRequest> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {REQUEST_COLUMNS} FROM match_requests WHERE request_id = ?1"
              ),
              rusqlite::params![id_str],
              RawMatchRequest::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawMatchRequest::into_request).transpose()
  }

  async fn list_match_requests(
    &self,
    viewer: ActorId,
    direction: Direction,
  ) -> Result<Vec<MatchRequest>> {
    let column = match direction {
      Direction::Incoming => "recipient_id",
      Direction::Outgoing => "requester_id",
    };
    let sql = format!(
      "SELECT {REQUEST_COLUMNS} FROM match_requests WHERE {column} = ?1 \
       ORDER BY created_at DESC, request_id DESC"
    );
    let viewer = viewer.to_string();

    let raws: Vec<RawMatchRequest> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![viewer], RawMatchRequest::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMatchRequest::into_request).collect()
  }

  async fn set_match_status(
    &self,
    request_id: Uuid,
    from: MatchStatus,
    to: MatchStatus,
  ) -> Result<StatusUpdate> {
    let id_str = encode_uuid(request_id);
    let from = from.to_string();
    let to = to.to_string();

    let (changed, raw): (usize, Option<RawMatchRequest>) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
          "UPDATE match_requests SET status = ?3 \
           WHERE request_id = ?1 AND status = ?2",
          rusqlite::params![id_str, from, to],
        )?;
        let raw = tx
          .query_row(
            &format!(
              "SELECT {REQUEST_COLUMNS} FROM match_requests WHERE request_id = ?1"
            ),
            rusqlite::params![id_str],
            RawMatchRequest::from_row,
          )
          .optional()?;
        tx.commit()?;
        Ok((changed, raw))
      })
      .await?;

    let Some(raw) = raw else {
      return Ok(StatusUpdate::Missing);
    };
    let request = raw.into_request()?;
    Ok(if changed == 0 {
      StatusUpdate::Conflict(request.status)
    } else {
      StatusUpdate::Applied(request)
    })
  }
}
