//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so that string
//! order is chronological order. UUIDs are stored as hyphenated lowercase
//! strings; enums as their `strum` names; `skills_wanted` as a JSON array.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use skillswap_core::{
  marketplace::{MatchRequest, MatchStatus, Skill, SkillLevel, SkillRef},
  record::{ActorId, NotificationKind, Participants, Payload, Record, RecordId, Table},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_enum<T: std::str::FromStr>(column: &'static str, s: String) -> Result<T> {
  s.parse().map_err(|_| Error::Decode { column, value: s })
}

// ─── Records ─────────────────────────────────────────────────────────────────

pub const MESSAGE_COLUMNS: &str =
  "id, sender_id, receiver_id, content, read, created_at";

pub const NOTIFICATION_COLUMNS: &str =
  "id, user_id, type, content, read, related_entity_id, created_at";

/// The column list selected for `table`.
pub fn columns(table: Table) -> &'static str {
  match table {
    Table::ChatMessages => MESSAGE_COLUMNS,
    Table::Notifications => NOTIFICATION_COLUMNS,
  }
}

/// The `INSERT` statement and its parameters storing `record` as-is.
pub fn record_row(record: &Record) -> Result<(&'static str, Vec<Value>)> {
  let id = Value::Text(record.id.to_string());
  let read = Value::Integer(record.read.into());
  let at = Value::Text(encode_dt(record.created_at));
  match (&record.participants, &record.payload) {
    (Participants::Direct { sender, receiver }, Payload::Message { content }) => Ok((
      "INSERT INTO chat_messages \
       (id, sender_id, receiver_id, content, read, created_at) \
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      vec![
        id,
        Value::Text(sender.to_string()),
        Value::Text(receiver.to_string()),
        Value::Text(content.clone()),
        read,
        at,
      ],
    )),
    (
      participants,
      Payload::Notification { kind, content, related_entity_id },
    ) => Ok((
      "INSERT INTO notifications \
       (id, user_id, type, content, read, related_entity_id, created_at) \
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      vec![
        id,
        Value::Text(participants.recipient().to_string()),
        Value::Text(kind.as_ref().to_owned()),
        Value::Text(content.clone()),
        read,
        related_entity_id.clone().map_or(Value::Null, Value::Text),
        at,
      ],
    )),
    (Participants::Owner { .. }, Payload::Message { .. }) => {
      Err(Error::NoReceiver(record.id.clone()))
    }
  }
}

/// A row from `chat_messages`, as read from SQLite.
pub struct RawMessage {
  pub id:          String,
  pub sender_id:   String,
  pub receiver_id: String,
  pub content:     String,
  pub read:        bool,
  pub created_at:  String,
}

/// A row from `notifications`, as read from SQLite.
pub struct RawNotification {
  pub id:                String,
  pub user_id:           String,
  pub kind:              String,
  pub content:           String,
  pub read:              bool,
  pub related_entity_id: Option<String>,
  pub created_at:        String,
}

pub enum RawRecord {
  Message(RawMessage),
  Notification(RawNotification),
}

impl RawRecord {
  /// Read one row selected with [`columns`] for `table`.
  pub fn from_row(table: Table, row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(match table {
      Table::ChatMessages => Self::Message(RawMessage {
        id:          row.get(0)?,
        sender_id:   row.get(1)?,
        receiver_id: row.get(2)?,
        content:     row.get(3)?,
        read:        row.get(4)?,
        created_at:  row.get(5)?,
      }),
      Table::Notifications => Self::Notification(RawNotification {
        id:                row.get(0)?,
        user_id:           row.get(1)?,
        kind:              row.get(2)?,
        content:           row.get(3)?,
        read:              row.get(4)?,
        related_entity_id: row.get(5)?,
        created_at:        row.get(6)?,
      }),
    })
  }

  pub fn into_record(self) -> Result<Record> {
    match self {
      Self::Message(m) => Ok(Record {
        id:           RecordId::new(m.id),
        created_at:   decode_dt(&m.created_at)?,
        participants: Participants::direct(
          ActorId::new(m.sender_id),
          ActorId::new(m.receiver_id),
        ),
        read:         m.read,
        payload:      Payload::Message { content: m.content },
      }),
      Self::Notification(n) => {
        let kind: NotificationKind = decode_enum("notifications.type", n.kind)?;
        Ok(Record {
          id:           RecordId::new(n.id),
          created_at:   decode_dt(&n.created_at)?,
          participants: Participants::owner(ActorId::new(n.user_id)),
          read:         n.read,
          payload:      Payload::Notification {
            kind,
            content: n.content,
            related_entity_id: n.related_entity_id,
          },
        })
      }
    }
  }
}

// ─── Skills ──────────────────────────────────────────────────────────────────

pub const SKILL_COLUMNS: &str = "skill_id, owner_id, title, description, \
                                 category, level, skills_wanted, verified, \
                                 created_at";

pub struct RawSkill {
  pub skill_id:      String,
  pub owner_id:      String,
  pub title:         String,
  pub description:   String,
  pub category:      String,
  pub level:         String,
  pub skills_wanted: String,
  pub verified:      bool,
  pub created_at:    String,
}

impl RawSkill {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      skill_id:      row.get(0)?,
      owner_id:      row.get(1)?,
      title:         row.get(2)?,
      description:   row.get(3)?,
      category:      row.get(4)?,
      level:         row.get(5)?,
      skills_wanted: row.get(6)?,
      verified:      row.get(7)?,
      created_at:    row.get(8)?,
    })
  }

  pub fn into_skill(self) -> Result<Skill> {
    let level: SkillLevel = decode_enum("skills.level", self.level)?;
    Ok(Skill {
      skill_id: decode_uuid(&self.skill_id)?,
      owner: ActorId::new(self.owner_id),
      title: self.title,
      description: self.description,
      category: self.category,
      level,
      skills_wanted: serde_json::from_str(&self.skills_wanted)?,
      verified: self.verified,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

// ─── Match requests ──────────────────────────────────────────────────────────

pub const REQUEST_COLUMNS: &str = "request_id, requester_id, recipient_id, \
                                   offered_skill_id, offered_title, \
                                   requested_skill_id, requested_title, \
                                   status, created_at";

pub struct RawMatchRequest {
  pub request_id:         String,
  pub requester_id:       String,
  pub recipient_id:       String,
  pub offered_skill_id:   String,
  pub offered_title:      String,
  pub requested_skill_id: String,
  pub requested_title:    String,
  pub status:             String,
  pub created_at:         String,
}

impl RawMatchRequest {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      request_id:         row.get(0)?,
      requester_id:       row.get(1)?,
      recipient_id:       row.get(2)?,
      offered_skill_id:   row.get(3)?,
      offered_title:      row.get(4)?,
      requested_skill_id: row.get(5)?,
      requested_title:    row.get(6)?,
      status:             row.get(7)?,
      created_at:         row.get(8)?,
    })
  }

  pub fn into_request(self) -> Result<MatchRequest> {
    let status: MatchStatus = decode_enum("match_requests.status", self.status)?;
    Ok(MatchRequest {
      request_id: decode_uuid(&self.request_id)?,
      requester: ActorId::new(self.requester_id),
      recipient: ActorId::new(self.recipient_id),
      skill_offered: SkillRef {
        skill_id: decode_uuid(&self.offered_skill_id)?,
        title:    self.offered_title,
      },
      skill_requested: SkillRef {
        skill_id: decode_uuid(&self.requested_skill_id)?,
        title:    self.requested_title,
      },
      status,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_as_strings() {
    let whole = Utc.timestamp_opt(10, 0).unwrap();
    let fraction = Utc.timestamp_opt(10, 5_000_000).unwrap();
    let later = Utc.timestamp_opt(11, 0).unwrap();
    let mut encoded = vec![encode_dt(later), encode_dt(fraction), encode_dt(whole)];
    encoded.sort();
    assert_eq!(encoded, [encode_dt(whole), encode_dt(fraction), encode_dt(later)]);
    assert_eq!(decode_dt(&encode_dt(fraction)).unwrap(), fraction);
  }

  #[test]
  fn unknown_notification_kind_is_a_decode_error() {
    let raw = RawRecord::Notification(RawNotification {
      id:                "n1".into(),
      user_id:           "a".into(),
      kind:              "carrier_pigeon".into(),
      content:           "hi".into(),
      read:              false,
      related_entity_id: None,
      created_at:        encode_dt(Utc::now()),
    });
    assert!(matches!(
      raw.into_record(),
      Err(Error::Decode { column: "notifications.type", .. })
    ));
  }
}
