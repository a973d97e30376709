//! Record types: the unit of data kept in sync with the backend.
//!
//! A record is a timestamped, participant-tagged item: a chat message or a
//! notification. Records are immutable once written except for their `read`
//! flag, which only ever moves from `false` to `true`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// An opaque user identifier issued by the authentication provider.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ActorId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ActorId {
  fn from(s: &str) -> Self { Self::new(s) }
}

/// Refuse an operation up front when no viewer is signed in.
pub fn require_viewer(viewer: Option<&ActorId>) -> crate::Result<&ActorId> {
  viewer.ok_or(crate::Error::NotAuthenticated)
}

/// An opaque record identifier assigned by the backend. Stable for the
/// lifetime of the record.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  /// A fresh random identifier, as assigned by the bundled adapters.
  pub fn generate() -> Self { Self(uuid::Uuid::new_v4().to_string()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for RecordId {
  fn from(s: &str) -> Self { Self::new(s) }
}

// ─── Tables ──────────────────────────────────────────────────────────────────

/// The remote tables holding records.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
  EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Table {
  ChatMessages,
  Notifications,
}

// ─── Participants ────────────────────────────────────────────────────────────

/// Who a record is visible to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Participants {
  /// A two-party record, e.g. a chat message.
  Direct { sender: ActorId, receiver: ActorId },
  /// A record owned by a single user, e.g. a notification.
  Owner { owner: ActorId },
}

impl Participants {
  pub fn direct(sender: impl Into<ActorId>, receiver: impl Into<ActorId>) -> Self {
    Self::Direct { sender: sender.into(), receiver: receiver.into() }
  }

  pub fn owner(owner: impl Into<ActorId>) -> Self {
    Self::Owner { owner: owner.into() }
  }

  pub fn involves(&self, actor: &ActorId) -> bool {
    match self {
      Self::Direct { sender, receiver } => sender == actor || receiver == actor,
      Self::Owner { owner } => owner == actor,
    }
  }

  /// The other party of a direct record, seen from `viewer`. `None` for
  /// owner records and for records the viewer is not part of.
  pub fn counterpart_of(&self, viewer: &ActorId) -> Option<&ActorId> {
    match self {
      Self::Direct { sender, receiver } if sender == viewer => Some(receiver),
      Self::Direct { sender, receiver } if receiver == viewer => Some(sender),
      _ => None,
    }
  }

  pub fn sender(&self) -> Option<&ActorId> {
    match self {
      Self::Direct { sender, .. } => Some(sender),
      Self::Owner { .. } => None,
    }
  }

  /// The actor the record is addressed to: the receiver of a message or the
  /// owner of a notification.
  pub fn recipient(&self) -> &ActorId {
    match self {
      Self::Direct { receiver, .. } => receiver,
      Self::Owner { owner } => owner,
    }
  }
}

// ─── Payload ─────────────────────────────────────────────────────────────────

/// What a notification is about.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
  Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
  MatchRequest,
  SessionUpdate,
  BadgeEarned,
  Message,
  #[default]
  Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
  Message {
    content: String,
  },
  Notification {
    kind:              NotificationKind,
    content:           String,
    /// The match request, session, or badge the notification refers to.
    related_entity_id: Option<String>,
  },
}

impl Payload {
  pub fn content(&self) -> &str {
    match self {
      Self::Message { content } | Self::Notification { content, .. } => content,
    }
  }

  /// The table a record with this payload lives in.
  pub fn table(&self) -> Table {
    match self {
      Self::Message { .. } => Table::ChatMessages,
      Self::Notification { .. } => Table::Notifications,
    }
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
  pub id:           RecordId,
  /// Server-assigned; never changes after creation.
  pub created_at:   DateTime<Utc>,
  pub participants: Participants,
  pub read:         bool,
  pub payload:      Payload,
}

impl Record {
  /// Whether `viewer` still has to read this record. Only the recipient of a
  /// record can have it unread; a sender's own messages never count.
  pub fn is_unread_by(&self, viewer: &ActorId) -> bool {
    !self.read && self.participants.recipient() == viewer
  }
}

/// Input to [`crate::remote::RemoteCollection::insert`]. `id`, `created_at`
/// and `read` are assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
  pub participants: Participants,
  pub payload:      Payload,
}

impl NewRecord {
  pub fn message(
    sender: impl Into<ActorId>,
    receiver: impl Into<ActorId>,
    content: impl Into<String>,
  ) -> Self {
    Self {
      participants: Participants::direct(sender, receiver),
      payload:      Payload::Message { content: content.into() },
    }
  }

  pub fn notification(
    owner: impl Into<ActorId>,
    kind: NotificationKind,
    content: impl Into<String>,
    related_entity_id: Option<String>,
  ) -> Self {
    Self {
      participants: Participants::owner(owner),
      payload:      Payload::Notification {
        kind,
        content: content.into(),
        related_entity_id,
      },
    }
  }

  /// Materialise the record as the backend would on insert.
  pub fn into_record(self, id: RecordId, created_at: DateTime<Utc>) -> Record {
    Record {
      id,
      created_at,
      participants: self.participants,
      read: false,
      payload: self.payload,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::str::FromStr;

  use super::*;

  #[test]
  fn counterpart_is_the_other_party() {
    let p = Participants::direct("alice", "bob");
    assert_eq!(p.counterpart_of(&"alice".into()), Some(&ActorId::from("bob")));
    assert_eq!(p.counterpart_of(&"bob".into()), Some(&ActorId::from("alice")));
    assert_eq!(p.counterpart_of(&"carol".into()), None);
  }

  #[test]
  fn owner_records_have_no_counterpart() {
    let p = Participants::owner("alice");
    assert!(p.involves(&"alice".into()));
    assert_eq!(p.counterpart_of(&"alice".into()), None);
    assert_eq!(p.recipient(), &ActorId::from("alice"));
  }

  #[test]
  fn own_messages_are_never_unread() {
    let record = NewRecord::message("alice", "bob", "hi")
      .into_record(RecordId::generate(), Utc::now());
    assert!(!record.is_unread_by(&"alice".into()));
    assert!(record.is_unread_by(&"bob".into()));
  }

  #[test]
  fn notification_kind_string_form() {
    assert_eq!(NotificationKind::MatchRequest.to_string(), "match_request");
    assert_eq!(
      NotificationKind::from_str("badge_earned").unwrap(),
      NotificationKind::BadgeEarned
    );
    assert!(NotificationKind::from_str("nonsense").is_err());
  }

  #[test]
  fn payload_serialises_with_type_tag() {
    let payload = Payload::Message { content: "hello".into() };
    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["type"], "message");
    assert_eq!(json["content"], "hello");
  }
}
