//! The notification feed and sending notifications.

use std::sync::Arc;

use crate::{
  error::{Error, Result},
  live::{ListSpec, LiveList},
  record::{ActorId, NewRecord, NotificationKind, Record, RecordId, Table, require_viewer},
  remote::{Order, RemoteCollection},
};

/// How many notifications the feed fetches and shows.
pub const FEED_LIMIT: usize = 20;

/// A notification about to be sent to another user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDraft {
  pub recipient:         ActorId,
  pub kind:              NotificationKind,
  pub content:           String,
  pub related_entity_id: Option<String>,
}

/// Send a notification on behalf of a signed-in `sender`.
pub async fn send_notification<C: RemoteCollection>(
  remote: &C,
  sender: Option<&ActorId>,
  draft: NotificationDraft,
) -> Result<Record> {
  require_viewer(sender)?;
  let content = draft.content.trim();
  if content.is_empty() {
    return Err(Error::Validation("notification is empty".into()));
  }
  let record = NewRecord::notification(
    draft.recipient,
    draft.kind,
    content,
    draft.related_entity_id,
  );
  remote
    .insert(Table::Notifications, record)
    .await
    .map_err(|e| {
      tracing::warn!(error = %e, "sending notification failed");
      Error::remote(e)
    })
}

/// The viewer's most recent notifications, newest first.
pub struct NotificationFeed<C> {
  list: LiveList<C>,
}

impl<C: RemoteCollection> NotificationFeed<C> {
  pub fn new(client: Arc<C>) -> Self {
    Self {
      list: LiveList::new(
        client,
        ListSpec::new(Table::Notifications, Order::Descending)
          .with_limit(FEED_LIMIT),
      ),
    }
  }

  pub async fn open(&self, viewer: ActorId) -> Result<()> {
    self.list.initialize(viewer, None).await
  }

  /// At most [`FEED_LIMIT`] notifications, newest first.
  pub fn items(&self) -> Vec<Record> { self.list.visible_records(None) }

  /// Unread notifications held locally, including any pushed past the
  /// visible window by newer arrivals.
  pub fn unread_count(&self) -> usize { self.list.unread_count() }

  pub async fn mark_all_read(&self) -> Result<usize> {
    self.list.mark_all_read().await
  }

  pub async fn mark_one_read(&self, id: &RecordId) -> Result<usize> {
    self.list.mark_one_read(id).await
  }

  pub fn close(&self) { self.list.teardown(); }

  pub fn list(&self) -> &LiveList<C> { &self.list }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use chrono::{TimeZone, Utc};
  use tokio::time::timeout;

  use super::*;
  use crate::memory::MemoryBackend;

  fn note(id: &str, secs: i64, owner: &str) -> Record {
    NewRecord::notification(owner, NotificationKind::MatchRequest, format!("n{id}"), None)
      .into_record(id.into(), Utc.timestamp_opt(secs, 0).unwrap())
  }

  fn draft(recipient: &str, content: &str) -> NotificationDraft {
    NotificationDraft {
      recipient:         recipient.into(),
      kind:              NotificationKind::BadgeEarned,
      content:           content.into(),
      related_entity_id: Some("badge-1".into()),
    }
  }

  #[tokio::test]
  async fn feed_is_capped_and_newest_first() {
    let backend = Arc::new(MemoryBackend::new());
    for i in 0..25 {
      backend.seed(note(&format!("{i:02}"), i, "a"));
    }
    backend.seed(note("other", 100, "b"));

    let feed = NotificationFeed::new(Arc::clone(&backend));
    feed.open("a".into()).await.unwrap();

    let items = feed.items();
    assert_eq!(items.len(), FEED_LIMIT);
    assert_eq!(items[0].id.as_str(), "24");
    assert_eq!(feed.unread_count(), FEED_LIMIT);
  }

  #[tokio::test]
  async fn mark_one_then_all() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(note("1", 1, "a"));
    backend.seed(note("2", 2, "a"));
    backend.seed(note("3", 3, "a"));

    let feed = NotificationFeed::new(Arc::clone(&backend));
    feed.open("a".into()).await.unwrap();

    assert_eq!(feed.mark_one_read(&"2".into()).await.unwrap(), 1);
    assert_eq!(feed.mark_one_read(&"2".into()).await.unwrap(), 0);
    assert_eq!(feed.unread_count(), 2);

    assert_eq!(feed.mark_all_read().await.unwrap(), 2);
    assert_eq!(feed.unread_count(), 0);
    assert_eq!(feed.mark_all_read().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn mark_one_rejects_unknown_ids() {
    let backend = Arc::new(MemoryBackend::new());
    let feed = NotificationFeed::new(Arc::clone(&backend));
    feed.open("a".into()).await.unwrap();
    let err = feed.mark_one_read(&"missing".into()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
  }

  #[tokio::test]
  async fn sent_notification_reaches_recipient_feed() {
    let backend = Arc::new(MemoryBackend::new());
    let feed = NotificationFeed::new(Arc::clone(&backend));
    feed.open("b".into()).await.unwrap();

    send_notification(backend.as_ref(), Some(&"a".into()), draft("b", "You earned a badge"))
      .await
      .unwrap();
    timeout(Duration::from_secs(5), feed.list().wait_until(|l| l.len() == 1))
      .await
      .unwrap();

    assert_eq!(feed.unread_count(), 1);
    assert_eq!(feed.items()[0].payload.content(), "You earned a badge");
  }

  #[tokio::test]
  async fn send_requires_sender_and_content() {
    let backend = MemoryBackend::new();
    assert!(matches!(
      send_notification(&backend, None, draft("b", "hi")).await,
      Err(Error::NotAuthenticated)
    ));
    assert!(matches!(
      send_notification(&backend, Some(&"a".into()), draft("b", " ")).await,
      Err(Error::Validation(_))
    ));
  }
}
