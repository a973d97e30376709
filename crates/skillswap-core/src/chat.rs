//! Chat: the conversation window, the conversation list, and sending.
//!
//! Both views are [`LiveList`]s over the `chat_messages` table. The window
//! is narrowed to one counterpart and ordered oldest first; the list holds
//! every message the viewer is part of, newest first, and derives one
//! [`ConversationSummary`] per counterpart.

use std::sync::Arc;

use crate::{
  error::{Error, Result},
  live::{ListSpec, LiveList},
  read_state::ConversationSummary,
  record::{ActorId, NewRecord, Record, Table, require_viewer},
  remote::{Order, RemoteCollection},
};

/// Characters of the last message shown in the conversation list.
pub const PREVIEW_LEN: usize = 30;

/// Shorten `text` to at most `max` characters, marking the cut with `...`.
pub fn preview(text: &str, max: usize) -> String {
  match text.char_indices().nth(max) {
    Some((cut, _)) => format!("{}...", &text[..cut]),
    None => text.to_owned(),
  }
}

/// Check a message locally before anything is sent.
pub fn compose_message(
  viewer: Option<&ActorId>,
  counterpart: &ActorId,
  content: &str,
) -> Result<NewRecord> {
  let sender = require_viewer(viewer)?;
  let content = content.trim();
  if content.is_empty() {
    return Err(Error::Validation("message is empty".into()));
  }
  if sender == counterpart {
    return Err(Error::Validation("cannot message yourself".into()));
  }
  Ok(NewRecord::message(sender.clone(), counterpart.clone(), content))
}

/// Send a message without a window open. The stored message is returned
/// once the backend confirms it.
pub async fn send_message<C: RemoteCollection>(
  remote: &C,
  viewer: Option<&ActorId>,
  counterpart: &ActorId,
  content: &str,
) -> Result<Record> {
  let message = compose_message(viewer, counterpart, content)?;
  remote
    .insert(Table::ChatMessages, message)
    .await
    .map_err(|e| {
      tracing::warn!(error = %e, %counterpart, "sending message failed");
      Error::remote(e)
    })
}

// ─── Window ──────────────────────────────────────────────────────────────────

/// The message history with one counterpart.
pub struct ChatWindow<C> {
  list: LiveList<C>,
}

impl<C: RemoteCollection> ChatWindow<C> {
  pub fn new(client: Arc<C>) -> Self {
    Self {
      list: LiveList::new(
        client,
        ListSpec::new(Table::ChatMessages, Order::Ascending),
      ),
    }
  }

  /// Load the conversation between `viewer` and `counterpart`, then mark the
  /// counterpart's messages read. A failure to mark read is logged and does
  /// not fail the open.
  pub async fn open(&self, viewer: ActorId, counterpart: ActorId) -> Result<()> {
    if viewer == counterpart {
      return Err(Error::Validation("cannot open a chat with yourself".into()));
    }
    self
      .list
      .initialize(viewer, Some(counterpart.clone()))
      .await?;
    if let Err(e) = self.list.mark_read(&counterpart).await {
      tracing::warn!(error = %e, %counterpart, "marking messages read failed");
    }
    Ok(())
  }

  /// Messages in the conversation, oldest first.
  pub fn messages(&self) -> Vec<Record> { self.list.visible_records(None) }

  pub fn counterpart(&self) -> Option<ActorId> { self.list.counterpart() }

  /// Unread messages from the counterpart.
  pub fn unread_count(&self) -> usize {
    self
      .counterpart()
      .map(|c| self.list.unread_count_for(&c))
      .unwrap_or(0)
  }

  /// Mark everything the counterpart has sent so far as read.
  pub async fn mark_read(&self) -> Result<usize> {
    let counterpart = self.counterpart().ok_or(Error::NotAuthenticated)?;
    self.list.mark_read(&counterpart).await
  }

  /// Send `content` to the counterpart. The message shows up locally once
  /// the backend has confirmed it.
  pub async fn send(&self, content: &str) -> Result<Record> {
    let counterpart = self.counterpart().ok_or(Error::NotAuthenticated)?;
    let message =
      compose_message(self.list.viewer().as_ref(), &counterpart, content)?;
    self.list.insert(message).await.inspect_err(|e| {
      tracing::warn!(error = %e, %counterpart, "sending message failed");
    })
  }

  pub fn close(&self) { self.list.teardown(); }

  pub fn list(&self) -> &LiveList<C> { &self.list }
}

// ─── Conversation list ───────────────────────────────────────────────────────

/// Every conversation the viewer has, most recent first.
pub struct ChatList<C> {
  list: LiveList<C>,
}

impl<C: RemoteCollection> ChatList<C> {
  pub fn new(client: Arc<C>) -> Self {
    Self {
      list: LiveList::new(
        client,
        ListSpec::new(Table::ChatMessages, Order::Descending),
      ),
    }
  }

  pub async fn open(&self, viewer: ActorId) -> Result<()> {
    self.list.initialize(viewer, None).await
  }

  pub fn conversations(&self) -> Vec<ConversationSummary> {
    self.list.conversations()
  }

  /// Conversations whose counterpart name contains `term`, ignoring case.
  /// `name_of` resolves display names; counterparts without one are matched
  /// on their id.
  pub fn search(
    &self,
    term: &str,
    name_of: impl Fn(&ActorId) -> Option<String>,
  ) -> Vec<ConversationSummary> {
    let term = term.trim().to_lowercase();
    self
      .conversations()
      .into_iter()
      .filter(|s| {
        let name = name_of(&s.counterpart)
          .unwrap_or_else(|| s.counterpart.to_string());
        name.to_lowercase().contains(&term)
      })
      .collect()
  }

  /// Unread messages across all conversations.
  pub fn unread_total(&self) -> usize { self.list.unread_count() }

  pub fn close(&self) { self.list.teardown(); }

  pub fn list(&self) -> &LiveList<C> { &self.list }
}
