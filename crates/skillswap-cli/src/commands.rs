//! Subcommand handlers. Each returns the text to print, so they can be run
//! against an in-memory store in tests.

use std::{collections::HashMap, fmt::Write as _, sync::Arc};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use skillswap_core::{
  chat::{ChatList, ChatWindow, PREVIEW_LEN, preview, send_message},
  marketplace::{self, Direction, Marketplace, SkillForm, SkillQuery},
  notifications::{NotificationDraft, NotificationFeed, send_notification},
  record::{ActorId, NotificationKind, Payload, Record, RecordId, require_viewer},
  verification::{VERIFICATION_THRESHOLD, quiz_for, verify_skill},
};
use skillswap_store_sqlite::SqliteStore;
use uuid::Uuid;

/// Attach the user-facing "failed to …" line to a core error.
fn failed(action: &'static str) -> impl FnOnce(skillswap_core::Error) -> anyhow::Error {
  move |e| match e.failed_action(action) {
    Some(message) => anyhow::Error::new(e).context(message),
    None => anyhow::Error::new(e),
  }
}

fn time(at: DateTime<Utc>) -> String { at.format("%Y-%m-%d %H:%M").to_string() }

pub struct App {
  store:  Arc<SqliteStore>,
  viewer: Option<ActorId>,
  json:   bool,
}

impl App {
  pub fn new(store: SqliteStore, viewer: Option<ActorId>, json: bool) -> Self {
    Self { store: Arc::new(store), viewer, json }
  }

  fn viewer(&self) -> anyhow::Result<ActorId> {
    require_viewer(self.viewer.as_ref())
      .cloned()
      .context("not signed in: pass --as <user> or set `viewer` in the config")
  }

  /// Render `value` as JSON in `--json` mode, otherwise with `text`.
  fn emit<T: Serialize + ?Sized>(
    &self,
    value: &T,
    text: impl FnOnce(&T) -> String,
  ) -> anyhow::Result<String> {
    if self.json {
      serde_json::to_string_pretty(value).context("failed to encode output")
    } else {
      Ok(text(value))
    }
  }

  // ── Chat ──────────────────────────────────────────────────────────────

  pub async fn send(&self, to: &str, message: &str) -> anyhow::Result<String> {
    let to = ActorId::from(to);
    let record = send_message(self.store.as_ref(), self.viewer.as_ref(), &to, message)
      .await
      .map_err(failed("send message"))?;
    self.emit(&record, |r| format!("sent {} to {to}", r.id))
  }

  /// Print the conversation with `with`, marking their messages read.
  pub async fn chat(&self, with: &str) -> anyhow::Result<String> {
    let viewer = self.viewer()?;
    let window = ChatWindow::new(Arc::clone(&self.store));
    window
      .open(viewer.clone(), ActorId::from(with))
      .await
      .map_err(failed("load conversation"))?;
    let messages = window.messages();
    window.close();

    self.emit(&messages, |messages| {
      let mut out = String::new();
      for m in messages {
        let who = match m.participants.sender() {
          Some(s) if *s == viewer => "you".to_owned(),
          Some(s) => s.to_string(),
          None => String::new(),
        };
        let _ = writeln!(out, "{}  {who}: {}", time(m.created_at), m.payload.content());
      }
      if out.is_empty() {
        out.push_str("no messages yet\n");
      }
      out
    })
  }

  pub async fn conversations(&self, search: Option<&str>) -> anyhow::Result<String> {
    let viewer = self.viewer()?;
    let list = ChatList::new(Arc::clone(&self.store));
    list.open(viewer).await.map_err(failed("load conversations"))?;
    let summaries = match search {
      Some(term) => list.search(term, |_| None),
      None => list.conversations(),
    };
    list.close();

    self.emit(&summaries, |summaries| {
      let mut out = String::new();
      for s in summaries {
        let unread = match s.unread_count {
          0 => String::new(),
          n => format!("({n})"),
        };
        let _ = writeln!(
          out,
          "{:<16} {:>5}  {}  {}",
          s.counterpart,
          unread,
          time(s.last_record.created_at),
          preview(s.last_record.payload.content(), PREVIEW_LEN),
        );
      }
      if out.is_empty() {
        out.push_str("no conversations\n");
      }
      out
    })
  }

  // ── Notifications ─────────────────────────────────────────────────────

  pub async fn notifications(
    &self,
    mark_all_read: bool,
    mark: Option<&str>,
  ) -> anyhow::Result<String> {
    let viewer = self.viewer()?;
    let feed = NotificationFeed::new(Arc::clone(&self.store));
    feed.open(viewer).await.map_err(failed("load notifications"))?;
    if mark_all_read {
      feed.mark_all_read().await.map_err(failed("mark notifications read"))?;
    }
    if let Some(id) = mark {
      feed
        .mark_one_read(&RecordId::from(id))
        .await
        .map_err(failed("mark notification read"))?;
    }

    #[derive(Serialize)]
    struct Listing {
      unread: usize,
      items:  Vec<Record>,
    }
    let listing = Listing { unread: feed.unread_count(), items: feed.items() };
    feed.close();

    self.emit(&listing, |listing| {
      let mut out = String::new();
      for n in &listing.items {
        let kind = match &n.payload {
          Payload::Notification { kind, .. } => kind.to_string(),
          Payload::Message { .. } => String::new(),
        };
        let _ = writeln!(
          out,
          "{} {}  {}  [{kind}] {}",
          if n.read { ' ' } else { '*' },
          n.id,
          time(n.created_at),
          n.payload.content(),
        );
      }
      let _ = writeln!(out, "{} unread", listing.unread);
      out
    })
  }

  pub async fn notify(
    &self,
    to: &str,
    kind: NotificationKind,
    content: &str,
    related: Option<String>,
  ) -> anyhow::Result<String> {
    let record = send_notification(self.store.as_ref(), self.viewer.as_ref(), NotificationDraft {
      recipient: ActorId::from(to),
      kind,
      content: content.to_owned(),
      related_entity_id: related,
    })
    .await
    .map_err(failed("send notification"))?;
    self.emit(&record, |r| format!("notified {to} ({})", r.id))
  }

  // ── Skills ────────────────────────────────────────────────────────────

  pub async fn skills(&self, query: SkillQuery) -> anyhow::Result<String> {
    let skills = self
      .store
      .list_skills(&query)
      .await
      .context("failed to load skills")?;
    self.emit(&skills, |skills| {
      let mut out = String::new();
      for s in skills {
        let _ = writeln!(
          out,
          "{}  {} ({}, {}){} by {}",
          s.skill_id,
          s.title,
          s.category,
          s.level,
          if s.verified { " [verified]" } else { "" },
          s.owner,
        );
      }
      if out.is_empty() {
        out.push_str("no skills listed\n");
      }
      out
    })
  }

  pub async fn add_skill(&self, form: SkillForm) -> anyhow::Result<String> {
    let skill = marketplace::add_skill(self.store.as_ref(), self.viewer.as_ref(), form)
      .await
      .map_err(failed("add skill"))?;
    self.emit(&skill, |s| format!("added {} ({})", s.title, s.skill_id))
  }

  // ── Match requests ────────────────────────────────────────────────────

  pub async fn requests(&self, direction: Direction) -> anyhow::Result<String> {
    let viewer = self.viewer()?;
    let requests = self
      .store
      .list_match_requests(viewer.clone(), direction)
      .await
      .context("failed to load match requests")?;
    self.emit(&requests, |requests| {
      let mut out = String::new();
      for r in requests {
        let _ = writeln!(
          out,
          "{}  {:<8}  {} offers {} for {}",
          r.request_id,
          r.status,
          r.requester,
          r.skill_offered.title,
          r.skill_requested.title,
        );
      }
      if out.is_empty() {
        let _ = writeln!(out, "no {direction} requests");
      }
      out
    })
  }

  /// Create a match request and tell the recipient about it. The request
  /// stands even if the notification cannot be sent.
  pub async fn request(&self, offered: Uuid, requested: Uuid) -> anyhow::Result<String> {
    let request = marketplace::request_match(self.store.as_ref(), self.viewer.as_ref(), offered, requested)
      .await
      .map_err(failed("request match"))?;

    let draft = NotificationDraft {
      recipient:         request.recipient.clone(),
      kind:              NotificationKind::MatchRequest,
      content:           format!(
        "{} wants to swap {} for your {}",
        request.requester, request.skill_offered.title, request.skill_requested.title,
      ),
      related_entity_id: Some(request.request_id.to_string()),
    };
    if let Err(e) = send_notification(self.store.as_ref(), self.viewer.as_ref(), draft).await {
      tracing::warn!(error = %e, request_id = %request.request_id, "match request notification failed");
    }

    self.emit(&request, |r| format!("requested {} from {}", r.skill_requested.title, r.recipient))
  }

  pub async fn respond(&self, request_id: Uuid, accept: bool) -> anyhow::Result<String> {
    let action = if accept { "accept request" } else { "reject request" };
    let request = marketplace::respond(self.store.as_ref(), self.viewer.as_ref(), request_id, accept)
      .await
      .map_err(failed(action))?;
    self.emit(&request, |r| format!("{} is now {}", r.request_id, r.status))
  }

  // ── Verification ──────────────────────────────────────────────────────

  /// Without answers, print the quiz for the skill; with answers, grade them.
  pub async fn verify(
    &self,
    skill_id: Uuid,
    answers: HashMap<String, usize>,
  ) -> anyhow::Result<String> {
    if answers.is_empty() {
      let skill = self
        .store
        .get_skill(skill_id)
        .await
        .context("failed to load skill")?
        .with_context(|| format!("skill {skill_id} not found"))?;
      let quiz = quiz_for(&skill.title)
        .with_context(|| format!("no quiz available for {}", skill.title))?;
      return self.emit(quiz, |quiz| {
        let mut out = format!("{} quiz\n", quiz.skill_title);
        for q in quiz.questions {
          let _ = writeln!(out, "\n{}: {}", q.id, q.prompt);
          for (i, option) in q.options.iter().enumerate() {
            let _ = writeln!(out, "  {i}) {option}");
          }
        }
        let _ = writeln!(out, "\nanswer with --answer <question>=<option>");
        out
      });
    }

    let verdict = verify_skill(self.store.as_ref(), self.viewer.as_ref(), skill_id, &answers)
      .await
      .map_err(failed("verify skill"))?;
    self.emit(&verdict, |v| {
      let outcome = if v.score.passed() {
        format!("{} is now verified", v.skill.title)
      } else {
        format!(
          "not verified, {:.0}% needed",
          VERIFICATION_THRESHOLD * 100.0
        )
      };
      format!(
        "scored {}% ({}/{}): {outcome}",
        v.score.percent(),
        v.score.correct,
        v.score.total,
      )
    })
  }
}

#[cfg(test)]
mod tests {
  use skillswap_core::marketplace::MatchStatus;

  use super::*;

  fn app(viewer: Option<&str>, store: &SqliteStore) -> App {
    App::new(store.clone(), viewer.map(ActorId::from), false)
  }

  fn form(title: &str) -> SkillForm {
    SkillForm {
      title:         title.into(),
      description:   "Lessons".into(),
      category:      "Programming".into(),
      level:         "Beginner".into(),
      skills_wanted: vec![],
    }
  }

  #[tokio::test]
  async fn signed_out_commands_fail_with_action() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let err = app(None, &store).send("bob", "hi").await.unwrap_err();
    assert_eq!(err.to_string(), "failed to send message");
  }

  #[tokio::test]
  async fn validation_reason_is_shown() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let err = app(Some("alice"), &store).send("bob", "  ").await.unwrap_err();
    assert_eq!(err.to_string(), "failed to send message: message is empty");
  }

  #[tokio::test]
  async fn chat_marks_messages_read() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    app(Some("bob"), &store).send("alice", "hello alice").await.unwrap();

    let alice = app(Some("alice"), &store);
    let listing = alice.conversations(None).await.unwrap();
    assert!(listing.contains("bob"));
    assert!(listing.contains("(1)"));

    let chat = alice.chat("bob").await.unwrap();
    assert!(chat.contains("bob: hello alice"));

    let listing = alice.conversations(None).await.unwrap();
    assert!(!listing.contains("(1)"));
  }

  #[tokio::test]
  async fn request_notifies_recipient() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let alice = app(Some("alice"), &store);
    let bob = app(Some("bob"), &store);
    let offered = marketplace::add_skill(&store, Some(&"alice".into()), form("Rust"))
      .await
      .unwrap();
    let wanted = marketplace::add_skill(&store, Some(&"bob".into()), form("Go"))
      .await
      .unwrap();

    alice.request(offered.skill_id, wanted.skill_id).await.unwrap();

    let feed = bob.notifications(false, None).await.unwrap();
    assert!(feed.contains("[match_request] alice wants to swap Rust for your Go"));
    assert!(feed.ends_with("1 unread\n"));

    let requests = store.list_match_requests("bob".into(), Direction::Incoming).await.unwrap();
    let reply = bob.respond(requests[0].request_id, true).await.unwrap();
    assert!(reply.ends_with("is now accepted"));
    let requests = store.list_match_requests("bob".into(), Direction::Incoming).await.unwrap();
    assert_eq!(requests[0].status, MatchStatus::Accepted);

    let feed = bob.notifications(true, None).await.unwrap();
    assert!(feed.ends_with("0 unread\n"));
  }

  #[tokio::test]
  async fn verify_without_answers_prints_quiz() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let alice = app(Some("alice"), &store);
    let skill = marketplace::add_skill(&store, Some(&"alice".into()), form("Web Development"))
      .await
      .unwrap();

    let quiz = alice.verify(skill.skill_id, HashMap::new()).await.unwrap();
    assert!(quiz.starts_with("Web Development quiz"));
    assert!(quiz.contains("q5: Which HTTP status code"));

    let answers = [("q1", 0), ("q2", 0), ("q3", 1), ("q4", 0), ("q5", 0)]
      .into_iter()
      .map(|(q, a)| (q.to_owned(), a))
      .collect();
    let verdict = alice.verify(skill.skill_id, answers).await.unwrap();
    assert_eq!(verdict, "scored 100% (5/5): Web Development is now verified");
  }

  #[tokio::test]
  async fn json_output_is_machine_readable() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let alice = App::new(store.clone(), Some("alice".into()), true);
    let out = alice.send("bob", "hi").await.unwrap();
    let record: Record = serde_json::from_str(&out).unwrap();
    assert_eq!(record.payload.content(), "hi");
  }

  #[tokio::test]
  async fn skills_list_applies_search() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let alice = app(Some("alice"), &store);
    alice.add_skill(form("Rust")).await.unwrap();
    alice.add_skill(form("Go")).await.unwrap();

    let query = SkillQuery { text: Some("rust".into()), ..SkillQuery::default() };
    let listing = alice.skills(query).await.unwrap();
    assert!(listing.contains("Rust (Programming, Beginner) by alice"));
    assert!(!listing.contains("Go "));

    let query = SkillQuery { category: Some("Music".into()), ..SkillQuery::default() };
    assert_eq!(alice.skills(query).await.unwrap(), "no skills listed\n");
  }
}
