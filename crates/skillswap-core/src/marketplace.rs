//! Skills, match requests, and the `Marketplace` port.
//!
//! The trait is implemented by `skillswap-store-sqlite` and by
//! [`crate::memory::MemoryBackend`]. The free functions in this module hold the
//! business rules (validation, who may respond to a request) and only touch
//! the backend once a request has passed them.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{
  error::{Error, Result},
  record::{ActorId, require_viewer},
};

// ─── Skills ──────────────────────────────────────────────────────────────────

/// The categories a skill may be listed under.
pub const CATEGORIES: [&str; 12] = [
  "Programming",
  "Design",
  "Music",
  "Languages",
  "Cooking",
  "Fitness",
  "Photography",
  "Finance",
  "Marketing",
  "Education",
  "Business",
  "Arts & Crafts",
];

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
  EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum SkillLevel {
  Beginner,
  Intermediate,
  Advanced,
  Expert,
}

/// A skill a user offers to teach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
  pub skill_id:      Uuid,
  pub owner:         ActorId,
  pub title:         String,
  pub description:   String,
  pub category:      String,
  pub level:         SkillLevel,
  /// What the owner would like to learn in exchange.
  pub skills_wanted: Vec<String>,
  /// Set once the owner passes the skill's verification quiz.
  pub verified:      bool,
  pub created_at:    DateTime<Utc>,
}

/// Raw input from the "add skill" form. Every field is free text until
/// [`SkillForm::validate`] has checked it.
#[derive(Debug, Clone, Default)]
pub struct SkillForm {
  pub title:         String,
  pub description:   String,
  pub category:      String,
  pub level:         String,
  pub skills_wanted: Vec<String>,
}

impl SkillForm {
  /// Check required fields and normalise the form into a [`NewSkill`] for
  /// `owner`. Blank "skills wanted" entries are dropped.
  pub fn validate(self, owner: &ActorId) -> Result<NewSkill> {
    let required = [
      ("title", &self.title),
      ("description", &self.description),
      ("category", &self.category),
      ("level", &self.level),
    ];
    if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty())
    {
      return Err(Error::Validation(format!("{field} is required")));
    }

    let category = CATEGORIES
      .iter()
      .find(|c| c.eq_ignore_ascii_case(self.category.trim()))
      .ok_or_else(|| {
        Error::Validation(format!("unknown category: {}", self.category.trim()))
      })?;
    let level: SkillLevel = self.level.trim().parse().map_err(|_| {
      Error::Validation(format!("unknown level: {}", self.level.trim()))
    })?;

    Ok(NewSkill {
      owner: owner.clone(),
      title: self.title.trim().to_owned(),
      description: self.description.trim().to_owned(),
      category: (*category).to_owned(),
      level,
      skills_wanted: self
        .skills_wanted
        .into_iter()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect(),
    })
  }
}

/// Input to [`Marketplace::add_skill`]. `skill_id` and `created_at` are set by
/// the backend; new skills always start unverified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSkill {
  pub owner:         ActorId,
  pub title:         String,
  pub description:   String,
  pub category:      String,
  pub level:         SkillLevel,
  pub skills_wanted: Vec<String>,
}

impl NewSkill {
  pub fn into_skill(self, skill_id: Uuid, created_at: DateTime<Utc>) -> Skill {
    Skill {
      skill_id,
      owner: self.owner,
      title: self.title,
      description: self.description,
      category: self.category,
      level: self.level,
      skills_wanted: self.skills_wanted,
      verified: false,
      created_at,
    }
  }
}

/// Browse filters for [`Marketplace::list_skills`]. Unset fields match every
/// skill; set fields must all match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkillQuery {
  /// Substring of the title or the description, ignoring ASCII case.
  pub text:     Option<String>,
  /// Category name, ignoring ASCII case.
  pub category: Option<String>,
  pub level:    Option<SkillLevel>,
  pub owner:    Option<ActorId>,
}

impl SkillQuery {
  pub fn owned_by(owner: &ActorId) -> Self {
    Self { owner: Some(owner.clone()), ..Self::default() }
  }

  /// The search text, trimmed and lowercased. `None` when blank.
  pub fn needle(&self) -> Option<String> {
    self
      .text
      .as_deref()
      .map(str::trim)
      .filter(|t| !t.is_empty())
      .map(str::to_ascii_lowercase)
  }

  pub fn matches(&self, skill: &Skill) -> bool {
    if self.owner.as_ref().is_some_and(|o| *o != skill.owner) {
      return false;
    }
    if self.level.is_some_and(|l| l != skill.level) {
      return false;
    }
    if self
      .category
      .as_deref()
      .is_some_and(|c| !c.trim().eq_ignore_ascii_case(&skill.category))
    {
      return false;
    }
    self.needle().is_none_or(|needle| {
      skill.title.to_ascii_lowercase().contains(&needle)
        || skill.description.to_ascii_lowercase().contains(&needle)
    })
  }
}

// ─── Match requests ──────────────────────────────────────────────────────────

/// The lifecycle of a match request. `Accepted` and `Rejected` are terminal.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MatchStatus {
  Pending,
  Accepted,
  Rejected,
}

impl MatchStatus {
  pub fn can_become(self, next: MatchStatus) -> bool {
    matches!(
      (self, next),
      (Self::Pending, Self::Accepted) | (Self::Pending, Self::Rejected)
    )
  }
}

/// A skill as referenced from a match request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillRef {
  pub skill_id: Uuid,
  pub title:    String,
}

impl From<&Skill> for SkillRef {
  fn from(skill: &Skill) -> Self {
    Self { skill_id: skill.skill_id, title: skill.title.clone() }
  }
}

/// A proposal to swap one skill for another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRequest {
  pub request_id:      Uuid,
  pub requester:       ActorId,
  pub recipient:       ActorId,
  /// The requester's skill, offered in exchange.
  pub skill_offered:   SkillRef,
  /// The recipient's skill the requester wants to learn.
  pub skill_requested: SkillRef,
  pub status:          MatchStatus,
  pub created_at:      DateTime<Utc>,
}

impl MatchRequest {
  /// The other party, seen from `viewer`.
  pub fn other_party(&self, viewer: &ActorId) -> &ActorId {
    if &self.requester == viewer {
      &self.recipient
    } else {
      &self.requester
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMatchRequest {
  pub requester:       ActorId,
  pub recipient:       ActorId,
  pub skill_offered:   SkillRef,
  pub skill_requested: SkillRef,
}

impl NewMatchRequest {
  pub fn into_request(
    self,
    request_id: Uuid,
    created_at: DateTime<Utc>,
  ) -> MatchRequest {
    MatchRequest {
      request_id,
      requester: self.requester,
      recipient: self.recipient,
      skill_offered: self.skill_offered,
      skill_requested: self.skill_requested,
      status: MatchStatus::Pending,
      created_at,
    }
  }
}

/// Outcome of [`Marketplace::set_match_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
  /// The request was still in the expected state and now has the new one.
  Applied(MatchRequest),
  /// The request exists but had already moved to this state.
  Conflict(MatchStatus),
  /// No request has this id.
  Missing,
}

/// Which side of a match request the viewer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
  /// Requests addressed to the viewer.
  Incoming,
  /// Requests the viewer sent.
  Outgoing,
}

impl Direction {
  pub fn includes(self, request: &MatchRequest, viewer: &ActorId) -> bool {
    match self {
      Self::Incoming => &request.recipient == viewer,
      Self::Outgoing => &request.requester == viewer,
    }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Storage for skills and match requests.
pub trait Marketplace: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Skills matching `query`, newest first.
  fn list_skills<'a>(
    &'a self,
    query: &'a SkillQuery,
  ) -> impl Future<Output = Result<Vec<Skill>, Self::Error>> + Send + 'a;

  fn get_skill(
    &self,
    skill_id: Uuid,
  ) -> impl Future<Output = Result<Option<Skill>, Self::Error>> + Send + '_;

  fn add_skill(
    &self,
    skill: NewSkill,
  ) -> impl Future<Output = Result<Skill, Self::Error>> + Send + '_;

  /// Flag a skill as verified. Returns `None` if the skill does not exist.
  fn mark_skill_verified(
    &self,
    skill_id: Uuid,
  ) -> impl Future<Output = Result<Option<Skill>, Self::Error>> + Send + '_;

  fn create_match_request(
    &self,
    request: NewMatchRequest,
  ) -> impl Future<Output = Result<MatchRequest, Self::Error>> + Send + '_;

  fn get_match_request(
    &self,
    request_id: Uuid,
  ) -> impl Future<Output = Result<Option<MatchRequest>, Self::Error>> + Send + '_;

  /// Requests on the given side of `viewer`, newest first.
  fn list_match_requests(
    &self,
    viewer: ActorId,
    direction: Direction,
  ) -> impl Future<Output = Result<Vec<MatchRequest>, Self::Error>> + Send + '_;

  /// Move a request from `from` to `to`, only if it is still in `from`. The
  /// check and the write are a single atomic step. Transition rules are
  /// enforced by [`respond`], not by the backend.
  fn set_match_status(
    &self,
    request_id: Uuid,
    from: MatchStatus,
    to: MatchStatus,
  ) -> impl Future<Output = Result<StatusUpdate, Self::Error>> + Send + '_;
}

// ─── Operations ──────────────────────────────────────────────────────────────

/// Validate `form` and list the skill under the viewer's name.
pub async fn add_skill<M: Marketplace>(
  marketplace: &M,
  viewer: Option<&ActorId>,
  form: SkillForm,
) -> Result<Skill> {
  let owner = require_viewer(viewer)?;
  let skill = form.validate(owner)?;
  let skill = marketplace.add_skill(skill).await.map_err(Error::remote)?;
  tracing::info!(skill_id = %skill.skill_id, owner = %skill.owner, "skill added");
  Ok(skill)
}

async fn fetch_skill<M: Marketplace>(
  marketplace: &M,
  skill_id: Uuid,
) -> Result<Skill> {
  marketplace
    .get_skill(skill_id)
    .await
    .map_err(Error::remote)?
    .ok_or_else(|| Error::NotFound(format!("skill {skill_id}")))
}

/// Ask the owner of `requested` to swap it for the viewer's `offered` skill.
pub async fn request_match<M: Marketplace>(
  marketplace: &M,
  viewer: Option<&ActorId>,
  offered: Uuid,
  requested: Uuid,
) -> Result<MatchRequest> {
  let requester = require_viewer(viewer)?;
  let offered = fetch_skill(marketplace, offered).await?;
  let requested = fetch_skill(marketplace, requested).await?;

  if &offered.owner != requester {
    return Err(Error::Forbidden(format!(
      "skill {} is not yours to offer",
      offered.skill_id
    )));
  }
  if &requested.owner == requester {
    return Err(Error::Validation(
      "cannot request a swap for your own skill".into(),
    ));
  }

  marketplace
    .create_match_request(NewMatchRequest {
      requester:       requester.clone(),
      recipient:       requested.owner.clone(),
      skill_offered:   SkillRef::from(&offered),
      skill_requested: SkillRef::from(&requested),
    })
    .await
    .map_err(Error::remote)
}

/// Accept or decline an incoming request. Only the recipient may respond,
/// and only while the request is pending.
pub async fn respond<M: Marketplace>(
  marketplace: &M,
  viewer: Option<&ActorId>,
  request_id: Uuid,
  accept: bool,
) -> Result<MatchRequest> {
  let viewer = require_viewer(viewer)?;
  let request = marketplace
    .get_match_request(request_id)
    .await
    .map_err(Error::remote)?
    .ok_or_else(|| Error::NotFound(format!("match request {request_id}")))?;

  if &request.recipient != viewer {
    return Err(Error::Forbidden(
      "only the recipient can respond to a match request".into(),
    ));
  }
  let next = if accept {
    MatchStatus::Accepted
  } else {
    MatchStatus::Rejected
  };
  if !request.status.can_become(next) {
    return Err(Error::InvalidTransition { from: request.status, to: next });
  }

  let update = marketplace
    .set_match_status(request_id, request.status, next)
    .await
    .map_err(Error::remote)?;
  match update {
    StatusUpdate::Applied(updated) => {
      tracing::info!(%request_id, status = %updated.status, "match request answered");
      Ok(updated)
    }
    StatusUpdate::Conflict(current) => {
      tracing::debug!(%request_id, %current, "match request answered concurrently");
      Err(Error::InvalidTransition { from: current, to: next })
    }
    StatusUpdate::Missing => {
      Err(Error::NotFound(format!("match request {request_id}")))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memory::MemoryBackend;

  fn form(title: &str, category: &str, level: &str) -> SkillForm {
    SkillForm {
      title:         title.into(),
      description:   "Hands-on lessons".into(),
      category:      category.into(),
      level:         level.into(),
      skills_wanted: vec!["Cooking".into(), "  ".into(), " Spanish ".into()],
    }
  }

  #[test]
  fn validate_normalises_form() {
    let skill = form(" Web Development ", "programming", "advanced")
      .validate(&"alice".into())
      .unwrap();
    assert_eq!(skill.title, "Web Development");
    assert_eq!(skill.category, "Programming");
    assert_eq!(skill.level, SkillLevel::Advanced);
    assert_eq!(skill.skills_wanted, ["Cooking", "Spanish"]);
  }

  #[test]
  fn validate_rejects_missing_fields() {
    let err = form("", "Programming", "Advanced")
      .validate(&"alice".into())
      .unwrap_err();
    assert!(matches!(err, Error::Validation(m) if m == "title is required"));

    let err = form("Juggling", "Circus", "Advanced")
      .validate(&"alice".into())
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = form("Juggling", "Arts & Crafts", "Grandmaster")
      .validate(&"alice".into())
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  #[test]
  fn only_pending_requests_can_change() {
    use MatchStatus::*;
    assert!(Pending.can_become(Accepted));
    assert!(Pending.can_become(Rejected));
    assert!(!Accepted.can_become(Rejected));
    assert!(!Rejected.can_become(Accepted));
    assert!(!Pending.can_become(Pending));
  }

  async fn two_skills(m: &MemoryBackend) -> (Skill, Skill) {
    let alice = ActorId::from("alice");
    let bob = ActorId::from("bob");
    let a = add_skill(m, Some(&alice), form("Web Development", "Programming", "Advanced"))
      .await
      .unwrap();
    let b = add_skill(m, Some(&bob), form("Italian Cooking", "Cooking", "Expert"))
      .await
      .unwrap();
    (a, b)
  }

  #[tokio::test]
  async fn add_skill_requires_viewer() {
    let m = MemoryBackend::new();
    let err = add_skill(&m, None, form("Web", "Programming", "Advanced"))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::NotAuthenticated));
    assert!(m.list_skills(&SkillQuery::default()).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn request_and_accept() {
    let m = MemoryBackend::new();
    let (a, b) = two_skills(&m).await;
    let alice = ActorId::from("alice");
    let bob = ActorId::from("bob");

    let request = request_match(&m, Some(&alice), a.skill_id, b.skill_id)
      .await
      .unwrap();
    assert_eq!(request.status, MatchStatus::Pending);
    assert_eq!(request.recipient, bob);

    let incoming = m.list_match_requests(bob.clone(), Direction::Incoming).await.unwrap();
    assert_eq!(incoming.len(), 1);
    let outgoing = m.list_match_requests(alice.clone(), Direction::Outgoing).await.unwrap();
    assert_eq!(outgoing.len(), 1);

    // The requester cannot answer their own request.
    let err = respond(&m, Some(&alice), request.request_id, true)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    let accepted = respond(&m, Some(&bob), request.request_id, true)
      .await
      .unwrap();
    assert_eq!(accepted.status, MatchStatus::Accepted);

    let err = respond(&m, Some(&bob), request.request_id, false)
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      Error::InvalidTransition { from: MatchStatus::Accepted, to: MatchStatus::Rejected }
    ));
  }

  #[tokio::test]
  async fn cannot_offer_someone_elses_skill() {
    let m = MemoryBackend::new();
    let (a, b) = two_skills(&m).await;
    let err = request_match(&m, Some(&"bob".into()), a.skill_id, b.skill_id)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
  }

  #[tokio::test]
  async fn unknown_request_is_not_found() {
    let m = MemoryBackend::new();
    let err = respond(&m, Some(&"bob".into()), Uuid::new_v4(), true)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
  }

  #[tokio::test]
  async fn status_update_checks_the_current_state() {
    let m = MemoryBackend::new();
    let (a, b) = two_skills(&m).await;
    let request = request_match(&m, Some(&"alice".into()), a.skill_id, b.skill_id)
      .await
      .unwrap();
    let id = request.request_id;

    let applied = m
      .set_match_status(id, MatchStatus::Pending, MatchStatus::Rejected)
      .await
      .unwrap();
    assert!(matches!(applied, StatusUpdate::Applied(r) if r.status == MatchStatus::Rejected));

    let again = m
      .set_match_status(id, MatchStatus::Pending, MatchStatus::Accepted)
      .await
      .unwrap();
    assert_eq!(again, StatusUpdate::Conflict(MatchStatus::Rejected));

    let missing = m
      .set_match_status(Uuid::new_v4(), MatchStatus::Pending, MatchStatus::Accepted)
      .await
      .unwrap();
    assert_eq!(missing, StatusUpdate::Missing);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_answers_let_exactly_one_win() {
    let m = MemoryBackend::new();
    let (a, b) = two_skills(&m).await;
    let alice = ActorId::from("alice");
    let bob = ActorId::from("bob");

    for _ in 0..50 {
      let request = request_match(&m, Some(&alice), a.skill_id, b.skill_id)
        .await
        .unwrap();
      let id = request.request_id;
      let (accept, reject) = tokio::join!(
        respond(&m, Some(&bob), id, true),
        respond(&m, Some(&bob), id, false),
      );
      let winner = match (accept, reject) {
        (Ok(r), Err(Error::InvalidTransition { .. }))
        | (Err(Error::InvalidTransition { .. }), Ok(r)) => r.status,
        other => panic!("expected exactly one answer to win, got {other:?}"),
      };
      let stored = m.get_match_request(id).await.unwrap().unwrap();
      assert_eq!(stored.status, winner);
    }
  }

  #[tokio::test]
  async fn skill_query_filters_combine() {
    let m = MemoryBackend::new();
    two_skills(&m).await;
    let carol = ActorId::from("carol");
    add_skill(&m, Some(&carol), form("Guitar", "Music", "Beginner"))
      .await
      .unwrap();

    let titles = |skills: Vec<Skill>| -> Vec<String> {
      skills.into_iter().map(|s| s.title).collect()
    };

    // Description text matches too, and case is ignored.
    let all = SkillQuery { text: Some("HANDS-ON".into()), ..SkillQuery::default() };
    assert_eq!(m.list_skills(&all).await.unwrap().len(), 3);

    let cooking = SkillQuery { text: Some(" cook".into()), ..SkillQuery::default() };
    assert_eq!(titles(m.list_skills(&cooking).await.unwrap()), ["Italian Cooking"]);

    let music = SkillQuery {
      category: Some("music".into()),
      level: Some(SkillLevel::Beginner),
      ..SkillQuery::default()
    };
    assert_eq!(titles(m.list_skills(&music).await.unwrap()), ["Guitar"]);

    let none = SkillQuery { level: Some(SkillLevel::Expert), ..SkillQuery::owned_by(&carol) };
    assert!(m.list_skills(&none).await.unwrap().is_empty());
  }
}
