//! Skill verification quizzes.
//!
//! A skill can be verified by passing a short multiple-choice quiz for its
//! title. Quizzes are a fixed table; a score of at least
//! [`VERIFICATION_THRESHOLD`] passes.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::{
  error::{Error, Result},
  marketplace::{Marketplace, Skill},
  record::{ActorId, require_viewer},
};

/// Fraction of correct answers needed to pass.
pub const VERIFICATION_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Question {
  pub id:       &'static str,
  pub prompt:   &'static str,
  pub options:  &'static [&'static str],
  /// Index into `options`.
  pub answer:   usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quiz {
  pub skill_title: &'static str,
  pub questions:   &'static [Question],
}

const QUIZZES: &[Quiz] = &[
  Quiz {
    skill_title: "Web Development",
    questions:   &[
      Question {
        id:      "q1",
        prompt:  "What does HTML stand for?",
        options: &[
          "Hypertext Markup Language",
          "Hypertext Markdown Language",
          "Hyper Transfer Markup Language",
          "High Tech Modern Language",
        ],
        answer:  0,
      },
      Question {
        id:      "q2",
        prompt:  "Which CSS property is used to change the text color?",
        options: &["color", "text-color", "font-color", "text-style"],
        answer:  0,
      },
      Question {
        id:      "q3",
        prompt:  "Which JavaScript method selects an HTML element by its ID?",
        options: &[
          "querySelector()",
          "getElementById()",
          "selectElement()",
          "findElement()",
        ],
        answer:  1,
      },
      Question {
        id:      "q4",
        prompt:  "What is the correct way to include an external JavaScript file?",
        options: &[
          "<script src=\"script.js\"></script>",
          "<script href=\"script.js\"></script>",
          "<javascript src=\"script.js\"></javascript>",
          "<js src=\"script.js\"></js>",
        ],
        answer:  0,
      },
      Question {
        id:      "q5",
        prompt:  "Which HTTP status code represents a successful request?",
        options: &["200", "404", "500", "302"],
        answer:  0,
      },
    ],
  },
  Quiz {
    skill_title: "Digital Marketing",
    questions:   &[
      Question {
        id:      "q1",
        prompt:  "What is SEO?",
        options: &[
          "Search Engine Optimization",
          "Search Engine Output",
          "System Engine Output",
          "Social Engine Optimization",
        ],
        answer:  0,
      },
      Question {
        id:      "q2",
        prompt:  "Which platform is NOT used for social media marketing?",
        options: &["Instagram", "Twitter/X", "MongoDB", "LinkedIn"],
        answer:  2,
      },
      Question {
        id:      "q3",
        prompt:  "What is PPC in digital marketing?",
        options: &[
          "Pay Per Click",
          "Price Per Customer",
          "Post Per Campaign",
          "Product Placement Cost",
        ],
        answer:  0,
      },
      Question {
        id:      "q4",
        prompt:  "Which metric measures visitors who leave after viewing one page?",
        options: &[
          "Click-through rate",
          "Bounce rate",
          "Conversion rate",
          "Exit rate",
        ],
        answer:  1,
      },
    ],
  },
  Quiz {
    skill_title: "Graphic Design",
    questions:   &[
      Question {
        id:      "q1",
        prompt:  "Which color mode is used for print design?",
        options: &["RGB", "CMYK", "HSL", "HEX"],
        answer:  1,
      },
      Question {
        id:      "q2",
        prompt:  "Which Adobe software is primarily used for vector graphics?",
        options: &["Photoshop", "Illustrator", "Premiere Pro", "After Effects"],
        answer:  1,
      },
      Question {
        id:      "q3",
        prompt:  "What does DPI stand for in design?",
        options: &[
          "Digital Print Indicator",
          "Dots Per Inch",
          "Design Pixel Interface",
          "Document Process Integration",
        ],
        answer:  1,
      },
    ],
  },
];

/// The quiz for a skill title, compared case-insensitively.
pub fn quiz_for(skill_title: &str) -> Option<&'static Quiz> {
  QUIZZES
    .iter()
    .find(|q| q.skill_title.eq_ignore_ascii_case(skill_title.trim()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Score {
  pub correct: usize,
  pub total:   usize,
}

impl Score {
  pub fn ratio(self) -> f64 {
    if self.total == 0 {
      0.0
    } else {
      self.correct as f64 / self.total as f64
    }
  }

  pub fn passed(self) -> bool { self.total > 0 && self.ratio() >= VERIFICATION_THRESHOLD }

  /// Whole percent, rounded.
  pub fn percent(self) -> u32 { (self.ratio() * 100.0).round() as u32 }
}

/// Grade `answers` (question id → chosen option index). Unanswered questions
/// count as wrong.
pub fn grade(quiz: &Quiz, answers: &HashMap<String, usize>) -> Score {
  let correct = quiz
    .questions
    .iter()
    .filter(|q| answers.get(q.id) == Some(&q.answer))
    .count();
  Score { correct, total: quiz.questions.len() }
}

/// The outcome of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
  pub score: Score,
  /// The skill as stored after the attempt.
  pub skill: Skill,
}

/// Grade the owner's answers for `skill_id` and mark the skill verified if
/// they pass. A failed attempt changes nothing and may be retried.
pub async fn verify_skill<M: Marketplace>(
  marketplace: &M,
  viewer: Option<&ActorId>,
  skill_id: Uuid,
  answers: &HashMap<String, usize>,
) -> Result<Verdict> {
  let viewer = require_viewer(viewer)?;
  let skill = marketplace
    .get_skill(skill_id)
    .await
    .map_err(Error::remote)?
    .ok_or_else(|| Error::NotFound(format!("skill {skill_id}")))?;
  if &skill.owner != viewer {
    return Err(Error::Forbidden("only the owner can verify a skill".into()));
  }
  let quiz = quiz_for(&skill.title).ok_or_else(|| {
    Error::Validation(format!("no quiz available for {}", skill.title))
  })?;

  let score = grade(quiz, answers);
  if !score.passed() {
    tracing::info!(%skill_id, percent = score.percent(), "verification failed");
    return Ok(Verdict { score, skill });
  }

  let skill = marketplace
    .mark_skill_verified(skill_id)
    .await
    .map_err(Error::remote)?
    .ok_or_else(|| Error::NotFound(format!("skill {skill_id}")))?;
  tracing::info!(%skill_id, percent = score.percent(), "skill verified");
  Ok(Verdict { score, skill })
}
