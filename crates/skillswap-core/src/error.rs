//! Error types for `skillswap-core`.
//!
//! Every operation exposed to a presentation binding returns
//! [`Result`]; expected failures (no viewer, bad input, backend down) are
//! values, never panics.

use thiserror::Error;

use crate::marketplace::MatchStatus;

#[derive(Debug, Error)]
pub enum Error {
  /// No viewer identity is attached; refused before any remote call.
  #[error("not authenticated")]
  NotAuthenticated,

  /// Input rejected locally (e.g. empty message content).
  #[error("validation error: {0}")]
  Validation(String),

  /// A fetch, mutate, or subscribe call against the backend failed. The
  /// local collection is left as it was before the call.
  #[error("remote unavailable: {0}")]
  RemoteUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// A response arrived for a session that has since been torn down or
  /// re-initialised. It was discarded.
  #[error("stale response discarded")]
  StaleResponse,

  #[error("not found: {0}")]
  NotFound(String),

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("cannot move match request from {from} to {to}")]
  InvalidTransition { from: MatchStatus, to: MatchStatus },
}

impl Error {
  /// Wrap a backend error.
  pub fn remote<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::RemoteUnavailable(Box::new(err))
  }

  /// Whether the failure should be shown to the user at all. Stale responses
  /// are dropped silently.
  pub fn is_user_visible(&self) -> bool { !matches!(self, Self::StaleResponse) }

  /// Whether retrying the same operation later may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::RemoteUnavailable(_))
  }

  /// Short, dismissible text naming the failed action, e.g.
  /// `"failed to send message"`. `None` for errors that are not shown.
  pub fn failed_action(&self, action: &str) -> Option<String> {
    match self {
      Self::StaleResponse => None,
      Self::Validation(reason) => Some(format!("failed to {action}: {reason}")),
      _ => Some(format!("failed to {action}")),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stale_response_is_silent() {
    let err = Error::StaleResponse;
    assert!(!err.is_user_visible());
    assert_eq!(err.failed_action("load messages"), None);
  }

  #[test]
  fn remote_failure_names_the_action() {
    let err = Error::remote(std::io::Error::other("connection reset"));
    assert!(err.is_retryable());
    assert_eq!(
      err.failed_action("send message").as_deref(),
      Some("failed to send message")
    );
  }

  #[test]
  fn validation_failure_is_not_retryable() {
    let err = Error::Validation("message is empty".into());
    assert!(!err.is_retryable());
    assert_eq!(
      err.failed_action("send message").as_deref(),
      Some("failed to send message: message is empty")
    );
  }
}
