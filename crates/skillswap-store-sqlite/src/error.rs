//! Error type for `skillswap-store-sqlite`.

use skillswap_core::{
  record::{RecordId, Table},
  remote::Patch,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value the domain types do not recognise.
  #[error("cannot decode {column}: {value:?}")]
  Decode { column: &'static str, value: String },

  #[error("message {0} has no receiver")]
  NoReceiver(RecordId),

  #[error("patch {0:?} is not supported")]
  UnsupportedPatch(Patch),

  #[error("a {payload} record cannot be stored in {table}")]
  WrongTable { table: Table, payload: Table },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
