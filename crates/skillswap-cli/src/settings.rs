//! Configuration file and environment loading.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

pub const DEFAULT_STORE_PATH: &str = "~/.local/share/skillswap/skillswap.db";

/// Settings read from the config file and `SKILLSWAP_*` variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
  pub store_path: PathBuf,
  /// The signed-in user. Commands that act on someone's behalf fail without
  /// one.
  #[serde(default)]
  pub viewer:     Option<String>,
}

impl Settings {
  /// Layer the (optional) file at `path` under the environment. `~` in
  /// `store_path` is expanded.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .set_default("store_path", DEFAULT_STORE_PATH)
      .context("failed to set config defaults")?
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("SKILLSWAP"))
      .build()
      .context("failed to read config file")?;

    let mut settings: Settings = settings
      .try_deserialize()
      .context("failed to deserialise settings")?;
    settings.store_path = expand_tilde(&settings.store_path);
    Ok(settings)
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
