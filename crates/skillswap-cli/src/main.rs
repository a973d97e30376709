//! `skillswap`: command-line client for the SkillSwap store.
//!
//! # Usage
//!
//! ```
//! skillswap --as alice send bob "Free on Thursday?"
//! skillswap --as bob chat alice
//! skillswap --as bob notifications --mark-all-read
//! skillswap --config ~/.config/skillswap.toml skills list
//! ```

mod commands;
mod settings;

use std::{collections::HashMap, path::PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use commands::App;
use settings::Settings;
use skillswap_core::{
  marketplace::{Direction, SkillForm, SkillLevel, SkillQuery},
  record::{ActorId, NotificationKind},
};
use skillswap_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "skillswap", author, version, about = "SkillSwap client")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "skillswap.toml")]
  config: PathBuf,

  /// Act as this user, overriding `viewer` from the config.
  #[arg(long = "as", value_name = "USER", env = "SKILLSWAP_VIEWER")]
  viewer: Option<String>,

  /// Print results as JSON.
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Send a chat message.
  Send { to: String, message: String },

  /// Show the conversation with a user and mark their messages read.
  Chat { with: String },

  /// List conversations, most recent first.
  Conversations {
    /// Only conversations whose counterpart matches this text.
    #[arg(long)]
    search: Option<String>,
  },

  /// Show the latest notifications.
  Notifications {
    #[arg(long, conflicts_with = "mark")]
    mark_all_read: bool,

    /// Mark a single notification read.
    #[arg(long, value_name = "ID")]
    mark: Option<String>,
  },

  /// Send a notification to a user.
  Notify {
    to:      String,
    content: String,

    #[arg(long, default_value = "other")]
    kind: NotificationKind,

    /// Id of the request, session, or badge the notification is about.
    #[arg(long)]
    related: Option<String>,
  },

  #[command(subcommand)]
  Skills(SkillsCommand),

  #[command(subcommand)]
  Requests(RequestsCommand),

  /// Take the verification quiz for one of your skills. Without answers,
  /// prints the questions.
  Verify {
    skill_id: Uuid,

    /// An answer as `<question>=<option>`, e.g. `q1=0`. Repeatable.
    #[arg(long = "answer", value_parser = parse_answer)]
    answers: Vec<(String, usize)>,
  },
}

#[derive(Subcommand, Debug)]
enum SkillsCommand {
  /// List skills on offer.
  List {
    #[arg(long)]
    owner:    Option<String>,
    /// Only skills whose title or description contains this text.
    #[arg(long)]
    search:   Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    level:    Option<SkillLevel>,
  },

  /// Offer a new skill.
  Add {
    #[arg(long)]
    title:       String,
    #[arg(long)]
    description: String,
    #[arg(long)]
    category:    String,
    #[arg(long)]
    level:       String,
    /// A skill you would like to learn in exchange. Repeatable.
    #[arg(long = "wants")]
    wants:       Vec<String>,
  },
}

#[derive(Subcommand, Debug)]
enum RequestsCommand {
  List {
    #[arg(long, default_value = "incoming")]
    direction: Direction,
  },

  /// Offer one of your skills in exchange for someone else's.
  Create { offered: Uuid, requested: Uuid },

  Accept { request_id: Uuid },

  Reject { request_id: Uuid },
}

fn parse_answer(s: &str) -> Result<(String, usize), String> {
  let (question, option) = s
    .split_once('=')
    .ok_or_else(|| format!("expected <question>=<option>, got {s:?}"))?;
  let option = option
    .trim()
    .parse()
    .map_err(|_| format!("option must be a number, got {option:?}"))?;
  Ok((question.trim().to_owned(), option))
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  if let Some(dir) = settings.store_path.parent()
    && !dir.as_os_str().is_empty()
  {
    std::fs::create_dir_all(dir)
      .with_context(|| format!("failed to create {}", dir.display()))?;
  }
  let store = SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))?;

  let viewer = cli.viewer.or(settings.viewer).map(ActorId::new);
  tracing::debug!(viewer = ?viewer, store = ?settings.store_path, "starting");
  let app = App::new(store, viewer, cli.json);

  let output = match cli.command {
    Command::Send { to, message } => app.send(&to, &message).await?,
    Command::Chat { with } => app.chat(&with).await?,
    Command::Conversations { search } => app.conversations(search.as_deref()).await?,
    Command::Notifications { mark_all_read, mark } => {
      app.notifications(mark_all_read, mark.as_deref()).await?
    }
    Command::Notify { to, content, kind, related } => {
      app.notify(&to, kind, &content, related).await?
    }
    Command::Skills(SkillsCommand::List { owner, search, category, level }) => {
      app
        .skills(SkillQuery {
          text: search,
          category,
          level,
          owner: owner.map(ActorId::new),
        })
        .await?
    }
    Command::Skills(SkillsCommand::Add { title, description, category, level, wants }) => {
      app
        .add_skill(SkillForm {
          title,
          description,
          category,
          level,
          skills_wanted: wants,
        })
        .await?
    }
    Command::Requests(RequestsCommand::List { direction }) => app.requests(direction).await?,
    Command::Requests(RequestsCommand::Create { offered, requested }) => {
      app.request(offered, requested).await?
    }
    Command::Requests(RequestsCommand::Accept { request_id }) => {
      app.respond(request_id, true).await?
    }
    Command::Requests(RequestsCommand::Reject { request_id }) => {
      app.respond(request_id, false).await?
    }
    Command::Verify { skill_id, answers } => {
      app.verify(skill_id, answers.into_iter().collect::<HashMap<_, _>>()).await?
    }
  };

  print!("{output}");
  if !output.ends_with('\n') {
    println!();
  }
  Ok(())
}
