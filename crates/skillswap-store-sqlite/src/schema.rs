//! SQL schema for the SkillSwap SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Rows are never deleted; the only UPDATE ever issued sets read = 1.
CREATE TABLE IF NOT EXISTS chat_messages (
    id          TEXT PRIMARY KEY,
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    content     TEXT NOT NULL,
    read        INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,      -- RFC 3339 UTC, fixed width; server-assigned
    CHECK (sender_id != receiver_id)
);

CREATE TABLE IF NOT EXISTS notifications (
    id                TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL,
    type              TEXT NOT NULL,   -- NotificationKind, snake_case
    content           TEXT NOT NULL,
    read              INTEGER NOT NULL DEFAULT 0,
    related_entity_id TEXT,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS skills (
    skill_id      TEXT PRIMARY KEY,
    owner_id      TEXT NOT NULL,
    title         TEXT NOT NULL,
    description   TEXT NOT NULL,
    category      TEXT NOT NULL,
    level         TEXT NOT NULL,      -- 'Beginner' | 'Intermediate' | 'Advanced' | 'Expert'
    skills_wanted TEXT NOT NULL DEFAULT '[]',
    verified      INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS match_requests (
    request_id          TEXT PRIMARY KEY,
    requester_id        TEXT NOT NULL,
    recipient_id        TEXT NOT NULL,
    offered_skill_id    TEXT NOT NULL REFERENCES skills(skill_id),
    offered_title       TEXT NOT NULL,
    requested_skill_id  TEXT NOT NULL REFERENCES skills(skill_id),
    requested_title     TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'pending',
    created_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS chat_sender_idx     ON chat_messages(sender_id);
CREATE INDEX IF NOT EXISTS chat_receiver_idx   ON chat_messages(receiver_id);
CREATE INDEX IF NOT EXISTS chat_created_idx    ON chat_messages(created_at);
CREATE INDEX IF NOT EXISTS notif_user_idx      ON notifications(user_id);
CREATE INDEX IF NOT EXISTS skills_owner_idx    ON skills(owner_id);
CREATE INDEX IF NOT EXISTS requests_from_idx   ON match_requests(requester_id);
CREATE INDEX IF NOT EXISTS requests_to_idx     ON match_requests(recipient_id);

PRAGMA user_version = 1;
";
