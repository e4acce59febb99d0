//! Bounded per-user chat history with optional durable append.
//!
//! The in-memory ring is authoritative; the SQLite archive is append-only
//! and keyed by (user, calendar day). Turns never carry image bytes — a
//! photo is referenced by its request id so both stores stay small.

use crate::config::HistoryConfig;
use crate::error::{GlintError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// One completed conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub had_photo: bool,
    /// Photo request id, never bytes.
    pub photo_ref: Option<String>,
}

/// Append-only SQLite archive of chat turns.
pub struct TurnArchive {
    conn: Mutex<Connection>,
}

impl TurnArchive {
    /// Open (or create) the archive at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GlintError::Archive(format!("cannot create archive dir: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| GlintError::Archive(format!("cannot open archive: {e}")))?;
        Self::init(conn)
    }

    /// In-memory archive for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite refuses the in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| GlintError::Archive(format!("cannot open archive: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chat_turns (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    TEXT NOT NULL,
                day        TEXT NOT NULL,
                ts_ms      INTEGER NOT NULL,
                query      TEXT NOT NULL,
                response   TEXT NOT NULL,
                had_photo  INTEGER NOT NULL,
                photo_ref  TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_chat_turns_user_day
                ON chat_turns (user_id, day);",
        )
        .map_err(|e| GlintError::Archive(format!("cannot migrate archive: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append one turn under the turn's calendar day.
    ///
    /// # Errors
    ///
    /// Returns an error on SQLite failure; callers log and move on.
    pub fn append(&self, user_id: &str, turn: &ChatTurn) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO chat_turns (user_id, day, ts_ms, query, response, had_photo, photo_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                user_id,
                turn.timestamp.date_naive().to_string(),
                turn.timestamp.timestamp_millis(),
                turn.query,
                turn.response,
                turn.had_photo,
                turn.photo_ref,
            ],
        )
        .map_err(|e| GlintError::Archive(format!("append failed: {e}")))?;
        Ok(())
    }

    /// All archived turns for a (user, day), oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on SQLite failure.
    pub fn turns_for_day(&self, user_id: &str, day: NaiveDate) -> Result<Vec<ChatTurn>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare(
                "SELECT ts_ms, query, response, had_photo, photo_ref
                 FROM chat_turns WHERE user_id = ?1 AND day = ?2 ORDER BY id",
            )
            .map_err(|e| GlintError::Archive(format!("query failed: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![user_id, day.to_string()], |row| {
                let ts_ms: i64 = row.get(0)?;
                Ok(ChatTurn {
                    timestamp: DateTime::<Utc>::from_timestamp_millis(ts_ms)
                        .unwrap_or_else(Utc::now),
                    query: row.get(1)?,
                    response: row.get(2)?,
                    had_photo: row.get(3)?,
                    photo_ref: row.get(4)?,
                })
            })
            .map_err(|e| GlintError::Archive(format!("query failed: {e}")))?;
        let mut turns = Vec::new();
        for row in rows {
            turns.push(row.map_err(|e| GlintError::Archive(format!("row failed: {e}")))?);
        }
        Ok(turns)
    }
}

/// Per-user chat history.
pub struct ChatHistory {
    user_id: String,
    capacity: usize,
    archive: Option<Arc<TurnArchive>>,
    archive_deadline: Duration,
    /// Durable persistence toggle (the `chatHistoryEnabled` user setting).
    archive_enabled: AtomicBool,
    ring: Mutex<VecDeque<ChatTurn>>,
}

impl ChatHistory {
    #[must_use]
    pub fn new(user_id: &str, archive: Option<Arc<TurnArchive>>, config: &HistoryConfig) -> Self {
        Self {
            user_id: user_id.to_owned(),
            capacity: config.capacity.max(1),
            archive,
            archive_deadline: Duration::from_millis(config.archive_deadline_ms),
            archive_enabled: AtomicBool::new(true),
            ring: Mutex::new(VecDeque::new()),
        }
    }

    /// Toggle durable persistence (in-memory ring is unaffected).
    pub fn set_archive_enabled(&self, enabled: bool) {
        self.archive_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether durable persistence is currently on.
    #[must_use]
    pub fn archive_enabled(&self) -> bool {
        self.archive_enabled.load(Ordering::Relaxed)
    }

    /// Record one completed turn.
    ///
    /// The ring write is immediate. The archive append runs on the blocking
    /// pool under a short deadline; failure or timeout only logs — the ring
    /// stays authoritative.
    pub async fn add_turn(
        &self,
        query: &str,
        response: &str,
        had_photo: bool,
        photo_ref: Option<String>,
    ) {
        let turn = ChatTurn {
            query: query.to_owned(),
            response: response.to_owned(),
            timestamp: Utc::now(),
            had_photo,
            photo_ref,
        };

        {
            let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
            if ring.len() >= self.capacity {
                ring.pop_front();
            }
            ring.push_back(turn.clone());
        }

        if !self.archive_enabled() {
            return;
        }
        let Some(archive) = self.archive.clone() else {
            return;
        };

        let user_id = self.user_id.clone();
        let append = tokio::task::spawn_blocking(move || archive.append(&user_id, &turn));
        match tokio::time::timeout(self.archive_deadline, append).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(user_id = %self.user_id, "archive append failed: {e}"),
            Ok(Err(e)) => warn!(user_id = %self.user_id, "archive append panicked: {e}"),
            Err(_) => debug!(user_id = %self.user_id, "archive append missed deadline"),
        }
    }

    /// The most recent `limit` turns, youngest last, optionally filtered to
    /// turns younger than `max_age`.
    #[must_use]
    pub fn recent_turns(&self, limit: usize, max_age: Option<Duration>) -> Vec<ChatTurn> {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let fresh: Vec<ChatTurn> = ring
            .iter()
            .filter(|turn| match max_age {
                Some(max_age) => {
                    let age = now.signed_duration_since(turn.timestamp);
                    age.to_std().map(|age| age <= max_age).unwrap_or(true)
                }
                None => true,
            })
            .cloned()
            .collect();
        let skip = fresh.len().saturating_sub(limit);
        fresh.into_iter().skip(skip).collect()
    }

    /// Number of turns in the ring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the ring is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn history(archive: Option<Arc<TurnArchive>>) -> ChatHistory {
        ChatHistory::new("u1", archive, &HistoryConfig::default())
    }

    #[tokio::test]
    async fn ring_caps_at_capacity() {
        let history = ChatHistory::new(
            "u1",
            None,
            &HistoryConfig {
                capacity: 2,
                ..Default::default()
            },
        );
        for n in 0..4 {
            history.add_turn(&format!("q{n}"), &format!("r{n}"), false, None).await;
        }
        let turns = history.recent_turns(10, None);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].query, "q2");
        assert_eq!(turns[1].query, "q3");
    }

    #[tokio::test]
    async fn recent_turns_is_youngest_last() {
        let history = history(None);
        history.add_turn("first", "a", false, None).await;
        history.add_turn("second", "b", false, None).await;
        let turns = history.recent_turns(1, None);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].query, "second");
    }

    #[tokio::test]
    async fn archive_receives_turns_keyed_by_day() {
        let archive = Arc::new(TurnArchive::open_in_memory().unwrap());
        let history = history(Some(Arc::clone(&archive)));
        history.add_turn("what time is it", "three", false, None).await;
        history
            .add_turn("read this", "it says exit", true, Some("req-1".to_owned()))
            .await;

        let today = Utc::now().date_naive();
        let archived = archive.turns_for_day("u1", today).unwrap();
        assert_eq!(archived.len(), 2);
        assert_eq!(archived[1].photo_ref.as_deref(), Some("req-1"));
        assert!(archived[1].had_photo);
    }

    #[tokio::test]
    async fn archive_disabled_skips_durable_append() {
        let archive = Arc::new(TurnArchive::open_in_memory().unwrap());
        let history = history(Some(Arc::clone(&archive)));
        history.set_archive_enabled(false);
        history.add_turn("q", "r", false, None).await;

        let today = Utc::now().date_naive();
        assert!(archive.turns_for_day("u1", today).unwrap().is_empty());
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn archive_on_disk_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glint.db");
        let archive = Arc::new(TurnArchive::open(&path).unwrap());
        let history = history(Some(Arc::clone(&archive)));
        history.add_turn("q", "r", false, None).await;

        let reopened = TurnArchive::open(&path).unwrap();
        let today = Utc::now().date_naive();
        assert_eq!(reopened.turns_for_day("u1", today).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn turns_never_store_bytes() {
        let history = history(None);
        history
            .add_turn("look", "a door", true, Some("req-2".to_owned()))
            .await;
        let turn = &history.recent_turns(1, None)[0];
        assert_eq!(turn.photo_ref.as_deref(), Some("req-2"));
    }
}
