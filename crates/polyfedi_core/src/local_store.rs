/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Where downloaded actors, notes and activities end up.
//!
//! Rows are keyed by (origin, oid) and stored as JSON; every upsert merges the
//! incoming object into the stored one, so a poorer payload never erases data.

use anyhow::{Context, Result};
use async_trait::async_trait;
use polyfedi_model::{Activity, Actor, DownloadStatus, Note, TimelinePosition, TriState};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

use crate::command::TimelineType;
use crate::now_ms;
use crate::origin::LegacyHttp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Note,
    Actor,
}

impl ItemKind {
    fn table(self) -> &'static str {
        match self {
            Self::Note => "notes",
            Self::Actor => "actors",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub activity_id: i64,
    /// Local id of the innermost note, 0 when there is none.
    pub note_id: i64,
    /// Whether the note was not stored before.
    pub new_note: bool,
}

/// Stored cursors of one timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineCursor {
    pub youngest: TimelinePosition,
    pub oldest: TimelinePosition,
    pub synced_ms: i64,
}

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn upsert_actor(&self, actor: &Actor) -> Result<i64>;

    async fn upsert_note(&self, note: &Note) -> Result<i64>;

    /// Stores the activity as seen by `account`, with every actor and note it references.
    async fn upsert_activity(&self, account: &str, activity: &Activity) -> Result<UpsertOutcome>;

    async fn mark_favorited(&self, note_id: i64, favorited: bool) -> Result<()>;

    async fn mark_reblogged(&self, note_id: i64, reblogged: bool) -> Result<()>;

    async fn remove_note(&self, note_id: i64) -> Result<()>;

    async fn id_to_oid(&self, kind: ItemKind, id: i64) -> Result<Option<String>>;

    async fn oid_to_id(&self, kind: ItemKind, origin_id: i64, oid: &str) -> Result<Option<i64>>;

    async fn get_actor(&self, id: i64) -> Result<Option<Actor>>;

    async fn get_note(&self, id: i64) -> Result<Option<Note>>;

    async fn set_following(&self, account: &str, actor_id: i64, following: bool) -> Result<()>;

    async fn is_following(&self, account: &str, actor_id: i64) -> Result<bool>;

    async fn timeline_cursor(&self, account: &str, timeline: TimelineType, actor_id: i64) -> Result<TimelineCursor>;

    async fn set_timeline_cursor(
        &self,
        account: &str,
        timeline: TimelineType,
        actor_id: i64,
        cursor: &TimelineCursor,
    ) -> Result<()>;

    /// Records where the file downloaded from `uri` was saved.
    async fn set_downloaded_file(&self, uri: &str, local_file: &Path) -> Result<()>;

    async fn downloaded_file(&self, uri: &str) -> Result<Option<PathBuf>>;

    async fn origin_legacy_http(&self, origin_id: i64) -> Result<LegacyHttp>;

    async fn set_origin_legacy_http(&self, origin_id: i64, value: LegacyHttp) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS actors (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              origin_id INTEGER NOT NULL,
              oid TEXT NOT NULL,
              webfinger TEXT NOT NULL,
              json TEXT NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_actors_oid ON actors(origin_id, oid);
            CREATE INDEX IF NOT EXISTS idx_actors_webfinger ON actors(origin_id, webfinger);

            CREATE TABLE IF NOT EXISTS notes (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              origin_id INTEGER NOT NULL,
              oid TEXT NOT NULL,
              json TEXT NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              UNIQUE(origin_id, oid)
            );

            CREATE TABLE IF NOT EXISTS activities (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              origin_id INTEGER NOT NULL,
              oid TEXT NOT NULL,
              account TEXT NOT NULL,
              activity_type TEXT NOT NULL,
              note_id INTEGER NOT NULL,
              json TEXT NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_activities_oid ON activities(origin_id, oid, account);

            CREATE TABLE IF NOT EXISTS friendships (
              account TEXT NOT NULL,
              actor_id INTEGER NOT NULL,
              following INTEGER NOT NULL,
              PRIMARY KEY (account, actor_id)
            );

            CREATE TABLE IF NOT EXISTS timelines (
              account TEXT NOT NULL,
              timeline_type TEXT NOT NULL,
              actor_id INTEGER NOT NULL,
              youngest TEXT NOT NULL,
              oldest TEXT NOT NULL,
              synced_ms INTEGER NOT NULL,
              PRIMARY KEY (account, timeline_type, actor_id)
            );

            CREATE TABLE IF NOT EXISTS downloads (
              uri TEXT PRIMARY KEY,
              local_file TEXT NOT NULL,
              downloaded_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS origins (
              origin_id INTEGER PRIMARY KEY,
              legacy_http INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self { path })
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
            f(&mut conn)
        })
        .await?
    }
}

fn to_json<T: Serialize>(v: &T) -> Result<String> {
    serde_json::to_string(v).context("serialize row")
}

fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).context("deserialize row")
}

fn find_actor(conn: &Connection, actor: &Actor) -> Result<Option<(i64, Actor)>> {
    let row: Option<(i64, String)> = if !actor.oid.is_empty() {
        conn.query_row(
            "SELECT id, json FROM actors WHERE origin_id=?1 AND oid=?2",
            params![actor.origin_id, actor.oid],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
    } else {
        None
    };
    // An actor first seen as a mention has no oid yet.
    let row = match row {
        Some(row) => Some(row),
        None if !actor.webfinger_id.is_empty() => conn
            .query_row(
                "SELECT id, json FROM actors WHERE origin_id=?1 AND webfinger=?2 AND (oid='' OR ?3='')",
                params![actor.origin_id, actor.webfinger_id.to_lowercase(), actor.oid],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?,
        None => None,
    };
    row.map(|(id, json)| Ok((id, from_json(&json)?))).transpose()
}

fn upsert_actor_sync(conn: &Connection, actor: &Actor) -> Result<i64> {
    if actor.is_empty() {
        return Ok(0);
    }
    let now = now_ms();
    match find_actor(conn, actor)? {
        Some((id, mut stored)) => {
            stored.merge_from(actor);
            conn.execute(
                "UPDATE actors SET oid=?2, webfinger=?3, json=?4, updated_at_ms=?5 WHERE id=?1",
                params![id, stored.oid, stored.webfinger_id.to_lowercase(), to_json(&stored)?, now],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO actors(origin_id, oid, webfinger, json, updated_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![actor.origin_id, actor.oid, actor.webfinger_id.to_lowercase(), to_json(actor)?, now],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

/// Returns the note id and whether the note is new. A note stored before only
/// as a reference (a reply target, a mention) is new on its first full load.
fn upsert_note_sync(conn: &Connection, note: &Note) -> Result<(i64, bool)> {
    if note.oid.is_empty() {
        return Ok((0, false));
    }
    upsert_actor_sync(conn, &note.author)?;
    for actor in &note.audience.actors {
        upsert_actor_sync(conn, actor)?;
    }
    if let Some(reply_to) = note.in_reply_to_note() {
        upsert_note_sync(conn, reply_to)?;
    }
    let now = now_ms();
    let stored: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, json FROM notes WHERE origin_id=?1 AND oid=?2",
            params![note.origin_id, note.oid],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    match stored {
        Some((id, json)) => {
            let mut merged: Note = from_json(&json)?;
            let was_loaded = merged.status == DownloadStatus::Loaded;
            merged.merge_from(note);
            conn.execute(
                "UPDATE notes SET json=?2, updated_at_ms=?3 WHERE id=?1",
                params![id, to_json(&merged)?, now],
            )?;
            Ok((id, !was_loaded && merged.status == DownloadStatus::Loaded))
        }
        None => {
            conn.execute(
                "INSERT INTO notes(origin_id, oid, json, updated_at_ms) VALUES (?1, ?2, ?3, ?4)",
                params![note.origin_id, note.oid, to_json(note)?, now],
            )?;
            Ok((conn.last_insert_rowid(), true))
        }
    }
}

fn update_note_json(conn: &Connection, note_id: i64, f: impl FnOnce(&mut Note)) -> Result<()> {
    let json: Option<String> = conn
        .query_row("SELECT json FROM notes WHERE id=?1", params![note_id], |r| r.get(0))
        .optional()?;
    let Some(json) = json else {
        anyhow::bail!("note {note_id} not found");
    };
    let mut note: Note = from_json(&json)?;
    f(&mut note);
    conn.execute(
        "UPDATE notes SET json=?2, updated_at_ms=?3 WHERE id=?1",
        params![note_id, to_json(&note)?, now_ms()],
    )?;
    Ok(())
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn upsert_actor(&self, actor: &Actor) -> Result<i64> {
        let actor = actor.clone();
        self.run(move |conn| upsert_actor_sync(conn, &actor)).await
    }

    async fn upsert_note(&self, note: &Note) -> Result<i64> {
        let note = note.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let (id, _) = upsert_note_sync(&tx, &note)?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn upsert_activity(&self, account: &str, activity: &Activity) -> Result<UpsertOutcome> {
        let account = account.to_string();
        let activity = activity.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for actor in activity.actors() {
                upsert_actor_sync(&tx, actor)?;
            }
            let (note_id, new_note) = match activity.innermost_note() {
                Some(note) => upsert_note_sync(&tx, note)?,
                None => (0, false),
            };
            let now = now_ms();
            let existing: Option<(i64, String)> = if activity.oid.is_empty() {
                None
            } else {
                tx.query_row(
                    "SELECT id, json FROM activities WHERE origin_id=?1 AND oid=?2 AND account=?3",
                    params![activity.origin_id, activity.oid, account],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?
            };
            let activity_type = activity.activity_type.as_ap_name();
            let activity_id = match existing {
                Some((id, json)) => {
                    let mut merged: Activity = from_json(&json)?;
                    merged.merge_from(&activity);
                    tx.execute(
                        "UPDATE activities SET json=?2, note_id=?3, updated_at_ms=?4 WHERE id=?1",
                        params![id, to_json(&merged)?, note_id, now],
                    )?;
                    id
                }
                None => {
                    tx.execute(
                        r#"
                        INSERT INTO activities(origin_id, oid, account, activity_type, note_id, json, updated_at_ms)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                        "#,
                        params![activity.origin_id, activity.oid, account, activity_type, note_id, to_json(&activity)?, now],
                    )?;
                    tx.last_insert_rowid()
                }
            };
            tx.commit()?;
            Ok(UpsertOutcome {
                activity_id,
                note_id,
                new_note,
            })
        })
        .await
    }

    async fn mark_favorited(&self, note_id: i64, favorited: bool) -> Result<()> {
        self.run(move |conn| update_note_json(conn, note_id, |n| n.favorited = TriState::from_bool(favorited)))
            .await
    }

    async fn mark_reblogged(&self, note_id: i64, reblogged: bool) -> Result<()> {
        self.run(move |conn| update_note_json(conn, note_id, |n| n.reblogged = TriState::from_bool(reblogged)))
            .await
    }

    async fn remove_note(&self, note_id: i64) -> Result<()> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM activities WHERE note_id=?1", params![note_id])?;
            tx.execute("DELETE FROM notes WHERE id=?1", params![note_id])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn id_to_oid(&self, kind: ItemKind, id: i64) -> Result<Option<String>> {
        self.run(move |conn| {
            let sql = format!("SELECT oid FROM {} WHERE id=?1", kind.table());
            let oid: Option<String> = conn.query_row(&sql, params![id], |r| r.get(0)).optional()?;
            Ok(oid.filter(|o| !o.is_empty()))
        })
        .await
    }

    async fn oid_to_id(&self, kind: ItemKind, origin_id: i64, oid: &str) -> Result<Option<i64>> {
        let oid = oid.to_string();
        self.run(move |conn| {
            let sql = format!("SELECT id FROM {} WHERE origin_id=?1 AND oid=?2", kind.table());
            Ok(conn.query_row(&sql, params![origin_id, oid], |r| r.get(0)).optional()?)
        })
        .await
    }

    async fn get_actor(&self, id: i64) -> Result<Option<Actor>> {
        self.run(move |conn| {
            let json: Option<String> = conn
                .query_row("SELECT json FROM actors WHERE id=?1", params![id], |r| r.get(0))
                .optional()?;
            json.map(|j| from_json(&j)).transpose()
        })
        .await
    }

    async fn get_note(&self, id: i64) -> Result<Option<Note>> {
        self.run(move |conn| {
            let json: Option<String> = conn
                .query_row("SELECT json FROM notes WHERE id=?1", params![id], |r| r.get(0))
                .optional()?;
            json.map(|j| from_json(&j)).transpose()
        })
        .await
    }

    async fn set_following(&self, account: &str, actor_id: i64, following: bool) -> Result<()> {
        let account = account.to_string();
        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO friendships(account, actor_id, following) VALUES (?1, ?2, ?3)
                ON CONFLICT(account, actor_id) DO UPDATE SET following=excluded.following
                "#,
                params![account, actor_id, following as i64],
            )?;
            Ok(())
        })
        .await
    }

    async fn is_following(&self, account: &str, actor_id: i64) -> Result<bool> {
        let account = account.to_string();
        self.run(move |conn| {
            let v: Option<i64> = conn
                .query_row(
                    "SELECT following FROM friendships WHERE account=?1 AND actor_id=?2",
                    params![account, actor_id],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(v.unwrap_or(0) != 0)
        })
        .await
    }

    async fn timeline_cursor(&self, account: &str, timeline: TimelineType, actor_id: i64) -> Result<TimelineCursor> {
        let account = account.to_string();
        self.run(move |conn| {
            let row: Option<(String, String, i64)> = conn
                .query_row(
                    r#"
                    SELECT youngest, oldest, synced_ms FROM timelines
                    WHERE account=?1 AND timeline_type=?2 AND actor_id=?3
                    "#,
                    params![account, timeline.as_str(), actor_id],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()?;
            Ok(row
                .map(|(youngest, oldest, synced_ms)| TimelineCursor {
                    youngest: TimelinePosition::new(youngest),
                    oldest: TimelinePosition::new(oldest),
                    synced_ms,
                })
                .unwrap_or_default())
        })
        .await
    }

    async fn set_timeline_cursor(
        &self,
        account: &str,
        timeline: TimelineType,
        actor_id: i64,
        cursor: &TimelineCursor,
    ) -> Result<()> {
        let account = account.to_string();
        let cursor = cursor.clone();
        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO timelines(account, timeline_type, actor_id, youngest, oldest, synced_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(account, timeline_type, actor_id) DO UPDATE SET
                  youngest=excluded.youngest,
                  oldest=excluded.oldest,
                  synced_ms=excluded.synced_ms
                "#,
                params![
                    account,
                    timeline.as_str(),
                    actor_id,
                    cursor.youngest.as_str(),
                    cursor.oldest.as_str(),
                    cursor.synced_ms
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_downloaded_file(&self, uri: &str, local_file: &Path) -> Result<()> {
        let uri = uri.to_string();
        let local_file = local_file.to_string_lossy().to_string();
        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO downloads(uri, local_file, downloaded_ms) VALUES (?1, ?2, ?3)
                ON CONFLICT(uri) DO UPDATE SET local_file=excluded.local_file, downloaded_ms=excluded.downloaded_ms
                "#,
                params![uri, local_file, now_ms()],
            )?;
            Ok(())
        })
        .await
    }

    async fn downloaded_file(&self, uri: &str) -> Result<Option<PathBuf>> {
        let uri = uri.to_string();
        self.run(move |conn| {
            let path: Option<String> = conn
                .query_row("SELECT local_file FROM downloads WHERE uri=?1", params![uri], |r| r.get(0))
                .optional()?;
            Ok(path.map(PathBuf::from))
        })
        .await
    }

    async fn origin_legacy_http(&self, origin_id: i64) -> Result<LegacyHttp> {
        self.run(move |conn| {
            let v: Option<i64> = conn
                .query_row(
                    "SELECT legacy_http FROM origins WHERE origin_id=?1",
                    params![origin_id],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(match v {
                Some(1) => LegacyHttp::Yes,
                Some(0) => LegacyHttp::No,
                _ => LegacyHttp::Unknown,
            })
        })
        .await
    }

    async fn set_origin_legacy_http(&self, origin_id: i64, value: LegacyHttp) -> Result<()> {
        let stored = match value {
            LegacyHttp::Yes => 1,
            LegacyHttp::No => 0,
            LegacyHttp::Unknown => -1,
        };
        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO origins(origin_id, legacy_http) VALUES (?1, ?2)
                ON CONFLICT(origin_id) DO UPDATE SET legacy_http=excluded.legacy_http
                "#,
                params![origin_id, stored],
            )?;
            Ok(())
        })
        .await
    }
}
