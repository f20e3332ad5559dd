/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Turns commands into connection calls and store updates.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use polyfedi_model::{Activity, Actor, Note, TimelinePosition};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::command::{CommandData, CommandKind, CommandResult, TimelineType};
use crate::config::SchedulerSettings;
use crate::connection::{ApiRoutine, Connection, NoteDraft};
use crate::error::{ConnectionError, StatusCode};
use crate::local_store::{ItemKind, LocalStore};
use crate::now_ms;
use crate::origin::LegacyHttp;
use crate::scheduler::CommandRunner;

/// Counts what one command stored.
#[derive(Debug, Default)]
struct Tally {
    downloaded: u32,
    new: u32,
}

pub struct CommandExecutor {
    connections: HashMap<String, Box<dyn Connection>>,
    store: Arc<dyn LocalStore>,
    settings: SchedulerSettings,
    data_dir: PathBuf,
    /// Origins whose legacy HTTP preference is already persisted.
    remembered_legacy: Mutex<HashSet<i64>>,
}

fn missing(what: &str, id: i64) -> ConnectionError {
    ConnectionError::hard(StatusCode::NotFound, format!("{what} {id} is not in the local store"))
}

fn record_failure(result: &mut CommandResult, err: &anyhow::Error) {
    match err.downcast_ref::<ConnectionError>() {
        Some(e) => result.record_error(e),
        None => result.record_hard_failure(format!("{err:#}")),
    }
}

/// Cache file name for a downloaded URL: sha256 of the URL plus its extension.
fn cache_file_name(uri: &str) -> String {
    let digest = hex::encode(Sha256::digest(uri.as_bytes()));
    let path = reqwest::Url::parse(uri)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| uri.to_string());
    let ext = Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string());
    format!("{digest}.{ext}")
}

fn media_path(media_uri: &str) -> PathBuf {
    PathBuf::from(media_uri.strip_prefix("file://").unwrap_or(media_uri))
}

impl CommandExecutor {
    pub fn new(store: Arc<dyn LocalStore>, settings: SchedulerSettings, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            connections: HashMap::new(),
            store,
            settings,
            data_dir: data_dir.into(),
            remembered_legacy: Mutex::new(HashSet::new()),
        }
    }

    /// Registers the connection of one account, keyed by account name.
    pub fn add_connection(&mut self, conn: Box<dyn Connection>) {
        let name = conn.account().name.clone();
        self.connections.insert(name, conn);
    }

    pub fn account_names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    /// Applies the stored legacy HTTP preference to origins that have none yet.
    pub async fn load_origin_preferences(&self) -> Result<()> {
        for conn in self.connections.values() {
            let origin = &conn.account().origin;
            if origin.legacy_http() != LegacyHttp::Unknown {
                continue;
            }
            let stored = self.store.origin_legacy_http(origin.id).await?;
            if stored != LegacyHttp::Unknown {
                debug!(origin = %origin.name, ?stored, "legacy http preference restored");
                origin.set_legacy_http(stored);
            }
        }
        Ok(())
    }

    async fn remember_legacy_http(&self, conn: &dyn Connection) -> Result<()> {
        let origin = &conn.account().origin;
        if origin.legacy_http() != LegacyHttp::Yes {
            return Ok(());
        }
        let first = self
            .remembered_legacy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(origin.id);
        if first {
            info!(origin = %origin.name, "remembering legacy http for origin");
            self.store.set_origin_legacy_http(origin.id, LegacyHttp::Yes).await?;
        }
        Ok(())
    }

    fn connection(&self, account: &str) -> Result<&dyn Connection> {
        self.connections
            .get(account)
            .map(|c| c.as_ref())
            .ok_or_else(|| anyhow!("unknown account '{account}'"))
    }

    /// The command's account, else any account on `origin_id`.
    fn connection_for_origin(&self, account: &str, origin_id: i64) -> Result<&dyn Connection> {
        if !account.is_empty() {
            return self.connection(account);
        }
        self.connections
            .values()
            .find(|c| c.account().origin_id() == origin_id)
            .map(|c| c.as_ref())
            .ok_or_else(|| anyhow!("no account on origin {origin_id}"))
    }

    async fn note_oid(&self, note_id: i64) -> Result<String> {
        Ok(self
            .store
            .id_to_oid(ItemKind::Note, note_id)
            .await?
            .ok_or_else(|| missing("note", note_id))?)
    }

    async fn actor(&self, actor_id: i64) -> Result<Actor> {
        Ok(self
            .store
            .get_actor(actor_id)
            .await?
            .ok_or_else(|| missing("actor", actor_id))?)
    }

    async fn note(&self, note_id: i64) -> Result<Note> {
        Ok(self
            .store
            .get_note(note_id)
            .await?
            .ok_or_else(|| missing("note", note_id))?)
    }

    async fn store_activities(&self, account: &str, activities: &[Activity], tally: &mut Tally) -> Result<i64> {
        let mut first_note = 0;
        for activity in activities {
            let out = self.store.upsert_activity(account, activity).await?;
            tally.downloaded += 1;
            if out.new_note {
                tally.new += 1;
            }
            if first_note == 0 {
                first_note = out.note_id;
            }
        }
        Ok(first_note)
    }

    async fn execute(&self, cmd: &mut CommandData) -> Result<()> {
        match cmd.kind {
            CommandKind::FetchTimeline if cmd.timeline_type == TimelineType::Search => self.search(cmd).await,
            CommandKind::FetchTimeline => self.fetch_timeline(cmd).await,
            CommandKind::Search => self.search(cmd).await,
            CommandKind::GetNote => self.get_note(cmd).await,
            CommandKind::GetConversation => self.get_conversation(cmd).await,
            CommandKind::GetActor => self.get_actor(cmd).await,
            CommandKind::GetFriends | CommandKind::GetFollowers => self.get_friends(cmd).await,
            CommandKind::UpdateStatus => self.update_status(cmd).await,
            CommandKind::DestroyStatus => self.destroy_status(cmd).await,
            CommandKind::Like | CommandKind::UndoLike | CommandKind::Announce | CommandKind::UndoAnnounce => {
                self.note_action(cmd).await
            }
            CommandKind::FollowActor | CommandKind::UndoFollow => self.follow(cmd).await,
            CommandKind::FetchAvatar => self.fetch_avatar(cmd).await,
            CommandKind::FetchAttachment => self.fetch_attachments(cmd).await,
            CommandKind::Empty | CommandKind::DropQueues | CommandKind::DeleteCommand => Ok(()),
        }
    }

    /// Downloads pages until one is empty, its oldest cursor repeats, the
    /// page limit is reached, or (for newer items) a page brings nothing new.
    async fn fetch_timeline(&self, cmd: &mut CommandData) -> Result<()> {
        let conn = self.connection(&cmd.account)?;
        let tt = cmd.timeline_type;
        let routine = tt
            .routine()
            .ok_or_else(|| ConnectionError::unsupported(format!("timeline {}", tt.as_str())))?;
        conn.ensure_supported(routine)?;
        let (actor, actor_id) = if tt == TimelineType::Actor {
            (self.actor(cmd.item_id).await?, cmd.item_id)
        } else {
            (conn.account().actor.clone(), 0)
        };

        let mut cursor = self.store.timeline_cursor(&cmd.account, tt, actor_id).await?;
        let older = cmd.params.older;
        let youngest = if older {
            TimelinePosition::empty()
        } else {
            cursor.youngest.clone()
        };
        let mut oldest = if older {
            cursor.oldest.clone()
        } else {
            TimelinePosition::empty()
        };
        let mut tally = Tally::default();
        let mut first_youngest: Option<TimelinePosition> = None;
        let mut last_oldest: Option<TimelinePosition> = None;

        for page_no in 1..=self.settings.max_timeline_pages.max(1) {
            let page = conn
                .get_timeline(routine, &youngest, &oldest, self.settings.timeline_page_size, &actor)
                .await?;
            if page.is_empty() {
                break;
            }
            let new_before = tally.new;
            self.store_activities(&cmd.account, &page.activities, &mut tally).await?;
            cmd.result.progress = format!("page {page_no}: {} items", tally.downloaded);
            if first_youngest.is_none() {
                first_youngest = Some(page.youngest_position.clone());
            }
            let repeated = page.oldest_position == oldest;
            last_oldest = Some(page.oldest_position.clone());
            if repeated || (!older && tally.new == new_before) {
                break;
            }
            oldest = page.oldest_position;
        }

        if let Some(y) = first_youngest.filter(|p| !p.is_empty()) {
            if !older || cursor.youngest.is_empty() {
                cursor.youngest = y;
            }
        }
        if let Some(o) = last_oldest.filter(|p| !p.is_empty()) {
            if older || cursor.oldest.is_empty() {
                cursor.oldest = o;
            }
        }
        cursor.synced_ms = now_ms();
        self.store.set_timeline_cursor(&cmd.account, tt, actor_id, &cursor).await?;
        cmd.result.downloaded_count = tally.downloaded;
        cmd.result.new_count = tally.new;
        info!(
            account = %cmd.account,
            timeline = tt.as_str(),
            downloaded = tally.downloaded,
            new = tally.new,
            "timeline synced"
        );
        Ok(())
    }

    async fn search(&self, cmd: &mut CommandData) -> Result<()> {
        let conn = self.connection(&cmd.account)?;
        let query = cmd.params.query.trim().to_string();
        if query.is_empty() {
            return Err(ConnectionError::hard(StatusCode::BadRequest, "empty search query").into());
        }
        let notes = conn.is_api_supported(ApiRoutine::SearchNotes);
        let actors = conn.is_api_supported(ApiRoutine::SearchActors);
        if !notes && !actors {
            return Err(ConnectionError::unsupported(ApiRoutine::SearchNotes).into());
        }
        let limit = self.settings.timeline_page_size;
        let mut tally = Tally::default();
        if notes {
            let found = conn.search_notes(&query, limit).await?;
            self.store_activities(&cmd.account, &found, &mut tally).await?;
        }
        if actors {
            for actor in conn.search_actors(&query, limit).await? {
                self.store.upsert_actor(&actor).await?;
                tally.downloaded += 1;
            }
        }
        cmd.result.downloaded_count = tally.downloaded;
        cmd.result.new_count = tally.new;
        Ok(())
    }

    async fn get_note(&self, cmd: &mut CommandData) -> Result<()> {
        let conn = self.connection(&cmd.account)?;
        let oid = self.note_oid(cmd.item_id).await?;
        let activity = conn.get_note(&oid).await?;
        let mut tally = Tally::default();
        cmd.result.item_id = self.store_activities(&cmd.account, &[activity], &mut tally).await?;
        cmd.result.downloaded_count = tally.downloaded;
        Ok(())
    }

    async fn get_conversation(&self, cmd: &mut CommandData) -> Result<()> {
        let conn = self.connection(&cmd.account)?;
        let note = self.note(cmd.item_id).await?;
        let conversation = if note.conversation_oid.is_empty() {
            note.oid.clone()
        } else {
            note.conversation_oid.clone()
        };
        let activities = conn.get_conversation(&conversation).await?;
        let mut tally = Tally::default();
        self.store_activities(&cmd.account, &activities, &mut tally).await?;
        cmd.result.downloaded_count = tally.downloaded;
        cmd.result.new_count = tally.new;
        Ok(())
    }

    async fn get_actor(&self, cmd: &mut CommandData) -> Result<()> {
        let conn = self.connection(&cmd.account)?;
        let known = self.actor(cmd.item_id).await?;
        let fresh = conn.get_actor(&known).await?;
        cmd.result.item_id = self.store.upsert_actor(&fresh).await?;
        cmd.result.downloaded_count = 1;
        Ok(())
    }

    async fn get_friends(&self, cmd: &mut CommandData) -> Result<()> {
        let conn = self.connection(&cmd.account)?;
        let me = conn.account().actor.clone();
        let actor = if cmd.item_id == 0 {
            me.clone()
        } else {
            self.actor(cmd.item_id).await?
        };
        let friends = cmd.kind == CommandKind::GetFriends;
        let actors = if friends {
            conn.get_friends(&actor).await?
        } else {
            conn.get_followers(&actor).await?
        };
        let mine = actor.is_same(&me);
        for a in &actors {
            let id = self.store.upsert_actor(a).await?;
            if friends && mine {
                self.store.set_following(&cmd.account, id, true).await?;
            }
        }
        cmd.result.downloaded_count = actors.len() as u32;
        Ok(())
    }

    async fn update_status(&self, cmd: &mut CommandData) -> Result<()> {
        let conn = self.connection(&cmd.account)?;
        let mut draft = NoteDraft {
            text: cmd.params.text.clone(),
            ..NoteDraft::default()
        };
        if cmd.params.in_reply_to_id != 0 {
            draft.in_reply_to_oid = self.note_oid(cmd.params.in_reply_to_id).await?;
        }
        if cmd.params.recipient_id != 0 {
            draft.recipient = Some(self.actor(cmd.params.recipient_id).await?);
        }
        if !cmd.params.media_uri.is_empty() {
            let path = media_path(&cmd.params.media_uri);
            if !path.is_file() {
                return Err(ConnectionError::hard(
                    StatusCode::BadRequest,
                    format!("media file not found: {}", path.display()),
                )
                .into());
            }
            draft.media = Some(path);
        }
        if draft.text.trim().is_empty() && draft.media.is_none() {
            return Err(ConnectionError::hard(StatusCode::BadRequest, "nothing to post").into());
        }
        let activity = conn.update_status(&draft).await?;
        let mut tally = Tally::default();
        cmd.result.item_id = self.store_activities(&cmd.account, &[activity], &mut tally).await?;
        info!(account = %cmd.account, note = cmd.result.item_id, "note posted");
        Ok(())
    }

    async fn destroy_status(&self, cmd: &mut CommandData) -> Result<()> {
        let conn = self.connection(&cmd.account)?;
        let oid = self.note_oid(cmd.item_id).await?;
        conn.destroy_status(&oid).await?;
        self.store.remove_note(cmd.item_id).await?;
        Ok(())
    }

    async fn note_action(&self, cmd: &mut CommandData) -> Result<()> {
        let conn = self.connection(&cmd.account)?;
        let oid = self.note_oid(cmd.item_id).await?;
        let activity = match cmd.kind {
            CommandKind::Like => conn.create_favorite(&oid).await?,
            CommandKind::UndoLike => conn.destroy_favorite(&oid).await?,
            CommandKind::Announce => conn.post_reblog(&oid).await?,
            _ => conn.undo_reblog(&oid).await?,
        };
        self.store.upsert_activity(&cmd.account, &activity).await?;
        match cmd.kind {
            CommandKind::Like => self.store.mark_favorited(cmd.item_id, true).await?,
            CommandKind::UndoLike => self.store.mark_favorited(cmd.item_id, false).await?,
            CommandKind::Announce => self.store.mark_reblogged(cmd.item_id, true).await?,
            _ => self.store.mark_reblogged(cmd.item_id, false).await?,
        }
        cmd.result.item_id = cmd.item_id;
        Ok(())
    }

    async fn follow(&self, cmd: &mut CommandData) -> Result<()> {
        let conn = self.connection(&cmd.account)?;
        let follow = cmd.kind == CommandKind::FollowActor;
        let actor = self.actor(cmd.item_id).await?;
        let oid = if actor.oid.is_empty() {
            // A mention-only actor: resolve it first.
            let fresh = conn.get_actor(&actor).await?;
            self.store.upsert_actor(&fresh).await?;
            fresh.oid
        } else {
            actor.oid.clone()
        };
        let activity = conn.follow(&oid, follow).await?;
        self.store.upsert_activity(&cmd.account, &activity).await?;
        self.store.set_following(&cmd.account, cmd.item_id, follow).await?;
        cmd.result.item_id = cmd.item_id;
        Ok(())
    }

    async fn download_to_cache(&self, conn: &dyn Connection, uri: &str, dir: &str) -> Result<PathBuf> {
        let dir = self.data_dir.join(dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create dir: {}", dir.display()))?;
        let path = dir.join(cache_file_name(uri));
        let len = conn.download_file(uri, &path).await?;
        self.store.set_downloaded_file(uri, &path).await?;
        debug!(uri, bytes = len, path = %path.display(), "downloaded");
        Ok(path)
    }

    async fn fetch_avatar(&self, cmd: &mut CommandData) -> Result<()> {
        let actor = self.actor(cmd.item_id).await?;
        if actor.avatar_url.is_empty() {
            return Err(ConnectionError::hard(StatusCode::NotFound, "actor has no avatar").into());
        }
        let conn = self.connection_for_origin(&cmd.account, actor.origin_id)?;
        self.download_to_cache(conn, &actor.avatar_url, "avatars").await?;
        cmd.result.downloaded_count = 1;
        cmd.result.item_id = cmd.item_id;
        Ok(())
    }

    async fn fetch_attachments(&self, cmd: &mut CommandData) -> Result<()> {
        let note = self.note(cmd.item_id).await?;
        let conn = self.connection_for_origin(&cmd.account, note.origin_id)?;
        for attachment in note.attachments.iter().filter(|a| a.is_valid()) {
            if self.store.downloaded_file(&attachment.uri).await?.is_some_and(|p| p.is_file()) {
                continue;
            }
            self.download_to_cache(conn, &attachment.uri, "attachments").await?;
            cmd.result.downloaded_count += 1;
        }
        cmd.result.item_id = cmd.item_id;
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for CommandExecutor {
    async fn run(&self, mut cmd: CommandData) -> CommandData {
        if let Err(e) = self.execute(&mut cmd).await {
            warn!(command = %cmd, "command error: {e:#}");
            record_failure(&mut cmd.result, &e);
        }
        if let Ok(conn) = self.connection(&cmd.account) {
            if let Err(e) = self.remember_legacy_http(conn).await {
                warn!("failed to persist legacy http preference: {e:#}");
            }
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, Credentials};
    use crate::connection::new_connection;
    use crate::error::ErrorKind;
    use crate::http_connection::tests::{test_account, test_settings, ScriptedExecutor};
    use crate::local_store::SqliteStore;
    use crate::origin::{Origin, OriginType};
    use polyfedi_model::TriState;
    use serde_json::{json, Value};

    const ACCOUNT: &str = "alice@test";

    fn status(id: &str) -> Value {
        json!({
            "id": id, "created_at": "2023-05-01T10:00:00.000Z", "visibility": "public",
            "account": {"id": "1", "username": "bob", "acct": "bob"},
            "content": format!("<p>note {id}</p>"), "url": format!("https://social.example/@bob/{id}"),
            "media_attachments": [{"type": "image", "url": format!("https://files.example/{id}.png")}]
        })
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        http: Arc<ScriptedExecutor>,
        store: Arc<SqliteStore>,
        executor: CommandExecutor,
    }

    fn fixture_for(account: Arc<Account>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(ScriptedExecutor::default());
        let store = Arc::new(SqliteStore::open(dir.path().join("store.db")).unwrap());
        let settings = SchedulerSettings {
            max_timeline_pages: 5,
            ..SchedulerSettings::default()
        };
        let mut executor = CommandExecutor::new(store.clone(), settings, dir.path().join("data"));
        executor.add_connection(new_connection(account, http.clone(), test_settings()));
        Fixture {
            _dir: dir,
            http,
            store,
            executor,
        }
    }

    fn mastodon() -> Fixture {
        fixture_for(test_account(
            OriginType::Mastodon,
            Credentials::OAuth2 {
                access_token: "tok".into(),
            },
        ))
    }

    async fn run(f: &Fixture, cmd: CommandData) -> CommandData {
        let mut cmd = cmd;
        cmd.result.prepare_for_launch(3, false);
        f.executor.run(cmd).await
    }

    #[tokio::test]
    async fn timeline_pages_until_the_cursor_stops_moving() {
        let f = mastodon();
        f.http
            .push_json(json!([status("30"), status("29")]))
            .push_json(json!([status("28")]))
            .push_json(json!([]));
        let done = run(&f, CommandData::fetch_timeline(ACCOUNT, TimelineType::Home, 0)).await;
        assert!(!done.result.has_error(), "{}", done.result.message);
        assert_eq!(done.result.downloaded_count, 3);
        assert_eq!(done.result.new_count, 3);
        let uris: Vec<String> = f.http.recorded().iter().map(|r| r.uri.clone()).collect();
        assert_eq!(uris.len(), 3);
        assert!(uris[1].contains("max_id=29"));
        assert!(uris[2].contains("max_id=28"));

        let cursor = f.store.timeline_cursor(ACCOUNT, TimelineType::Home, 0).await.unwrap();
        assert_eq!(cursor.youngest.as_str(), "30");
        assert_eq!(cursor.oldest.as_str(), "28");

        // Older than the oldest known item: nothing left.
        f.http.push_json(json!([]));
        let mut older = CommandData::fetch_timeline(ACCOUNT, TimelineType::Home, 0);
        older.params.older = true;
        let done = run(&f, older).await;
        assert_eq!(done.result.new_count, 0);
        assert!(f.http.recorded()[3].uri.contains("max_id=28"));

        // The item at the cursor itself is not new and ends the walk.
        f.http.push_json(json!([status("30")]));
        let done = run(&f, CommandData::fetch_timeline(ACCOUNT, TimelineType::Home, 0)).await;
        assert_eq!(done.result.new_count, 0);
        assert_eq!(f.http.recorded().len(), 5);
        assert!(f.http.recorded()[4].uri.contains("since_id=30"));
    }

    #[tokio::test]
    async fn reply_parent_fetched_later_counts_as_new() {
        let f = mastodon();
        let mut reply = status("30");
        reply["in_reply_to_id"] = json!("29");
        reply["in_reply_to_account_id"] = json!("1");
        f.http
            .push_json(json!([reply]))
            .push_json(json!([status("29")]))
            .push_json(json!([status("28")]))
            .push_json(json!([]));
        let done = run(&f, CommandData::fetch_timeline(ACCOUNT, TimelineType::Home, 0)).await;
        assert!(!done.result.has_error(), "{}", done.result.message);
        assert_eq!(f.http.recorded().len(), 4);
        assert_eq!(done.result.downloaded_count, 3);
        assert_eq!(done.result.new_count, 3);
    }

    #[tokio::test]
    async fn not_found_is_hard_and_timeout_is_soft() {
        let f = mastodon();
        let note_id = f.store.upsert_note(&Note::new(1, "77")).await.unwrap();

        f.http.push(404, r#"{"error":"Record not found"}"#);
        let done = run(&f, CommandData::for_item(CommandKind::Like, ACCOUNT, note_id)).await;
        assert!(done.result.has_hard_error());
        assert!(!done.result.should_retry());

        // No scripted response behaves like a network failure.
        let done = run(&f, CommandData::for_item(CommandKind::Like, ACCOUNT, note_id)).await;
        assert!(done.result.has_soft_error());
        assert!(done.result.should_retry());
    }

    #[tokio::test]
    async fn like_marks_the_stored_note() {
        let f = mastodon();
        let note_id = f.store.upsert_note(&Note::new(1, "77")).await.unwrap();
        let mut liked = status("77");
        liked["favourited"] = json!(true);
        f.http.push_json(liked);
        let done = run(&f, CommandData::for_item(CommandKind::Like, ACCOUNT, note_id)).await;
        assert!(!done.result.has_error(), "{}", done.result.message);
        assert!(f.http.recorded()[0].uri.ends_with("/api/v1/statuses/77/favourite"));
        let note = f.store.get_note(note_id).await.unwrap().unwrap();
        assert_eq!(note.favorited, TriState::True);
        assert_eq!(note.content, "<p>note 77</p>");
    }

    #[tokio::test]
    async fn private_reply_resolves_local_ids() {
        let f = mastodon();
        let reply_to = f.store.upsert_note(&Note::new(1, "55")).await.unwrap();
        let mut carol = Actor::new(1, "9");
        carol.username = "carol".into();
        carol.webfinger_id = "carol@social.example".into();
        let carol_id = f.store.upsert_actor(&carol).await.unwrap();

        let mut cmd = CommandData::update_status(ACCOUNT, "hi");
        cmd.params.in_reply_to_id = reply_to;
        cmd.params.recipient_id = carol_id;
        f.http.push_json(status("56"));
        let done = run(&f, cmd).await;
        assert!(!done.result.has_error(), "{}", done.result.message);
        assert!(done.result.item_id > 0);
        let sent = &f.http.recorded()[0];
        let crate::http::RequestBody::Json(body) = &sent.body else {
            panic!("expected a json body");
        };
        assert_eq!(body["in_reply_to_id"], "55");
        assert_eq!(body["visibility"], "direct");
        assert_eq!(body["status"], "@carol@social.example hi");
    }

    #[tokio::test]
    async fn unknown_item_is_a_hard_error() {
        let f = mastodon();
        let done = run(&f, CommandData::for_item(CommandKind::GetNote, ACCOUNT, 999)).await;
        assert_eq!(done.result.num_hard_errors, 1);
        assert!(f.http.recorded().is_empty());
    }

    #[tokio::test]
    async fn attachments_download_into_the_data_dir() {
        let f = mastodon();
        f.http.push_json(json!([status("40")])).push_json(json!([]));
        run(&f, CommandData::fetch_timeline(ACCOUNT, TimelineType::Home, 0)).await;
        let note_id = f.store.oid_to_id(ItemKind::Note, 1, "40").await.unwrap().unwrap();

        f.http.push(200, "PNGDATA");
        let done = run(&f, CommandData::for_item(CommandKind::FetchAttachment, "", note_id)).await;
        assert!(!done.result.has_error(), "{}", done.result.message);
        assert_eq!(done.result.downloaded_count, 1);
        let path = f.store.downloaded_file("https://files.example/40.png").await.unwrap().unwrap();
        assert!(path.starts_with(f._dir.path().join("data").join("attachments")));
        assert!(path.to_string_lossy().ends_with(".png"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "PNGDATA");
        // Foreign media is fetched without the account token.
        assert!(!f.http.recorded().last().unwrap().authenticate);

        let again = run(&f, CommandData::for_item(CommandKind::FetchAttachment, "", note_id)).await;
        assert_eq!(again.result.downloaded_count, 0);
    }

    #[tokio::test]
    async fn unsupported_timeline_is_hard() {
        let origin = Origin::new(1, "test", OriginType::Pumpio, "social.example").into_shared();
        let f = fixture_for(Arc::new(Account::new(origin, "alice", "acct:alice@social.example", Credentials::None)));
        let done = run(&f, CommandData::fetch_timeline(ACCOUNT, TimelineType::Public, 0)).await;
        assert_eq!(done.result.num_hard_errors, 1);
        assert!(f.http.recorded().is_empty());
        let err = ConnectionError::unsupported(ApiRoutine::PublicTimeline);
        assert_eq!(err.kind, ErrorKind::Hard);
    }

    #[tokio::test]
    async fn legacy_http_preference_is_persisted_once_learned() {
        let f = fixture_for(test_account(
            OriginType::GnuSocial,
            Credentials::Basic {
                username: "alice".into(),
                password: "pw".into(),
            },
        ));
        f.http.push(411, "").push(
            200,
            r#"{"id": 5, "text": "hi", "created_at": "Wed Nov 27 09:27:01 +0000 2013",
                "user": {"id": 1, "screen_name": "alice"}}"#,
        );
        let done = run(&f, CommandData::update_status(ACCOUNT, "hi")).await;
        assert!(!done.result.has_error(), "{}", done.result.message);
        assert_eq!(f.store.origin_legacy_http(1).await.unwrap(), LegacyHttp::Yes);
    }

    #[test]
    fn cache_names_are_stable_and_keep_the_extension() {
        let a = cache_file_name("https://files.example/media/a.JPG?x=1");
        assert_eq!(a, cache_file_name("https://files.example/media/a.JPG?x=1"));
        assert!(a.ends_with(".jpg"));
        assert_eq!(a.len(), 64 + 4);
        assert!(cache_file_name("https://files.example/avatar").ends_with(".bin"));
    }
}
