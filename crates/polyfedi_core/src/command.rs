/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Commands accepted by the scheduler and the result counters they carry.

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::connection::ApiRoutine;
use crate::error::{ConnectionError, ErrorKind, StatusCode};
use crate::now_ms;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    #[default]
    Empty,
    FetchTimeline,
    GetNote,
    GetConversation,
    GetActor,
    GetFriends,
    GetFollowers,
    UpdateStatus,
    DestroyStatus,
    Like,
    UndoLike,
    Announce,
    UndoAnnounce,
    FollowActor,
    UndoFollow,
    Search,
    FetchAttachment,
    FetchAvatar,
    DropQueues,
    DeleteCommand,
}

/// Added to the priority of commands the user is waiting for.
pub const FOREGROUND_BOOST: i32 = 100;

impl CommandKind {
    /// Higher runs first.
    pub fn priority(self) -> i32 {
        match self {
            Self::DropQueues | Self::DeleteCommand => 90,
            Self::UpdateStatus => 40,
            Self::DestroyStatus
            | Self::Like
            | Self::UndoLike
            | Self::Announce
            | Self::UndoAnnounce
            | Self::FollowActor
            | Self::UndoFollow => 30,
            Self::GetNote | Self::GetConversation | Self::GetActor | Self::Search => 20,
            Self::FetchTimeline | Self::GetFriends | Self::GetFollowers => 10,
            Self::FetchAvatar => 5,
            Self::FetchAttachment => 3,
            Self::Empty => 0,
        }
    }

    /// Handled at submission, never queued.
    pub fn is_immediate(self) -> bool {
        matches!(self, Self::DropQueues | Self::DeleteCommand)
    }

    pub fn needs_account(self) -> bool {
        !matches!(
            self,
            Self::Empty | Self::DropQueues | Self::DeleteCommand | Self::FetchAttachment | Self::FetchAvatar
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimelineType {
    #[default]
    Unknown,
    Home,
    Notifications,
    Mentions,
    Private,
    Actor,
    Liked,
    Public,
    Search,
}

impl TimelineType {
    pub fn routine(self) -> Option<ApiRoutine> {
        let routine = match self {
            Self::Unknown => return None,
            Self::Home => ApiRoutine::HomeTimeline,
            Self::Notifications => ApiRoutine::NotificationsTimeline,
            Self::Mentions => ApiRoutine::MentionsTimeline,
            Self::Private => ApiRoutine::PrivateNotes,
            Self::Actor => ApiRoutine::ActorTimeline,
            Self::Liked => ApiRoutine::LikedTimeline,
            Self::Public => ApiRoutine::PublicTimeline,
            Self::Search => ApiRoutine::SearchNotes,
        };
        Some(routine)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Home => "home",
            Self::Notifications => "notifications",
            Self::Mentions => "mentions",
            Self::Private => "private",
            Self::Actor => "actor",
            Self::Liked => "liked",
            Self::Public => "public",
            Self::Search => "search",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandParams {
    pub text: String,
    /// Local id of the note replied to, 0 for none.
    pub in_reply_to_id: i64,
    /// Local id of the only recipient of a private note, 0 for none.
    pub recipient_id: i64,
    pub media_uri: String,
    pub query: String,
    /// Download older items instead of newer ones.
    pub older: bool,
    /// The command a `DeleteCommand` removes.
    pub target: Option<Box<CommandData>>,
}

/// How a finished execution is disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Succeeded,
    Retry,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandResult {
    pub execution_count: u32,
    pub retries_left: u32,
    pub num_auth_errors: u32,
    pub num_io_errors: u32,
    pub num_parse_errors: u32,
    pub num_hard_errors: u32,
    pub executed: bool,
    pub last_executed_ms: i64,
    pub progress: String,
    pub message: String,
    pub downloaded_count: u32,
    pub new_count: u32,
    /// Local id of whatever the command created or found.
    pub item_id: i64,
}

impl CommandResult {
    /// Clears the outcome of a previous attempt. The retry budget is refilled
    /// on the first launch and on a manual relaunch.
    pub fn prepare_for_launch(&mut self, max_retries: u32, manually_launched: bool) {
        if self.execution_count == 0 || manually_launched {
            self.retries_left = max_retries;
        }
        self.num_auth_errors = 0;
        self.num_io_errors = 0;
        self.num_parse_errors = 0;
        self.num_hard_errors = 0;
        self.executed = false;
        self.progress.clear();
        self.message.clear();
        self.downloaded_count = 0;
        self.new_count = 0;
    }

    pub fn record_error(&mut self, err: &ConnectionError) {
        match (err.kind, err.status) {
            (ErrorKind::Parse, _) => self.num_parse_errors += 1,
            (ErrorKind::Hard, StatusCode::Unauthorized | StatusCode::Forbidden) => self.num_auth_errors += 1,
            (ErrorKind::Hard, _) => self.num_hard_errors += 1,
            (ErrorKind::Soft, _) => self.num_io_errors += 1,
        }
        self.message = err.to_string();
    }

    /// A panic or another failure that is not a connection error.
    pub fn record_hard_failure(&mut self, message: impl Into<String>) {
        self.num_hard_errors += 1;
        self.message = message.into();
    }

    pub fn has_error(&self) -> bool {
        self.has_hard_error() || self.num_io_errors > 0
    }

    pub fn has_hard_error(&self) -> bool {
        self.num_auth_errors > 0 || self.num_parse_errors > 0 || self.num_hard_errors > 0
    }

    pub fn has_soft_error(&self) -> bool {
        self.num_io_errors > 0 && !self.has_hard_error()
    }

    pub fn should_retry(&self) -> bool {
        self.has_soft_error() && self.retries_left > 0
    }

    pub fn after_execution(&mut self, now_ms: i64) -> Disposition {
        let retry = self.should_retry();
        self.execution_count += 1;
        self.executed = true;
        self.last_executed_ms = now_ms;
        if !self.has_error() {
            Disposition::Succeeded
        } else if retry {
            self.retries_left -= 1;
            Disposition::Retry
        } else {
            Disposition::Failed
        }
    }
}

/// A unit of work for the scheduler.
///
/// Two commands are equal when they would do the same thing: identity covers
/// kind, account, timeline, item, text, query and media, never the result or
/// bookkeeping fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandData {
    pub id: String,
    pub kind: CommandKind,
    /// Account name, `user@origin`; empty for account-less commands.
    pub account: String,
    pub timeline_type: TimelineType,
    /// Local id of the note or actor acted upon, 0 for none.
    pub item_id: i64,
    pub params: CommandParams,
    pub in_foreground: bool,
    pub manually_launched: bool,
    pub created_ms: i64,
    pub result: CommandResult,
}

fn new_command_id() -> String {
    let mut b = [0u8; 8];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}

impl CommandData {
    pub fn new(kind: CommandKind, account: impl Into<String>) -> Self {
        Self {
            id: new_command_id(),
            kind,
            account: account.into(),
            created_ms: now_ms(),
            ..Self::default()
        }
    }

    pub fn fetch_timeline(account: impl Into<String>, timeline_type: TimelineType, item_id: i64) -> Self {
        let mut cmd = Self::new(CommandKind::FetchTimeline, account);
        cmd.timeline_type = timeline_type;
        cmd.item_id = item_id;
        cmd
    }

    pub fn update_status(account: impl Into<String>, text: impl Into<String>) -> Self {
        let mut cmd = Self::new(CommandKind::UpdateStatus, account);
        cmd.params.text = text.into();
        cmd
    }

    pub fn follow(account: impl Into<String>, actor_id: i64, follow: bool) -> Self {
        let kind = if follow {
            CommandKind::FollowActor
        } else {
            CommandKind::UndoFollow
        };
        let mut cmd = Self::new(kind, account);
        cmd.item_id = actor_id;
        cmd
    }

    pub fn search(account: impl Into<String>, query: impl Into<String>) -> Self {
        let mut cmd = Self::new(CommandKind::Search, account);
        cmd.timeline_type = TimelineType::Search;
        cmd.params.query = query.into();
        cmd
    }

    pub fn for_item(kind: CommandKind, account: impl Into<String>, item_id: i64) -> Self {
        let mut cmd = Self::new(kind, account);
        cmd.item_id = item_id;
        cmd
    }

    pub fn drop_queues() -> Self {
        Self::new(CommandKind::DropQueues, "")
    }

    pub fn delete_command(target: CommandData) -> Self {
        let mut cmd = Self::new(CommandKind::DeleteCommand, "");
        cmd.params.target = Some(Box::new(target));
        cmd
    }

    pub fn in_foreground(mut self, yes: bool) -> Self {
        self.in_foreground = yes;
        self
    }

    pub fn manually_launched(mut self, yes: bool) -> Self {
        self.manually_launched = yes;
        self
    }

    pub fn priority(&self) -> i32 {
        self.kind.priority() + if self.in_foreground { FOREGROUND_BOOST } else { 0 }
    }
}

impl PartialEq for CommandData {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.account == other.account
            && self.timeline_type == other.timeline_type
            && self.item_id == other.item_id
            && self.params.text == other.params.text
            && self.params.query == other.params.query
            && self.params.media_uri == other.params.media_uri
    }
}

impl Eq for CommandData {}

impl Hash for CommandData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.account.hash(state);
        self.timeline_type.hash(state);
        self.item_id.hash(state);
        self.params.text.hash(state);
        self.params.query.hash(state);
        self.params.media_uri.hash(state);
    }
}

impl fmt::Display for CommandData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if !self.account.is_empty() {
            write!(f, " {}", self.account)?;
        }
        if self.timeline_type != TimelineType::Unknown {
            write!(f, " {}", self.timeline_type.as_str())?;
        }
        if self.item_id != 0 {
            write!(f, " #{}", self.item_id)?;
        }
        if self.in_foreground {
            f.write_str(" (foreground)")?;
        }
        Ok(())
    }
}
