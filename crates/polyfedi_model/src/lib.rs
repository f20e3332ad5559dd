/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Origin-independent object model shared by every connection.
//!
//! Connections translate their wire formats into these types; the local store
//! persists them keyed by `(origin_id, oid)`.

mod activity;
mod actor;
mod attachment;
mod audience;
pub mod html;
mod note;

pub use activity::{Activity, ActivityObject, ActivityType, ObjectType};
pub use actor::{Actor, ActorEndpointType};
pub use attachment::{Attachment, MediaType};
pub use audience::Audience;
pub use note::{DownloadStatus, Note, Visibility};

use serde::{Deserialize, Serialize};

/// Opaque pagination cursor returned by an origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimelinePosition(String);

impl TimelinePosition {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TimelinePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriState {
    #[default]
    Unknown,
    True,
    False,
}

impl TriState {
    pub fn from_bool(v: bool) -> Self {
        if v {
            Self::True
        } else {
            Self::False
        }
    }

    pub fn from_option(v: Option<bool>) -> Self {
        v.map(Self::from_bool).unwrap_or(Self::Unknown)
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    pub fn is_true(self) -> bool {
        self == Self::True
    }

    pub(crate) fn merge_from(&mut self, other: TriState) {
        if other.is_known() {
            *self = other;
        }
    }
}

pub(crate) fn merge_str(dst: &mut String, src: &str) {
    if !src.is_empty() {
        *dst = src.to_string();
    }
}

pub(crate) fn merge_count(dst: &mut Option<i64>, src: Option<i64>) {
    if src.is_some() {
        *dst = src;
    }
}

pub(crate) fn merge_date(dst: &mut i64, src: i64) {
    if src > 0 {
        *dst = src;
    }
}
