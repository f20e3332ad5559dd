/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Image,
    Animated,
    Video,
    Audio,
    Text,
    #[default]
    Unknown,
}

impl MediaType {
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_ascii_lowercase();
        if mime == "image/gif" {
            Self::Animated
        } else if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("video/") {
            Self::Video
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else if mime.starts_with("text/") {
            Self::Text
        } else {
            Self::Unknown
        }
    }

    /// Guess from the path extension when the origin did not send a mime type.
    pub fn from_uri(uri: &str) -> Self {
        let path = uri.split(['?', '#']).next().unwrap_or("");
        let ext = path
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "bmp" | "avif" => Self::Image,
            "gif" => Self::Animated,
            "mp4" | "webm" | "mov" | "m4v" => Self::Video,
            "mp3" | "ogg" | "oga" | "wav" | "m4a" | "flac" => Self::Audio,
            "txt" => Self::Text,
            _ => Self::Unknown,
        }
    }
}

/// Media attached to a note, in the order the origin listed it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub uri: String,
    pub mime_type: String,
    pub media_type: MediaType,
    #[serde(default)]
    pub local_file: Option<String>,
}

impl Attachment {
    pub fn new(uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        let uri = uri.into().trim().to_string();
        let mime_type = mime_type.into().trim().to_string();
        let mut media_type = MediaType::from_mime(&mime_type);
        if media_type == MediaType::Unknown {
            media_type = MediaType::from_uri(&uri);
        }
        Self {
            uri,
            mime_type,
            media_type,
            local_file: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.uri.is_empty()
    }
}
