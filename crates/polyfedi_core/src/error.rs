/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Origin-independent status of an HTTP exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    #[default]
    Unknown,
    Ok,
    Moved,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    LengthRequired,
    RequestEntityTooLarge,
    ClientError,
    ServerError,
    UnsupportedApi,
    MalformedUrl,
}

impl StatusCode {
    pub fn from_http(code: u16) -> Self {
        match code {
            200..=299 => Self::Ok,
            301 | 302 | 303 | 307 | 308 => Self::Moved,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            411 => Self::LengthRequired,
            413 => Self::RequestEntityTooLarge,
            402..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Whether a failure with this status is worth retrying later.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::ServerError | Self::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Fatal: retrying will not help.
    Hard,
    /// Transient: network failures, server errors.
    Soft,
    /// The response did not have the expected shape.
    Parse,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{status:?}/{kind:?}: {message}")]
pub struct ConnectionError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
    pub uri: Option<String>,
}

pub type ConnResult<T> = std::result::Result<T, ConnectionError>;

impl ConnectionError {
    /// Classifies by status: transient statuses are soft, everything else hard.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let kind = if status.is_transient() {
            ErrorKind::Soft
        } else {
            ErrorKind::Hard
        };
        Self {
            status,
            kind,
            message: message.into(),
            uri: None,
        }
    }

    pub fn hard(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: ErrorKind::Hard,
            message: message.into(),
            uri: None,
        }
    }

    pub fn soft(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::Unknown,
            kind: ErrorKind::Soft,
            message: message.into(),
            uri: None,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::Ok,
            kind: ErrorKind::Parse,
            message: message.into(),
            uri: None,
        }
    }

    pub fn unsupported(what: impl std::fmt::Debug) -> Self {
        Self::hard(StatusCode::UnsupportedApi, format!("{what:?} is not supported"))
    }

    pub fn malformed_url(url: &str) -> Self {
        Self::hard(StatusCode::MalformedUrl, format!("malformed url: '{url}'")).with_uri(url)
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn is_hard(&self) -> bool {
        self.kind == ErrorKind::Hard
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Soft
    }
}

impl From<serde_json::Error> for ConnectionError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(format!("json: {e}"))
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        Self::soft(format!("io: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_numeric_codes() {
        assert_eq!(StatusCode::from_http(204), StatusCode::Ok);
        assert_eq!(StatusCode::from_http(308), StatusCode::Moved);
        assert_eq!(StatusCode::from_http(304), StatusCode::Unknown);
        assert_eq!(StatusCode::from_http(411), StatusCode::LengthRequired);
        assert_eq!(StatusCode::from_http(413), StatusCode::RequestEntityTooLarge);
        assert_eq!(StatusCode::from_http(429), StatusCode::ClientError);
        assert_eq!(StatusCode::from_http(503), StatusCode::ServerError);
        assert_eq!(StatusCode::from_http(0), StatusCode::Unknown);
    }

    #[test]
    fn classifies_hard_and_soft() {
        assert!(ConnectionError::from_status(StatusCode::NotFound, "gone").is_hard());
        assert!(ConnectionError::from_status(StatusCode::ServerError, "502").is_retryable());
        let parse = ConnectionError::from(serde_json::from_str::<u32>("x").unwrap_err());
        assert_eq!(parse.kind, ErrorKind::Parse);
        assert!(!parse.is_retryable());
    }
}
