/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Mentions and hashtags in note text.
//!
//! Works on whitespace-separated tokens of the plain text, so a `@` inside a
//! URL or an e-mail address never starts a mention.

use polyfedi_model::{html, Actor};

/// What a username may look like on an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsernameRules {
    pub max_len: usize,
    /// Whether `.` and `-` may appear inside a username.
    pub allow_dot_dash: bool,
}

impl UsernameRules {
    fn is_username_char(&self, c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || (self.allow_dot_dash && (c == '.' || c == '-'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub username: String,
    pub host: Option<String>,
}

impl Mention {
    pub fn webfinger(&self) -> Option<String> {
        self.host
            .as_ref()
            .map(|h| format!("{}@{}", self.username, h).to_lowercase())
    }
}

const LEADING_PUNCT: &[char] = &['(', '[', '{', '"', '\'', '‘', '“', '<', '«'];
const TRAILING_PUNCT: &[char] = &['.', ',', ':', ';', '!', '?', ')', ']', '}', '"', '\'', '’', '”', '>', '»'];
const POSSESSIVES: &[&str] = &["'s", "'S", "’s", "’S"];

/// Strips sentence punctuation and a possessive from the end of a handle.
fn trim_handle_end(rest: &str) -> &str {
    let rest = rest.trim_end_matches(TRAILING_PUNCT);
    POSSESSIVES
        .iter()
        .find_map(|p| rest.strip_suffix(*p))
        .map_or(rest, |r| r.trim_end_matches(TRAILING_PUNCT))
}

fn looks_like_url(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    lower.contains("://") || lower.starts_with("www.") || lower.starts_with("mailto:")
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '-'
}

fn parse_mention(token: &str, rules: &UsernameRules) -> Option<Mention> {
    let token = token.trim_start_matches(LEADING_PUNCT);
    let rest = token.strip_prefix('@')?;
    if rest.starts_with('@') || rest.starts_with('#') {
        return None;
    }
    let rest = trim_handle_end(rest);
    // A trailing dot or dash belongs to the sentence, not the name.
    let (user, host) = match rest.split_once('@') {
        Some((u, h)) => (u, Some(h.trim_end_matches(['.', '-']))),
        None => (rest.trim_end_matches(['.', '-']), None),
    };
    if user.is_empty() || user.chars().count() > rules.max_len || !user.chars().all(|c| rules.is_username_char(c)) {
        return None;
    }
    let host = match host {
        Some(h) if !h.is_empty() && h.contains('.') && h.chars().all(is_host_char) => Some(h.to_ascii_lowercase()),
        Some(_) => return None,
        None => None,
    };
    Some(Mention {
        username: user.to_string(),
        host,
    })
}

/// Mentions in order of first appearance, without repeats.
pub fn extract_mentions(content: &str, rules: &UsernameRules) -> Vec<Mention> {
    let plain = html::to_plain_text(content);
    let mut out: Vec<Mention> = Vec::new();
    for token in plain.split_whitespace() {
        if looks_like_url(token) {
            continue;
        }
        if let Some(m) = parse_mention(token, rules) {
            let dup = out
                .iter()
                .any(|o| o.username.eq_ignore_ascii_case(&m.username) && o.host == m.host);
            if !dup {
                out.push(m);
            }
        }
    }
    out
}

/// Resolves mentions against actors already known on the origin; unknown ones
/// become partially defined actors.
pub fn extract_mentioned_actors(
    origin_id: i64,
    origin_host: &str,
    content: &str,
    rules: &UsernameRules,
    known: &[Actor],
) -> Vec<Actor> {
    extract_mentions(content, rules)
        .into_iter()
        .map(|m| {
            let webfinger = m.webfinger();
            let found = known.iter().find(|a| match &webfinger {
                Some(wf) => a.webfinger_id.eq_ignore_ascii_case(wf),
                None => {
                    a.username.eq_ignore_ascii_case(&m.username)
                        && (a.webfinger_id.is_empty()
                            || a.webfinger_id.to_lowercase().ends_with(&format!("@{}", origin_host.to_lowercase())))
                }
            });
            match found {
                Some(a) => a.clone(),
                None => {
                    let mut actor = Actor::from_username(origin_id, m.username.clone());
                    match webfinger {
                        Some(wf) => actor.webfinger_id = wf,
                        None => actor.fill_webfinger(origin_host),
                    }
                    actor
                }
            }
        })
        .collect()
}

/// Hashtags without the leading `#`, lower-cased, without repeats.
pub fn extract_hashtags(content: &str) -> Vec<String> {
    let plain = html::to_plain_text(content);
    let mut out: Vec<String> = Vec::new();
    for token in plain.split_whitespace() {
        if looks_like_url(token) {
            continue;
        }
        let token = token.trim_start_matches(LEADING_PUNCT);
        let Some(rest) = token.strip_prefix('#') else {
            continue;
        };
        let tag: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if tag.is_empty() || tag.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let tag = tag.to_lowercase();
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
