/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::{Actor, Visibility};
use serde::{Deserialize, Serialize};

/// Recipients and mentions of a note.
///
/// The special collections (public, followers) are flags; every named actor
/// is kept once, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audience {
    pub public: bool,
    pub followers: bool,
    pub actors: Vec<Actor>,
}

impl Audience {
    pub fn public() -> Self {
        Self {
            public: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.public && !self.followers && self.actors.is_empty()
    }

    /// Adds `actor` unless an actor with the same identity is already present,
    /// in which case the two are merged.
    pub fn add(&mut self, actor: Actor) {
        if actor.is_empty() {
            return;
        }
        match self.actors.iter_mut().find(|a| a.is_same(&actor)) {
            Some(existing) => existing.merge_from(&actor),
            None => self.actors.push(actor),
        }
    }

    pub fn contains_oid(&self, oid: &str) -> bool {
        !oid.is_empty() && self.actors.iter().any(|a| a.oid == oid)
    }

    pub fn visibility(&self) -> Visibility {
        if self.public {
            Visibility::Public
        } else if self.followers || !self.actors.is_empty() {
            Visibility::Private
        } else {
            Visibility::Unknown
        }
    }

    pub fn merge_from(&mut self, other: &Audience) {
        self.public |= other.public;
        self.followers |= other.followers;
        for a in &other.actors {
            self.add(a.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_deduplicates_by_identity() {
        let mut aud = Audience::default();
        aud.add(Actor::from_username(1, "alice"));
        let mut alice = Actor::new(1, "1001");
        alice.username = "alice".to_string();
        aud.add(alice);
        aud.add(Actor::from_username(1, "ALICE"));
        assert_eq!(aud.actors.len(), 1);
        assert_eq!(aud.actors[0].oid, "1001");
        assert_eq!(aud.visibility(), Visibility::Private);
    }

    #[test]
    fn public_flag_wins_visibility() {
        let mut aud = Audience::public();
        aud.add(Actor::from_username(1, "bob"));
        assert_eq!(aud.visibility(), Visibility::Public);
    }
}
