//! Reaction bookkeeping carried by reactable records (comments, activities).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Number of most recent reactions kept on a record.
pub const LATEST_REACTIONS_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    /// Reaction type, e.g. `like`.
    pub kind: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Reaction {
    /// A user holds at most one reaction of each kind.
    pub fn same_identity(&self, other: &Reaction) -> bool {
        self.kind == other.kind && self.user_id == other.user_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionGroup {
    pub count: u32,
    pub first_reaction_at: DateTime<Utc>,
    pub last_reaction_at: DateTime<Utc>,
    /// Users whose reaction of this kind was applied locally. Unlike `latest`
    /// this is never truncated, so replayed events are recognised.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub user_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Reactions {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub groups: BTreeMap<String, ReactionGroup>,
    /// Newest first.
    #[serde(default)]
    pub latest: Vec<Reaction>,
    /// Reactions by the current user.
    #[serde(default)]
    pub own: SmallVec<[Reaction; 2]>,
}

impl Reactions {
    /// Record a reaction. Re-adding a reaction the record already knows about
    /// refreshes it without counting it twice.
    pub fn upsert(&mut self, reaction: Reaction, current_user_id: &str) {
        let is_own = reaction.user_id == current_user_id;
        let known = self.knows(&reaction, is_own);

        let at = reaction.created_at;
        let group = self.groups.entry(reaction.kind.clone()).or_insert(ReactionGroup {
            count: 0,
            first_reaction_at: at,
            last_reaction_at: at,
            user_ids: BTreeSet::new(),
        });
        if !known {
            self.count = self.count.saturating_add(1);
            group.count = group.count.saturating_add(1);
            group.first_reaction_at = group.first_reaction_at.min(at);
            group.last_reaction_at = group.last_reaction_at.max(at);
        }
        group.user_ids.insert(reaction.user_id.clone());

        self.latest.retain(|r| !r.same_identity(&reaction));
        self.latest.insert(0, reaction.clone());
        self.latest.truncate(LATEST_REACTIONS_LIMIT);

        if is_own {
            self.own.retain(|r| !r.same_identity(&reaction));
            self.own.push(reaction);
        }
    }

    /// Drop a reaction. Removing one the record does not know about (already
    /// removed, or never delivered) changes nothing. For the current user the
    /// `own` list is authoritative.
    pub fn remove(&mut self, reaction: &Reaction, current_user_id: &str) {
        let is_own = reaction.user_id == current_user_id;
        let known = if is_own {
            self.own.iter().any(|r| r.same_identity(reaction))
        } else {
            self.knows(reaction, false)
        };
        if !known {
            return;
        }

        self.count = self.count.saturating_sub(1);
        if let Some(group) = self.groups.get_mut(&reaction.kind) {
            group.count = group.count.saturating_sub(1);
            group.user_ids.remove(&reaction.user_id);
            if group.count == 0 {
                self.groups.remove(&reaction.kind);
            }
        }
        self.latest.retain(|r| !r.same_identity(reaction));
        if is_own {
            self.own.retain(|r| !r.same_identity(reaction));
        }
    }

    fn knows(&self, reaction: &Reaction, is_own: bool) -> bool {
        self.groups.get(&reaction.kind).is_some_and(|g| g.user_ids.contains(&reaction.user_id))
            || self.latest.iter().any(|r| r.same_identity(reaction))
            || (is_own && self.own.iter().any(|r| r.same_identity(reaction)))
    }

    pub fn has_own(&self, kind: &str) -> bool {
        self.own.iter().any(|r| r.kind == kind)
    }
}
