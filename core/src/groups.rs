//! Group membership
//!
//! Groups (channels) own their membership lists. The session core only reads
//! them through [`GroupView`], apart from asking the owner to forget a session
//! that has been torn down.

use crate::matching::irc_casefold;
use crate::uid::Uid;
use rustc_hash::FxHashMap;

/// Access to group membership
pub trait GroupView {
    /// Names of the groups `uid` belongs to
    fn groups_of(&self, uid: &str) -> Vec<String>;

    /// Members of `group`, empty if it does not exist
    fn members(&self, group: &str) -> &[Uid];

    /// Prefix mode letters `uid` holds in `group`, e.g. `"ov"`
    fn prefix_modes(&self, group: &str, uid: &str) -> String;

    /// Drop `uid` from every group, removing groups left empty
    fn remove_session(&mut self, uid: &str);
}

#[derive(Debug, Default)]
struct Group {
    name: String,
    members: Vec<Uid>,
    prefixes: FxHashMap<Uid, String>,
}

/// In-memory group table
#[derive(Debug, Default)]
pub struct MemoryGroups {
    /// Groups by casefolded name
    groups: FxHashMap<String, Group>,
    /// Casefolded group names per session, in join order
    memberships: FxHashMap<Uid, Vec<String>>,
}

impl MemoryGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `uid` to `group`, creating it if needed
    pub fn join(&mut self, group: &str, uid: &str) {
        self.join_with_prefix(group, uid, "");
    }

    /// Add `uid` to `group` holding the given prefix mode letters
    pub fn join_with_prefix(&mut self, group: &str, uid: &str, prefixes: &str) {
        let key = irc_casefold(group);
        let entry = self.groups.entry(key.clone()).or_insert_with(|| Group {
            name: group.to_string(),
            ..Group::default()
        });

        if !entry.members.iter().any(|m| m == uid) {
            entry.members.push(uid.to_string());
            self.memberships
                .entry(uid.to_string())
                .or_default()
                .push(key);
        }
        if prefixes.is_empty() {
            entry.prefixes.remove(uid);
        } else {
            entry.prefixes.insert(uid.to_string(), prefixes.to_string());
        }
    }

    /// Remove `uid` from `group`
    pub fn part(&mut self, group: &str, uid: &str) {
        let key = irc_casefold(group);
        if let Some(entry) = self.groups.get_mut(&key) {
            entry.members.retain(|m| m != uid);
            entry.prefixes.remove(uid);
            if entry.members.is_empty() {
                self.groups.remove(&key);
            }
        }
        if let Some(joined) = self.memberships.get_mut(uid) {
            joined.retain(|g| *g != key);
            if joined.is_empty() {
                self.memberships.remove(uid);
            }
        }
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl GroupView for MemoryGroups {
    fn groups_of(&self, uid: &str) -> Vec<String> {
        self.memberships
            .get(uid)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| self.groups.get(key))
                    .map(|group| group.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn members(&self, group: &str) -> &[Uid] {
        self.groups
            .get(&irc_casefold(group))
            .map(|group| group.members.as_slice())
            .unwrap_or(&[])
    }

    fn prefix_modes(&self, group: &str, uid: &str) -> String {
        self.groups
            .get(&irc_casefold(group))
            .and_then(|group| group.prefixes.get(uid))
            .cloned()
            .unwrap_or_default()
    }

    fn remove_session(&mut self, uid: &str) {
        let Some(keys) = self.memberships.remove(uid) else {
            return;
        };
        for key in keys {
            if let Some(group) = self.groups.get_mut(&key) {
                group.members.retain(|m| m != uid);
                group.prefixes.remove(uid);
                if group.members.is_empty() {
                    self.groups.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_part() {
        let mut groups = MemoryGroups::new();
        groups.join("#Rust", "A");
        groups.join_with_prefix("#rust", "B", "o");
        groups.join("#other", "A");

        assert_eq!(groups.members("#RUST"), ["A".to_string(), "B".to_string()]);
        assert_eq!(groups.groups_of("A"), vec!["#Rust", "#other"]);
        assert_eq!(groups.prefix_modes("#rust", "B"), "o");
        assert_eq!(groups.prefix_modes("#rust", "A"), "");

        groups.part("#other", "A");
        assert_eq!(groups.len(), 1);
        assert!(groups.members("#other").is_empty());
    }

    #[test]
    fn test_remove_session_purges_empty_groups() {
        let mut groups = MemoryGroups::new();
        groups.join("#a", "A");
        groups.join("#b", "A");
        groups.join("#b", "B");

        groups.remove_session("A");
        assert!(groups.groups_of("A").is_empty());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.members("#b"), ["B".to_string()]);
    }
}
