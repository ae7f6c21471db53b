//! Session directory
//!
//! The authoritative maps from identifier and from nickname to session. All
//! mutation goes through `&mut self`, so a rename is observed either entirely
//! before or entirely after it happens.

use crate::matching::irc_casefold;
use crate::session::Session;
use crate::uid::Uid;
use crate::{Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::net::IpAddr;

/// Sessions indexed by identifier and nickname
#[derive(Debug, Default)]
pub struct Directory {
    /// Sessions by identifier
    sessions: FxHashMap<Uid, Session>,
    /// Identifiers by casefolded nickname
    by_nick: FxHashMap<String, Uid>,
    /// Local sessions, in connection order
    local: Vec<Uid>,
    /// Local sessions that have not completed registration
    unregistered: FxHashSet<Uid>,
    /// Local sessions per address
    local_clones: FxHashMap<IpAddr, usize>,
    /// All sessions per address
    global_clones: FxHashMap<IpAddr, usize>,
}

impl Directory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session.
    ///
    /// An identifier that is already present is a fault in identifier
    /// generation; the new session is refused and the existing one kept.
    pub fn register(&mut self, session: Session) -> Result<()> {
        let uid = session.uid().to_string();
        if self.sessions.contains_key(&uid) {
            tracing::error!("Refusing duplicate UID {}", uid);
            return Err(Error::DuplicateIdentifier(uid));
        }

        let nick_key = irc_casefold(session.nick());
        if self.by_nick.contains_key(&nick_key) {
            return Err(Error::Generic(format!(
                "Nickname {} already in use",
                session.nick()
            )));
        }

        let addr = session.addr();
        if session.is_local() {
            *self.local_clones.entry(addr).or_insert(0) += 1;
            self.local.push(uid.clone());
            if !session.is_registered() {
                self.unregistered.insert(uid.clone());
            }
        }
        *self.global_clones.entry(addr).or_insert(0) += 1;

        self.by_nick.insert(nick_key, uid.clone());
        self.sessions.insert(uid, session);
        Ok(())
    }

    /// Remove a session. Removing an unknown identifier is a no-op.
    pub fn deregister(&mut self, uid: &str) -> Option<Session> {
        let session = self.sessions.remove(uid)?;

        let nick_key = irc_casefold(session.nick());
        if self.by_nick.get(&nick_key).map(String::as_str) == Some(uid) {
            self.by_nick.remove(&nick_key);
        }

        let addr = session.addr();
        if session.is_local() {
            self.local.retain(|u| u != uid);
            self.unregistered.remove(uid);
            decrement(&mut self.local_clones, addr);
        }
        decrement(&mut self.global_clones, addr);

        Some(session)
    }

    /// Rename a session.
    ///
    /// Fails without any change if `new_nick` belongs to another session or
    /// `uid` is unknown. A change of case only is always allowed.
    pub fn rename(&mut self, uid: &str, new_nick: &str) -> bool {
        let Some(session) = self.sessions.get_mut(uid) else {
            return false;
        };

        let old_key = irc_casefold(session.nick());
        let new_key = irc_casefold(new_nick);

        if old_key != new_key {
            if let Some(owner) = self.by_nick.get(&new_key) {
                if owner != uid {
                    return false;
                }
            }
            self.by_nick.remove(&old_key);
            self.by_nick.insert(new_key, uid.to_string());
        }

        session.set_nick(new_nick);
        true
    }

    /// Note that a local session completed registration
    pub fn mark_registered(&mut self, uid: &str) {
        self.unregistered.remove(uid);
    }

    pub fn get(&self, uid: &str) -> Option<&Session> {
        self.sessions.get(uid)
    }

    pub fn get_mut(&mut self, uid: &str) -> Option<&mut Session> {
        self.sessions.get_mut(uid)
    }

    /// Identifier currently holding `nick`
    pub fn uid_of(&self, nick: &str) -> Option<&Uid> {
        self.by_nick.get(&irc_casefold(nick))
    }

    /// Session currently holding `nick`
    pub fn find_nick(&self, nick: &str) -> Option<&Session> {
        self.uid_of(nick).and_then(|uid| self.sessions.get(uid))
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.sessions.contains_key(uid)
    }

    /// All sessions, local and remote
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Local session identifiers in connection order
    pub fn local_uids(&self) -> &[Uid] {
        &self.local
    }

    /// Total number of sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn local_count(&self) -> usize {
        self.local.len()
    }

    pub fn unregistered_count(&self) -> usize {
        self.unregistered.len()
    }

    /// Local sessions from `addr`
    pub fn local_clone_count(&self, addr: IpAddr) -> usize {
        self.local_clones.get(&addr).copied().unwrap_or(0)
    }

    /// Sessions network-wide from `addr`
    pub fn global_clone_count(&self, addr: IpAddr) -> usize {
        self.global_clones.get(&addr).copied().unwrap_or(0)
    }

    /// Zero every session's delivery stamp
    pub(crate) fn reset_stamps(&mut self) {
        for session in self.sessions.values_mut() {
            session.last_stamp = 0;
        }
    }
}

fn decrement(counts: &mut FxHashMap<IpAddr, usize>, addr: IpAddr) {
    if let Some(count) = counts.get_mut(&addr) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            counts.remove(&addr);
        }
    }
}
