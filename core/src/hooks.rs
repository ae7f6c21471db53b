//! Observation hooks
//!
//! Extension points consulted before and after session state changes. A hook
//! returning [`ModResult::Deny`] declines the change; the operation then
//! returns without side effects.

use crate::session::Session;
use crate::uid::Uid;
use std::collections::BTreeMap;

/// Result of a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModResult {
    /// No opinion, continue with default behaviour
    #[default]
    Passthru,
    /// Explicitly allow
    Allow,
    /// Decline the operation
    Deny,
}

/// Recipients of a fanout before delivery
#[derive(Debug, Clone, Default)]
pub struct Neighbors {
    /// Groups whose members receive the event
    pub groups: Vec<String>,
    /// Per-session overrides: `true` always delivers, `false` never does
    pub exceptions: BTreeMap<Uid, bool>,
}

/// Hooks into session lifecycle events
pub trait Hooks {
    /// A numeric is about to be sent to `session`
    fn on_numeric(&self, _session: &Session, _numeric: u16, _text: &str) -> ModResult {
        ModResult::Passthru
    }

    /// `session` wants to change nickname
    fn on_pre_nick(&self, _session: &Session, _new_nick: &str) -> ModResult {
        ModResult::Passthru
    }

    /// A local session's displayed host is about to change
    fn on_change_local_host(&self, _session: &Session, _new_host: &str) -> ModResult {
        ModResult::Passthru
    }

    /// A local session's real name is about to change
    fn on_change_local_gecos(&self, _session: &Session, _gecos: &str) -> ModResult {
        ModResult::Passthru
    }

    /// Adjust the recipients of an event originating at `session`
    fn on_build_neighbor_list(&self, _session: &Session, _neighbors: &mut Neighbors) {}

    /// `session` became an operator of `oper_type`
    fn on_oper(&self, _session: &Session, _oper_type: &str) {}

    /// `session` completed registration
    fn on_user_connect(&self, _session: &Session) {}
}

/// Hooks that never intervene
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl Hooks for NoHooks {}
