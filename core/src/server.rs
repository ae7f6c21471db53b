//! Session core server state
//!
//! [`Server`] ties the components together: the connect class registry, the
//! session directory, operator policy, group membership and hooks. Admission,
//! flow control and fanout live in their own modules as further `impl` blocks.

use crate::buffer::truncate_on_boundary;
use crate::config::Config;
use crate::connect_class::ClassRegistry;
use crate::directory::Directory;
use crate::fanout::StampCounter;
use crate::groups::{GroupView, MemoryGroups};
use crate::hooks::{Hooks, ModResult, NoHooks};
use crate::modes::{
    apply_notice_masks, ModeHandlers, ModeSet, StaticModeHandlers, MODE_OPER, MODE_SNOMASK,
};
use crate::numeric::NumericReply;
use crate::privilege::{OperPolicy, Privileges};
use crate::session::{Session, PRIV_INCREASED_BUFFERS};
use crate::statistics::ServerStatistics;
use crate::uid::{accept_remote, Uid, UidGenerator};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::net::IpAddr;

/// Version string shown in the welcome burst
pub const VERSION: &str = concat!("fanoutd-", env!("CARGO_PKG_VERSION"));

/// The session core
pub struct Server<G: GroupView = MemoryGroups> {
    pub(crate) config: Config,
    pub(crate) classes: ClassRegistry,
    pub(crate) policy: OperPolicy,
    pub(crate) directory: Directory,
    pub(crate) uids: UidGenerator,
    pub(crate) groups: G,
    pub(crate) hooks: Box<dyn Hooks>,
    pub(crate) mode_handlers: Box<dyn ModeHandlers>,
    pub(crate) stamps: StampCounter,
    pub(crate) stats: ServerStatistics,
    pub(crate) created: DateTime<Utc>,
}

impl Server<MemoryGroups> {
    /// Create a server with in-memory groups
    pub fn new(config: Config) -> Result<Self> {
        Self::with_groups(config, MemoryGroups::new())
    }
}

impl<G: GroupView> Server<G> {
    /// Create a server reading membership from `groups`
    pub fn with_groups(config: Config, groups: G) -> Result<Self> {
        config.validate()?;

        let classes = ClassRegistry::from_config(&config.classes)?;
        let policy = OperPolicy::new(&config.oper_types, &config.oper_classes);
        let mode_handlers = StaticModeHandlers::new(&config.server.oper_only_user_modes);

        tracing::info!(
            "Session core for {} ready with {} connect classes",
            config.server.name,
            classes.len()
        );

        Ok(Self {
            uids: UidGenerator::new(&config.server.sid),
            config,
            classes,
            policy,
            directory: Directory::new(),
            groups,
            hooks: Box::new(NoHooks),
            mode_handlers: Box::new(mode_handlers),
            stamps: StampCounter::new(),
            stats: ServerStatistics::new(),
            created: Utc::now(),
        })
    }

    /// Replace the observation hooks
    pub fn with_hooks(mut self, hooks: Box<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replace the mode handling collaborator
    pub fn with_mode_handlers(mut self, handlers: Box<dyn ModeHandlers>) -> Self {
        self.mode_handlers = handlers;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn groups(&self) -> &G {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut G {
        &mut self.groups
    }

    pub fn statistics(&self) -> &ServerStatistics {
        &self.stats
    }

    pub fn session(&self, uid: &str) -> Option<&Session> {
        self.directory.get(uid)
    }

    pub fn session_mut(&mut self, uid: &str) -> Option<&mut Session> {
        self.directory.get_mut(uid)
    }

    /// Name used as the origin of server messages
    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    /// Take the queued output of a session for the transport
    pub fn take_output(&mut self, uid: &str) -> Vec<String> {
        self.directory
            .get_mut(uid)
            .map(Session::take_output)
            .unwrap_or_default()
    }

    /// Introduce a session connected to another server
    #[allow(clippy::too_many_arguments)]
    pub fn introduce_remote(
        &mut self,
        uid: &str,
        nick: &str,
        ident: &str,
        host: &str,
        dhost: &str,
        gecos: &str,
        addr: IpAddr,
        server: &str,
        now: DateTime<Utc>,
    ) -> Result<Uid> {
        let uid = accept_remote(uid);
        let session = Session::new_remote(
            uid.clone(),
            nick,
            ident,
            host,
            dhost,
            gecos,
            addr,
            server,
            now,
        );
        self.directory.register(session)?;
        tracing::debug!("Remote session {} ({}) introduced by {}", uid, nick, server);
        Ok(uid)
    }

    // Output

    /// Write a raw line to one session
    pub fn write_to(&mut self, uid: &str, line: &str) {
        if let Some(session) = self.directory.get_mut(uid) {
            session.send(line, &mut self.stats);
        }
    }

    /// Write `:server text` to one session
    pub fn write_serv(&mut self, uid: &str, text: &str) {
        let line = format!(":{} {}", self.config.server.name, text);
        self.write_to(uid, &line);
    }

    /// Send a numeric, unless a hook suppresses it. Returns whether it was sent.
    pub fn write_numeric(&mut self, uid: &str, numeric: NumericReply, text: &str) -> bool {
        let Some(session) = self.directory.get(uid) else {
            return false;
        };
        if self.hooks.on_numeric(session, numeric.numeric_code(), text) == ModResult::Deny {
            return false;
        }
        let line = numeric.line(&self.config.server.name, text);
        self.write_to(uid, &line);
        true
    }

    fn nick_of(&self, uid: &str) -> String {
        self.directory
            .get(uid)
            .map(|s| s.nick().to_string())
            .unwrap_or_default()
    }

    /// Send the message of the day
    pub fn show_motd(&mut self, uid: &str) {
        let nick = self.nick_of(uid);
        if self.config.server.motd.is_empty() {
            self.write_numeric(
                uid,
                NumericReply::ErrNoMotd,
                &format!("{} :Message of the day file is missing.", nick),
            );
            return;
        }

        let server = self.config.server.name.clone();
        self.write_numeric(
            uid,
            NumericReply::RplMotdStart,
            &format!("{} :{} message of the day", nick, server),
        );
        for line in self.config.server.motd.clone() {
            self.write_numeric(uid, NumericReply::RplMotd, &format!("{} :- {}", nick, line));
        }
        self.write_numeric(
            uid,
            NumericReply::RplMotdEnd,
            &format!("{} :End of message of the day.", nick),
        );
    }

    /// Send the server rules
    pub fn show_rules(&mut self, uid: &str) {
        let nick = self.nick_of(uid);
        if self.config.server.rules.is_empty() {
            self.write_numeric(
                uid,
                NumericReply::ErrNoRules,
                &format!("{} :RULES File is missing", nick),
            );
            return;
        }

        let server = self.config.server.name.clone();
        self.write_numeric(
            uid,
            NumericReply::RplRulesStart,
            &format!("{} :- {} Server Rules -", nick, server),
        );
        for line in self.config.server.rules.clone() {
            self.write_numeric(uid, NumericReply::RplRules, &format!("{} :- {}", nick, line));
        }
        self.write_numeric(
            uid,
            NumericReply::RplRulesEnd,
            &format!("{} :End of RULES command.", nick),
        );
    }

    // Identity changes

    /// Change nickname and tell everyone who can see the session.
    ///
    /// `new_nick` is cut to the configured maximum. Returns false, leaving the
    /// nickname unchanged, if a hook declines or another session holds it.
    pub fn change_nick(&mut self, uid: &str, new_nick: &str) -> bool {
        let Some(session) = self.directory.get(uid) else {
            return false;
        };
        let new_nick = truncate_on_boundary(new_nick, self.config.server.max_nick);
        if session.nick() == new_nick {
            return true;
        }

        if self.hooks.on_pre_nick(session, new_nick) == ModResult::Deny {
            self.stats.record_collision();
            return false;
        }

        let line = format!(":{} NICK :{}", session.full_host(), new_nick);
        if !self.directory.rename(uid, new_nick) {
            tracing::debug!("Nickname {} is already in use", new_nick);
            return false;
        }

        self.deliver(uid, &line, true, &Default::default());
        true
    }

    /// Change the displayed host, cycling the session in its groups
    pub fn change_displayed_host(&mut self, uid: &str, new_host: &str) -> bool {
        let Some(session) = self.directory.get(uid) else {
            return false;
        };
        if session.dhost() == new_host {
            return true;
        }
        if session.is_local()
            && self.hooks.on_change_local_host(session, new_host) == ModResult::Deny
        {
            return false;
        }

        let quitline = format!(":{} QUIT :Changing host", session.full_host());
        let new_host = truncate_on_boundary(new_host, self.config.server.max_host).to_string();

        let Some(session) = self.directory.get_mut(uid) else {
            return false;
        };
        session.set_dhost(&new_host);
        let is_local = session.is_local();
        let nick = session.nick().to_string();

        self.host_cycle(uid, &quitline);

        if is_local {
            self.write_numeric(
                uid,
                NumericReply::RplYourDisplayedHost,
                &format!("{} {} :is now your displayed host", nick, new_host),
            );
        }
        true
    }

    /// Change the ident, cycling the session in its groups
    pub fn change_ident(&mut self, uid: &str, new_ident: &str) -> bool {
        let Some(session) = self.directory.get_mut(uid) else {
            return false;
        };
        if session.ident() == new_ident {
            return true;
        }

        let quitline = format!(":{} QUIT :Changing ident", session.full_host());
        let new_ident = truncate_on_boundary(new_ident, self.config.server.max_ident);
        session.set_ident(new_ident);

        self.host_cycle(uid, &quitline);
        true
    }

    /// Change the real name
    pub fn change_name(&mut self, uid: &str, gecos: &str) -> bool {
        let Some(session) = self.directory.get(uid) else {
            return false;
        };
        if session.gecos() == gecos {
            return true;
        }
        if session.is_local()
            && self.hooks.on_change_local_gecos(session, gecos) == ModResult::Deny
        {
            return false;
        }

        let gecos = truncate_on_boundary(gecos, self.config.server.max_gecos).to_string();
        if let Some(session) = self.directory.get_mut(uid) {
            session.set_gecos(&gecos);
        }
        true
    }

    /// Apply a notice mask change, returning what actually changed
    pub fn process_notice_masks(&mut self, uid: &str, change: &str) -> String {
        let enabled = ModeSet::from_letters(&self.config.server.notice_masks);
        let Some(session) = self.directory.get_mut(uid) else {
            return String::new();
        };

        let result =
            apply_notice_masks(session.notice_masks_mut(), change, |c| enabled.contains(c));
        if session.notice_masks().is_empty() {
            session.set_mode(MODE_SNOMASK, false);
        }

        let nick = session.nick().to_string();
        for letter in result.unknown {
            self.write_numeric(
                uid,
                NumericReply::ErrUnknownSnomask,
                &format!("{} {} :is unknown snomask char to me", nick, letter),
            );
        }
        result.applied
    }

    // Privileges

    /// Make the session an operator of `oper_type`.
    ///
    /// An existing elevation is revoked first. Grants are rebuilt from the
    /// operator policy; a type unknown to this server leaves the session
    /// elevated with no grants.
    pub fn elevate(&mut self, uid: &str, oper_type: &str) -> bool {
        let Some(session) = self.directory.get(uid) else {
            return false;
        };
        if session.is_elevated() {
            self.revoke(uid);
        }

        let Some(session) = self.directory.get_mut(uid) else {
            return false;
        };
        session.set_mode(MODE_OPER, true);
        let nick = session.nick().to_string();
        let real_host = session.full_real_host().to_string();
        let grants = self.policy.resolve(oper_type);
        if grants.is_none() {
            tracing::warn!("Operator type {} is not defined on this server", oper_type);
        }
        session.set_privileges(Privileges::Elevated {
            oper_type: oper_type.to_string(),
            grants,
        });

        self.write_serv(uid, &format!("MODE {} :+o", nick));
        if let Some(session) = self.directory.get(uid) {
            self.hooks.on_oper(session, oper_type);
        }

        let spaced = oper_type.replace('_', " ");
        let article = if spaced.starts_with(|c: char| "aeiouAEIOU".contains(c)) {
            "an"
        } else {
            "a"
        };
        self.write_numeric(
            uid,
            NumericReply::RplYoureOper,
            &format!("{} :You are now {} {}", nick, article, spaced),
        );
        tracing::info!("{} opered as type: {}", real_host, oper_type);
        true
    }

    /// Remove operator status and every operator-only mode
    pub fn revoke(&mut self, uid: &str) {
        let removal = self.mode_handlers.oper_only_removal();
        let Some(session) = self.directory.get_mut(uid) else {
            return;
        };
        if !session.is_elevated() {
            return;
        }

        session.set_privileges(Privileges::Unprivileged);
        self.mode_handlers.apply(session, &removal);
        session.set_mode(MODE_OPER, false);
        tracing::info!("{} is no longer an operator", session.full_real_host());
    }

    /// Privilege check that explains a refusal to the session
    pub fn has_privilege_noisy(&mut self, uid: &str, privilege: &str) -> bool {
        let Some(session) = self.directory.get(uid) else {
            return false;
        };
        if session.has_privilege(privilege) {
            return true;
        }

        let nick = session.nick().to_string();
        let reason = match session.privileges() {
            Privileges::Unprivileged => "You are not an oper".to_string(),
            Privileges::Elevated { grants: None, oper_type } => {
                format!("Oper type {} has no privileges on this server", oper_type)
            }
            Privileges::Elevated { oper_type, .. } => format!(
                "Oper type {} does not have access to priv {}",
                oper_type, privilege
            ),
        };
        self.write_serv(uid, &format!("NOTICE {} :{}", nick, reason));
        false
    }

    /// Whether the session is exempt from the buffer ceilings
    pub fn is_flood_exempt(&self, uid: &str) -> bool {
        self.directory
            .get(uid)
            .map_or(false, |s| s.has_privilege(PRIV_INCREASED_BUFFERS))
    }

    /// Whether `uid` may join one more group under its class channel limit.
    /// Sessions without a class and a limit of 0 are unrestricted.
    pub fn can_join_group(&self, uid: &str) -> bool {
        let Some(session) = self.directory.get(uid) else {
            return false;
        };
        match session.class_snapshot() {
            Some(class) if class.max_channels != 0 => {
                self.groups.groups_of(uid).len() < class.max_channels
            }
            _ => true,
        }
    }

    // Teardown

    /// Start tearing a session down. Peers are told at the next [`cull`](Self::cull).
    pub fn quit(&mut self, uid: &str, reason: &str, oper_reason: Option<&str>) {
        if let Some(session) = self.directory.get_mut(uid) {
            if session.mark_quitting(reason, oper_reason) {
                tracing::info!("Client exiting: {} [{}]", session.full_real_host(), reason);
            }
        }
    }

    /// Remove every quitting session.
    ///
    /// Registered sessions have their quit fanned out first. The class binding
    /// is released, group memberships are dropped and the session leaves the
    /// directory. Returns the removed sessions so the transport can flush
    /// their final output and close them.
    pub fn cull(&mut self) -> Vec<Session> {
        let mut removed = Vec::new();

        loop {
            let quitting: Vec<Uid> = self
                .directory
                .iter()
                .filter(|s| s.is_quitting())
                .map(|s| s.uid().to_string())
                .collect();
            if quitting.is_empty() {
                break;
            }

            for uid in quitting {
                let quit = self.directory.get(&uid).and_then(|s| s.quit_reason().cloned());
                if let Some(quit) = quit {
                    if quit.was_registered {
                        self.write_common_quit(&uid, &quit.reason, &quit.oper_reason);
                    }
                }

                if let Some(session) = self.directory.get_mut(&uid) {
                    session.set_privileges(Privileges::Unprivileged);
                    drop(session.release_class());
                }
                self.groups.remove_session(&uid);

                if let Some(session) = self.directory.deregister(&uid) {
                    removed.push(session);
                }
            }
        }

        removed
    }

    // Configuration

    /// Apply a new configuration.
    ///
    /// Connect classes are updated in place by name, so bound sessions see new
    /// limits at once. Operator grants already handed out are kept until the
    /// session is elevated again.
    pub fn rehash(&mut self, config: Config) -> Result<()> {
        config.validate()?;
        if config.server.sid != self.config.server.sid {
            return Err(Error::Config(
                "Server id cannot change on rehash".to_string(),
            ));
        }

        self.classes.reload(&config.classes)?;
        self.policy = OperPolicy::new(&config.oper_types, &config.oper_classes);
        self.mode_handlers = Box::new(StaticModeHandlers::new(&config.server.oper_only_user_modes));
        self.config = config;
        tracing::info!("Configuration reloaded");
        Ok(())
    }

    // Timers

    /// Unregistered local sessions that have outstayed their allowance
    pub fn expired_registrations(&self, now: DateTime<Utc>) -> Vec<Uid> {
        self.directory
            .local_uids()
            .iter()
            .filter(|uid| {
                self.directory
                    .get(uid)
                    .map_or(false, |s| s.registration_expired(now))
            })
            .cloned()
            .collect()
    }

    /// Registered local sessions whose ping is due
    pub fn pings_due(&self, now: DateTime<Utc>) -> Vec<Uid> {
        self.directory
            .local_uids()
            .iter()
            .filter(|uid| {
                self.directory
                    .get(uid)
                    .map_or(false, |s| s.is_registered() && s.next_ping() <= now)
            })
            .cloned()
            .collect()
    }
}
