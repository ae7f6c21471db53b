//! Session state
//!
//! A [`Session`] is one connected peer, local or introduced by a remote
//! server. Sessions are owned by the [`Directory`](crate::Directory); every
//! other component refers to them by [`Uid`].

use crate::buffer::{truncate_on_boundary, RecvQueue, SendQueue, MAX_OUTBOUND};
use crate::connect_class::{ClassBinding, ConnectClass};
use crate::matching::irc_casefold;
use crate::modes::ModeSet;
use crate::privilege::{ModeType, Privileges};
use crate::statistics::ServerStatistics;
use crate::uid::Uid;
use chrono::{DateTime, Duration, Utc};
use std::cell::OnceCell;
use std::net::IpAddr;

/// Privilege that lifts the buffer ceilings of a session
pub const PRIV_INCREASED_BUFFERS: &str = "users/flood/increased-buffers";

/// Registration progress. `Quitting` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Connected, no registration commands accepted yet
    Unregistered,
    /// A connection password has been supplied
    PasswordPending,
    /// Fully connected and visible
    Registered,
    /// Being torn down
    Quitting,
}

/// Input processing state as left by the last scheduler pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    /// Nothing processed yet
    #[default]
    Idle,
    /// Lines are being handed to the dispatcher
    Draining,
    /// Output reached the soft ceiling with no penalty pending
    Blocked,
}

/// Where a session is connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locality {
    /// Connected to this server
    Local,
    /// Introduced by another server
    Remote,
}

/// Why a session is leaving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuitReason {
    /// Reason shown to everyone
    pub reason: String,
    /// Reason shown to operators
    pub oper_reason: String,
    /// Whether the session had completed registration
    pub was_registered: bool,
}

#[derive(Debug, Default)]
struct IdentityCache {
    full_host: OnceCell<String>,
    full_real_host: OnceCell<String>,
    make_host: OnceCell<String>,
    make_host_ip: OnceCell<String>,
    wild_host: OnceCell<String>,
}

/// One connected peer
#[derive(Debug)]
pub struct Session {
    uid: Uid,
    nick: String,
    ident: String,
    dhost: String,
    host: String,
    gecos: String,
    addr: IpAddr,
    server: String,
    local_port: Option<u16>,
    locality: Locality,
    state: RegistrationState,
    quit_reason: Option<QuitReason>,
    class: Option<ClassBinding>,
    password: Option<String>,
    sendq: SendQueue,
    recvq: RecvQueue,
    penalty: i32,
    flow: FlowState,
    modes: ModeSet,
    snomasks: ModeSet,
    invites: Vec<(String, Option<DateTime<Utc>>)>,
    privileges: Privileges,
    pub(crate) last_stamp: u32,
    signon: DateTime<Utc>,
    next_ping: DateTime<Utc>,
    bytes_in: u64,
    bytes_out: u64,
    cmds_in: u64,
    cmds_out: u64,
    cache: IdentityCache,
}

impl Session {
    /// A session accepted on a local listener. Nick and ident are placeholders
    /// until registration supplies them; the host starts as the address.
    pub fn new_local(
        uid: Uid,
        addr: IpAddr,
        local_port: Option<u16>,
        server: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let host = addr.to_string();
        Self::build(uid, addr, host, server, Locality::Local, local_port, now)
    }

    /// A session introduced by another server, already registered
    #[allow(clippy::too_many_arguments)]
    pub fn new_remote(
        uid: Uid,
        nick: &str,
        ident: &str,
        host: &str,
        dhost: &str,
        gecos: &str,
        addr: IpAddr,
        server: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let mut session = Self::build(
            uid,
            addr,
            host.to_string(),
            server,
            Locality::Remote,
            None,
            now,
        );
        session.nick = nick.to_string();
        session.ident = ident.to_string();
        session.dhost = dhost.to_string();
        session.gecos = gecos.to_string();
        session.state = RegistrationState::Registered;
        session
    }

    fn build(
        uid: Uid,
        addr: IpAddr,
        host: String,
        server: &str,
        locality: Locality,
        local_port: Option<u16>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            nick: uid.clone(),
            uid,
            ident: "unknown".to_string(),
            dhost: host.clone(),
            host,
            gecos: String::new(),
            addr,
            server: server.to_string(),
            local_port,
            locality,
            state: RegistrationState::Unregistered,
            quit_reason: None,
            class: None,
            password: None,
            sendq: SendQueue::new(),
            recvq: RecvQueue::new(),
            penalty: 0,
            flow: FlowState::Idle,
            modes: ModeSet::new(),
            snomasks: ModeSet::new(),
            invites: Vec::new(),
            privileges: Privileges::Unprivileged,
            last_stamp: 0,
            signon: now,
            next_ping: now,
            bytes_in: 0,
            bytes_out: 0,
            cmds_in: 0,
            cmds_out: 0,
            cache: IdentityCache::default(),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// Displayed host
    pub fn dhost(&self) -> &str {
        &self.dhost
    }

    /// Real host
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn gecos(&self) -> &str {
        &self.gecos
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Name of the server the session is connected to
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Port of the local listener the session connected to
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    pub fn is_local(&self) -> bool {
        self.locality == Locality::Local
    }

    pub fn is_remote(&self) -> bool {
        self.locality == Locality::Remote
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.state == RegistrationState::Registered
    }

    pub fn is_quitting(&self) -> bool {
        self.state == RegistrationState::Quitting
    }

    pub fn quit_reason(&self) -> Option<&QuitReason> {
        self.quit_reason.as_ref()
    }

    pub fn signon(&self) -> DateTime<Utc> {
        self.signon
    }

    /// When the next ping is due
    pub fn next_ping(&self) -> DateTime<Utc> {
        self.next_ping
    }

    pub fn set_next_ping(&mut self, when: DateTime<Utc>) {
        self.next_ping = when;
    }

    pub(crate) fn set_nick(&mut self, nick: &str) {
        self.nick = nick.to_string();
        self.invalidate_cache();
    }

    /// Set the ident without any fanout
    pub fn set_ident(&mut self, ident: &str) {
        self.ident = ident.to_string();
        self.invalidate_cache();
    }

    /// Set the displayed host without any fanout
    pub fn set_dhost(&mut self, dhost: &str) {
        self.dhost = dhost.to_string();
        self.invalidate_cache();
    }

    /// Set the real host, e.g. once DNS has resolved it
    pub fn set_host(&mut self, host: &str) {
        self.host = host.to_string();
        self.invalidate_cache();
    }

    pub fn set_gecos(&mut self, gecos: &str) {
        self.gecos = gecos.to_string();
    }

    pub(crate) fn set_state(&mut self, state: RegistrationState) {
        if self.state != RegistrationState::Quitting {
            self.state = state;
        }
    }

    /// Drop every cached identity string
    pub fn invalidate_cache(&mut self) {
        self.cache = IdentityCache::default();
    }

    /// `nick!ident@dhost`
    pub fn full_host(&self) -> &str {
        self.cache
            .full_host
            .get_or_init(|| format!("{}!{}@{}", self.nick, self.ident, self.dhost))
    }

    /// `nick!ident@host`
    pub fn full_real_host(&self) -> &str {
        self.cache
            .full_real_host
            .get_or_init(|| format!("{}!{}@{}", self.nick, self.ident, self.host))
    }

    /// `ident@host`
    pub fn make_host(&self) -> &str {
        self.cache
            .make_host
            .get_or_init(|| format!("{}@{}", self.ident, self.host))
    }

    /// `ident@ip`
    pub fn make_host_ip(&self) -> &str {
        self.cache
            .make_host_ip
            .get_or_init(|| format!("{}@{}", self.ident, self.addr))
    }

    /// `*!*@dhost`
    pub fn wild_host(&self) -> &str {
        self.cache
            .wild_host
            .get_or_init(|| format!("*!*@{}", self.dhost))
    }

    /// Network address of the session masked to `prefix` bits, in CIDR form.
    /// `None` if the prefix is wider than the address family.
    pub fn cidr_mask(&self, prefix: u8) -> Option<String> {
        let net = ipnet::IpNet::new(self.addr, prefix).ok()?;
        Some(net.trunc().to_string())
    }

    // Connect class

    pub fn class(&self) -> Option<&ClassBinding> {
        self.class.as_ref()
    }

    /// Snapshot of the bound class
    pub fn class_snapshot(&self) -> Option<ConnectClass> {
        self.class.as_ref().map(ClassBinding::snapshot)
    }

    pub(crate) fn bind_class(&mut self, binding: ClassBinding) {
        self.class = Some(binding);
    }

    /// Release the class; later calls are no-ops
    pub(crate) fn release_class(&mut self) -> Option<ClassBinding> {
        self.class.take()
    }

    pub(crate) fn set_password(&mut self, password: &str) {
        self.password = Some(password.to_string());
    }

    pub(crate) fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    // Modes

    pub fn modes(&self) -> &ModeSet {
        &self.modes
    }

    pub fn has_mode(&self, letter: char) -> bool {
        self.modes.contains(letter)
    }

    pub fn set_mode(&mut self, letter: char, on: bool) -> bool {
        self.modes.set(letter, on)
    }

    pub fn notice_masks(&self) -> &ModeSet {
        &self.snomasks
    }

    pub(crate) fn notice_masks_mut(&mut self) -> &mut ModeSet {
        &mut self.snomasks
    }

    // Privileges

    pub fn privileges(&self) -> &Privileges {
        &self.privileges
    }

    pub(crate) fn set_privileges(&mut self, privileges: Privileges) {
        self.privileges = privileges;
    }

    pub fn is_elevated(&self) -> bool {
        self.privileges.is_elevated()
    }

    /// Whether the session may run an administrative command
    pub fn has_command_permission(&self, command: &str) -> bool {
        if self.is_remote() {
            return true;
        }
        self.privileges
            .grants()
            .map_or(false, |grants| grants.allows_command(command))
    }

    /// Whether the session holds a privilege string
    pub fn has_privilege(&self, privilege: &str) -> bool {
        if self.is_remote() {
            return true;
        }
        self.privileges
            .grants()
            .map_or(false, |grants| grants.allows_privilege(privilege))
    }

    /// Whether the session may set a mode letter
    pub fn has_mode_permission(&self, letter: char, kind: ModeType) -> bool {
        if self.is_remote() {
            return true;
        }
        self.privileges
            .grants()
            .map_or(false, |grants| grants.allows_mode(letter, kind))
    }

    /// Whether the buffer ceilings apply to this session
    pub fn is_flood_exempt(&self) -> bool {
        self.has_privilege(PRIV_INCREASED_BUFFERS)
    }

    // Buffers and flow control

    pub fn sendq(&self) -> &SendQueue {
        &self.sendq
    }

    /// Bytes waiting to be sent
    pub fn sendq_size(&self) -> usize {
        self.sendq.current_size()
    }

    /// Take every queued outbound line for the transport
    pub fn take_output(&mut self) -> Vec<String> {
        self.sendq.drain()
    }

    pub(crate) fn recvq_mut(&mut self) -> &mut RecvQueue {
        &mut self.recvq
    }

    /// Bytes of input not yet processed
    pub fn recvq_size(&self) -> usize {
        self.recvq.current_size()
    }

    /// Buffer raw input from the transport
    pub fn append_input(&mut self, data: &[u8]) {
        self.recvq.append(data);
    }

    pub fn penalty(&self) -> i32 {
        self.penalty
    }

    /// Make the session wait longer before its next line is processed
    pub fn increase_penalty(&mut self, increase: i32) {
        self.penalty += increase;
    }

    pub fn decrease_penalty(&mut self, decrease: i32) {
        self.penalty -= decrease;
    }

    pub fn flow_state(&self) -> FlowState {
        self.flow
    }

    pub(crate) fn set_flow_state(&mut self, flow: FlowState) {
        self.flow = flow;
    }

    pub(crate) fn record_input(&mut self, bytes: usize) {
        self.bytes_in += bytes as u64;
        self.cmds_in += 1;
    }

    /// Traffic counters: bytes in, bytes out, lines in, lines out
    pub fn traffic(&self) -> (u64, u64, u64, u64) {
        (self.bytes_in, self.bytes_out, self.cmds_in, self.cmds_out)
    }

    /// Queue output, enforcing the hard sendq ceiling.
    ///
    /// Returns false when the ceiling was breached: the session is then marked
    /// quitting and nothing is queued. Once quitting, output is accepted
    /// unconditionally so the closing line still gets out. Output for remote
    /// sessions is discarded.
    pub fn add_write_buf(&mut self, data: String) -> bool {
        if self.is_remote() {
            return true;
        }

        if !self.is_quitting() && !self.is_flood_exempt() {
            if let Some(hard) = self.class.as_ref().map(|c| c.handle().read().sendq_hard) {
                if self.sendq.current_size() + data.len() > hard {
                    tracing::warn!(
                        "User {} SendQ of {} exceeds connect class maximum of {}",
                        self.nick,
                        self.sendq.current_size() + data.len(),
                        hard
                    );
                    self.mark_quitting("SendQ exceeded", None);
                    return false;
                }
            }
        }

        self.sendq.push(data);
        true
    }

    /// Write one protocol line, truncated and CRLF terminated
    pub fn write(&mut self, text: &str) -> usize {
        if self.is_remote() {
            return 0;
        }
        let text = truncate_on_boundary(text, MAX_OUTBOUND);
        let len = text.len() + 2;
        if self.add_write_buf(format!("{}\r\n", text)) {
            self.bytes_out += len as u64;
            self.cmds_out += 1;
            len
        } else {
            0
        }
    }

    /// Write one line and count it in `stats`. A write that breaches the hard
    /// sendq ceiling counts as a quota disconnect.
    pub(crate) fn send(&mut self, text: &str, stats: &mut ServerStatistics) -> usize {
        let was_quitting = self.is_quitting();
        let sent = self.write(text);
        stats.record_message_sent(sent);
        if !was_quitting && self.is_quitting() {
            stats.record_quota_disconnect();
        }
        sent
    }

    /// Write `:prefix text`
    pub fn write_from(&mut self, prefix: &str, text: &str) -> usize {
        self.write(&format!(":{} {}", prefix, text))
    }

    /// Begin teardown. The first reason wins; a local session gets its
    /// closing line queued.
    pub fn mark_quitting(&mut self, reason: &str, oper_reason: Option<&str>) -> bool {
        if self.is_quitting() {
            return false;
        }
        let quit = QuitReason {
            reason: reason.to_string(),
            oper_reason: oper_reason.unwrap_or(reason).to_string(),
            was_registered: self.is_registered(),
        };
        self.state = RegistrationState::Quitting;
        if self.is_local() {
            let line = format!(
                "ERROR :Closing link: ({}@{}) [{}]",
                self.ident, self.host, quit.oper_reason
            );
            self.write(&line);
        }
        tracing::debug!("Session {} quitting: {}", self.uid, quit.reason);
        self.quit_reason = Some(quit);
        true
    }

    // Invitations

    /// Record an invitation. An invite that has already expired is ignored;
    /// an existing entry's expiry only ever moves later.
    pub fn invite_to(&mut self, channel: &str, expires: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        if matches!(expires, Some(at) if now > at) {
            return;
        }
        let key = irc_casefold(channel);
        if let Some((_, existing)) = self.invites.iter_mut().find(|(name, _)| *name == key) {
            if let (Some(current), Some(new)) = (*existing, expires) {
                if new > current {
                    *existing = Some(new);
                }
            }
            return;
        }
        self.invites.push((key, expires));
    }

    /// Whether an unexpired invitation to `channel` exists
    pub fn is_invited(&mut self, channel: &str, now: DateTime<Utc>) -> bool {
        self.prune_invites(now);
        let key = irc_casefold(channel);
        self.invites.iter().any(|(name, _)| *name == key)
    }

    /// Unexpired invitations
    pub fn invite_list(&mut self, now: DateTime<Utc>) -> &[(String, Option<DateTime<Utc>>)] {
        self.prune_invites(now);
        &self.invites
    }

    pub fn remove_invite(&mut self, channel: &str) {
        let key = irc_casefold(channel);
        self.invites.retain(|(name, _)| *name != key);
    }

    fn prune_invites(&mut self, now: DateTime<Utc>) {
        self.invites
            .retain(|(_, expires)| !matches!(expires, Some(at) if now > *at));
    }

    /// Whether an unregistered session has outstayed its class allowance
    pub fn registration_expired(&self, now: DateTime<Utc>) -> bool {
        if matches!(
            self.state,
            RegistrationState::Registered | RegistrationState::Quitting
        ) {
            return false;
        }
        let timeout = self
            .class
            .as_ref()
            .map_or(0, |c| c.handle().read().registration_timeout);
        now > seconds_after(self.signon, timeout)
    }
}

/// `start` plus `secs` seconds, saturating at the latest representable time
pub(crate) fn seconds_after(start: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
