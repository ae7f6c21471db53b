//! Multicast fanout
//!
//! An event originating at one session is written once to each local session
//! sharing a group with it. Duplicates are suppressed with a delivery stamp:
//! every fanout takes a fresh value from a server-wide counter and each
//! recipient is marked with it as it is written to. Sessions start unstamped
//! at zero and the counter never hands out zero, so a stale stamp can never
//! equal a live one; when the counter wraps every stamp is cleared.

use crate::groups::GroupView;
use crate::hooks::Neighbors;
use crate::modes::MODE_WALLOPS;
use crate::server::Server;
use crate::uid::Uid;
use std::collections::BTreeMap;

/// Source of delivery stamps
#[derive(Debug, Clone, Copy, Default)]
pub struct StampCounter {
    value: u32,
}

impl StampCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next stamp, and whether the counter wrapped to get it
    pub fn advance(&mut self) -> (u32, bool) {
        self.value = self.value.wrapping_add(1);
        if self.value == 0 {
            self.value = 1;
            return (1, true);
        }
        (self.value, false)
    }

    pub fn value(&self) -> u32 {
        self.value
    }
}

impl<G: GroupView> Server<G> {
    pub(crate) fn next_stamp(&mut self) -> u32 {
        let (stamp, wrapped) = self.stamps.advance();
        if wrapped {
            self.directory.reset_stamps();
            tracing::debug!("Delivery stamp counter wrapped, stamps cleared");
        }
        stamp
    }

    /// Current value of the delivery stamp counter
    pub fn stamp_counter(&self) -> u32 {
        self.stamps.value()
    }

    /// Move the delivery stamp counter. Only meant for exercising wraparound.
    #[doc(hidden)]
    pub fn set_stamp_counter(&mut self, value: u32) {
        self.stamps = StampCounter { value };
    }

    /// Recipients of an event from `origin`, with its own override applied
    fn neighbors(&self, origin: &str, own: Option<bool>, extra: &BTreeMap<Uid, bool>) -> Neighbors {
        let mut neighbors = Neighbors {
            groups: self.groups.groups_of(origin),
            exceptions: extra.clone(),
        };
        if let Some(include) = own {
            neighbors.exceptions.insert(origin.to_string(), include);
        }
        if let Some(session) = self.directory.get(origin) {
            self.hooks.on_build_neighbor_list(session, &mut neighbors);
        }
        neighbors
    }

    /// Write `line` once to every local session sharing a group with `origin`.
    ///
    /// `extra` holds per-session overrides: `true` delivers even without a
    /// shared group, `false` suppresses delivery. The origin itself receives
    /// the line only if `include_origin` is set. Nothing is sent unless the
    /// origin is registered and not quitting. Returns the number of sessions
    /// written to.
    pub fn deliver(
        &mut self,
        origin: &str,
        line: &str,
        include_origin: bool,
        extra: &BTreeMap<Uid, bool>,
    ) -> usize {
        match self.directory.get(origin) {
            Some(session) if session.is_registered() && !session.is_quitting() => {}
            _ => return 0,
        }

        let stamp = self.next_stamp();
        let neighbors = self.neighbors(origin, Some(include_origin), extra);
        let mut sent = 0;

        for (uid, include) in &neighbors.exceptions {
            let Some(session) = self.directory.get_mut(uid) else {
                continue;
            };
            if session.is_local() && !session.is_quitting() {
                session.last_stamp = stamp;
                if *include {
                    session.send(line, &mut self.stats);
                    sent += 1;
                }
            }
        }

        for group in &neighbors.groups {
            for member in self.groups.members(group) {
                let Some(session) = self.directory.get_mut(member) else {
                    continue;
                };
                if session.is_local() && !session.is_quitting() && session.last_stamp != stamp {
                    session.last_stamp = stamp;
                    session.send(line, &mut self.stats);
                    sent += 1;
                }
            }
        }

        sent
    }

    /// Send `:full_host text` to `uid` and everyone sharing a group with it
    pub fn write_common(&mut self, uid: &str, text: &str) -> usize {
        self.write_common_with(uid, text, true)
    }

    /// As [`write_common`](Self::write_common) without echoing to `uid`
    pub fn write_common_except(&mut self, uid: &str, text: &str) -> usize {
        self.write_common_with(uid, text, false)
    }

    fn write_common_with(&mut self, uid: &str, text: &str, include_origin: bool) -> usize {
        let Some(session) = self.directory.get(uid) else {
            return 0;
        };
        let line = format!(":{} {}", session.full_host(), text);
        self.deliver(uid, &line, include_origin, &BTreeMap::new())
    }

    /// Announce a quit to everyone sharing a group with `uid`. Operators see
    /// `oper_text`, everyone else `normal_text`.
    pub fn write_common_quit(&mut self, uid: &str, normal_text: &str, oper_text: &str) -> usize {
        let (full_host, registered) = match self.directory.get(uid) {
            Some(session) => (
                session.full_host().to_string(),
                session.is_registered()
                    || session.quit_reason().map_or(false, |q| q.was_registered),
            ),
            None => return 0,
        };
        if !registered {
            return 0;
        }

        let normal_line = format!(":{} QUIT :{}", full_host, normal_text);
        let oper_line = format!(":{} QUIT :{}", full_host, oper_text);

        let stamp = self.next_stamp();
        let neighbors = self.neighbors(uid, None, &BTreeMap::new());
        let mut sent = 0;

        for (target, include) in &neighbors.exceptions {
            let Some(session) = self.directory.get_mut(target) else {
                continue;
            };
            if session.is_local() && !session.is_quitting() {
                session.last_stamp = stamp;
                if *include {
                    let line = if session.is_elevated() { &oper_line } else { &normal_line };
                    session.send(line, &mut self.stats);
                    sent += 1;
                }
            }
        }

        for group in &neighbors.groups {
            for member in self.groups.members(group) {
                let Some(session) = self.directory.get_mut(member) else {
                    continue;
                };
                if session.is_local() && !session.is_quitting() && session.last_stamp != stamp {
                    session.last_stamp = stamp;
                    let line = if session.is_elevated() { &oper_line } else { &normal_line };
                    session.send(line, &mut self.stats);
                    sent += 1;
                }
            }
        }

        sent
    }

    /// Show an identity change to group peers as a quit followed by a rejoin
    /// of each group, restoring prefix modes. `quitline` is the full QUIT line
    /// built from the old identity.
    pub fn host_cycle(&mut self, uid: &str, quitline: &str) {
        if !self.config.server.cycle_hosts {
            return;
        }
        let Some(session) = self.directory.get(uid) else {
            return;
        };
        let full_host = session.full_host().to_string();
        let nick = session.nick().to_string();

        let silent = self.next_stamp();
        let seen = self.next_stamp();
        let neighbors = self.neighbors(uid, None, &BTreeMap::new());

        for (target, include) in &neighbors.exceptions {
            let Some(session) = self.directory.get_mut(target) else {
                continue;
            };
            if session.is_local() && !session.is_quitting() {
                if *include {
                    session.last_stamp = seen;
                    session.send(quitline, &mut self.stats);
                } else {
                    session.last_stamp = silent;
                }
            }
        }

        for group in &neighbors.groups {
            let join_line = format!(":{} JOIN {}", full_host, group);
            let prefixes = self.groups.prefix_modes(group, uid);
            let mode_line = (!prefixes.is_empty()).then(|| {
                let targets = vec![nick.as_str(); prefixes.chars().count()].join(" ");
                format!(":{} MODE {} +{} {}", full_host, group, prefixes, targets)
            });

            for member in self.groups.members(group) {
                if member == uid {
                    continue;
                }
                let Some(session) = self.directory.get_mut(member) else {
                    continue;
                };
                if !session.is_local() || session.is_quitting() || session.last_stamp == silent {
                    continue;
                }

                if session.last_stamp != seen {
                    session.send(quitline, &mut self.stats);
                    session.last_stamp = seen;
                }
                session.send(&join_line, &mut self.stats);
                if let Some(mode_line) = &mode_line {
                    session.send(mode_line, &mut self.stats);
                }
            }
        }
    }

    /// Send a WALLOPS from `uid` to every local session with `+w`
    pub fn wallops(&mut self, uid: &str, text: &str) -> usize {
        let Some(session) = self.directory.get(uid) else {
            return 0;
        };
        if !session.is_local() {
            return 0;
        }
        let line = format!(":{} WALLOPS :{}", session.full_host(), text);

        let mut sent = 0;
        for target in self.directory.local_uids().to_vec() {
            let Some(session) = self.directory.get_mut(&target) else {
                continue;
            };
            if session.has_mode(MODE_WALLOPS) {
                session.send(&line, &mut self.stats);
                sent += 1;
            }
        }
        sent
    }

    /// Send `:full_host COMMAND $* :text` to every local session
    pub fn send_all(&mut self, uid: &str, command: &str, text: &str) -> usize {
        let Some(session) = self.directory.get(uid) else {
            return 0;
        };
        let line = format!(":{} {} $* :{}", session.full_host(), command, text);

        let mut sent = 0;
        for target in self.directory.local_uids().to_vec() {
            if let Some(session) = self.directory.get_mut(&target) {
                session.send(&line, &mut self.stats);
                sent += 1;
            }
        }
        sent
    }

    /// Whether two registered sessions have a group in common
    pub fn shares_group(&self, a: &str, b: &str) -> bool {
        let registered = |uid: &str| self.directory.get(uid).map_or(false, |s| s.is_registered());
        if !registered(a) || !registered(b) {
            return false;
        }
        self.groups
            .groups_of(a)
            .iter()
            .any(|group| self.groups.members(group).iter().any(|m| m == b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hooks::Hooks;
    use crate::session::Session;
    use chrono::Utc;

    fn server() -> Server {
        Server::new(Config::default()).unwrap()
    }

    fn connect(server: &mut Server, addr: &str, nick: &str) -> Uid {
        let now = Utc::now();
        let uid = server.accept(addr.parse().unwrap(), None, None, now).unwrap();
        assert!(server.change_nick(&uid, nick));
        server.full_connect(&uid, now).unwrap();
        server.take_output(&uid);
        uid
    }

    #[test]
    fn test_stamp_counter_skips_zero() {
        let mut counter = StampCounter { value: u32::MAX - 1 };
        assert_eq!(counter.advance(), (u32::MAX, false));
        assert_eq!(counter.advance(), (1, true));
        assert_eq!(counter.advance(), (2, false));
    }

    #[test]
    fn test_deliver_once_per_recipient() {
        let mut server = server();
        let a = connect(&mut server, "10.0.0.1", "alice");
        let b = connect(&mut server, "10.0.0.2", "bob");
        let c = connect(&mut server, "10.0.0.3", "carol");
        for group in ["#one", "#two"] {
            server.groups_mut().join(group, &a);
            server.groups_mut().join(group, &b);
        }

        let sent = server.write_common_except(&a, "AWAY :lunch");
        assert_eq!(sent, 1);
        assert_eq!(server.take_output(&b), vec![":alice!unknown@10.0.0.1 AWAY :lunch\r\n"]);
        assert!(server.take_output(&a).is_empty());
        assert!(server.take_output(&c).is_empty());
    }

    #[test]
    fn test_deliver_overrides() {
        let mut server = server();
        let a = connect(&mut server, "10.0.0.1", "alice");
        let b = connect(&mut server, "10.0.0.2", "bob");
        let c = connect(&mut server, "10.0.0.3", "carol");
        server.groups_mut().join("#one", &a);
        server.groups_mut().join("#one", &b);

        let mut extra = BTreeMap::new();
        extra.insert(b.clone(), false);
        extra.insert(c.clone(), true);
        let sent = server.deliver(&a, "PING", true, &extra);

        assert_eq!(sent, 2);
        assert_eq!(server.take_output(&a), vec!["PING\r\n"]);
        assert!(server.take_output(&b).is_empty());
        assert_eq!(server.take_output(&c), vec!["PING\r\n"]);
    }

    #[test]
    fn test_unregistered_origin_sends_nothing() {
        let mut server = server();
        let a = server.accept("10.0.0.1".parse().unwrap(), None, None, Utc::now()).unwrap();
        let b = connect(&mut server, "10.0.0.2", "bob");
        server.groups_mut().join("#one", &a);
        server.groups_mut().join("#one", &b);

        assert_eq!(server.write_common(&a, "NOTICE x"), 0);
        assert!(server.take_output(&b).is_empty());
    }

    #[test]
    fn test_host_cycle() {
        let mut server = server();
        let a = connect(&mut server, "10.0.0.1", "alice");
        let b = connect(&mut server, "10.0.0.2", "bob");
        server.groups_mut().join_with_prefix("#one", &a, "o");
        server.groups_mut().join("#one", &b);
        server.groups_mut().join("#two", &a);
        server.groups_mut().join("#two", &b);

        assert!(server.change_displayed_host(&a, "cloak.example"));
        assert_eq!(
            server.take_output(&b),
            vec![
                ":alice!unknown@10.0.0.1 QUIT :Changing host\r\n",
                ":alice!unknown@cloak.example JOIN #one\r\n",
                ":alice!unknown@cloak.example MODE #one +o alice\r\n",
                ":alice!unknown@cloak.example JOIN #two\r\n",
            ]
        );
        assert_eq!(
            server.take_output(&a),
            vec![":irc.example.net 396 alice cloak.example :is now your displayed host\r\n"]
        );
    }

    #[test]
    fn test_host_cycle_skips_silenced_recipient() {
        struct Silence(Uid);

        impl Hooks for Silence {
            fn on_build_neighbor_list(&self, _session: &Session, neighbors: &mut Neighbors) {
                neighbors.exceptions.insert(self.0.clone(), false);
            }
        }

        let mut server = server();
        let a = connect(&mut server, "10.0.0.1", "alice");
        let b = connect(&mut server, "10.0.0.2", "bob");
        let c = connect(&mut server, "10.0.0.3", "carol");
        for group in ["#one", "#two"] {
            for uid in [&a, &b, &c] {
                server.groups_mut().join(group, uid);
            }
        }
        let mut server = server.with_hooks(Box::new(Silence(b.clone())));

        assert!(server.change_ident(&a, "al"));
        assert!(server.take_output(&b).is_empty());
        assert_eq!(
            server.take_output(&c),
            vec![
                ":alice!unknown@10.0.0.1 QUIT :Changing ident\r\n",
                ":alice!al@10.0.0.1 JOIN #one\r\n",
                ":alice!al@10.0.0.1 JOIN #two\r\n",
            ]
        );
    }

    #[test]
    fn test_quit_text_for_operators() {
        let mut server = server();
        let a = connect(&mut server, "10.0.0.1", "alice");
        let b = connect(&mut server, "10.0.0.2", "bob");
        let c = connect(&mut server, "10.0.0.3", "carol");
        for uid in [&a, &b, &c] {
            server.groups_mut().join("#one", uid);
        }
        server.elevate(&c, "NetAdmin");
        server.take_output(&c);

        server.quit(&a, "Bye", Some("Killed by admin"));
        let removed = server.cull();
        assert_eq!(removed.len(), 1);

        assert_eq!(server.take_output(&b), vec![":alice!unknown@10.0.0.1 QUIT :Bye\r\n"]);
        assert_eq!(
            server.take_output(&c),
            vec![":alice!unknown@10.0.0.1 QUIT :Killed by admin\r\n"]
        );
        assert!(server.groups().groups_of(&a).is_empty());
    }

    #[test]
    fn test_wallops_and_send_all() {
        let mut server = server();
        let a = connect(&mut server, "10.0.0.1", "alice");
        let b = connect(&mut server, "10.0.0.2", "bob");
        server.session_mut(&b).unwrap().set_mode('w', true);

        assert_eq!(server.wallops(&a, "hello"), 1);
        assert_eq!(server.take_output(&b), vec![":alice!unknown@10.0.0.1 WALLOPS :hello\r\n"]);

        assert_eq!(server.send_all(&a, "NOTICE", "maintenance"), 2);
        assert_eq!(
            server.take_output(&a),
            vec![":alice!unknown@10.0.0.1 NOTICE $* :maintenance\r\n"]
        );
    }

    #[test]
    fn test_shares_group() {
        let mut server = server();
        let a = connect(&mut server, "10.0.0.1", "alice");
        let b = connect(&mut server, "10.0.0.2", "bob");
        assert!(!server.shares_group(&a, &b));
        server.groups_mut().join("#one", &a);
        server.groups_mut().join("#ONE", &b);
        assert!(server.shares_group(&a, &b));
    }
}
