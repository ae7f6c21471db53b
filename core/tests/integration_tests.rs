//! Integration tests for the fanoutd session core

use chrono::{Duration, Utc};
use fanoutd_core::*;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

fn addr(n: u32) -> IpAddr {
    IpAddr::from([10, 0, (n >> 8) as u8, n as u8])
}

fn small_queues(soft: usize, hard: usize) -> Config {
    let mut config = Config::default();
    config.classes[0].sendq_soft = Some(soft);
    config.classes[0].sendq_hard = Some(hard);
    config
}

fn connect(server: &mut Server, n: u32, nick: &str) -> Uid {
    let now = Utc::now();
    let uid = server.accept(addr(n), Some(6667), None, now).unwrap();
    assert!(server.change_nick(&uid, nick));
    server.full_connect(&uid, now).unwrap();
    server.take_output(&uid);
    uid
}

#[test]
fn test_identifiers_are_unique() {
    let mut server = Server::new(Config::default()).unwrap();
    let mut seen = HashSet::new();

    for n in 0..500 {
        let uid = server.accept(addr(n), None, None, Utc::now()).unwrap();
        assert_eq!(uid.len(), 9);
        assert!(uid.starts_with("001"));
        assert!(seen.insert(uid));
    }
    assert_eq!(server.directory().len(), 500);
    assert_eq!(server.directory().unregistered_count(), 500);
}

#[test]
fn test_duplicate_identifier_is_refused() {
    let mut server = Server::new(Config::default()).unwrap();
    let now = Utc::now();
    server
        .introduce_remote(
            "002AAAAAA",
            "bob",
            "bob",
            "remote.example",
            "remote.example",
            "Bob",
            addr(1),
            "hub.example",
            now,
        )
        .unwrap();

    let err = server
        .introduce_remote(
            "002AAAAAA",
            "carol",
            "c",
            "remote.example",
            "remote.example",
            "Carol",
            addr(2),
            "hub.example",
            now,
        )
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateIdentifier(_)));
    assert_eq!(server.directory().find_nick("BOB").unwrap().uid(), "002AAAAAA");
}

#[test]
fn test_fanout_is_exactly_once_across_groups() {
    let mut server = Server::new(Config::default()).unwrap();
    let origin = connect(&mut server, 1, "alice");
    let peers: Vec<Uid> = (2..6).map(|n| connect(&mut server, n, &format!("peer{}", n))).collect();
    let outsider = connect(&mut server, 10, "outsider");

    for group in ["#g1", "#g2", "#g3"] {
        server.groups_mut().join(group, &origin);
        for peer in &peers {
            server.groups_mut().join(group, peer);
        }
    }

    let sent = server.write_common(&origin, "TOPIC :everyone");
    assert_eq!(sent, peers.len() + 1);

    for uid in peers.iter().chain(std::iter::once(&origin)) {
        assert_eq!(server.take_output(uid).len(), 1, "{} got a duplicate", uid);
    }
    assert!(server.take_output(&outsider).is_empty());
}

#[test]
fn test_deny_class_before_allow() {
    let mut config = Config::default();
    config.classes.insert(
        0,
        ClassConfig {
            name: "blocked".to_string(),
            kind: ClassKind::Deny,
            host: Some("10.0.0.0/24".to_string()),
            ..ClassConfig::default()
        },
    );
    let mut server = Server::new(config).unwrap();

    let err = server.accept(addr(5), None, None, Utc::now()).unwrap_err();
    match err {
        Error::Admission(e) => {
            assert_eq!(
                e.rejection_line("10.0.0.5"),
                "ERROR :Closing link: (10.0.0.5) [Unauthorised connection]"
            );
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(server.directory().is_empty());

    // Outside the deny range the allow class matches
    assert!(server.accept(addr(300), None, None, Utc::now()).is_ok());
}

#[test]
fn test_allow_class_before_deny() {
    let mut config = Config::default();
    config.classes.push(ClassConfig {
        name: "blocked".to_string(),
        kind: ClassKind::Deny,
        host: Some("10.0.0.0/24".to_string()),
        ..ClassConfig::default()
    });
    let mut server = Server::new(config).unwrap();

    let uid = server.accept(addr(5), None, None, Utc::now()).unwrap();
    let class = server.session(&uid).unwrap().class().unwrap().name();
    assert_eq!(class, "main");
}

#[test]
fn test_hard_sendq_ceiling_tears_down() {
    let mut server = Server::new(Config::default()).unwrap();
    let alice = connect(&mut server, 1, "alice");
    let bob = connect(&mut server, 2, "bob");
    server.rehash(small_queues(128, 256)).unwrap();
    server.groups_mut().join("#g", &alice);
    server.groups_mut().join("#g", &bob);

    let text = format!("PRIVMSG #g :{}", "x".repeat(100));
    for _ in 0..3 {
        server.write_common_except(&alice, &text);
    }

    let session = server.session(&bob).unwrap();
    assert!(session.is_quitting());
    assert_eq!(session.quit_reason().unwrap().reason, "SendQ exceeded");
    assert_eq!(server.statistics().quota_disconnects, 1);

    let removed = server.cull();
    assert_eq!(removed.len(), 1);
    assert!(server.session(&bob).is_none());
    assert_eq!(server.classes().find("main").unwrap().read().occupancy(), 1);

    // Alice is told about the quit
    let out = server.take_output(&alice);
    assert_eq!(out, vec![":bob!unknown@10.0.0.2 QUIT :SendQ exceeded\r\n"]);
}

#[test]
fn test_exempt_session_ignores_ceilings() {
    let mut server = Server::new(Config::default()).unwrap();
    let alice = connect(&mut server, 1, "alice");
    server.elevate(&alice, "NetAdmin");
    let mut config = small_queues(64, 128);
    config.classes[0].recvq = Some(16);
    server.rehash(config).unwrap();
    assert!(server.is_flood_exempt(&alice));

    for _ in 0..10 {
        server.write_to(&alice, &"y".repeat(60));
    }
    assert!(!server.session(&alice).unwrap().is_quitting());

    server.receive(&alice, &[b'z'; 64]).unwrap();
    let mut dispatcher = |_: &mut Server, _: &str, _: &str| {};
    server.on_data_ready(&alice, &mut dispatcher);
    assert!(!server.session(&alice).unwrap().is_quitting());
}

#[test]
fn test_rename_is_atomic() {
    let mut server = Server::new(Config::default()).unwrap();
    let alice = connect(&mut server, 1, "alice");
    let bob = connect(&mut server, 2, "bob");

    assert!(!server.change_nick(&alice, "BOB"));
    assert_eq!(server.directory().uid_of("bob"), Some(&bob));
    assert_eq!(server.session(&alice).unwrap().nick(), "alice");

    assert!(server.change_nick(&alice, "Alicia"));
    assert!(server.directory().find_nick("alice").is_none());
    assert_eq!(server.directory().uid_of("alicia"), Some(&alice));
    assert_eq!(
        server.take_output(&alice),
        vec![":alice!unknown@10.0.0.1 NICK :Alicia\r\n"]
    );

    // A case-only change keeps the same entry
    assert!(server.change_nick(&alice, "ALICIA"));
    assert_eq!(server.directory().uid_of("alicia"), Some(&alice));
}

#[test]
fn test_elevation_is_idempotent() {
    let mut server = Server::new(Config::default()).unwrap();
    let alice = connect(&mut server, 1, "alice");

    server.elevate(&alice, "NetAdmin");
    let first = server.session(&alice).unwrap().privileges().clone();
    server.elevate(&alice, "NetAdmin");
    let second = server.session(&alice).unwrap().privileges().clone();

    assert_eq!(first, second);
    assert_eq!(second.oper_type(), Some("NetAdmin"));
    assert!(server.session(&alice).unwrap().has_mode('o'));
}

#[test]
fn test_elevation_leaves_no_residue() {
    let mut config = Config::default();
    config.oper_types.push(OperTypeConfig {
        name: "Helper".to_string(),
        classes: "OperChat".to_string(),
    });
    let mut server = Server::new(config).unwrap();
    let alice = connect(&mut server, 1, "alice");
    let bob = connect(&mut server, 2, "bob");

    server.elevate(&alice, "NetAdmin");
    server.elevate(&alice, "Helper");
    server.elevate(&bob, "Helper");

    let alice_session = server.session(&alice).unwrap();
    assert_eq!(alice_session.privileges(), server.session(&bob).unwrap().privileges());
    assert!(!alice_session.has_command_permission("KILL"));
    assert!(alice_session.has_command_permission("WALLOPS"));
}

#[test]
fn test_unknown_oper_type_fails_closed() {
    let mut server = Server::new(Config::default()).unwrap();
    let alice = connect(&mut server, 1, "alice");

    server.elevate(&alice, "Ghost");
    let session = server.session(&alice).unwrap();
    assert!(session.is_elevated());
    assert!(!session.has_command_permission("KILL"));
    assert!(!session.has_privilege("users/auspex"));

    server.take_output(&alice);
    assert!(!server.has_privilege_noisy(&alice, "users/auspex"));
    assert_eq!(
        server.take_output(&alice),
        vec![":irc.example.net NOTICE alice :Oper type Ghost has no privileges on this server\r\n"]
    );
}

#[test]
fn test_stamp_wraparound() {
    let mut server = Server::new(Config::default()).unwrap();
    let alice = connect(&mut server, 1, "alice");
    let bob = connect(&mut server, 2, "bob");
    server.groups_mut().join("#g", &alice);
    server.groups_mut().join("#g", &bob);

    server.set_stamp_counter(0);
    assert_eq!(server.write_common_except(&alice, "PING :one"), 1);
    assert_eq!(server.stamp_counter(), 1);

    // The next fanout wraps to stamp 1, which bob already carries
    server.set_stamp_counter(u32::MAX);
    assert_eq!(server.write_common_except(&alice, "PING :two"), 1);
    assert_eq!(server.stamp_counter(), 1);
    assert_eq!(server.take_output(&bob).len(), 2);
}

/// Three sessions sharing three groups, one fanout of each kind, starting
/// from the given stamp counter. Returns every session's output.
fn three_group_run(counter: u32) -> Vec<Vec<String>> {
    let mut server = Server::new(Config::default()).unwrap();
    let uids: Vec<Uid> = (1..=4).map(|n| connect(&mut server, n, &format!("user{}", n))).collect();
    for group in ["#a", "#b", "#c"] {
        for uid in &uids[..3] {
            server.groups_mut().join(group, uid);
        }
    }
    server.groups_mut().join("#c", &uids[3]);

    server.set_stamp_counter(counter);
    server.write_common(&uids[0], "PRIVMSG #a :one");
    server.write_common_except(&uids[1], "PRIVMSG #b :two");
    server.change_ident(&uids[2], "cycled");
    server.write_common(&uids[3], "PRIVMSG #c :three");

    uids.iter().map(|uid| server.take_output(uid)).collect()
}

#[test]
fn test_wrapped_counter_matches_fresh_counter() {
    let fresh = three_group_run(0);
    // Two messages, a quit with three rejoins, one more message
    assert_eq!(fresh[0].len(), 7);
    // Only #c is shared with the cycled session
    assert_eq!(fresh[3].len(), 5);
    assert_eq!(three_group_run(u32::MAX), fresh);
    assert_eq!(three_group_run(u32::MAX - 1), fresh);
}

#[test]
fn test_cull_is_exactly_once() {
    let mut server = Server::new(Config::default()).unwrap();
    let alice = connect(&mut server, 1, "alice");
    server.groups_mut().join("#g", &alice);

    server.quit(&alice, "Leaving", None);
    server.quit(&alice, "Again", None);
    assert_eq!(server.session(&alice).unwrap().quit_reason().unwrap().reason, "Leaving");

    let removed = server.cull();
    assert_eq!(removed.len(), 1);
    assert!(server.cull().is_empty());
    assert_eq!(server.classes().find("main").unwrap().read().occupancy(), 0);
    assert_eq!(server.directory().local_clone_count(addr(1)), 0);
    assert!(server.groups().is_empty());
}

#[test]
fn test_rehash_updates_bound_class_in_place() {
    let mut server = Server::new(Config::default()).unwrap();
    let alice = connect(&mut server, 1, "alice");

    server.rehash(small_queues(512, 1024)).unwrap();

    let class = server.session(&alice).unwrap().class_snapshot().unwrap();
    assert_eq!(class.sendq_hard, 1024);
    assert_eq!(class.occupancy(), 1);
}

#[test]
fn test_registration_timeout() {
    let mut server = Server::new(Config::default()).unwrap();
    let now = Utc::now();
    let waiting = server.accept(addr(1), None, None, now).unwrap();
    let done = connect(&mut server, 2, "bob");

    assert!(server.expired_registrations(now).is_empty());
    let later = now + Duration::seconds(91);
    assert_eq!(server.expired_registrations(later), vec![waiting]);
    assert!(!server.expired_registrations(later).contains(&done));
}

#[test]
fn test_hooks_veto_nick_change() {
    struct NoGuests;

    impl Hooks for NoGuests {
        fn on_pre_nick(&self, _session: &Session, new_nick: &str) -> ModResult {
            if new_nick.starts_with("Guest") {
                ModResult::Deny
            } else {
                ModResult::Passthru
            }
        }
    }

    let mut server = Server::new(Config::default())
        .unwrap()
        .with_hooks(Box::new(NoGuests));
    let alice = connect(&mut server, 1, "alice");

    assert!(!server.change_nick(&alice, "Guest123"));
    assert_eq!(server.session(&alice).unwrap().nick(), "alice");
    assert_eq!(server.statistics().collisions, 1);
}

#[test]
fn test_neighbor_hook_adds_recipient() {
    struct AlwaysTell(Uid);

    impl Hooks for AlwaysTell {
        fn on_build_neighbor_list(&self, _session: &Session, neighbors: &mut Neighbors) {
            neighbors.exceptions.insert(self.0.clone(), true);
        }
    }

    let mut server = Server::new(Config::default()).unwrap();
    let alice = connect(&mut server, 1, "alice");
    let watcher = connect(&mut server, 2, "watcher");
    let mut server = server.with_hooks(Box::new(AlwaysTell(watcher.clone())));

    assert_eq!(server.deliver(&alice, "AWAY", false, &BTreeMap::new()), 1);
    assert_eq!(server.take_output(&watcher), vec!["AWAY\r\n"]);
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fanoutd.toml");

    let mut config = Config::default();
    config.server.motd = vec!["Welcome".to_string()];
    config.to_file(&path).unwrap();

    let loaded = Config::from_file(&path).unwrap();
    assert_eq!(loaded.server.motd, vec!["Welcome"]);
    assert_eq!(loaded.classes.len(), 1);
    assert_eq!(loaded.oper_types[0].name, "NetAdmin");
    assert!(Server::new(loaded).is_ok());
}
