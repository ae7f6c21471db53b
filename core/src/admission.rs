//! Admission control
//!
//! Decides which connect class a connection belongs to and whether it may stay.
//! Classes are scanned in configuration order and the first one whose host,
//! port and occupancy fit wins, whether it allows or denies.

use crate::config::ClassKind;
use crate::connect_class::{ClassBinding, ClassHandle, ClassRegistry, ConnectClass};
use crate::error::{AdmissionError, LimitScope};
use crate::groups::GroupView;
use crate::matching::match_cidr;
use crate::numeric::NumericReply;
use crate::server::{Server, VERSION};
use crate::session::{seconds_after, RegistrationState, Session};
use crate::uid::Uid;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;

/// What is known about a connection when it is classified
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub addr: IpAddr,
    /// Resolved host, or the address text when there is none
    pub host: &'a str,
    /// Local port the connection arrived on
    pub port: Option<u16>,
}

impl<'a> Candidate<'a> {
    pub fn new(addr: IpAddr, host: &'a str, port: Option<u16>) -> Self {
        Self { addr, host, port }
    }
}

fn class_fits(class: &ConnectClass, candidate: &Candidate<'_>, is_current: bool) -> bool {
    if !class.host.is_empty() {
        let ip = candidate.addr.to_string();
        if !match_cidr(&ip, &class.host) && !match_cidr(candidate.host, &class.host) {
            return false;
        }
    }

    // The session's own slot does not count against the class it already holds
    let occupancy = class.occupancy().saturating_sub(usize::from(is_current));
    if class.limit != 0 && occupancy >= class.limit {
        return false;
    }

    if let Some(port) = class.port {
        if candidate.port != Some(port) {
            return false;
        }
    }

    true
}

/// Find the class for `candidate`.
///
/// An explicit class name is looked up directly, ignoring occupancy and port.
/// Otherwise the first fitting class is returned; it may be a deny class.
pub fn select(
    registry: &ClassRegistry,
    candidate: &Candidate<'_>,
    explicit: Option<&str>,
    current: Option<&ClassHandle>,
) -> Option<ClassHandle> {
    if let Some(name) = explicit {
        let found = registry.find(name);
        if found.is_none() {
            tracing::debug!("Explicit connect class {} does not exist", name);
        }
        return found;
    }

    for handle in registry.iter() {
        let is_current = current.map_or(false, |c| Arc::ptr_eq(c, handle));
        let class = handle.read();
        if class_fits(&class, candidate, is_current) {
            tracing::debug!(
                "Connection from {} matches class {}",
                candidate.host,
                class.name
            );
            return Some(Arc::clone(handle));
        }
    }

    None
}

/// Like [`select`], but a deny class or no class at all is a refusal
pub fn classify(
    registry: &ClassRegistry,
    candidate: &Candidate<'_>,
    explicit: Option<&str>,
    current: Option<&ClassHandle>,
) -> std::result::Result<ClassHandle, AdmissionError> {
    let handle = select(registry, candidate, explicit, current).ok_or(AdmissionError::NoClass)?;
    let class = handle.read();
    if class.kind == ClassKind::Deny {
        return Err(AdmissionError::Denied {
            class: class.name.clone(),
        });
    }
    drop(class);
    Ok(handle)
}

/// Check a class against the per-address session counts, which must include
/// the session being checked
pub fn check_class(
    class: &ConnectClass,
    local_count: usize,
    global_count: usize,
) -> std::result::Result<(), AdmissionError> {
    if class.kind == ClassKind::Deny {
        return Err(AdmissionError::Denied {
            class: class.name.clone(),
        });
    }

    if class.max_local != 0 && local_count > class.max_local {
        return Err(AdmissionError::LimitExceeded {
            scope: LimitScope::Local,
            limit: class.max_local,
        });
    }

    if class.max_global != 0 && global_count > class.max_global {
        return Err(AdmissionError::LimitExceeded {
            scope: LimitScope::Global,
            limit: class.max_global,
        });
    }

    Ok(())
}

impl<G: GroupView> Server<G> {
    /// Admit a new local connection.
    ///
    /// On refusal nothing is registered; the caller writes
    /// [`AdmissionError::rejection_line`] and closes the socket.
    pub fn accept(
        &mut self,
        addr: IpAddr,
        local_port: Option<u16>,
        explicit_class: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Uid> {
        let host = addr.to_string();
        let candidate = Candidate::new(addr, &host, local_port);

        let handle = classify(&self.classes, &candidate, explicit_class, None).map_err(|e| {
            tracing::info!("Refused connection from {}: {}", host, e);
            Error::from(e)
        })?;

        check_class(
            &handle.read(),
            self.directory.local_clone_count(addr) + 1,
            self.directory.global_clone_count(addr) + 1,
        )
        .map_err(|e| {
            tracing::info!("Refused connection from {}: {}", host, e);
            Error::from(e)
        })?;

        let directory = &self.directory;
        let uid = self
            .uids
            .next_free(|uid| directory.contains(uid))
            .ok_or_else(|| Error::Generic("No free session identifiers".to_string()))?;
        let mut session =
            Session::new_local(uid.clone(), addr, local_port, &self.config.server.name, now);
        let binding = ClassBinding::acquire(&handle);
        let ping = binding.snapshot().ping_interval;
        session.bind_class(binding);
        let first_ping = ping.saturating_add(self.config.server.dns_timeout);
        session.set_next_ping(seconds_after(now, first_ping));

        self.directory.register(session)?;
        tracing::debug!("Accepted connection {} from {}", uid, host);
        Ok(uid)
    }

    /// Record the password given with PASS
    pub fn supply_password(&mut self, uid: &str, password: &str) -> Result<()> {
        let session = self
            .directory
            .get_mut(uid)
            .ok_or_else(|| Error::UnknownSession(uid.to_string()))?;
        session.set_password(password);
        if session.state() == RegistrationState::Unregistered {
            session.set_state(RegistrationState::PasswordPending);
        }
        Ok(())
    }

    /// Complete registration.
    ///
    /// The session is classified again now that its host is known, checked
    /// against the class limits and password, then welcomed. Any refusal
    /// marks the session quitting with the refusal as reason.
    pub fn full_connect(&mut self, uid: &str, now: DateTime<Utc>) -> Result<()> {
        let session = self
            .directory
            .get(uid)
            .ok_or_else(|| Error::UnknownSession(uid.to_string()))?;
        if session.is_quitting() || session.is_registered() {
            return Ok(());
        }

        let addr = session.addr();
        let host = session.host().to_string();
        let current = session.class().map(|c| Arc::clone(c.handle()));
        let candidate = Candidate::new(addr, &host, session.local_port());

        if let Some(found) = select(&self.classes, &candidate, None, current.as_ref()) {
            let same = current.as_ref().map_or(false, |c| Arc::ptr_eq(c, &found));
            if !same {
                if let Some(session) = self.directory.get_mut(uid) {
                    tracing::debug!(
                        "Session {} moves to class {}",
                        uid,
                        found.read().name
                    );
                    drop(session.release_class());
                    session.bind_class(ClassBinding::acquire(&found));
                }
            }
        }

        let Some(class) = self.directory.get(uid).and_then(Session::class_snapshot) else {
            self.quit(uid, &AdmissionError::NoClass.to_string(), None);
            return Err(AdmissionError::NoClass.into());
        };

        let checked = check_class(
            &class,
            self.directory.local_clone_count(addr),
            self.directory.global_clone_count(addr),
        );
        if let Err(e) = checked {
            self.quit(uid, &e.to_string(), None);
            return Err(e.into());
        }

        if let Some(expected) = class.password.as_deref() {
            let given = self.directory.get(uid).and_then(Session::password);
            if given != Some(expected) {
                let e = AdmissionError::PasswordRequired;
                self.quit(uid, &e.to_string(), None);
                return Err(e.into());
            }
        }

        self.send_welcome(uid);

        if let Some(session) = self.directory.get_mut(uid) {
            session.set_state(RegistrationState::Registered);
            session.set_next_ping(seconds_after(now, class.ping_interval));
        }
        self.directory.mark_registered(uid);
        self.stats.record_connection();

        if let Some(session) = self.directory.get(uid) {
            tracing::info!(
                "Client connecting on port {}: {} [{}] [{}]",
                session.local_port().map_or_else(|| "-".to_string(), |p| p.to_string()),
                session.full_real_host(),
                session.addr(),
                session.gecos()
            );
            self.hooks.on_user_connect(session);
        }
        Ok(())
    }

    fn send_welcome(&mut self, uid: &str) {
        let Some(session) = self.directory.get(uid) else {
            return;
        };
        let nick = session.nick().to_string();
        let real_host = session.full_real_host().to_string();
        let network = self.config.server.network.clone();
        let server = self.config.server.name.clone();

        self.write_serv(uid, &format!("NOTICE Auth :Welcome to \x02{}\x02!", network));
        self.write_numeric(
            uid,
            NumericReply::RplWelcome,
            &format!("{} :Welcome to the {} IRC Network {}", nick, network, real_host),
        );
        self.write_numeric(
            uid,
            NumericReply::RplYourHost,
            &format!("{} :Your host is {}, running version {}", nick, server, VERSION),
        );
        self.write_numeric(
            uid,
            NumericReply::RplCreated,
            &format!(
                "{} :This server was created {}",
                nick,
                self.created.format("%H:%M:%S %b %d %Y")
            ),
        );
        self.write_numeric(
            uid,
            NumericReply::RplMyInfo,
            &format!("{} {} {} iosw {}", nick, server, VERSION, "ntimsklv"),
        );
        self.write_numeric(
            uid,
            NumericReply::RplYourId,
            &format!("{} {} :your unique ID", nick, uid),
        );
        self.show_motd(uid);
    }
}
