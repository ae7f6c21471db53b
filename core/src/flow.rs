//! Inbound flow control
//!
//! Lines are taken from a session's receive buffer and handed to the command
//! dispatcher while the session's penalty and send queue allow. A session
//! that is not exempt and exceeds its class receive ceiling is torn down.

use crate::groups::{GroupView, MemoryGroups};
use crate::server::Server;
use crate::session::FlowState;
use crate::{Error, Result};

/// Penalty at which no further lines are processed until it decays
pub const PENALTY_CEILING: i32 = 10;

/// Executes one protocol line on behalf of a session
pub trait CommandDispatcher<G: GroupView = MemoryGroups> {
    fn dispatch(&mut self, server: &mut Server<G>, uid: &str, line: &str);
}

impl<G, F> CommandDispatcher<G> for F
where
    G: GroupView,
    F: FnMut(&mut Server<G>, &str, &str),
{
    fn dispatch(&mut self, server: &mut Server<G>, uid: &str, line: &str) {
        self(server, uid, line)
    }
}

impl<G: GroupView> Server<G> {
    /// Buffer bytes read from the transport.
    ///
    /// A session that is not exempt and goes over its class receive ceiling
    /// is marked quitting and `QuotaExceeded` is returned.
    pub fn receive(&mut self, uid: &str, data: &[u8]) -> Result<()> {
        let session = self
            .directory
            .get_mut(uid)
            .ok_or_else(|| Error::UnknownSession(uid.to_string()))?;
        if session.is_quitting() {
            return Ok(());
        }
        session.append_input(data);

        let limit = session.class().map(|c| c.handle().read().recvq);
        match limit {
            Some(limit) if !session.is_flood_exempt() && session.recvq_size() > limit => {
                tracing::warn!(
                    "User {} RecvQ of {} exceeds connect class maximum of {}",
                    session.nick(),
                    session.recvq_size(),
                    limit
                );
                self.stats.record_quota_disconnect();
                self.quit(uid, "RecvQ exceeded", None);
                Err(Error::QuotaExceeded {
                    reason: "RecvQ exceeded".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Process buffered input for one session.
    ///
    /// Stops early once the session is quitting, its penalty reaches
    /// [`PENALTY_CEILING`] or its send queue reaches the soft limit. If it
    /// stopped on a full send queue with no penalty, one point of penalty is
    /// added so the loop yields until output drains.
    pub fn on_data_ready(
        &mut self,
        uid: &str,
        dispatcher: &mut dyn CommandDispatcher<G>,
    ) -> FlowState {
        let Some(session) = self.directory.get(uid) else {
            return FlowState::Idle;
        };
        if session.is_quitting() {
            return session.flow_state();
        }

        let exempt = session.is_flood_exempt();
        let Some(class) = session.class_snapshot() else {
            return session.flow_state();
        };

        if !exempt && session.recvq_size() > class.recvq {
            tracing::warn!(
                "User {} RecvQ of {} exceeds connect class maximum of {}",
                session.nick(),
                session.recvq_size(),
                class.recvq
            );
            self.stats.record_quota_disconnect();
            self.quit(uid, "RecvQ exceeded", None);
            return FlowState::Idle;
        }

        let sendq_max = if exempt { usize::MAX } else { class.sendq_soft };

        loop {
            let Some(session) = self.directory.get_mut(uid) else {
                return FlowState::Idle;
            };
            if session.is_quitting()
                || session.penalty() >= PENALTY_CEILING
                || session.sendq_size() >= sendq_max
            {
                break;
            }

            let Some((line, consumed)) = session.recvq_mut().extract_line() else {
                session.set_flow_state(FlowState::Idle);
                return FlowState::Idle;
            };
            session.record_input(consumed);
            session.set_flow_state(FlowState::Draining);
            self.stats.record_message_received(consumed);

            dispatcher.dispatch(self, uid, &line);
        }

        let Some(session) = self.directory.get_mut(uid) else {
            return FlowState::Idle;
        };
        if session.penalty() == 0 && session.sendq_size() >= sendq_max {
            session.increase_penalty(1);
            session.set_flow_state(FlowState::Blocked);
        }
        session.flow_state()
    }
}
