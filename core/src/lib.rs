//! Session core for an IRC daemon
//!
//! This crate provides the per-connection state machine of a chat daemon:
//! admission into connect classes, inbound flow control, operator privilege
//! escalation, multicast fanout to group peers and the session directory.
//! Sockets, command parsing and group (channel) semantics live outside and
//! are reached through [`GroupView`], [`Hooks`] and [`CommandDispatcher`].

pub mod admission;
pub mod buffer;
pub mod config;
pub mod connect_class;
pub mod directory;
pub mod error;
pub mod fanout;
pub mod flow;
pub mod groups;
pub mod hooks;
pub mod matching;
pub mod modes;
pub mod numeric;
pub mod privilege;
pub mod server;
pub mod session;
pub mod statistics;
pub mod uid;

pub use admission::{check_class, classify, select, Candidate};
pub use buffer::{RecvQueue, SendQueue};
pub use config::{ClassConfig, ClassKind, Config, OperClassConfig, OperTypeConfig, ServerConfig};
pub use connect_class::{ClassBinding, ClassHandle, ClassRegistry, ClassStats, ConnectClass};
pub use directory::Directory;
pub use error::{AdmissionError, Error, LimitScope, Result};
pub use fanout::StampCounter;
pub use flow::{CommandDispatcher, PENALTY_CEILING};
pub use groups::{GroupView, MemoryGroups};
pub use hooks::{Hooks, ModResult, Neighbors, NoHooks};
pub use modes::{ModeHandlers, ModeSet, StaticModeHandlers};
pub use numeric::NumericReply;
pub use privilege::{Grants, ModeType, OperPolicy, Privileges};
pub use server::Server;
pub use session::{FlowState, Locality, QuitReason, RegistrationState, Session};
pub use statistics::ServerStatistics;
pub use uid::{Uid, UidGenerator};

/// Re-exports for convenience
pub use tracing::{debug, error, info, warn};
