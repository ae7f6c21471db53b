//! Connect class registry
//!
//! Connect classes are the admission and quota policies a session is bound to.
//! The registry keeps them in configuration order, which is also match
//! precedence. Classes are shared: every session bound to a class holds a
//! [`ClassBinding`], and the binding count is the class occupancy.

use crate::config::{ClassConfig, ClassKind};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;

const DEFAULT_SENDQ_SOFT: usize = 8192;
const DEFAULT_SENDQ_HARD: usize = 262_144;
const DEFAULT_RECVQ: usize = 8192;
const DEFAULT_PING_INTERVAL: u64 = 120;
const DEFAULT_REGISTRATION_TIMEOUT: u64 = 90;
const DEFAULT_MAX_CHANNELS: usize = 20;

/// Longest ping interval or registration timeout accepted from configuration
pub const MAX_TIMER_SECS: u64 = 7 * 24 * 60 * 60;

/// A resolved connect class
#[derive(Debug, Clone)]
pub struct ConnectClass {
    /// Class name
    pub name: String,
    /// Allow or deny
    pub kind: ClassKind,
    /// Host or CIDR pattern, empty matches everything
    pub host: String,
    /// Local port the peer must have connected to
    pub port: Option<u16>,
    /// Connection password
    pub password: Option<String>,
    /// Sendq size above which input processing pauses
    pub sendq_soft: usize,
    /// Sendq size above which the session is disconnected
    pub sendq_hard: usize,
    /// Maximum buffered input
    pub recvq: usize,
    /// Seconds between pings
    pub ping_interval: u64,
    /// Seconds an unregistered session may stay connected
    pub registration_timeout: u64,
    /// Maximum local sessions per address, 0 for unlimited
    pub max_local: usize,
    /// Maximum network-wide sessions per address, 0 for unlimited
    pub max_global: usize,
    /// Maximum sessions bound to this class, 0 for unlimited
    pub limit: usize,
    /// Maximum channels a member of this class may join
    pub max_channels: usize,
    /// Sessions currently bound to this class
    occupancy: usize,
}

/// Shared handle to a connect class. Reloads update the class behind the
/// handle, so bound sessions see new limits immediately.
pub type ClassHandle = Arc<RwLock<ConnectClass>>;

impl ConnectClass {
    /// Create a class with default limits
    pub fn new(name: &str, kind: ClassKind, host: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            host: host.to_string(),
            port: None,
            password: None,
            sendq_soft: DEFAULT_SENDQ_SOFT,
            sendq_hard: DEFAULT_SENDQ_HARD,
            recvq: DEFAULT_RECVQ,
            ping_interval: DEFAULT_PING_INTERVAL,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            max_local: 0,
            max_global: 0,
            limit: 0,
            max_channels: DEFAULT_MAX_CHANNELS,
            occupancy: 0,
        }
    }

    /// Resolve a configuration block, inheriting unset fields from `parent`
    pub fn from_config(config: &ClassConfig, parent: Option<&ConnectClass>) -> Self {
        let base = match parent {
            Some(parent) => ConnectClass {
                occupancy: 0,
                ..parent.clone()
            },
            None => ConnectClass::new(&config.name, config.kind, ""),
        };

        Self {
            name: config.name.clone(),
            kind: config.kind,
            host: config.host.clone().unwrap_or_default(),
            port: config.port.or(base.port),
            password: config.password.clone().or(base.password),
            sendq_soft: config.sendq_soft.unwrap_or(base.sendq_soft),
            sendq_hard: config.sendq_hard.unwrap_or(base.sendq_hard),
            recvq: config.recvq.unwrap_or(base.recvq),
            ping_interval: timer_or(
                &config.name,
                "ping_interval",
                config.ping_interval,
                base.ping_interval,
            ),
            registration_timeout: timer_or(
                &config.name,
                "registration_timeout",
                config.registration_timeout,
                base.registration_timeout,
            ),
            max_local: config.max_local.unwrap_or(base.max_local),
            max_global: config.max_global.unwrap_or(base.max_global),
            limit: config.limit.unwrap_or(base.limit),
            max_channels: config.max_channels.unwrap_or(base.max_channels),
            occupancy: 0,
        }
    }

    /// Copy every policy field from `src`, keeping the current occupancy
    pub fn update(&mut self, src: &ConnectClass) {
        let occupancy = self.occupancy;
        *self = src.clone();
        self.occupancy = occupancy;
    }

    /// Sessions currently bound to this class
    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    /// Whether the class limit leaves no room for another session
    pub fn is_full(&self) -> bool {
        self.limit != 0 && self.occupancy >= self.limit
    }
}

/// A configured timer, or `fallback` when it is unset or out of range
fn timer_or(class: &str, field: &str, value: Option<u64>, fallback: u64) -> u64 {
    match value {
        Some(secs) if secs > MAX_TIMER_SECS => {
            tracing::warn!(
                "Class {} {} of {}s is out of range, using {}s",
                class,
                field,
                secs,
                fallback
            );
            fallback
        }
        Some(secs) => secs,
        None => fallback,
    }
}

/// A session's hold on its connect class.
///
/// Creating a binding increments the class occupancy and dropping it
/// decrements it, so a session can only ever release its class once.
#[derive(Debug)]
pub struct ClassBinding {
    class: ClassHandle,
}

impl ClassBinding {
    /// Bind to `class`, taking one unit of occupancy
    pub fn acquire(class: &ClassHandle) -> Self {
        class.write().occupancy += 1;
        Self {
            class: Arc::clone(class),
        }
    }

    /// The bound class
    pub fn handle(&self) -> &ClassHandle {
        &self.class
    }

    /// Snapshot of the bound class
    pub fn snapshot(&self) -> ConnectClass {
        self.class.read().clone()
    }

    /// Name of the bound class
    pub fn name(&self) -> String {
        self.class.read().name.clone()
    }

    /// Whether this binding refers to `class`
    pub fn is(&self, class: &ClassHandle) -> bool {
        Arc::ptr_eq(&self.class, class)
    }
}

impl Drop for ClassBinding {
    fn drop(&mut self) {
        let mut class = self.class.write();
        class.occupancy = class.occupancy.saturating_sub(1);
    }
}

/// Statistics for a connect class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassStats {
    /// Class name
    pub class_name: String,
    /// Allow or deny
    pub kind: ClassKind,
    /// Sessions bound to the class
    pub occupancy: usize,
    /// Configured class limit, 0 for unlimited
    pub limit: usize,
}

/// Ordered set of connect classes
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<ClassHandle>,
}

impl ClassRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration blocks
    pub fn from_config(configs: &[ClassConfig]) -> Result<Self> {
        let mut registry = Self::new();
        registry.reload(configs)?;
        Ok(registry)
    }

    /// Append a class at the lowest precedence
    pub fn push(&mut self, class: ConnectClass) -> ClassHandle {
        let handle = Arc::new(RwLock::new(class));
        self.classes.push(Arc::clone(&handle));
        handle
    }

    /// Replace the class list from configuration.
    ///
    /// A class whose name already exists is updated in place; sessions bound
    /// to it keep their binding. Classes missing from the new configuration
    /// leave the registry but live on until their last session releases them.
    pub fn reload(&mut self, configs: &[ClassConfig]) -> Result<()> {
        let mut resolved: Vec<ConnectClass> = Vec::with_capacity(configs.len());

        for config in configs {
            let parent = match &config.parent {
                Some(name) => Some(
                    resolved
                        .iter()
                        .find(|c| &c.name == name)
                        .ok_or_else(|| {
                            Error::Config(format!(
                                "Class {} inherits from unknown class {}",
                                config.name, name
                            ))
                        })?,
                ),
                None => None,
            };
            let class = ConnectClass::from_config(config, parent);
            resolved.push(class);
        }

        let mut classes = Vec::with_capacity(resolved.len());
        for class in resolved {
            match self.find(&class.name) {
                Some(existing) => {
                    existing.write().update(&class);
                    tracing::debug!("Updated connect class {} in place", class.name);
                    classes.push(existing);
                }
                None => {
                    tracing::debug!("Added connect class {}", class.name);
                    classes.push(Arc::new(RwLock::new(class)));
                }
            }
        }

        self.classes = classes;
        tracing::info!("Loaded {} connect classes", self.classes.len());
        Ok(())
    }

    /// Find a class by exact name
    pub fn find(&self, name: &str) -> Option<ClassHandle> {
        self.classes
            .iter()
            .find(|class| class.read().name == name)
            .cloned()
    }

    /// Classes in precedence order
    pub fn iter(&self) -> impl Iterator<Item = &ClassHandle> {
        self.classes.iter()
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the registry has no classes
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Get all class statistics
    pub fn get_all_stats(&self) -> Vec<ClassStats> {
        self.classes
            .iter()
            .map(|class| {
                let class = class.read();
                ClassStats {
                    class_name: class.name.clone(),
                    kind: class.kind,
                    occupancy: class.occupancy,
                    limit: class.limit,
                }
            })
            .collect()
    }
}
