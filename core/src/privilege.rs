//! Operator privileges
//!
//! A session is either unprivileged or elevated to an operator type. The
//! grants of an elevated session are rebuilt from the operator policy tables
//! every time it is elevated; they are absent when the operator type is not
//! known locally (a remote server may know types this server does not).

use crate::config::{OperClassConfig, OperTypeConfig};
use crate::modes::{ModeSet, MODE_OPER};
use rustc_hash::FxHashMap;
use std::collections::HashSet;

/// Wildcard token granting everything in a list
pub const WILDCARD: &str = "*";

/// Which mode namespace a permission check is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeType {
    User,
    Channel,
}

/// What an operator type allows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grants {
    /// Administrative command names
    pub commands: HashSet<String>,
    /// Privilege strings
    pub privileges: HashSet<String>,
    /// User mode letters the operator may set
    pub user_modes: ModeSet,
    /// Channel mode letters the operator may set
    pub chan_modes: ModeSet,
}

impl Grants {
    /// Check a command name, honouring the wildcard
    pub fn allows_command(&self, command: &str) -> bool {
        self.commands.contains(command) || self.commands.contains(WILDCARD)
    }

    /// Check a privilege string, honouring the wildcard
    pub fn allows_privilege(&self, privilege: &str) -> bool {
        self.privileges.contains(privilege) || self.privileges.contains(WILDCARD)
    }

    /// Check a mode letter
    pub fn allows_mode(&self, letter: char, kind: ModeType) -> bool {
        match kind {
            ModeType::User => self.user_modes.contains(letter),
            ModeType::Channel => self.chan_modes.contains(letter),
        }
    }
}

/// Privilege state of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Privileges {
    #[default]
    Unprivileged,
    Elevated {
        /// Operator type name
        oper_type: String,
        /// Grants, absent when the type is unknown to this server
        grants: Option<Grants>,
    },
}

impl Privileges {
    /// Whether the session holds operator status
    pub fn is_elevated(&self) -> bool {
        matches!(self, Privileges::Elevated { .. })
    }

    /// Operator type name, if elevated
    pub fn oper_type(&self) -> Option<&str> {
        match self {
            Privileges::Elevated { oper_type, .. } => Some(oper_type),
            Privileges::Unprivileged => None,
        }
    }

    /// Grants, if elevated with a known type
    pub fn grants(&self) -> Option<&Grants> {
        match self {
            Privileges::Elevated { grants, .. } => grants.as_ref(),
            Privileges::Unprivileged => None,
        }
    }
}

/// Operator types and classes, indexed by name
#[derive(Debug, Clone, Default)]
pub struct OperPolicy {
    types: FxHashMap<String, String>,
    classes: FxHashMap<String, OperClassConfig>,
}

impl OperPolicy {
    /// Build the tables from configuration
    pub fn new(types: &[OperTypeConfig], classes: &[OperClassConfig]) -> Self {
        Self {
            types: types
                .iter()
                .map(|t| (t.name.clone(), t.classes.clone()))
                .collect(),
            classes: classes
                .iter()
                .map(|c| (c.name.clone(), c.clone()))
                .collect(),
        }
    }

    /// Check if an operator type is defined
    pub fn has_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Union the lists of every class the type references.
    ///
    /// Returns `None` for an unknown type. Unknown class names are skipped.
    /// The operator user mode is always granted.
    pub fn resolve(&self, oper_type: &str) -> Option<Grants> {
        let class_list = self.types.get(oper_type)?;

        let mut grants = Grants::default();
        grants.user_modes.insert(MODE_OPER);

        for class_name in class_list.split_whitespace() {
            let Some(class) = self.classes.get(class_name) else {
                tracing::warn!(
                    "Operator type {} references unknown class {}",
                    oper_type,
                    class_name
                );
                continue;
            };

            grants
                .commands
                .extend(class.commands.split_whitespace().map(str::to_string));
            grants
                .privileges
                .extend(class.privs.split_whitespace().map(str::to_string));
            grants
                .user_modes
                .union_with(ModeSet::from_letters(&class.usermodes));
            grants
                .chan_modes
                .union_with(ModeSet::from_letters(&class.chanmodes));
        }

        Some(grants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_resolve_default_netadmin() {
        let config = Config::default();
        let policy = OperPolicy::new(&config.oper_types, &config.oper_classes);
        let grants = policy.resolve("NetAdmin").unwrap();

        assert!(grants.allows_command("KILL"));
        assert!(grants.allows_command("DIE"));
        assert!(!grants.allows_command("NOSUCH"));
        assert!(grants.allows_privilege("users/flood/increased-buffers"));
        assert!(grants.allows_mode('x', ModeType::User));
        assert!(grants.allows_mode('b', ModeType::Channel));
    }

    #[test]
    fn test_wildcard_and_missing_class() {
        let types = vec![OperTypeConfig {
            name: "Helper".to_string(),
            classes: "Everything Missing".to_string(),
        }];
        let classes = vec![OperClassConfig {
            name: "Everything".to_string(),
            commands: "*".to_string(),
            privs: "*".to_string(),
            ..OperClassConfig::default()
        }];
        let policy = OperPolicy::new(&types, &classes);
        let grants = policy.resolve("Helper").unwrap();

        assert!(grants.allows_command("ANYTHING"));
        assert!(grants.allows_privilege("any/priv"));
        // operator mode only, no class grants user modes
        assert_eq!(grants.user_modes.letters(), "o");
        assert!(!grants.allows_mode('b', ModeType::Channel));
    }

    #[test]
    fn test_unknown_type() {
        let policy = OperPolicy::default();
        assert!(policy.resolve("Nobody").is_none());
        assert!(!policy.has_type("Nobody"));
    }

    #[test]
    fn test_privileges_accessors() {
        let privileges = Privileges::Elevated {
            oper_type: "Remote".to_string(),
            grants: None,
        };
        assert!(privileges.is_elevated());
        assert_eq!(privileges.oper_type(), Some("Remote"));
        assert!(privileges.grants().is_none());
        assert!(!Privileges::Unprivileged.is_elevated());
    }
}
