//! Configuration management

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server information
    #[serde(default)]
    pub server: ServerConfig,
    /// Connect classes, in match precedence order
    #[serde(default, rename = "class")]
    pub classes: Vec<ClassConfig>,
    /// Operator types
    #[serde(default, rename = "oper_type")]
    pub oper_types: Vec<OperTypeConfig>,
    /// Operator classes referenced by operator types
    #[serde(default, rename = "oper_class")]
    pub oper_classes: Vec<OperClassConfig>,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name, used as the origin of numerics and server notices
    pub name: String,
    /// Network name shown in the welcome burst
    pub network: String,
    /// Three character server id, prefix of every locally generated UID
    pub sid: String,
    /// Synthesize QUIT/JOIN/MODE for peers when a host or ident changes
    pub cycle_hosts: bool,
    /// Maximum nickname length
    pub max_nick: usize,
    /// Maximum ident length
    pub max_ident: usize,
    /// Maximum displayed host length
    pub max_host: usize,
    /// Maximum real name length
    pub max_gecos: usize,
    /// Seconds granted for DNS before the first ping is due
    pub dns_timeout: u64,
    /// User mode letters that require operator status
    pub oper_only_user_modes: String,
    /// Server notice mask letters sessions may subscribe to
    pub notice_masks: String,
    /// Message of the day
    pub motd: Vec<String>,
    /// Server rules
    pub rules: Vec<String>,
}

/// Whether a connect class admits or refuses matching peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    #[default]
    Allow,
    Deny,
}

/// Connect class block as written in the configuration file.
///
/// Unset limits fall back to the `parent` class, then to the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassConfig {
    pub name: String,
    #[serde(default)]
    pub kind: ClassKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sendq_soft: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sendq_hard: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recvq: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_local: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_global: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_channels: Option<usize>,
}

/// Operator type: a named bundle of operator classes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperTypeConfig {
    pub name: String,
    /// Space separated operator class names
    #[serde(default)]
    pub classes: String,
}

/// Operator class: the commands, privileges and modes it grants
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperClassConfig {
    pub name: String,
    /// Space separated command names, `*` for all
    #[serde(default)]
    pub commands: String,
    /// Space separated privilege strings, `*` for all
    #[serde(default)]
    pub privs: String,
    /// User mode letters, `*` for all
    #[serde(default)]
    pub usermodes: String,
    /// Channel mode letters, `*` for all
    #[serde(default)]
    pub chanmodes: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "irc.example.net".to_string(),
            network: "ExampleNet".to_string(),
            sid: "001".to_string(),
            cycle_hosts: true,
            max_nick: 31,
            max_ident: 10,
            max_host: 64,
            max_gecos: 128,
            dns_timeout: 5,
            oper_only_user_modes: "os".to_string(),
            notice_masks: "acklnoqx".to_string(),
            motd: Vec::new(),
            rules: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            classes: vec![ClassConfig {
                name: "main".to_string(),
                kind: ClassKind::Allow,
                host: Some("*".to_string()),
                sendq_soft: Some(8192),
                sendq_hard: Some(262_144),
                recvq: Some(8192),
                ping_interval: Some(120),
                registration_timeout: Some(90),
                max_local: Some(3),
                max_global: Some(3),
                ..ClassConfig::default()
            }],
            oper_types: vec![OperTypeConfig {
                name: "NetAdmin".to_string(),
                classes: "Shutdown ServerLink BanControl OperChat".to_string(),
            }],
            oper_classes: vec![
                OperClassConfig {
                    name: "Shutdown".to_string(),
                    commands: "DIE RESTART REHASH".to_string(),
                    privs: "servers/auspex".to_string(),
                    ..OperClassConfig::default()
                },
                OperClassConfig {
                    name: "ServerLink".to_string(),
                    commands: "CONNECT SQUIT".to_string(),
                    ..OperClassConfig::default()
                },
                OperClassConfig {
                    name: "BanControl".to_string(),
                    commands: "KILL GLINE KLINE ZLINE QLINE ELINE".to_string(),
                    privs: "users/auspex channels/auspex".to_string(),
                    ..OperClassConfig::default()
                },
                OperClassConfig {
                    name: "OperChat".to_string(),
                    commands: "WALLOPS GLOBOPS".to_string(),
                    privs: "users/flood/increased-buffers".to_string(),
                    usermodes: "*".to_string(),
                    chanmodes: "*".to_string(),
                },
            ],
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.name.is_empty() {
            return Err(Error::Config("Server name cannot be empty".to_string()));
        }

        if self.server.sid.chars().count() != 3 {
            return Err(Error::Config(format!(
                "Server id must be exactly 3 characters, got '{}'",
                self.server.sid
            )));
        }

        self.validate_classes()?;

        let mut seen_types = HashSet::new();
        for oper_type in &self.oper_types {
            if !seen_types.insert(oper_type.name.as_str()) {
                return Err(Error::Config(format!("Duplicate oper type: {}", oper_type.name)));
            }
        }

        Ok(())
    }

    /// Validate the connect class list
    fn validate_classes(&self) -> Result<()> {
        let mut seen_names = HashSet::new();

        for class in &self.classes {
            if class.name.is_empty() {
                return Err(Error::Config("Connect class name cannot be empty".to_string()));
            }

            // A parent must be defined before the class that inherits from it
            if let Some(parent) = &class.parent {
                if !seen_names.contains(parent.as_str()) {
                    return Err(Error::Config(format!(
                        "Class {} inherits from unknown class {}",
                        class.name, parent
                    )));
                }
            }

            if !seen_names.insert(class.name.as_str()) {
                return Err(Error::Config(format!("Duplicate connect class: {}", class.name)));
            }

            if let (Some(soft), Some(hard)) = (class.sendq_soft, class.sendq_hard) {
                if soft > hard {
                    return Err(Error::Config(format!(
                        "Class {} has sendq_soft ({}) above sendq_hard ({})",
                        class.name, soft, hard
                    )));
                }
            }
        }

        Ok(())
    }

    /// Find a connect class block by name
    pub fn get_class(&self, name: &str) -> Option<&ClassConfig> {
        self.classes.iter().find(|class| class.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_parse_ordered_classes() {
        let config = Config::from_toml(
            r#"
            [server]
            name = "hub.example.net"
            sid = "0AB"

            [[class]]
            name = "lan"
            kind = "deny"
            host = "10.0.0.0/8"

            [[class]]
            name = "world"
            host = "*"
            port = 6667
            sendq_hard = 4096

            [[oper_type]]
            name = "Helper"
            classes = "Chat"

            [[oper_class]]
            name = "Chat"
            commands = "WALLOPS"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.server.sid, "0AB");
        assert_eq!(config.classes.len(), 2);
        assert_eq!(config.classes[0].kind, ClassKind::Deny);
        assert_eq!(config.classes[1].port, Some(6667));
        assert_eq!(config.get_class("world").unwrap().sendq_hard, Some(4096));
        assert_eq!(config.oper_types[0].classes, "Chat");
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut config = Config::default();
        config.classes.push(ClassConfig {
            name: "child".to_string(),
            parent: Some("missing".to_string()),
            ..ClassConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_soft_above_hard_rejected() {
        let mut config = Config::default();
        config.classes[0].sendq_soft = Some(10_000);
        config.classes[0].sendq_hard = Some(100);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_sid_rejected() {
        let mut config = Config::default();
        config.server.sid = "01".to_string();
        assert!(config.validate().is_err());
    }
}
