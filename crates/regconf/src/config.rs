//! Configurator settings
//!
//! Settings are usually loaded from a TOML file:
//!
//! ```toml
//! scan_secs = 2
//!
//! [access_retry]
//! attempts = 10
//! delay_ms = 100
//!
//! [templates.esc]
//! "uavcan.sub.setpoint.id" = { natural16 = 2342 }
//! "ctl_dir" = { integer64 = 0 }
//!
//! [nodes.51]
//! extends = ["esc"]
//! registers = { "id_in_esc_group" = { natural16 = 1 } }
//! ```
//!
//! Every field is optional. Nodes without an entry are only read.

use core::{fmt, time::Duration};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{NodeId, client::RetryPolicy, value::Scalar};

/// Desired register values for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredRegisterSet(pub BTreeMap<String, Scalar>);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeEntry {
    /// Templates applied in order before `registers`.
    pub extends: Vec<String>,
    pub registers: DesiredRegisterSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfiguratorConfig {
    /// Length of the heartbeat observation window.
    pub scan_secs: u64,
    /// Registers enumerated per node at most.
    pub max_registers: u16,
    /// Pause between consecutive `List` and `Access` calls.
    pub call_spacing_ms: u64,
    pub list_retry: RetryPolicy,
    pub access_retry: RetryPolicy,
    pub command_timeout_ms: u64,
    pub templates: BTreeMap<String, DesiredRegisterSet>,
    /// Keyed by node id.
    pub nodes: BTreeMap<String, NodeEntry>,
}

#[derive(Debug)]
#[non_exhaustive]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    UnknownTemplate {
        node: String,
        template: String,
    },
    InvalidNodeId(String),
}

// ---- impl DesiredRegisterSet ----

impl DesiredRegisterSet {
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Scalar) -> Option<Scalar> {
        self.0.insert(name.into(), value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Add every entry of `other`, overriding existing ones.
    pub fn merge(&mut self, other: &DesiredRegisterSet) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }
}

impl<S: Into<String>> FromIterator<(S, Scalar)> for DesiredRegisterSet {
    fn from_iter<I: IntoIterator<Item = (S, Scalar)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// ---- impl ConfiguratorConfig ----

impl Default for ConfiguratorConfig {
    fn default() -> Self {
        Self {
            scan_secs: 2,
            max_registers: 100,
            call_spacing_ms: 100,
            list_retry: RetryPolicy::DEFAULT,
            access_retry: RetryPolicy::DEFAULT,
            command_timeout_ms: 1000,
            templates: BTreeMap::new(),
            nodes: BTreeMap::new(),
        }
    }
}

impl ConfiguratorConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(ConfigError::Parse)
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn call_spacing(&self) -> Duration {
        Duration::from_millis(self.call_spacing_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Set the desired registers of `node`, replacing any previous entry.
    pub fn set_node(&mut self, node: NodeId, registers: DesiredRegisterSet) {
        self.nodes.insert(
            node.to_string(),
            NodeEntry {
                extends: Vec::new(),
                registers,
            },
        );
    }

    /// Expand templates into one desired set per node.
    ///
    /// Templates apply in `extends` order, then the node's own registers;
    /// later entries win.
    pub fn resolve(&self) -> Result<BTreeMap<NodeId, DesiredRegisterSet>, ConfigError> {
        let mut out = BTreeMap::new();
        for (key, entry) in &self.nodes {
            let node = key
                .trim()
                .parse::<u16>()
                .map(NodeId)
                .map_err(|_| ConfigError::InvalidNodeId(key.clone()))?;

            let mut set = DesiredRegisterSet::default();
            for template in &entry.extends {
                let Some(registers) = self.templates.get(template) else {
                    return Err(ConfigError::UnknownTemplate {
                        node: key.clone(),
                        template: template.clone(),
                    });
                };
                set.merge(registers);
            }
            set.merge(&entry.registers);
            out.insert(node, set);
        }
        Ok(out)
    }
}

// ---- impl ConfigError ----

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ConfigError::Parse(e) => write!(f, "failed to parse configuration: {e}"),
            ConfigError::UnknownTemplate { node, template } => {
                write!(f, "node {node} extends unknown template {template:?}")
            }
            ConfigError::InvalidNodeId(key) => write!(f, "{key:?} is not a node id"),
        }
    }
}

impl core::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ConfigError, ConfiguratorConfig};
    use crate::{NodeId, client::RetryPolicy, value::Scalar};

    #[test]
    fn defaults() {
        let cfg = ConfiguratorConfig::from_toml("").unwrap();
        assert_eq!(cfg, ConfiguratorConfig::default());
        assert_eq!(cfg.scan_secs, 2);
        assert_eq!(cfg.max_registers, 100);
        assert_eq!(cfg.access_retry, RetryPolicy::DEFAULT);
        assert!(cfg.resolve().unwrap().is_empty());
    }

    #[test]
    fn templates_and_overrides() {
        let cfg = ConfiguratorConfig::from_toml(
            r#"
            scan_secs = 3

            [list_retry]
            attempts = 4

            [templates.esc]
            "uavcan.sub.setpoint.id" = { natural16 = 2342 }
            "ctl_dir" = { integer64 = 0 }
            "control_mode_rpm" = { bit = false }

            [templates.reversed]
            "ctl_dir" = { integer64 = 1 }

            [nodes.51]
            extends = ["esc", "reversed"]
            registers = { "id_in_esc_group" = { natural16 = 1 }, "name" = { string = "esc1" } }

            [nodes.42]
            registers = { "gain" = { real64 = 1.5 }, "erase" = "empty" }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scan_secs, 3);
        assert_eq!(cfg.list_retry.attempts, 4);
        assert_eq!(cfg.list_retry.delay_ms, 100);

        let nodes = cfg.resolve().unwrap();
        assert_eq!(nodes.keys().copied().collect::<Vec<_>>(), vec![NodeId(42), NodeId(51)]);

        let esc = &nodes[&NodeId(51)];
        assert_eq!(esc.len(), 5);
        assert_eq!(esc.get("ctl_dir"), Some(&Scalar::Integer64(1)));
        assert_eq!(esc.get("uavcan.sub.setpoint.id"), Some(&Scalar::Natural16(2342)));
        assert_eq!(esc.get("control_mode_rpm"), Some(&Scalar::Bit(false)));
        assert_eq!(esc.get("name"), Some(&Scalar::String("esc1".into())));

        let ap = &nodes[&NodeId(42)];
        assert_eq!(ap.get("gain"), Some(&Scalar::Real64(1.5)));
        assert_eq!(ap.get("erase"), Some(&Scalar::Empty));
    }

    #[test]
    fn unknown_template() {
        let cfg = ConfiguratorConfig::from_toml(
            r#"
            [nodes.50]
            extends = ["missing"]
            "#,
        )
        .unwrap();
        assert!(matches!(
            cfg.resolve(),
            Err(ConfigError::UnknownTemplate { template, .. }) if template == "missing"
        ));
    }

    #[test]
    fn invalid_node_id() {
        let cfg = ConfiguratorConfig::from_toml(
            r#"
            [nodes.autopilot]
            registers = {}
            "#,
        )
        .unwrap();
        assert!(matches!(cfg.resolve(), Err(ConfigError::InvalidNodeId(k)) if k == "autopilot"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            ConfiguratorConfig::from_toml("scan_seconds = 2"),
            Err(ConfigError::Parse(_))
        ));
    }
}
