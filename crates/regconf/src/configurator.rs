//! The configuration orchestrator
//!
//! A run has two phases. The network is scanned by listening to heartbeats
//! for a fixed window. Then every node seen is configured, one after the
//! other, in ascending node id order:
//!
//! 1. its register table is enumerated,
//! 2. every register is read, or written when the node has a desired value
//!    for it, and printed as one row,
//! 3. when anything was written, the node is asked to store its persistent
//!    state and restart so the new values take effect.
//!
//! A node that stops answering `Access` requests aborts its own pass only;
//! the run moves on to the next node. Registers written before the abort
//! are still stored and the node still restarts.

use core::time::Duration;
use std::collections::{BTreeMap, BTreeSet};

use log::{error, info, warn};
use tokio::time::sleep;

use crate::{
    NodeId,
    address::fmt_node_set,
    bus::Bus,
    client::{EndpointClient, RegisterClient},
    command::{CommandClient, CommandCode, CommandError, CommandStatus},
    config::{ConfigError, ConfiguratorConfig, DesiredRegisterSet},
    enumerate::{EnumerationEnd, enumerate},
    heartbeat::HeartbeatTracker,
    table::{RegisterRow, RegisterTable, RowKind},
    value::Value,
};

const HEARTBEAT_QUEUE: usize = 64;

/// Drives scans and configuration passes over one bus handle.
pub struct Configurator<B: Bus> {
    bus: B,
    tracker: HeartbeatTracker,
    registers: RegisterClient<B>,
    commands: CommandClient<B>,
    desired: BTreeMap<NodeId, DesiredRegisterSet>,
    scan_window: Duration,
    max_registers: u16,
    call_spacing: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// No desired registers, every register is only read.
    ReadOnly,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub code: CommandCode,
    pub result: Result<CommandStatus, CommandError>,
}

/// What happened to one node during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    pub node: NodeId,
    pub mode: PassMode,
    pub end: EnumerationEnd,
    pub list_calls: u32,
    pub table: RegisterTable,
    /// Printed rows, in discovery order.
    pub rows: Vec<RegisterRow>,
    pub writes: usize,
    /// Register whose `Access` ran out of attempts.
    pub aborted_at: Option<String>,
    pub commands: Vec<CommandOutcome>,
    /// The node never answered `List`.
    pub suspicious: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub nodes: Vec<NodeReport>,
}

// ---- impl Configurator ----

impl<B: Bus> Configurator<B> {
    pub fn new(bus: B, config: &ConfiguratorConfig) -> Result<Self, ConfigError> {
        let desired = config.resolve()?;
        // Clients are pointed at each node before use.
        let unbound = bus.local_node();
        let registers = RegisterClient::new(
            EndpointClient::new(bus.clone(), unbound),
            config.list_retry,
            config.access_retry,
        );
        let commands = CommandClient::new(
            EndpointClient::new(bus.clone(), unbound),
            config.command_timeout(),
        );
        Ok(Self {
            bus,
            tracker: HeartbeatTracker::new(),
            registers,
            commands,
            desired,
            scan_window: config.scan_window(),
            max_registers: config.max_registers,
            call_spacing: config.call_spacing(),
        })
    }

    pub fn tracker(&self) -> &HeartbeatTracker {
        &self.tracker
    }

    pub fn desired(&self, node: NodeId) -> Option<&DesiredRegisterSet> {
        self.desired.get(&node)
    }

    /// Scan the network, then configure every node found.
    pub async fn run(&mut self) -> RunReport {
        let nodes = self.scan_network().await;

        let mut report = RunReport::default();
        for node in nodes {
            report.nodes.push(self.configure_node(node).await);
        }
        info!("Configuration is done.");
        report
    }

    /// Listen for heartbeats during the scan window and return the nodes
    /// seen, not counting ourselves.
    pub async fn scan_network(&self) -> BTreeSet<NodeId> {
        self.tracker.clear();
        let tracker = self.tracker.clone();
        let bus = self.bus.clone();
        let tracking = tokio::task::spawn(async move {
            tracker.track(&bus, HEARTBEAT_QUEUE).await;
        });

        info!("Listening to the network...");
        let secs = self.scan_window.as_secs();
        for remaining in (1..=secs).rev() {
            sleep(Duration::from_secs(1)).await;
            info!(
                "{remaining}... Available nodes: {}",
                fmt_node_set(&self.tracker.snapshot())
            );
        }
        tracking.abort();

        let mut nodes = self.tracker.snapshot();
        nodes.remove(&self.bus.local_node());
        nodes
    }

    /// Run one configuration pass on `node`.
    pub async fn configure_node(&mut self, node: NodeId) -> NodeReport {
        self.registers.retarget(node);
        self.commands.retarget(node);

        let desired = self.desired.get(&node);
        let mode = match desired {
            Some(_) => PassMode::Write,
            None => PassMode::ReadOnly,
        };
        match mode {
            PassMode::Write => info!("Node={node}. Writing to registers is in process..."),
            PassMode::ReadOnly => info!("Node={node}. Reading of registers is in process..."),
        }

        let enumeration = enumerate(&self.registers, self.max_registers, self.call_spacing).await;

        let mut table = RegisterTable::new();
        let mut rows = Vec::with_capacity(enumeration.registers.len());
        let mut writes = 0;
        let mut aborted_at = None;

        for (index, name) in &enumeration.registers {
            if !self.call_spacing.is_zero() {
                sleep(self.call_spacing).await;
            }
            // An empty value on the wire is a read.
            let wanted = desired
                .and_then(|set| set.get(name))
                .map(Value::from)
                .filter(|value| !value.is_empty());
            let kind = match wanted {
                Some(_) => RowKind::Write,
                None => RowKind::Read,
            };

            let reply = match self.registers.access(name, wanted).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("Node {node}: access to {name} failed: {e}, aborting the pass");
                    aborted_at = Some(name.clone());
                    break;
                }
            };
            if kind == RowKind::Write {
                writes += 1;
            }

            let row = RegisterRow::new(*index, name, &reply.decoded, kind);
            match kind {
                RowKind::Read => info!("{row}"),
                RowKind::Write => warn!("{row}"),
            }
            table.insert(name, *index, reply.decoded);
            rows.push(row);
        }

        let mut commands = Vec::new();
        let wants_writes = desired.is_some_and(|set| !set.is_empty());
        if writes > 0 && wants_writes {
            for code in [CommandCode::STORE_PERSISTENT_STATE, CommandCode::RESTART] {
                let result = self.commands.execute(code, "").await;
                match &result {
                    Ok(status) => info!("Node {node}: {code} -> {status}"),
                    Err(e) => warn!("Node {node}: {code} -> {e}"),
                }
                commands.push(CommandOutcome { code, result });
            }
        }

        NodeReport {
            node,
            mode,
            end: enumeration.end,
            list_calls: enumeration.list_calls,
            suspicious: enumeration.is_suspicious(),
            table,
            rows,
            writes,
            aborted_at,
            commands,
        }
    }
}

// ---- impl reports ----

impl NodeReport {
    pub fn is_aborted(&self) -> bool {
        self.aborted_at.is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|row| row.name.as_str())
    }
}

impl RunReport {
    pub fn node(&self, node: NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|report| report.node == node)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|report| report.node).collect()
    }

    pub fn aborted(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|report| report.is_aborted())
    }
}
