use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{endpoint, topic, value::Value};

endpoint!(
    RegisterListEndpoint,
    ListRequest,
    ListResponse,
    385,
    "uavcan.register.List.1.0"
);
endpoint!(
    RegisterAccessEndpoint,
    AccessRequest,
    AccessResponse,
    384,
    "uavcan.register.Access.1.0"
);
endpoint!(
    ExecuteCommandEndpoint,
    ExecuteCommandRequest,
    ExecuteCommandResponse,
    435,
    "uavcan.node.ExecuteCommand.1.1"
);
topic!(HeartbeatTopic, Heartbeat, 7509, "uavcan.node.Heartbeat.1.0");

/// Ask for the name of the register at `index`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ListRequest {
    pub index: u16,
}

/// Name of the register at the requested index. An empty name marks the end
/// of the register table.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ListResponse {
    pub name: String,
}

/// Read a register, or write it first when `value` is not [`Value::Empty`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AccessRequest {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AccessResponse {
    pub mutable: bool,
    pub persistent: bool,
    pub value: Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ExecuteCommandRequest {
    pub command: u16,
    pub parameter: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteCommandResponse {
    pub status: u8,
}

/// Periodic liveness message every node publishes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub uptime: u32,
    pub health: Health,
    pub mode: Mode,
    pub vendor_specific_status_code: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Health {
    #[default]
    Nominal,
    Advisory,
    Caution,
    Warning,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Operational,
    Initialization,
    Maintenance,
    SoftwareUpdate,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Health::Nominal => "NOMINAL",
            Health::Advisory => "ADVISORY",
            Health::Caution => "CAUTION",
            Health::Warning => "WARNING",
        })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Mode::Operational => "OPERATIONAL",
            Mode::Initialization => "INITIALIZATION",
            Mode::Maintenance => "MAINTENANCE",
            Mode::SoftwareUpdate => "SOFTWARE_UPDATE",
        })
    }
}

impl Heartbeat {
    pub fn nominal(uptime: u32) -> Self {
        Self {
            uptime,
            health: Health::Nominal,
            mode: Mode::Operational,
            vendor_specific_status_code: 0,
        }
    }
}
