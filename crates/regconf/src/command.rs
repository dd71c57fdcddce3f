//! Lifecycle commands
//!
//! Commands are sent once, without retries. A node that restarts may not
//! get to answer, so a missing response is inconclusive rather than a
//! failure.

use core::{fmt, time::Duration};

use log::{debug, warn};

use crate::{
    NodeId,
    bus::Bus,
    client::EndpointClient,
    well_known::{ExecuteCommandEndpoint, ExecuteCommandRequest},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandCode(pub u16);

impl CommandCode {
    pub const RESTART: Self = Self(65535);
    pub const POWER_OFF: Self = Self(65534);
    pub const BEGIN_SOFTWARE_UPDATE: Self = Self(65533);
    pub const FACTORY_RESET: Self = Self(65532);
    pub const EMERGENCY_STOP: Self = Self(65531);
    pub const STORE_PERSISTENT_STATE: Self = Self(65530);

    pub const fn name(&self) -> Option<&'static str> {
        match *self {
            Self::RESTART => Some("RESTART"),
            Self::POWER_OFF => Some("POWER_OFF"),
            Self::BEGIN_SOFTWARE_UPDATE => Some("BEGIN_SOFTWARE_UPDATE"),
            Self::FACTORY_RESET => Some("FACTORY_RESET"),
            Self::EMERGENCY_STOP => Some("EMERGENCY_STOP"),
            Self::STORE_PERSISTENT_STATE => Some("STORE_PERSISTENT_STATE"),
            _ => None,
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "COMMAND_{}", self.0),
        }
    }
}

/// Status a node reports for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandStatus {
    Success = 0,
    Failure = 1,
    NotAuthorized = 2,
    BadCommand = 3,
    BadParameter = 4,
    BadState = 5,
    InternalError = 6,
}

impl TryFrom<u8> for CommandStatus {
    type Error = CommandError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Success,
            1 => Self::Failure,
            2 => Self::NotAuthorized,
            3 => Self::BadCommand,
            4 => Self::BadParameter,
            5 => Self::BadState,
            6 => Self::InternalError,
            other => return Err(CommandError::UnknownStatus(other)),
        })
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "STATUS_SUCCESS",
            Self::Failure => "STATUS_FAILURE",
            Self::NotAuthorized => "STATUS_NOT_AUTHORIZED",
            Self::BadCommand => "STATUS_BAD_COMMAND",
            Self::BadParameter => "STATUS_BAD_PARAMETER",
            Self::BadState => "STATUS_BAD_STATE",
            Self::InternalError => "STATUS_INTERNAL_ERROR",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandError {
    /// The node did not answer within the timeout.
    NoResponse,
    /// The node answered with a status byte outside the known set.
    UnknownStatus(u8),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::NoResponse => f.write_str("no response"),
            CommandError::UnknownStatus(s) => write!(f, "unknown status {s}"),
        }
    }
}

impl core::error::Error for CommandError {}

/// Sends `ExecuteCommand` requests to one node at a time.
pub struct CommandClient<B: Bus> {
    handle: EndpointClient<B>,
    timeout: Duration,
}

impl<B: Bus> CommandClient<B> {
    pub fn new(handle: EndpointClient<B>, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    pub fn destination(&self) -> NodeId {
        self.handle.destination()
    }

    pub fn retarget(&mut self, dst: NodeId) {
        self.handle.retarget(dst);
    }

    /// Execute `code` on the current destination. One attempt only.
    pub async fn execute(
        &self,
        code: CommandCode,
        parameter: &str,
    ) -> Result<CommandStatus, CommandError> {
        let req = ExecuteCommandRequest {
            command: code.0,
            parameter: parameter.to_owned(),
        };
        let dst = self.handle.destination();
        match self
            .handle
            .request_once::<ExecuteCommandEndpoint>(&req, self.timeout)
            .await
        {
            Ok(resp) => {
                let status = CommandStatus::try_from(resp.status);
                match &status {
                    Ok(s) => debug!("{code} on node {dst}: {s}"),
                    Err(e) => warn!("{code} on node {dst}: {e}"),
                }
                status
            }
            Err(e) => {
                warn!("{code} on node {dst} is inconclusive: {e}");
                Err(CommandError::NoResponse)
            }
        }
    }
}
