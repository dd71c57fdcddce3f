//! Scriptable mock nodes
//!
//! A [`MockNode`] attaches to a [`LocalBus`] and behaves like a small device:
//! it publishes heartbeats and serves the `List`, `Access` and
//! `ExecuteCommand` services over a register table.
//!
//! ```rust
//! use regconf::{NodeId, bus::local::LocalBus, mock::{MockNode, MockRegister}};
//! use regconf::value::Scalar;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = LocalBus::new();
//! let esc = MockNode::new(NodeId(50))
//!     .register(MockRegister::new("uavcan.node.id", Scalar::Natural16(50)).read_only())
//!     .register(MockRegister::new("ctl_dir", Scalar::Integer64(0)))
//!     .spawn(&bus);
//! assert_eq!(esc.node(), NodeId(50));
//! # }
//! ```
//!
//! Writes only stick on mutable registers and only when the value has the
//! same type as the current one; otherwise the node answers with its current
//! value. `STORE_PERSISTENT_STATE` saves the persistent registers,
//! `RESTART` takes the node off the bus for a while and brings it back with
//! the saved values, and `FACTORY_RESET` restores the initial values.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use log::{debug, info, warn};
use maitake_sync::WaitQueue;
use mutex::{BlockingMutex, raw_impls::cs::CriticalSectionRawMutex};
use tokio::{select, task::JoinHandle, time::Instant};

use crate::{
    NodeId,
    bus::{
        Bus,
        local::{EndpointServer, LocalBus, ServeError},
    },
    command::{CommandCode, CommandStatus},
    services::NodeStatus,
    value::Value,
    well_known::{
        AccessRequest, AccessResponse, ExecuteCommandEndpoint, ExecuteCommandRequest,
        ExecuteCommandResponse, ListRequest, ListResponse, RegisterAccessEndpoint,
        RegisterListEndpoint,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub struct MockRegister {
    pub name: String,
    pub value: Value,
    pub mutable: bool,
    pub persistent: bool,
}

/// Builder for a mock node.
#[derive(Debug, Clone)]
pub struct MockNode {
    node: NodeId,
    registers: Vec<MockRegister>,
    muted: BTreeSet<String>,
    silent_list: bool,
    command_status: BTreeMap<CommandCode, CommandStatus>,
    restart_delay: Duration,
    heartbeat_period: Duration,
    status: NodeStatus,
}

/// One `Access` request as the node received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub name: String,
    pub write: bool,
}

/// Handle to a running mock node. Dropping it stops the node.
pub struct MockHandle {
    node: NodeId,
    state: Arc<BlockingMutex<CriticalSectionRawMutex, MockState>>,
    stopper: Arc<WaitQueue>,
    heartbeat: JoinHandle<()>,
}

struct MockState {
    node: NodeId,
    registers: Vec<MockRegister>,
    persisted: Vec<Value>,
    defaults: Vec<Value>,
    muted: BTreeSet<String>,
    silent_list: bool,
    command_status: BTreeMap<CommandCode, CommandStatus>,
    restart_delay: Duration,
    offline_until: Option<Instant>,
    list_log: Vec<u16>,
    access_log: Vec<AccessRecord>,
    command_log: Vec<CommandCode>,
}

struct Servers {
    list: EndpointServer<RegisterListEndpoint>,
    access: EndpointServer<RegisterAccessEndpoint>,
    command: EndpointServer<ExecuteCommandEndpoint>,
}

// ---- impl MockRegister ----

impl MockRegister {
    /// A mutable, persistent register.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            mutable: true,
            persistent: true,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.mutable = false;
        self
    }

    /// Not saved by `STORE_PERSISTENT_STATE`, reset by every restart.
    pub fn volatile(mut self) -> Self {
        self.persistent = false;
        self
    }
}

// ---- impl MockNode ----

impl MockNode {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            registers: Vec::new(),
            muted: BTreeSet::new(),
            silent_list: false,
            command_status: BTreeMap::new(),
            restart_delay: Duration::from_millis(500),
            heartbeat_period: Duration::from_secs(1),
            status: NodeStatus::default(),
        }
    }

    /// Append a register. Its position is its `List` index.
    pub fn register(mut self, register: MockRegister) -> Self {
        self.registers.push(register);
        self
    }

    pub fn registers(mut self, registers: impl IntoIterator<Item = MockRegister>) -> Self {
        self.registers.extend(registers);
        self
    }

    /// Ignore every `Access` request for `name`.
    pub fn mute(mut self, name: impl Into<String>) -> Self {
        self.muted.insert(name.into());
        self
    }

    /// Ignore every `List` request.
    pub fn silence_list(mut self) -> Self {
        self.silent_list = true;
        self
    }

    /// Answer `code` with `status`. The command only takes effect when
    /// `status` is [`CommandStatus::Success`].
    pub fn command_status(mut self, code: CommandCode, status: CommandStatus) -> Self {
        self.command_status.insert(code, status);
        self
    }

    /// How long the node stays silent after a restart.
    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn heartbeat_period(mut self, period: Duration) -> Self {
        self.heartbeat_period = period;
        self
    }

    pub fn status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// Attach to `bus` and start serving.
    ///
    /// Servers are attached before this returns, so requests sent right
    /// after are not lost.
    pub fn spawn(self, bus: &LocalBus) -> MockHandle {
        let port = bus.attach(self.node);
        let servers = Servers {
            list: port.server::<RegisterListEndpoint>(8),
            access: port.server::<RegisterAccessEndpoint>(8),
            command: port.server::<ExecuteCommandEndpoint>(8),
        };

        let values: Vec<Value> = self.registers.iter().map(|r| r.value.clone()).collect();
        let state = Arc::new(BlockingMutex::new(MockState {
            node: self.node,
            registers: self.registers,
            persisted: values.clone(),
            defaults: values,
            muted: self.muted,
            silent_list: self.silent_list,
            command_status: self.command_status,
            restart_delay: self.restart_delay,
            offline_until: None,
            list_log: Vec::new(),
            access_log: Vec::new(),
            command_log: Vec::new(),
        }));
        let stopper = Arc::new(WaitQueue::new());

        tokio::task::spawn(serve(servers, state.clone(), stopper.clone()));

        let services = port.services();
        let (period, status) = (self.heartbeat_period, self.status);
        let heartbeat = tokio::task::spawn(async move {
            services.heartbeat_publisher(period, status).await;
        });

        MockHandle {
            node: self.node,
            state,
            stopper,
            heartbeat,
        }
    }
}

async fn serve(
    mut servers: Servers,
    state: Arc<BlockingMutex<CriticalSectionRawMutex, MockState>>,
    stopper: Arc<WaitQueue>,
) {
    let node = state.with_lock(|s| s.node);
    debug!("Mock node {node} started");
    loop {
        let res = select! {
            _ = stopper.wait() => break,
            r = servers.list.serve_blocking(|_, req| state.with_lock(|s| s.on_list(req))) => r,
            r = servers.access.serve_blocking(|_, req| state.with_lock(|s| s.on_access(req))) => r,
            r = servers.command.serve_blocking(|_, req| state.with_lock(|s| s.on_command(req))) => r,
        };
        match res {
            Ok(()) => {}
            Err(ServeError::Closed) => break,
            Err(e) => warn!("Mock node {node}: {e:?}"),
        }
    }
    debug!("Mock node {node} stopped");
}

// ---- impl MockState ----

impl MockState {
    fn online(&mut self) -> bool {
        match self.offline_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                self.offline_until = None;
                info!("Mock node {} is back online", self.node);
                true
            }
            None => true,
        }
    }

    fn on_list(&mut self, req: ListRequest) -> Option<ListResponse> {
        if !self.online() {
            return None;
        }
        self.list_log.push(req.index);
        if self.silent_list {
            return None;
        }
        let name = self
            .registers
            .get(usize::from(req.index))
            .map(|r| r.name.clone())
            .unwrap_or_default();
        Some(ListResponse { name })
    }

    fn on_access(&mut self, req: AccessRequest) -> Option<AccessResponse> {
        if !self.online() {
            return None;
        }
        let write = !req.value.is_empty();
        self.access_log.push(AccessRecord {
            name: req.name.clone(),
            write,
        });
        if self.muted.contains(&req.name) {
            return None;
        }

        let Some(reg) = self.registers.iter_mut().find(|r| r.name == req.name) else {
            return Some(AccessResponse {
                mutable: false,
                persistent: false,
                value: Value::Empty,
            });
        };
        if write {
            if reg.mutable && reg.value.same_variant(&req.value) {
                reg.value = req.value;
            } else {
                debug!(
                    "Mock node {}: rejected {} write to {}",
                    self.node,
                    req.value.variant_name(),
                    reg.name
                );
            }
        }
        Some(AccessResponse {
            mutable: reg.mutable,
            persistent: reg.persistent,
            value: reg.value.clone(),
        })
    }

    fn on_command(&mut self, req: ExecuteCommandRequest) -> Option<ExecuteCommandResponse> {
        if !self.online() {
            return None;
        }
        let code = CommandCode(req.command);
        self.command_log.push(code);

        let status = self.command_status.get(&code).copied().unwrap_or(match code {
            CommandCode::STORE_PERSISTENT_STATE
            | CommandCode::RESTART
            | CommandCode::FACTORY_RESET => CommandStatus::Success,
            _ => CommandStatus::BadCommand,
        });
        if status == CommandStatus::Success {
            match code {
                CommandCode::STORE_PERSISTENT_STATE => self.store(),
                CommandCode::RESTART => self.restart(),
                CommandCode::FACTORY_RESET => self.factory_reset(),
                _ => {}
            }
        }
        Some(ExecuteCommandResponse {
            status: status as u8,
        })
    }

    fn store(&mut self) {
        for (reg, saved) in self.registers.iter().zip(self.persisted.iter_mut()) {
            if reg.persistent {
                *saved = reg.value.clone();
            }
        }
    }

    fn restart(&mut self) {
        let regs = self.registers.iter_mut();
        for ((reg, saved), default) in regs.zip(&self.persisted).zip(&self.defaults) {
            reg.value = if reg.persistent {
                saved.clone()
            } else {
                default.clone()
            };
        }
        self.offline_until = Some(Instant::now() + self.restart_delay);
        info!("Mock node {} restarting", self.node);
    }

    fn factory_reset(&mut self) {
        for (reg, default) in self.registers.iter_mut().zip(&self.defaults) {
            reg.value = default.clone();
        }
        self.persisted.clone_from(&self.defaults);
    }
}

// ---- impl MockHandle ----

impl MockHandle {
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Current value of `name`.
    pub fn value(&self, name: &str) -> Option<Value> {
        self.state.with_lock(|s| {
            s.registers
                .iter()
                .find(|r| r.name == name)
                .map(|r| r.value.clone())
        })
    }

    /// Value `name` will have after the next restart.
    pub fn persisted_value(&self, name: &str) -> Option<Value> {
        self.state.with_lock(|s| {
            let pos = s.registers.iter().position(|r| r.name == name)?;
            let reg = &s.registers[pos];
            Some(if reg.persistent {
                s.persisted[pos].clone()
            } else {
                s.defaults[pos].clone()
            })
        })
    }

    /// Indices of every `List` request received.
    pub fn list_requests(&self) -> Vec<u16> {
        self.state.with_lock(|s| s.list_log.clone())
    }

    /// Every `Access` request received, in order.
    pub fn access_requests(&self) -> Vec<AccessRecord> {
        self.state.with_lock(|s| s.access_log.clone())
    }

    /// Every command received, in order.
    pub fn commands(&self) -> Vec<CommandCode> {
        self.state.with_lock(|s| s.command_log.clone())
    }

    pub fn is_online(&self) -> bool {
        self.state.with_lock(|s| s.online())
    }

    /// Stop serving and stop publishing heartbeats.
    pub fn stop(&self) {
        self.stopper.close();
        self.heartbeat.abort();
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
