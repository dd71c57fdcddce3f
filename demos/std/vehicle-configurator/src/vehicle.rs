//! Mocked quadcopter: an autopilot and up to four ESCs with factory
//! defaults, every subject id unset.

use std::time::Duration;

use regconf::{
    NodeId,
    bus::local::LocalBus,
    mock::{MockHandle, MockNode, MockRegister},
    services::NodeStatus,
    value::Scalar,
    well_known::Mode,
};

pub const AUTOPILOT: NodeId = NodeId(42);
pub const FIRST_ESC: u16 = 50;

const UNSET: u16 = 65535;
const ESC_TELEMETRY: &[&str] = &["esc_heartbeat", "feedback", "power", "status", "dynamics"];

fn subject(name: impl Into<String>) -> MockRegister {
    MockRegister::new(name, Scalar::Natural16(UNSET))
}

pub fn autopilot() -> MockNode {
    let mut node = MockNode::new(AUTOPILOT)
        .register(MockRegister::new("uavcan.node.id", Scalar::Natural16(AUTOPILOT.0)).read_only())
        .register(subject("uavcan.pub.note_response.id"))
        .register(subject("uavcan.pub.setpoint.id"))
        .register(subject("uavcan.pub.readiness.id"));
    for esc in 0..4 {
        for topic in ESC_TELEMETRY {
            node = node.register(subject(format!("uavcan.sub.{topic}.{esc}.id")));
        }
    }
    node.heartbeat_period(Duration::from_millis(500))
}

pub fn esc(index: u16) -> MockNode {
    let id = NodeId(FIRST_ESC + index);
    let mut node = MockNode::new(id)
        .register(MockRegister::new("uavcan.node.id", Scalar::Natural16(id.0)).read_only())
        .register(
            MockRegister::new("uavcan.node.description", Scalar::String("kotleta".into()))
                .read_only(),
        )
        .register(subject("uavcan.sub.note_response.id"))
        .register(subject("uavcan.sub.setpoint.id"))
        .register(subject("uavcan.sub.readiness.id"));
    for topic in ESC_TELEMETRY {
        node = node.register(subject(format!("uavcan.pub.{topic}.id")));
    }
    node.register(MockRegister::new("id_in_esc_group", Scalar::Natural16(0)))
        .register(MockRegister::new("ctl_dir", Scalar::Integer64(0)))
        .register(MockRegister::new("ttl_milliseconds", Scalar::Integer64(200)))
        .register(MockRegister::new("control_mode_rpm", Scalar::Bit(true)))
        .register(MockRegister::new("temperature", Scalar::Real64(24.5)).read_only().volatile())
        .status(NodeStatus {
            mode: Mode::Maintenance,
            ..NodeStatus::default()
        })
}

/// Spawn the autopilot and `escs` ESCs on `bus`.
pub fn spawn_quadcopter(bus: &LocalBus, escs: u16) -> Vec<MockHandle> {
    let mut nodes = vec![autopilot().spawn(bus)];
    nodes.extend((0..escs.min(4)).map(|index| esc(index).spawn(bus)));
    nodes
}
