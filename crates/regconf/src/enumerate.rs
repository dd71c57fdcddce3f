use core::time::Duration;

use log::{debug, warn};
use tokio::time::sleep;

use crate::{
    bus::Bus,
    client::{ListReply, RegisterClient},
};

/// Why an enumeration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationEnd {
    /// The node answered with the empty name.
    EmptyName,
    /// The node stopped answering `List` requests.
    NoResponse,
    /// The maximum number of registers was reached.
    IndexLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration {
    /// `(index, name)` pairs in discovery order. Indices are contiguous
    /// from zero.
    pub registers: Vec<(u16, String)>,
    pub end: EnumerationEnd,
    /// Number of `List` calls made, retries not counted.
    pub list_calls: u32,
}

impl Enumeration {
    /// A node that never answered `List` at all.
    pub fn is_suspicious(&self) -> bool {
        self.registers.is_empty() && self.end == EnumerationEnd::NoResponse
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.registers.iter().map(|(_, name)| name.as_str())
    }
}

/// Walk the register table of the client's current destination.
///
/// Indices are requested in order starting at zero, with `spacing` between
/// calls. The walk stops at the first empty name, when `List` runs out of
/// attempts, or after `max` registers.
pub async fn enumerate<B: Bus>(client: &RegisterClient<B>, max: u16, spacing: Duration) -> Enumeration {
    let node = client.destination();
    let mut registers = Vec::new();
    let mut list_calls = 0;

    let end = loop {
        let Ok(index) = u16::try_from(registers.len()) else {
            break EnumerationEnd::IndexLimit;
        };
        if index >= max {
            break EnumerationEnd::IndexLimit;
        }
        if index > 0 && !spacing.is_zero() {
            sleep(spacing).await;
        }

        list_calls += 1;
        match client.list(index).await {
            ListReply::Name(name) => registers.push((index, name)),
            ListReply::EndOfTable => break EnumerationEnd::EmptyName,
            ListReply::NoResponse => break EnumerationEnd::NoResponse,
        }
    };

    let enumeration = Enumeration {
        registers,
        end,
        list_calls,
    };
    if enumeration.is_suspicious() {
        warn!("Node {node} did not answer any List request");
    } else if end == EnumerationEnd::IndexLimit {
        warn!("Node {node} has more than {max} registers, the rest is ignored");
    }
    debug!(
        "Node {node}: {} registers, end: {end:?}",
        enumeration.registers.len()
    );
    enumeration
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{EnumerationEnd, enumerate};
    use crate::{
        NodeId,
        bus::local::{LocalBus, LocalPort},
        client::{EndpointClient, RegisterClient, RetryPolicy},
        well_known::{ListResponse, RegisterListEndpoint},
    };

    fn spawn_list_server(bus: &LocalBus, node: u16, count: u16) {
        let mut server = bus.attach(NodeId(node)).server::<RegisterListEndpoint>(4);
        tokio::task::spawn(async move {
            while server
                .serve_blocking(|_, req| {
                    let name = if req.index < count {
                        format!("reg{}", req.index)
                    } else {
                        String::new()
                    };
                    Some(ListResponse { name })
                })
                .await
                .is_ok()
            {}
        });
    }

    fn client(bus: &LocalBus, dst: u16) -> RegisterClient<LocalPort> {
        RegisterClient::new(
            EndpointClient::new(bus.attach(NodeId(127)), NodeId(dst)),
            RetryPolicy::DEFAULT,
            RetryPolicy::DEFAULT,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn n_plus_one_calls() {
        let bus = LocalBus::new();
        spawn_list_server(&bus, 50, 5);
        let en = enumerate(&client(&bus, 50), 100, Duration::from_millis(100)).await;
        assert_eq!(en.end, EnumerationEnd::EmptyName);
        assert_eq!(en.list_calls, 6);
        let indices: Vec<u16> = en.registers.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(!en.is_suspicious());
    }

    #[tokio::test(start_paused = true)]
    async fn index_limit() {
        let bus = LocalBus::new();
        spawn_list_server(&bus, 50, 500);
        let en = enumerate(&client(&bus, 50), 3, Duration::ZERO).await;
        assert_eq!(en.end, EnumerationEnd::IndexLimit);
        assert_eq!(en.names().collect::<Vec<_>>(), vec!["reg0", "reg1", "reg2"]);
        assert_eq!(en.list_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_node_is_suspicious() {
        let bus = LocalBus::new();
        let en = enumerate(&client(&bus, 61), 100, Duration::ZERO).await;
        assert_eq!(en.end, EnumerationEnd::NoResponse);
        assert!(en.registers.is_empty());
        assert_eq!(en.list_calls, 1);
        assert!(en.is_suspicious());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_table_is_not_suspicious() {
        let bus = LocalBus::new();
        spawn_list_server(&bus, 50, 0);
        let en = enumerate(&client(&bus, 50), 100, Duration::ZERO).await;
        assert_eq!(en.end, EnumerationEnd::EmptyName);
        assert_eq!(en.list_calls, 1);
        assert!(!en.is_suspicious());
    }
}
