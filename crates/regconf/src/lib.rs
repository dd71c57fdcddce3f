//! # regconf
//!
//! Register discovery and configuration for nodes on a publish/subscribe + RPC
//! vehicle bus (speed controllers, autopilots, sensors).
//!
//! The engine:
//!
//! 1. listens to heartbeats for a fixed window to learn which nodes are alive
//!    ([`heartbeat`]),
//! 2. enumerates every node's registers through the index based `List` service
//!    ([`enumerate`]),
//! 3. reads, or writes when configured, each register through the `Access`
//!    service ([`client`], [`value`]),
//! 4. asks nodes that received writes to persist their state and restart
//!    ([`command`]).
//!
//! [`configurator::Configurator`] drives these steps node by node.
//!
//! The transport is abstracted behind the [`bus::Bus`] trait. An in-memory
//! implementation ([`bus::local::LocalBus`]) and scriptable [`mock`] nodes are
//! provided for tests and demos.

// Provides the std critical section impl backing `CriticalSectionRawMutex`.
use critical_section as _;

pub mod address;
pub mod bus;
pub mod client;
pub mod command;
pub mod config;
pub mod configurator;
pub mod enumerate;
pub mod heartbeat;
pub mod mock;
pub mod services;
pub mod table;
pub mod traits;
pub mod value;
pub mod well_known;

pub use address::{NodeId, PortId};
pub use configurator::Configurator;

/// Define an [`Endpoint`](crate::traits::Endpoint) marker type.
///
/// ```rust
/// use regconf::endpoint;
///
/// endpoint!(Ping, u32, u32, 500, "example.Ping.1.0");
/// # use regconf::traits::Endpoint;
/// assert_eq!(Ping::PORT.0, 500);
/// ```
#[macro_export]
macro_rules! endpoint {
    ($tyname:ident, $req:ty, $resp:ty, $port:expr, $path:expr) => {
        pub struct $tyname;

        impl $crate::traits::Endpoint for $tyname {
            type Request = $req;
            type Response = $resp;
            const PORT: $crate::PortId = $crate::PortId($port);
            const PATH: &'static str = $path;
        }
    };
}

/// Define a [`Topic`](crate::traits::Topic) marker type.
///
/// ```rust
/// use regconf::topic;
///
/// topic!(Counter, u64, 1000, "example.Counter.1.0");
/// # use regconf::traits::Topic;
/// assert_eq!(Counter::PATH, "example.Counter.1.0");
/// ```
#[macro_export]
macro_rules! topic {
    ($tyname:ident, $msg:ty, $port:expr, $path:expr) => {
        pub struct $tyname;

        impl $crate::traits::Topic for $tyname {
            type Message = $msg;
            const PORT: $crate::PortId = $crate::PortId($port);
            const PATH: &'static str = $path;
        }
    };
}
