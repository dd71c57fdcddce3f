//! Typed port markers
//!
//! Every service and subject on the bus is described by a zero sized marker
//! type that ties a fixed [`PortId`] to its message types. Use the
//! [`endpoint!`](crate::endpoint) and [`topic!`](crate::topic) macros to
//! declare them.

use serde::{Serialize, de::DeserializeOwned};

use crate::PortId;

/// A request/response service.
pub trait Endpoint {
    type Request: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    type Response: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    const PORT: PortId;
    const PATH: &'static str;
}

/// A broadcast subject.
pub trait Topic {
    type Message: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    const PORT: PortId;
    const PATH: &'static str;
}
