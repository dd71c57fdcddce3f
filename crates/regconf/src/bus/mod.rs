//! The transport seam
//!
//! Everything the engine needs from a bus is captured by the [`Bus`] trait:
//! a node identity, typed requests with a per attempt timeout, topic
//! subscriptions and broadcasts. The transport is unreliable: a request may
//! never be answered, and the caller only learns about it through
//! [`RequestError::Timeout`].
//!
//! [`local::LocalBus`] is an in-memory implementation used by tests, mock
//! nodes and the demos.

use core::{fmt, future::Future, time::Duration};

use tokio::sync::mpsc;

use crate::{
    NodeId,
    services::Services,
    traits::{Endpoint, Topic},
};

pub mod local;

/// Handle to a node's attachment point on a bus.
pub trait Bus: Clone + Send + Sync + 'static {
    /// Node id this handle sends as.
    fn local_node(&self) -> NodeId;

    /// Send one request to `dst` and wait at most `timeout` for its response.
    ///
    /// No retries are performed here.
    fn request<E: Endpoint>(
        &self,
        dst: NodeId,
        req: &E::Request,
        timeout: Duration,
    ) -> impl Future<Output = Result<E::Response, RequestError>> + Send;

    /// Receive every message published on `T` by other nodes, from now on.
    fn subscribe<T: Topic>(&self, bound: usize) -> Subscription<T::Message>;

    /// Publish a message on `T` to every subscriber but ourselves.
    fn broadcast<T: Topic>(&self, msg: &T::Message) -> Result<(), SendError>;

    /// Helper services running on top of this handle.
    fn services(&self) -> Services<Self> {
        Services { inner: self.clone() }
    }
}

/// A received topic message and its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    pub src: NodeId,
    pub t: T,
}

/// Stream of messages on one topic.
pub struct Subscription<T> {
    rx: mpsc::Receiver<Message<T>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequestError {
    /// No response arrived within the timeout.
    Timeout,
    /// The request could not be serialized.
    Encode,
    /// The response could not be deserialized.
    Decode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SendError {
    Encode,
}

// ---- impl Subscription ----

impl<T> Subscription<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Message<T>>) -> Self {
        Self { rx }
    }

    /// Wait for the next message. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Message<T>> {
        self.rx.recv().await
    }

    /// Take a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message<T>> {
        self.rx.try_recv().ok()
    }
}

// ---- impl errors ----

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Timeout => f.write_str("request timed out"),
            RequestError::Encode => f.write_str("failed to encode request"),
            RequestError::Decode => f.write_str("failed to decode response"),
        }
    }
}

impl core::error::Error for RequestError {}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Encode => f.write_str("failed to encode message"),
        }
    }
}

impl core::error::Error for SendError {}
