//! Register RPC clients
//!
//! [`EndpointClient`] is a rebindable connection handle: it sends typed
//! requests to one destination node and can be re-pointed at another node
//! between calls. [`RegisterClient`] puts the `List` and `Access` services on
//! top of one shared handle, each with its own [`RetryPolicy`].
//!
//! The two services react differently to a node that stops answering.
//! Running out of attempts on `List` is reported as
//! [`ListReply::NoResponse`] and ends an enumeration like an empty name
//! would, while running out of attempts on `Access` is an
//! [`AccessError`].

use core::{fmt, time::Duration};

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::{
    NodeId,
    bus::{Bus, RequestError},
    traits::Endpoint,
    value::{Decoded, Value, decode},
    well_known::{AccessRequest, ListRequest, RegisterAccessEndpoint, RegisterListEndpoint},
};

/// Fixed attempt, fixed delay retry policy.
///
/// There is no backoff. The worst case latency of one call is
/// `attempts * timeout + (attempts - 1) * delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
    pub timeout_ms: u64,
}

/// One attempt budget ran out without a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetriesExhausted {
    pub attempts: u32,
    pub last: RequestError,
}

/// Rebindable handle sending requests to one destination node.
pub struct EndpointClient<B: Bus> {
    bus: B,
    dst: NodeId,
}

pub struct RegisterClient<B: Bus> {
    handle: EndpointClient<B>,
    list_policy: RetryPolicy,
    access_policy: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListReply {
    /// A register exists at the index.
    Name(String),
    /// The node answered with the empty name.
    EndOfTable,
    /// Every attempt timed out.
    NoResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessReply {
    pub decoded: Decoded,
    pub mutable: bool,
    pub persistent: bool,
    /// The value exactly as the node returned it.
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccessError {
    NoResponse { attempts: u32 },
}

// ---- impl RetryPolicy ----

impl RetryPolicy {
    pub const DEFAULT: Self = Self {
        attempts: 10,
        delay_ms: 100,
        timeout_ms: 1000,
    };

    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Upper bound on the time one call can take.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.attempts.max(1);
        self.timeout()
            .saturating_mul(attempts)
            .saturating_add(self.delay().saturating_mul(attempts - 1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// ---- impl EndpointClient ----

impl<B: Bus> EndpointClient<B> {
    pub fn new(bus: B, dst: NodeId) -> Self {
        Self { bus, dst }
    }

    pub fn destination(&self) -> NodeId {
        self.dst
    }

    /// Point the handle at another node. Later calls go to `dst`.
    pub fn retarget(&mut self, dst: NodeId) {
        trace!("Retargeting client from {} to {dst}", self.dst);
        self.dst = dst;
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// A single attempt, no retries.
    pub async fn request_once<E: Endpoint>(
        &self,
        req: &E::Request,
        timeout: Duration,
    ) -> Result<E::Response, RequestError> {
        self.bus.request::<E>(self.dst, req, timeout).await
    }

    /// Send `req` until a response arrives or `policy` runs out of attempts.
    pub async fn call<E: Endpoint>(
        &self,
        req: &E::Request,
        policy: &RetryPolicy,
    ) -> Result<E::Response, RetriesExhausted> {
        let attempts = policy.attempts.max(1);
        let mut last = RequestError::Timeout;
        for attempt in 1..=attempts {
            match self.request_once::<E>(req, policy.timeout()).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    trace!(
                        "{} to node {}: attempt {attempt}/{attempts} failed: {e}",
                        E::PATH,
                        self.dst
                    );
                    last = e;
                }
            }
            if attempt < attempts {
                sleep(policy.delay()).await;
            }
        }
        debug!(
            "{} to node {} failed {attempts} times",
            E::PATH,
            self.dst
        );
        Err(RetriesExhausted { attempts, last })
    }
}

// ---- impl RegisterClient ----

impl<B: Bus> RegisterClient<B> {
    pub fn new(handle: EndpointClient<B>, list_policy: RetryPolicy, access_policy: RetryPolicy) -> Self {
        Self {
            handle,
            list_policy,
            access_policy,
        }
    }

    pub fn destination(&self) -> NodeId {
        self.handle.destination()
    }

    pub fn retarget(&mut self, dst: NodeId) {
        self.handle.retarget(dst);
    }

    pub fn list_policy(&self) -> &RetryPolicy {
        &self.list_policy
    }

    pub fn access_policy(&self) -> &RetryPolicy {
        &self.access_policy
    }

    /// Ask for the name of the register at `index`.
    pub async fn list(&self, index: u16) -> ListReply {
        let req = ListRequest { index };
        match self
            .handle
            .call::<RegisterListEndpoint>(&req, &self.list_policy)
            .await
        {
            Ok(resp) if resp.name.is_empty() => ListReply::EndOfTable,
            Ok(resp) => ListReply::Name(resp.name),
            Err(_) => ListReply::NoResponse,
        }
    }

    /// Read `name`, or write `value` to it and read back what the node kept.
    pub async fn access(&self, name: &str, value: Option<Value>) -> Result<AccessReply, AccessError> {
        let req = AccessRequest {
            name: name.to_owned(),
            value: value.unwrap_or_default(),
        };
        let resp = self
            .handle
            .call::<RegisterAccessEndpoint>(&req, &self.access_policy)
            .await
            .map_err(|e| AccessError::NoResponse {
                attempts: e.attempts,
            })?;
        Ok(AccessReply {
            decoded: decode(&resp.value),
            mutable: resp.mutable,
            persistent: resp.persistent,
            raw: resp.value,
        })
    }
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessError::NoResponse { attempts } => {
                write!(f, "no response after {attempts} attempts")
            }
        }
    }
}

impl core::error::Error for AccessError {}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    use tokio::time::Instant;

    use super::{AccessError, EndpointClient, ListReply, RegisterClient, RetryPolicy};
    use crate::{
        NodeId,
        bus::local::{FrameInfo, FrameKind, LocalBus},
        value::{Scalar, Value},
        well_known::{AccessResponse, ListResponse, RegisterAccessEndpoint, RegisterListEndpoint},
    };

    const NAMES: &[&str] = &["alpha", "beta"];

    fn spawn_register_node(bus: &LocalBus, node: u16) {
        let port = bus.attach(NodeId(node));
        let mut list = port.server::<RegisterListEndpoint>(4);
        let mut access = port.server::<RegisterAccessEndpoint>(4);
        tokio::task::spawn(async move {
            loop {
                let res = list
                    .serve_blocking(|_, req| {
                        let name = NAMES.get(usize::from(req.index)).copied().unwrap_or("");
                        Some(ListResponse { name: name.into() })
                    })
                    .await;
                if res.is_err() {
                    break;
                }
            }
        });
        tokio::task::spawn(async move {
            loop {
                let res = access
                    .serve_blocking(|_, req| {
                        let value = if req.value.is_empty() {
                            Value::Natural16(vec![7])
                        } else {
                            req.value
                        };
                        Some(AccessResponse {
                            mutable: true,
                            persistent: false,
                            value,
                        })
                    })
                    .await;
                if res.is_err() {
                    break;
                }
            }
        });
    }

    fn client(bus: &LocalBus, dst: u16) -> RegisterClient<crate::bus::local::LocalPort> {
        let handle = EndpointClient::new(bus.attach(NodeId(127)), NodeId(dst));
        RegisterClient::new(handle, RetryPolicy::DEFAULT, RetryPolicy::DEFAULT)
    }

    #[test]
    fn worst_case_latency() {
        let policy = RetryPolicy::DEFAULT;
        assert_eq!(policy.worst_case(), Duration::from_millis(10 * 1000 + 9 * 100));
        let single = RetryPolicy {
            attempts: 0,
            ..RetryPolicy::DEFAULT
        };
        assert_eq!(single.worst_case(), Duration::from_secs(1));
    }

    #[test]
    fn worst_case_saturates() {
        let huge = RetryPolicy {
            attempts: u32::MAX,
            delay_ms: u64::MAX,
            timeout_ms: u64::MAX,
        };
        assert_eq!(huge.worst_case(), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn list_names_and_end_of_table() {
        let bus = LocalBus::new();
        spawn_register_node(&bus, 50);
        let client = client(&bus, 50);
        assert_eq!(client.list(0).await, ListReply::Name("alpha".into()));
        assert_eq!(client.list(1).await, ListReply::Name("beta".into()));
        assert_eq!(client.list(2).await, ListReply::EndOfTable);
    }

    #[tokio::test(start_paused = true)]
    async fn list_exhaustion_is_no_response() {
        let bus = LocalBus::new();
        let client = client(&bus, 99);
        let start = Instant::now();
        assert_eq!(client.list(0).await, ListReply::NoResponse);
        let elapsed = start.elapsed();
        assert!(elapsed >= RetryPolicy::DEFAULT.worst_case());
        assert!(elapsed < RetryPolicy::DEFAULT.worst_case() + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn access_exhaustion_is_an_error() {
        let bus = LocalBus::new();
        let client = client(&bus, 99);
        let res = client.access("alpha", None).await;
        assert_eq!(res, Err(AccessError::NoResponse { attempts: 10 }));
    }

    #[tokio::test(start_paused = true)]
    async fn access_reads_and_writes() {
        let bus = LocalBus::new();
        spawn_register_node(&bus, 50);
        let client = client(&bus, 50);

        let read = client.access("alpha", None).await.unwrap();
        assert_eq!(read.decoded.value, Some(Scalar::Natural16(7)));
        assert!(read.mutable);

        let written = client
            .access("alpha", Some(Value::from(Scalar::Integer64(-4))))
            .await
            .unwrap();
        assert_eq!(written.decoded.value, Some(Scalar::Integer64(-4)));
        assert_eq!(written.raw, Value::Integer64(vec![-4]));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_requests_are_retried() {
        let bus = LocalBus::new();
        spawn_register_node(&bus, 50);
        let lost = Arc::new(AtomicU32::new(0));
        let counter = lost.clone();
        bus.set_filter(Some(Arc::new(move |info: &FrameInfo| {
            info.kind == FrameKind::Request && counter.fetch_add(1, Ordering::Relaxed) < 3
        })));

        let client = client(&bus, 50);
        let start = Instant::now();
        assert_eq!(client.list(0).await, ListReply::Name("alpha".into()));
        assert_eq!(lost.load(Ordering::Relaxed), 4);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3 * (1000 + 100)));
        assert!(elapsed < Duration::from_millis(3 * (1000 + 100) + 50));
    }

    #[tokio::test(start_paused = true)]
    async fn retarget_switches_destination() {
        let bus = LocalBus::new();
        spawn_register_node(&bus, 51);
        let mut client = client(&bus, 50);
        assert_eq!(client.destination(), NodeId(50));
        client.retarget(NodeId(51));
        assert_eq!(client.destination(), NodeId(51));
        assert_eq!(client.list(1).await, ListReply::Name("beta".into()));
    }
}
