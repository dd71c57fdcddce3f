//! An in-memory bus
//!
//! [`LocalBus`] connects any number of [`LocalPort`]s within one process.
//! Bodies are postcard encoded on the way in and decoded on the way out, so
//! serialization problems surface the same way they would on a real wire.
//!
//! The bus models an unreliable transport: requests to nodes without a
//! matching server vanish, and a [`FrameFilter`] can drop any request,
//! response or topic frame. A lost frame is never reported to the sender,
//! requesters only notice it when their timeout elapses.

use std::{
    collections::HashMap,
    future::pending,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use log::{debug, trace, warn};
use mutex::{BlockingMutex, raw_impls::cs::CriticalSectionRawMutex};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};

use crate::{
    NodeId, PortId,
    bus::{Bus, Message, RequestError, SendError, Subscription},
    traits::{Endpoint, Topic},
};

/// Decides whether a frame is lost. Returning `true` drops the frame.
///
/// Filters run while the bus is locked and must not call back into it.
pub type FrameFilter = Arc<dyn Fn(&FrameInfo) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
    Message,
}

/// What a [`FrameFilter`] gets to see about a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub src: NodeId,
    pub dst: NodeId,
    pub port: PortId,
    pub kind: FrameKind,
}

/// A shared in-memory bus. Clones refer to the same bus.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<BlockingMutex<CriticalSectionRawMutex, BusInner>>,
}

/// One node's handle onto a [`LocalBus`].
#[derive(Clone)]
pub struct LocalPort {
    bus: LocalBus,
    node: NodeId,
}

/// Server side of an [`Endpoint`], attached to one [`LocalPort`].
///
/// Dropping the server detaches it, later requests for its port vanish.
pub struct EndpointServer<E: Endpoint> {
    port: LocalPort,
    rx: mpsc::Receiver<Incoming>,
    ident: mpsc::Sender<Incoming>,
    _pd: PhantomData<fn() -> E>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServeError {
    /// The request body did not decode as `E::Request`.
    Decode,
    /// The response could not be serialized.
    Encode,
    /// The server was detached from the bus.
    Closed,
}

#[derive(Default)]
struct BusInner {
    servers: HashMap<(NodeId, PortId), mpsc::Sender<Incoming>>,
    subscribers: HashMap<PortId, Vec<Subscriber>>,
    filter: Option<FrameFilter>,
}

struct Incoming {
    src: NodeId,
    body: Vec<u8>,
    reply: oneshot::Sender<Vec<u8>>,
}

struct Subscriber {
    node: NodeId,
    /// Returns `false` once the subscription is gone.
    deliver: Box<dyn Fn(NodeId, &[u8]) -> bool + Send>,
}

/// A filter that drops every `n`th frame it sees, counting across all
/// frame kinds. `0` never drops.
pub fn drop_every(n: u64) -> FrameFilter {
    let seen = AtomicU64::new(0);
    Arc::new(move |_info: &FrameInfo| {
        if n == 0 {
            return false;
        }
        let count = seen.fetch_add(1, Ordering::Relaxed) + 1;
        count % n == 0
    })
}

// ---- impl LocalBus ----

impl LocalBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BlockingMutex::new(BusInner::default())),
        }
    }

    /// Get a handle that sends as `node`.
    pub fn attach(&self, node: NodeId) -> LocalPort {
        LocalPort {
            bus: self.clone(),
            node,
        }
    }

    /// Install or remove the frame filter.
    pub fn set_filter(&self, filter: Option<FrameFilter>) {
        self.inner.with_lock(|inner| inner.filter = filter);
    }

    /// Nodes with at least one attached server.
    pub fn serving_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .inner
            .with_lock(|inner| inner.servers.keys().map(|(node, _)| *node).collect());
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusInner {
    fn drops(&self, info: &FrameInfo) -> bool {
        let dropped = self.filter.as_ref().is_some_and(|f| f(info));
        if dropped {
            trace!(
                "Dropped {:?} frame {} -> {} on port {}",
                info.kind, info.src, info.dst, info.port
            );
        }
        dropped
    }

    fn route_request(
        &self,
        src: NodeId,
        dst: NodeId,
        port: PortId,
        body: Vec<u8>,
    ) -> Option<oneshot::Receiver<Vec<u8>>> {
        let info = FrameInfo {
            src,
            dst,
            port,
            kind: FrameKind::Request,
        };
        if self.drops(&info) {
            return None;
        }
        let Some(server) = self.servers.get(&(dst, port)) else {
            trace!("No server for port {port} on node {dst}");
            return None;
        };
        let (reply, rx) = oneshot::channel();
        match server.try_send(Incoming { src, body, reply }) {
            Ok(()) => Some(rx),
            Err(TrySendError::Full(_)) => {
                debug!("Server queue for port {port} on node {dst} is full");
                None
            }
            Err(TrySendError::Closed(_)) => None,
        }
    }
}

// ---- impl LocalPort ----

impl LocalPort {
    pub fn bus(&self) -> &LocalBus {
        &self.bus
    }

    /// Attach a server for `E` on this node, queueing up to `bound` requests.
    ///
    /// A second server for the same endpoint replaces the first one.
    pub fn server<E: Endpoint>(&self, bound: usize) -> EndpointServer<E> {
        let (tx, rx) = mpsc::channel(bound.max(1));
        let key = (self.node, E::PORT);
        let replaced = self
            .bus
            .inner
            .with_lock(|inner| inner.servers.insert(key, tx.clone()));
        if replaced.is_some() {
            warn!("Replacing server for {} on node {}", E::PATH, self.node);
        }
        EndpointServer {
            port: self.clone(),
            rx,
            ident: tx,
            _pd: PhantomData,
        }
    }
}

impl Bus for LocalPort {
    fn local_node(&self) -> NodeId {
        self.node
    }

    fn request<E: Endpoint>(
        &self,
        dst: NodeId,
        req: &E::Request,
        timeout: Duration,
    ) -> impl Future<Output = Result<E::Response, RequestError>> + Send {
        let body = postcard::to_stdvec(req);
        let port = self.clone();
        async move {
            let body = body.map_err(|_| RequestError::Encode)?;
            let pending_reply = port
                .bus
                .inner
                .with_lock(|inner| inner.route_request(port.node, dst, E::PORT, body));

            // A lost request or response looks the same to the caller: nothing
            // arrives until the timeout elapses.
            let wait = async move {
                match pending_reply {
                    Some(rx) => match rx.await {
                        Ok(body) => body,
                        Err(_) => pending::<Vec<u8>>().await,
                    },
                    None => pending::<Vec<u8>>().await,
                }
            };
            let body = tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| RequestError::Timeout)?;
            postcard::from_bytes::<E::Response>(&body).map_err(|_| RequestError::Decode)
        }
    }

    fn subscribe<T: Topic>(&self, bound: usize) -> Subscription<T::Message> {
        let (tx, rx) = mpsc::channel(bound.max(1));
        let deliver = move |src: NodeId, body: &[u8]| -> bool {
            let Ok(t) = postcard::from_bytes::<T::Message>(body) else {
                warn!("Undecodable message on {}", T::PATH);
                return true;
            };
            match tx.try_send(Message { src, t }) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!("Subscriber queue for {} is full", T::PATH);
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        };
        let node = self.node;
        self.bus.inner.with_lock(|inner| {
            inner
                .subscribers
                .entry(T::PORT)
                .or_default()
                .push(Subscriber {
                    node,
                    deliver: Box::new(deliver),
                });
        });
        Subscription::new(rx)
    }

    fn broadcast<T: Topic>(&self, msg: &T::Message) -> Result<(), SendError> {
        let body = postcard::to_stdvec(msg).map_err(|_| SendError::Encode)?;
        let src = self.node;
        self.bus.inner.with_lock(|inner| {
            let Some(mut subs) = inner.subscribers.remove(&T::PORT) else {
                return;
            };
            subs.retain(|sub| {
                if sub.node == src {
                    return true;
                }
                let info = FrameInfo {
                    src,
                    dst: sub.node,
                    port: T::PORT,
                    kind: FrameKind::Message,
                };
                if inner.drops(&info) {
                    return true;
                }
                (sub.deliver)(src, &body)
            });
            inner.subscribers.insert(T::PORT, subs);
        });
        Ok(())
    }
}

// ---- impl EndpointServer ----

impl<E: Endpoint> EndpointServer<E> {
    /// Wait for one request and answer it with `f`.
    ///
    /// `f` receives the requester and the request. Returning `None` leaves
    /// the request unanswered, the requester will time out.
    pub async fn serve_blocking<F>(&mut self, f: F) -> Result<(), ServeError>
    where
        F: FnOnce(NodeId, E::Request) -> Option<E::Response>,
    {
        let Some(Incoming { src, body, reply }) = self.rx.recv().await else {
            return Err(ServeError::Closed);
        };
        let req = postcard::from_bytes::<E::Request>(&body).map_err(|_| ServeError::Decode)?;
        let Some(resp) = f(src, req) else {
            trace!("{} on node {} ignored request from {src}", E::PATH, self.port.node);
            return Ok(());
        };
        let body = postcard::to_stdvec(&resp).map_err(|_| ServeError::Encode)?;

        let info = FrameInfo {
            src: self.port.node,
            dst: src,
            port: E::PORT,
            kind: FrameKind::Response,
        };
        if self.port.bus.inner.with_lock(|inner| inner.drops(&info)) {
            return Ok(());
        }
        if reply.send(body).is_err() {
            trace!("Requester {src} gave up on {} before the response", E::PATH);
        }
        Ok(())
    }
}

impl<E: Endpoint> Drop for EndpointServer<E> {
    fn drop(&mut self) {
        let key = (self.port.node, E::PORT);
        let ident = &self.ident;
        self.port.bus.inner.with_lock(|inner| {
            if inner
                .servers
                .get(&key)
                .is_some_and(|tx| tx.same_channel(ident))
            {
                inner.servers.remove(&key);
            }
        });
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use tokio::time::Instant;

    use super::{FrameInfo, FrameKind, LocalBus, drop_every};
    use crate::{
        NodeId,
        bus::{Bus, RequestError},
        endpoint, topic,
    };

    endpoint!(Double, u32, u32, 900, "test.Double");
    topic!(Counter, u32, 901, "test.Counter");

    fn spawn_doubler(bus: &LocalBus, node: u16) {
        let mut server = bus.attach(NodeId(node)).server::<Double>(4);
        tokio::task::spawn(async move {
            loop {
                if server.serve_blocking(|_src, x| Some(x * 2)).await.is_err() {
                    break;
                }
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn request_response() {
        let bus = LocalBus::new();
        spawn_doubler(&bus, 10);
        let client = bus.attach(NodeId(1));
        let res = client
            .request::<Double>(NodeId(10), &21, Duration::from_secs(1))
            .await;
        assert_eq!(res, Ok(42));
        assert_eq!(bus.serving_nodes(), vec![NodeId(10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_node_waits_out_timeout() {
        let bus = LocalBus::new();
        let client = bus.attach(NodeId(1));
        let start = Instant::now();
        let res = client
            .request::<Double>(NodeId(77), &1, Duration::from_millis(250))
            .await;
        assert_eq!(res, Err(RequestError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out() {
        let bus = LocalBus::new();
        let mut server = bus.attach(NodeId(10)).server::<Double>(4);
        tokio::task::spawn(async move {
            while server.serve_blocking(|_, _| None).await.is_ok() {}
        });
        let res = bus
            .attach(NodeId(1))
            .request::<Double>(NodeId(10), &1, Duration::from_millis(100))
            .await;
        assert_eq!(res, Err(RequestError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_responses_time_out() {
        let bus = LocalBus::new();
        spawn_doubler(&bus, 10);
        bus.set_filter(Some(Arc::new(|info: &FrameInfo| {
            info.kind == FrameKind::Response
        })));
        let client = bus.attach(NodeId(1));
        let res = client
            .request::<Double>(NodeId(10), &3, Duration::from_millis(100))
            .await;
        assert_eq!(res, Err(RequestError::Timeout));

        bus.set_filter(None);
        let res = client
            .request::<Double>(NodeId(10), &3, Duration::from_millis(100))
            .await;
        assert_eq!(res, Ok(6));
    }

    #[tokio::test(start_paused = true)]
    async fn broadcasts_skip_the_sender() {
        let bus = LocalBus::new();
        let a = bus.attach(NodeId(1));
        let b = bus.attach(NodeId(2));
        let mut sub_a = a.subscribe::<Counter>(8);
        let mut sub_b = b.subscribe::<Counter>(8);

        a.broadcast::<Counter>(&5).unwrap();
        let msg = sub_b.recv().await.unwrap();
        assert_eq!(msg.src, NodeId(1));
        assert_eq!(msg.t, 5);
        assert!(sub_a.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_server_detaches() {
        let bus = LocalBus::new();
        let server = bus.attach(NodeId(10)).server::<Double>(4);
        assert_eq!(bus.serving_nodes(), vec![NodeId(10)]);
        drop(server);
        assert!(bus.serving_nodes().is_empty());
    }

    #[test]
    fn drop_every_counts_frames() {
        let filter = drop_every(3);
        let info = FrameInfo {
            src: NodeId(1),
            dst: NodeId(2),
            port: crate::PortId(1),
            kind: FrameKind::Request,
        };
        let dropped = AtomicUsize::new(0);
        for _ in 0..9 {
            if filter(&info) {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        assert_eq!(dropped.load(Ordering::Relaxed), 3);
        assert!(!drop_every(0)(&info));
    }
}
