use core::time::Duration;

use log::warn;
use tokio::time::{Instant, MissedTickBehavior, interval};

use crate::{
    bus::Bus,
    well_known::{Health, Heartbeat, HeartbeatTopic, Mode},
};

/// A proxy type usable for creating helper services
pub struct Services<B: Bus> {
    pub(crate) inner: B,
}

/// Status fields a node reports in its heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeStatus {
    pub health: Health,
    pub mode: Mode,
    pub vendor_specific_status_code: u8,
}

impl<B: Bus> Services<B> {
    /// Publish this node's [`Heartbeat`] every `period`, forever.
    ///
    /// Uptime is counted in whole seconds from the moment the service starts.
    pub async fn heartbeat_publisher(&self, period: Duration, status: NodeStatus) -> ! {
        let started = Instant::now();
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let uptime = u32::try_from(started.elapsed().as_secs()).unwrap_or(u32::MAX);
            let msg = Heartbeat {
                uptime,
                health: status.health,
                mode: status.mode,
                vendor_specific_status_code: status.vendor_specific_status_code,
            };
            if let Err(e) = self.inner.broadcast::<HeartbeatTopic>(&msg) {
                warn!("Heartbeat from {} not sent: {e}", self.inner.local_node());
            }
        }
    }
}
