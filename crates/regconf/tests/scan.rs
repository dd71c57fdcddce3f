use std::{collections::BTreeSet, time::Duration};

use regconf::{
    Configurator, NodeId,
    bus::{Bus, local::LocalBus},
    config::ConfiguratorConfig,
    mock::MockNode,
    well_known::{Heartbeat, HeartbeatTopic},
};
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn heartbeats_over_the_window() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = LocalBus::new();

    // Different periods, so the same nodes beacon several times in the window.
    let _nodes: Vec<_> = [(42, 300), (50, 700), (51, 450)]
        .into_iter()
        .map(|(node, ms)| {
            MockNode::new(NodeId(node))
                .heartbeat_period(Duration::from_millis(ms))
                .spawn(&bus)
        })
        .collect();

    let configurator = Configurator::new(bus.attach(NodeId(127)), &ConfiguratorConfig::default())
        .unwrap();

    let seen = configurator.scan_network().await;

    let expected: BTreeSet<NodeId> = [42, 50, 51].into_iter().map(NodeId).collect();
    assert_eq!(seen, expected);
    let obs = configurator.tracker().get(NodeId(42)).unwrap();
    assert!(obs.heartbeat.is_some());
}

#[tokio::test(start_paused = true)]
async fn quiet_network_is_empty() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = LocalBus::new();
    let mut configurator =
        Configurator::new(bus.attach(NodeId(127)), &ConfiguratorConfig::default()).unwrap();

    let report = configurator.run().await;
    assert!(report.nodes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn own_heartbeats_are_not_a_node() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = LocalBus::new();
    let me = bus.attach(NodeId(127));
    let configurator = Configurator::new(me.clone(), &ConfiguratorConfig::default()).unwrap();

    let beacon = tokio::task::spawn(async move {
        loop {
            me.broadcast::<HeartbeatTopic>(&Heartbeat::nominal(0)).unwrap();
            sleep(Duration::from_millis(200)).await;
        }
    });

    // An outsider shows up half way through the window.
    let outsider = bus.attach(NodeId(7));
    let late = tokio::task::spawn(async move {
        sleep(Duration::from_millis(1500)).await;
        outsider
            .broadcast::<HeartbeatTopic>(&Heartbeat::nominal(3))
            .unwrap();
    });

    let seen = configurator.scan_network().await;
    beacon.abort();
    late.await.unwrap();

    assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![NodeId(7)]);
}

#[tokio::test(start_paused = true)]
async fn tracking_stops_with_the_window() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = LocalBus::new();
    let configurator = Configurator::new(bus.attach(NodeId(127)), &ConfiguratorConfig::default())
        .unwrap();

    let seen = configurator.scan_network().await;
    assert!(seen.is_empty());

    // Heartbeats after the window are not recorded.
    let late = bus.attach(NodeId(9));
    late.broadcast::<HeartbeatTopic>(&Heartbeat::nominal(1)).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(configurator.tracker().snapshot().is_empty());
}
