use std::{error::Error, path::PathBuf};

use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use regconf::{
    Configurator, NodeId,
    bus::local::{LocalBus, drop_every},
    config::ConfiguratorConfig,
};

mod vehicle;

const QUADCOPTER: &str = include_str!("../quadcopter.toml");

#[derive(Parser)]
#[command(name = "vehicle-configurator")]
#[command(about = "Discover and configure the registers of a mocked quadcopter")]
#[command(version)]
struct Cli {
    /// Configuration file. The bundled quadcopter layout is used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node id of the configurator itself
    #[arg(long, default_value = "127")]
    node_id: u16,

    /// Number of ESCs on the vehicle (at most 4)
    #[arg(long, default_value = "4")]
    escs: u16,

    /// Drop every Nth frame on the bus, 0 keeps every frame
    #[arg(long, default_value = "0")]
    drop_every: u64,

    /// Override the heartbeat scan window, in seconds
    #[arg(long)]
    scan_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfiguratorConfig::from_file(path)?,
        None => ConfiguratorConfig::from_toml(QUADCOPTER)?,
    };
    if let Some(secs) = cli.scan_secs {
        config.scan_secs = secs;
    }

    let bus = LocalBus::new();
    if cli.drop_every > 0 {
        info!("Dropping every {}th frame", cli.drop_every);
        bus.set_filter(Some(drop_every(cli.drop_every)));
    }
    let _vehicle = vehicle::spawn_quadcopter(&bus, cli.escs);

    let mut configurator = Configurator::new(bus.attach(NodeId(cli.node_id)), &config)?;
    let report = configurator.run().await;

    for node in &report.nodes {
        if let Some(name) = &node.aborted_at {
            error!("Node {}: aborted at {name}", node.node);
        } else if node.suspicious {
            warn!("Node {}: never answered List", node.node);
        } else {
            info!(
                "Node {}: {} registers, {} written, {} commands",
                node.node,
                node.rows.len(),
                node.writes,
                node.commands.len()
            );
        }
    }
    Ok(())
}
