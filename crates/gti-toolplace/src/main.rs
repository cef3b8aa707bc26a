//! Example binary: wires a config file and a handful of TCP endpoints
//! into a running `gti-runtime` place. One process per tree node; a
//! real deployment launches one of these per place with addresses
//! supplied by whatever orchestrates the tree (out of scope here, as
//! it is for the rest of this tool).

use std::collections::{HashMap, HashSet};
use std::fs;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gti_protocol::socket::{Endpoint, SocketProtocol};
use gti_protocol::{shmem::Hub, Protocol};
use gti_runtime::{build_place, PlaceSetup, ProtocolHandles, StrategyKind, StrategyKinds};
use tracing_subscriber::prelude::*;

/// Record uid reserved for the finalize broadcast. No record in this
/// binary's toolset declares it, so the constant lives here rather than
/// in `gti-record`.
const FINALIZE_UID: u64 = 1;
/// Record uid reserved for the panic broadcast.
const PANIC_UID: u64 = 2;

#[derive(Debug, Parser)]
#[clap(author, name = "gti-toolplace", version)]
struct Args {
    /// Path to a `key=value`-per-line module configuration file (§6).
    #[clap(long)]
    config: PathBuf,

    /// Address to bind and accept one connection per child on. Omit for
    /// a leaf place with no children.
    #[clap(long)]
    listen_down: Option<String>,

    /// Number of children to accept on `--listen-down` before starting.
    #[clap(long, default_value_t = 0)]
    children: u32,

    /// Address of this place's parent. Omit for the root place.
    #[clap(long)]
    connect_up: Option<String>,

    /// Addresses of sibling places to reach over intra-level
    /// communication, one per `--peer`.
    #[clap(long = "peer")]
    peers: Vec<String>,

    /// Which aggregation tier to use for every direction.
    #[clap(long, value_enum, default_value_t = CliStrategyKind::Isend)]
    strategy: CliStrategyKind,

    #[clap(long, env = "GTI_LOG", default_value = "info")]
    log: String,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliStrategyKind {
    Simple,
    Isend,
    Threaded,
}

impl From<CliStrategyKind> for StrategyKind {
    fn from(kind: CliStrategyKind) -> Self {
        match kind {
            CliStrategyKind::Simple => StrategyKind::Simple,
            CliStrategyKind::Isend => StrategyKind::Isend,
            CliStrategyKind::Threaded => StrategyKind::Threaded,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log);

    let place_config = load_place_config(&args.config)?;
    tracing::info!(place_id = place_config.id, layer = place_config.own_level, "starting place");

    let down_endpoints = accept_down_endpoints(args.listen_down.as_deref(), args.children)?;
    let up_endpoint = args.connect_up.as_deref().map(connect_endpoint).transpose()?;
    let peer_endpoints = args.peers.iter().map(|addr| connect_endpoint(addr)).collect::<anyhow::Result<Vec<_>>>()?;

    let down_protocol: Arc<dyn Protocol> = if down_endpoints.is_empty() {
        loopback_protocol(place_config.id)
    } else {
        SocketProtocol::new(place_config.id, down_endpoints)?
    };
    // The same sockets carry ordinary down traffic and the panic/finalize
    // broadcast in this example's star topology; a deployment with a
    // dedicated broadcast fanout would give it its own `SocketProtocol`.
    let broadcast_protocol = down_protocol.clone();
    let up_protocol: Arc<dyn Protocol> = match up_endpoint {
        Some(endpoint) => SocketProtocol::new(place_config.id, vec![endpoint])?,
        None => loopback_protocol(place_config.id),
    };
    let intra_protocol: Arc<dyn Protocol> = if peer_endpoints.is_empty() {
        loopback_protocol(place_config.id)
    } else {
        SocketProtocol::new(place_config.id, peer_endpoints)?
    };

    let kind: StrategyKind = args.strategy.into();
    let setup = PlaceSetup {
        place_id: place_config.id,
        layer: place_config.own_level,
        up_channel: 0,
        channel_fan_in: args.children,
        finalize_uid: FINALIZE_UID,
        panic_uid: PANIC_UID,
        out_of_order_uids: HashSet::new(),
        recv_buf_capacity: 1 << 16,
        timeout_interval: Duration::from_secs(5),
        descriptors: HashMap::new(),
        analyses: Vec::new(),
    };
    let protocols = ProtocolHandles {
        down: down_protocol,
        broadcast: broadcast_protocol,
        intra: intra_protocol,
        up: up_protocol,
    };
    let kinds = StrategyKinds { down: kind, up: kind, intra: kind };

    let (mut place, _panic_receiver) = build_place(setup, protocols, kinds);
    place.run().map_err(Into::into)
}

fn init_logging(filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(gti_ops::tracing::Layer::new(gti_ops::stderr_log_handler, std::time::SystemTime::now).with_filter(env_filter))
        .init();
}

fn load_place_config(path: &PathBuf) -> anyhow::Result<gti_config::PlaceConfig> {
    let raw = fs::read_to_string(path)?;
    let mut map = std::collections::BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("malformed config line (expected key=value): {line}"))?;
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(gti_config::PlaceConfig::from_map(&map)?)
}

fn accept_down_endpoints(listen: Option<&str>, children: u32) -> anyhow::Result<Vec<Endpoint>> {
    let Some(addr) = listen else {
        return Ok(Vec::new());
    };
    let listener = TcpListener::bind(addr)?;
    let mut endpoints = Vec::with_capacity(children as usize);
    for _ in 0..children {
        let (stream, peer) = listener.accept()?;
        tracing::info!(%peer, "accepted child connection");
        let endpoint = Endpoint::Tcp(stream);
        endpoint.tune()?;
        endpoints.push(endpoint);
    }
    Ok(endpoints)
}

fn connect_endpoint(addr: &str) -> anyhow::Result<Endpoint> {
    let stream = TcpStream::connect(addr)?;
    let endpoint = Endpoint::Tcp(stream);
    endpoint.tune()?;
    Ok(endpoint)
}

/// A self-contained `Protocol` for a direction this place has no real
/// peer on (a root's parent, a leaf's children, a singleton's siblings):
/// nothing ever drains it, so sends silently queue and receives block
/// until shutdown, which is the correct behavior for a direction that
/// genuinely has no traffic.
fn loopback_protocol(place_id: u32) -> Arc<dyn Protocol> {
    let hub = Hub::new(place_id);
    Arc::new(hub.connect())
}
