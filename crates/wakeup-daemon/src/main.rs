//! wakeup-sim: two in-process nodes exercising the wakeup protocol.
//!
//! Node 1 announces a payload to node 2 over a shared capability, then both
//! drop interest and the GC reclaims their sessions.

use anyhow::{bail, Result};
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wakeup_core::{
    Announce, Capability, MemoryTransport, SessionHandlers, SessionInfo, SessionOptions,
    SwarmConfig, WakeupPeer, WakeupSwarm,
};
use wakeup_daemon::{connect, pump_until_idle, spawn, GcArgs, SharedSwarm};

#[derive(Parser, Debug)]
#[command(name = "wakeup-sim")]
#[command(about = "Simulate two wakeup nodes over an in-memory transport")]
struct Args {
    #[command(flatten)]
    gc: GcArgs,

    /// Shared capability as 64 hex characters (generated if not provided)
    #[arg(long)]
    capability: Option<String>,

    /// Payload node 1 announces to node 2
    #[arg(long, default_value = "something changed")]
    announce: String,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

/// Logs every session callback for one node.
struct LogHandlers {
    node: &'static str,
}

impl SessionHandlers for LogHandlers {
    fn on_peer_add(&mut self, peer: &mut WakeupPeer, session: &SessionInfo) {
        info!("[{}] peer {} joined {}", self.node, peer.stream(), session.id);
    }

    fn on_peer_active(&mut self, peer: &mut WakeupPeer, _session: &SessionInfo) {
        info!("[{}] peer {} is active", self.node, peer.stream());
    }

    fn on_peer_inactive(&mut self, peer: &mut WakeupPeer, _session: &SessionInfo) {
        info!("[{}] peer {} is inactive", self.node, peer.stream());
    }

    fn on_peer_remove(&mut self, peer: &mut WakeupPeer, _session: &SessionInfo) {
        info!("[{}] peer {} left", self.node, peer.stream());
    }

    fn on_announce(&mut self, announce: &Announce, peer: &mut WakeupPeer, _session: &SessionInfo) {
        peer.clock += 1;
        info!(
            "[{}] announce from {}: {}",
            self.node,
            peer.stream(),
            String::from_utf8_lossy(&announce.payload)
        );
    }
}

fn node(config: &SwarmConfig) -> WakeupSwarm<MemoryTransport> {
    WakeupSwarm::with_config(MemoryTransport::new(), config.clone())
}

async fn sessions_left(nodes: &[SharedSwarm<MemoryTransport>]) -> usize {
    let mut left = 0;
    for node in nodes {
        left += node.lock().await.session_count();
    }
    left
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,wakeup_core=debug,wakeup_daemon=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SwarmConfig::from(&args.gc);
    let capability = match &args.capability {
        Some(hex) => hex.parse::<Capability>()?,
        None => Capability::generate(),
    };
    let id = capability.discovery_key();
    info!("Topic: {}", id);
    info!(
        "GC: every {:?}, reclaim after {} idle ticks",
        config.gc_interval, config.gc_idle_ticks
    );

    let (node1, gc1) = spawn(node(&config));
    let (node2, gc2) = spawn(node(&config));
    let nodes = [node1.clone(), node2.clone()];

    node1.lock().await.session(
        capability.clone(),
        SessionOptions::active(),
        LogHandlers { node: "node1" },
    );
    node2
        .lock()
        .await
        .session(capability, SessionOptions::active(), LogHandlers { node: "node2" });

    let (s1, _) = connect(&node1, &node2).await;
    pump_until_idle(&nodes).await;

    let sent = node1
        .lock()
        .await
        .session_mut(&id)
        .is_some_and(|mut session| session.announce_by_stream(s1, Announce::new(args.announce.clone())));
    if !sent {
        bail!("node1 has no confirmed peer to announce to");
    }
    pump_until_idle(&nodes).await;

    info!("Both nodes dropping interest");
    for node in &nodes {
        if let Some(mut session) = node.lock().await.session_mut(&id) {
            session.inactive();
        }
    }
    pump_until_idle(&nodes).await;

    let deadline = config.gc_interval * (config.gc_idle_ticks + 2);
    let reclaimed = tokio::time::timeout(deadline, async {
        while sessions_left(&nodes).await > 0 {
            tokio::time::sleep(config.gc_interval / 2).await;
            pump_until_idle(&nodes).await;
        }
    })
    .await;
    if reclaimed.is_err() {
        warn!("Sessions still alive after {:?}", deadline);
        bail!("GC did not reclaim idle sessions");
    }
    info!("All sessions reclaimed");

    for node in &nodes {
        node.lock().await.destroy();
    }
    drop(nodes);
    drop(node1);
    drop(node2);
    tokio::time::timeout(Duration::from_secs(1), async {
        let _ = gc1.await;
        let _ = gc2.await;
    })
    .await?;

    info!("Shutting down");
    Ok(())
}
