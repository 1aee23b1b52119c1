use clap::Parser;
use symfleet::config::Options;
use symfleet::fleet::launch;
use symfleet::fleet::transport;
use symfleet::fleet::types::{FleetLayout, Rank, Role};
use symfleet::{master, timer, worker};

use std::net::SocketAddr;

/// Every terminal path aborts the fleet with this status; a clean zero
/// exit is reserved for nodes that were killed gracefully.
const FLEET_ABORT_CODE: i32 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();

    tracing_subscriber::fmt()
        .with_max_level(match options.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        })
        .init();

    if options.spawn_local {
        let layout = FleetLayout::new(options.fleet_size.unwrap_or(0))?;
        let code = launch::run_local_fleet(layout, options.master_addr).await?;
        std::process::exit(code);
    }

    let (rank, layout, addr) = node_binding(&options)?;
    tracing::info!(
        "starting node: rank {} of {} ({:?})",
        rank,
        layout.size(),
        Role::of(rank)
    );

    match Role::of(rank) {
        Role::Master => {
            let mailbox = transport::serve_master(addr, layout).await?;
            let mut ctx = master::MasterContext::new(options, layout, mailbox);
            let outcome = master::run(&mut ctx).await?;
            tracing::info!("master terminal event: {:?}", outcome);
            ctx.mailbox.shutdown();
            std::process::exit(FLEET_ABORT_CODE)
        }
        Role::Timer => {
            let mailbox = transport::connect(addr, rank).await?;
            timer::run(mailbox, options.deadline_secs()).await
        }
        Role::Worker => {
            let mailbox = transport::connect(addr, rank).await?;
            let mut ctx = worker::WorkerContext::new(options, rank, mailbox);
            worker::run(&mut ctx).await
        }
    }
}

/// Resolves this node's placement from flags or the launcher-provided
/// environment. Everything here is a configuration error: reported
/// locally, before any fleet traffic.
fn node_binding(options: &Options) -> anyhow::Result<(Rank, FleetLayout, SocketAddr)> {
    let rank = options
        .rank
        .ok_or_else(|| anyhow::anyhow!("missing --rank (or {})", launch::ENV_RANK))?;
    let size = options
        .fleet_size
        .ok_or_else(|| anyhow::anyhow!("missing --fleet-size (or {})", launch::ENV_FLEET_SIZE))?;
    let addr = options
        .master_addr
        .ok_or_else(|| anyhow::anyhow!("missing --master-addr (or {})", launch::ENV_MASTER_ADDR))?;

    let layout = FleetLayout::new(size)?;
    let rank = Rank(rank);
    if !layout.contains(rank) {
        anyhow::bail!("rank {} out of range for fleet of {}", rank, layout.size());
    }
    if !options.input_file.exists() {
        anyhow::bail!(
            "input bitcode {} does not exist",
            options.input_file.display()
        );
    }
    // Surface policy fallback warnings once, at startup.
    let _ = options.search_policy();
    let _ = options.offload_policy();
    let _ = options.libc();

    if let Some(dir) = &options.run_in {
        std::env::set_current_dir(dir)
            .map_err(|e| anyhow::anyhow!("cannot change to {}: {}", dir.display(), e))?;
    }

    Ok((rank, layout, addr))
}
