//! Local fleet launcher.
//!
//! The driver is normally started once per node by an external process
//! manager. For single-machine runs, `--spawn-local` makes the binary act
//! as that manager instead: it re-executes itself `--fleet-size` times
//! with the rank, size and master address passed through `SYMFLEET_*`
//! environment variables, then waits for the fleet to terminate.

use super::types::FleetLayout;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};

/// Environment variables a spawned node reads its placement from.
pub const ENV_RANK: &str = "SYMFLEET_RANK";
pub const ENV_FLEET_SIZE: &str = "SYMFLEET_FLEET_SIZE";
pub const ENV_MASTER_ADDR: &str = "SYMFLEET_MASTER_ADDR";

/// Spawns the whole fleet locally and waits for it. Returns the master's
/// exit code, which carries the fleet-abort status.
pub async fn run_local_fleet(layout: FleetLayout, master_addr: Option<SocketAddr>) -> Result<i32> {
    let addr = match master_addr {
        Some(addr) => addr,
        None => pick_local_addr().await?,
    };

    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let args: Vec<String> = std::env::args()
        .skip(1)
        .filter(|a| a != "--spawn-local")
        .collect();

    let mut children: Vec<(u32, Child)> = Vec::with_capacity(layout.size());
    for rank in 0..layout.size() as u32 {
        let child = Command::new(&exe)
            .args(&args)
            .env(ENV_RANK, rank.to_string())
            .env(ENV_FLEET_SIZE, layout.size().to_string())
            .env(ENV_MASTER_ADDR, addr.to_string())
            .spawn()
            .with_context(|| format!("failed to spawn fleet node {}", rank))?;
        tracing::debug!("spawned rank {} (pid {:?})", rank, child.id());
        children.push((rank, child));
    }

    let mut master_code = 0;
    for (rank, mut child) in children {
        let status = child
            .wait()
            .await
            .with_context(|| format!("failed waiting for rank {}", rank))?;
        tracing::info!("rank {} exited with {}", rank, status);
        if rank == 0 {
            master_code = status.code().unwrap_or(1);
        }
    }
    Ok(master_code)
}

/// Reserves a loopback port for the master's listener.
async fn pick_local_addr() -> Result<SocketAddr> {
    let probe = TcpListener::bind("127.0.0.1:0").await?;
    let addr = probe.local_addr()?;
    drop(probe);
    Ok(addr)
}
