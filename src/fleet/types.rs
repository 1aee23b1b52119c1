use serde::{Deserialize, Serialize};
use std::fmt;

/// Node index within the fleet. Roles are statically bound to ranks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rank(pub u32);

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const MASTER_RANK: Rank = Rank(0);
pub const TIMER_RANK: Rank = Rank(1);
pub const FIRST_WORKER_RANK: Rank = Rank(2);

/// Smallest fleet that still has a worker: master + timer + one worker.
pub const MIN_FLEET_SIZE: usize = 3;

/// Role a node plays, derived from its rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Timer,
    Worker,
}

impl Role {
    pub fn of(rank: Rank) -> Role {
        match rank {
            MASTER_RANK => Role::Master,
            TIMER_RANK => Role::Timer,
            _ => Role::Worker,
        }
    }
}

/// Validated fleet size plus the derived worker range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetLayout {
    size: usize,
}

impl FleetLayout {
    /// Rejects fleets too small to hold master, timer and a worker.
    pub fn new(size: usize) -> anyhow::Result<Self> {
        if size < MIN_FLEET_SIZE {
            anyhow::bail!(
                "fleet size {} is too small: need at least {} nodes (master, timer, worker)",
                size,
                MIN_FLEET_SIZE
            );
        }
        Ok(FleetLayout { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn worker_count(&self) -> usize {
        self.size - 2
    }

    /// Worker ranks in ascending order: 2..N-1.
    pub fn workers(&self) -> impl Iterator<Item = Rank> {
        (FIRST_WORKER_RANK.0..self.size as u32).map(Rank)
    }

    pub fn contains(&self, rank: Rank) -> bool {
        (rank.0 as usize) < self.size
    }
}
