//! Worker-state registry.
//!
//! Each worker is in exactly one tagged state rather than in a handful of
//! containers that must be kept consistent by hand: `Free`, or `Busy`
//! with two flags for the offload exchange. A single fleet-wide slot
//! tracks the one offload request allowed in flight.

use crate::fleet::types::{FleetLayout, Rank};

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Free,
    Busy {
        /// Worker announced harvestable sub-work.
        offload_ready: bool,
        /// Worker has the one outstanding offload request.
        offload_active: bool,
    },
}

impl WorkerState {
    fn busy_quiet() -> WorkerState {
        WorkerState::Busy {
            offload_ready: false,
            offload_active: false,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, WorkerState::Busy { .. })
    }
}

pub struct WorkerRegistry {
    states: BTreeMap<Rank, WorkerState>,
    /// Workers already sent `KILL` (surplus in no-lb runs). They still
    /// count as free so the shutdown condition stays `|Free| == N-2`.
    killed: BTreeSet<Rank>,
    /// The at-most-one offload request in flight fleet-wide.
    in_flight: Option<Rank>,
    kill_acks: BTreeSet<Rank>,
}

impl WorkerRegistry {
    pub fn new(layout: &FleetLayout) -> WorkerRegistry {
        WorkerRegistry {
            states: layout.workers().map(|w| (w, WorkerState::Free)).collect(),
            killed: BTreeSet::new(),
            in_flight: None,
            kill_acks: BTreeSet::new(),
        }
    }

    pub fn state(&self, rank: Rank) -> Option<WorkerState> {
        self.states.get(&rank).copied()
    }

    pub fn worker_count(&self) -> usize {
        self.states.len()
    }

    pub fn free_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| **s == WorkerState::Free)
            .count()
    }

    pub fn busy_count(&self) -> usize {
        self.states.values().filter(|s| s.is_busy()).count()
    }

    pub fn all_free(&self) -> bool {
        self.free_count() == self.worker_count()
    }

    pub fn mark_busy(&mut self, rank: Rank) {
        self.states.insert(rank, WorkerState::busy_quiet());
    }

    /// Worker reported `FINISH`: back to `Free`, all offload bookkeeping
    /// for it cleared. If it held the in-flight offload request, the
    /// slot opens again.
    pub fn mark_finished(&mut self, rank: Rank) {
        self.states.insert(rank, WorkerState::Free);
        if self.in_flight == Some(rank) {
            self.in_flight = None;
        }
    }

    /// Records a ready announcement. Only meaningful for busy workers; a
    /// stray announcement from a free worker is dropped.
    pub fn set_offload_ready(&mut self, rank: Rank) {
        if let Some(WorkerState::Busy { offload_active, .. }) = self.states.get(&rank).copied() {
            self.states.insert(
                rank,
                WorkerState::Busy {
                    offload_ready: true,
                    offload_active,
                },
            );
        }
    }

    /// Retracts a ready announcement. A retraction for a worker that is
    /// not currently ready is a no-op.
    pub fn clear_offload_ready(&mut self, rank: Rank) {
        if let Some(WorkerState::Busy { offload_active, .. }) = self.states.get(&rank).copied() {
            self.states.insert(
                rank,
                WorkerState::Busy {
                    offload_ready: false,
                    offload_active,
                },
            );
        }
    }

    /// Picks the donor for a new offload request: the lowest-rank busy
    /// worker that is ready and not already carrying one. Claims the
    /// fleet-wide slot; returns `None` when the slot is taken or no donor
    /// qualifies.
    pub fn begin_offload(&mut self) -> Option<Rank> {
        if self.in_flight.is_some() {
            return None;
        }
        let donor = self.states.iter().find_map(|(rank, state)| match state {
            WorkerState::Busy {
                offload_ready: true,
                offload_active: false,
            } => Some(*rank),
            _ => None,
        })?;
        self.states.insert(
            donor,
            WorkerState::Busy {
                offload_ready: true,
                offload_active: true,
            },
        );
        self.in_flight = Some(donor);
        Some(donor)
    }

    pub fn offload_in_flight(&self) -> Option<Rank> {
        self.in_flight
    }

    /// Offload response received: the donor no longer carries a request.
    /// Only the matching donor releases the fleet-wide slot, so a stale
    /// response cannot cancel a newer request.
    pub fn complete_offload(&mut self, rank: Rank) {
        if let Some(WorkerState::Busy { offload_ready, .. }) = self.states.get(&rank).copied() {
            self.states.insert(
                rank,
                WorkerState::Busy {
                    offload_ready,
                    offload_active: false,
                },
            );
        }
        if self.in_flight == Some(rank) {
            self.in_flight = None;
        }
    }

    /// Lowest-rank free worker that has not been killed.
    pub fn next_free(&self) -> Option<Rank> {
        self.states.iter().find_map(|(rank, state)| {
            (*state == WorkerState::Free && !self.killed.contains(rank)).then_some(*rank)
        })
    }

    pub fn mark_killed(&mut self, rank: Rank) {
        self.killed.insert(rank);
    }

    pub fn is_killed(&self, rank: Rank) -> bool {
        self.killed.contains(&rank)
    }

    /// Worker ranks that have not yet been sent `KILL`.
    pub fn live_workers(&self) -> Vec<Rank> {
        self.states
            .keys()
            .filter(|r| !self.killed.contains(r))
            .copied()
            .collect()
    }

    /// Counts a `KILL_COMP`, once per worker. Returns the total so far.
    pub fn record_kill_ack(&mut self, rank: Rank) -> usize {
        self.kill_acks.insert(rank);
        self.kill_acks.len()
    }

    pub fn kill_ack_count(&self) -> usize {
        self.kill_acks.len()
    }

    /// Structural invariants, checked after every message the master
    /// processes.
    pub fn assert_consistent(&self) {
        assert_eq!(
            self.free_count() + self.busy_count(),
            self.worker_count(),
            "free/busy partition lost a worker"
        );
        if let Some(rank) = self.in_flight {
            assert!(
                matches!(
                    self.states.get(&rank),
                    Some(WorkerState::Busy {
                        offload_active: true,
                        ..
                    })
                ),
                "in-flight offload target {} is not an active busy worker",
                rank
            );
        }
        let active = self
            .states
            .values()
            .filter(|s| {
                matches!(
                    s,
                    WorkerState::Busy {
                        offload_active: true,
                        ..
                    }
                )
            })
            .count();
        assert!(active <= 1, "more than one offload request in flight");
        assert_eq!(
            active == 1,
            self.in_flight.is_some(),
            "offload slot out of sync with worker states"
        );
    }
}
