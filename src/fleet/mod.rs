//! Cluster Fabric Module
//!
//! This module implements the message-passing fabric the exploration fleet
//! runs on: a statically sized set of nodes with fixed roles, exchanging
//! small tagged messages over reliable point-to-point links.
//!
//! ## Architecture Overview
//! 1. **Roles by rank**: rank 0 is the master, rank 1 the timer, ranks
//!    2..N-1 the workers. The fleet size is fixed at start; membership
//!    never changes (a worker crash is fatal).
//! 2. **Wire protocol**: each message is one tag byte plus an opaque
//!    payload, framed with a big-endian `u32` length prefix. Tag-only
//!    messages carry a single pad byte so a frame is never empty.
//! 3. **Transport**: workers and the timer dial the master's TCP listener
//!    and introduce themselves with a rank handshake. TCP guarantees the
//!    FIFO-per-directed-pair ordering the coordinator relies on. An
//!    in-memory mailbox with the identical contract backs the tests.
//!
//! ## Submodules
//! - **`types`**: Ranks, roles and fleet layout validation.
//! - **`protocol`**: The tag set, message encoding and protocol constants.
//! - **`transport`**: Mailboxes over framed TCP or in-memory channels.
//! - **`launch`**: Spawns a whole fleet as local child processes.

pub mod launch;
pub mod protocol;
pub mod transport;
pub mod types;
