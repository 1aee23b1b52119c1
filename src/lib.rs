//! Distribution Driver for a Symbolic-Execution Engine
//!
//! This library crate defines the core modules of the exploration fleet.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of six loosely coupled subsystems:
//!
//! - **`config`**: The command-line surface. Parses the driver options,
//!   including the two-phase depth bounds, search/offload policies and the
//!   interpreter knobs that are forwarded verbatim to the engine.
//! - **`fleet`**: The cluster fabric. Defines ranks and roles, the tagged
//!   wire protocol, the framed TCP point-to-point transport (FIFO per
//!   directed pair) and the local fleet launcher.
//! - **`engine`**: The interpreter adapter. A narrow trait over the
//!   symbolic-execution engine, program-module loading, the per-rank output
//!   handler, and the bundled deterministic reference interpreter.
//! - **`master`**: The coordination layer. Owns the global state machine:
//!   prefix harvest, initial distribution, the steady-state receive loop,
//!   work stealing, and the termination protocols.
//! - **`worker`**: The task driver. Executes prefix and normal tasks,
//!   interleaving exploration with offload responsiveness.
//! - **`timer`**: The deadline node. Sleeps once, then reports a global
//!   timeout to the master.

pub mod config;
pub mod engine;
pub mod fleet;
pub mod master;
pub mod timer;
pub mod worker;
