//! Master Coordinator Module
//!
//! The master owns the global state machine of an exploration run and is
//! the only node that ever makes scheduling decisions.
//!
//! ## Run Phases
//! 1. **Bootstrap**: with a zero phase-1 depth the run is degenerate:
//!    one worker explores unbounded, everyone else stays idle.
//! 2. **Prefix harvest**: the master itself runs the engine to the
//!    phase-1 depth and banks the prefixes of every path still alive.
//! 3. **Initial distribution**: prefixes are dealt round-robin to
//!    workers; surplus workers are killed up front (or parked free when
//!    load balancing may still find work for them).
//! 4. **Steady state**: a non-blocking receive loop drains worker
//!    reports, re-dispatches banked prefixes, and initiates at most one
//!    work-stealing exchange at a time.
//!
//! The run ends on exactly one of three terminal events: all workers
//! free, a reported bug, or the global timeout. All three abort the
//! fleet with a non-zero status; a clean exit is never produced on the
//! terminal path.
//!
//! ## Submodules
//! - **`registry`**: Per-worker tagged state and the offload slot.
//! - **`trace`**: The grep-friendly protocol event log.

pub mod registry;
pub mod trace;


use crate::config::{OffloadPolicy, Options};
use crate::engine::module::ProgramModule;
use crate::engine::output::OutputHandler;
use crate::engine::{InterpreterFactory, PathRecord, Prefix};
use crate::fleet::protocol::Message;
use crate::fleet::transport::Mailbox;
use crate::fleet::types::{FleetLayout, Rank, FIRST_WORKER_RANK, MASTER_RANK};
use registry::WorkerRegistry;
use trace::MasterTrace;

use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use std::time::Duration;

/// Backoff between inbox probes when nothing is arriving, so the steady
/// loop keeps initiating offloads without busy-spinning.
const POLL_BACKOFF: Duration = Duration::from_millis(2);

/// Terminal event that ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterOutcome {
    AllFinished,
    BugFound { worker: Rank },
    Timeout,
    DegenerateFinish,
}

pub struct MasterContext {
    pub options: Options,
    pub layout: FleetLayout,
    pub mailbox: Mailbox,
    pub factory: InterpreterFactory,
}

impl MasterContext {
    pub fn new(options: Options, layout: FleetLayout, mailbox: Mailbox) -> MasterContext {
        MasterContext {
            options,
            layout,
            mailbox,
            factory: crate::engine::default_factory(),
        }
    }

    pub fn with_factory(mut self, factory: InterpreterFactory) -> MasterContext {
        self.factory = factory;
        self
    }
}

/// Runs the master to its terminal event.
pub async fn run(ctx: &mut MasterContext) -> Result<MasterOutcome> {
    let mut trace = MasterTrace::open(&ctx.options.output_dir)?;
    if ctx.options.degenerate_mode() {
        run_degenerate(ctx, &mut trace).await
    } else {
        run_two_phase(ctx, &mut trace).await
    }
}

/// Phase 0: one worker, one unbounded task, one terminal message.
async fn run_degenerate(ctx: &mut MasterContext, trace: &mut MasterTrace) -> Result<MasterOutcome> {
    ctx.mailbox.send(FIRST_WORKER_RANK, Message::NormalTask)?;
    trace.start_work(FIRST_WORKER_RANK);

    let (from, msg) = ctx.mailbox.recv().await?;
    match msg {
        Message::Finish => {
            trace.elapsed("Normal Mode");
            ctx.mailbox.send(FIRST_WORKER_RANK, Message::Kill)?;
            trace.kill(FIRST_WORKER_RANK);
            await_kill_comp(ctx, FIRST_WORKER_RANK).await?;
            Ok(MasterOutcome::DegenerateFinish)
        }
        Message::Timeout => {
            trace.elapsed("Timeout:");
            Ok(MasterOutcome::Timeout)
        }
        Message::BugFound => {
            trace.bug_found(from);
            trace.elapsed("");
            Ok(MasterOutcome::BugFound { worker: from })
        }
        other => bail!(
            "master received an illegal tag {} from rank {} in degenerate mode",
            other.name(),
            from
        ),
    }
}

async fn run_two_phase(ctx: &mut MasterContext, trace: &mut MasterTrace) -> Result<MasterOutcome> {
    // Phase 1: harvest prefixes by exploring to the phase-1 depth.
    let mut queue = harvest_prefixes(ctx)?;
    trace.master_start();
    tracing::info!("phase 1 harvested {} prefixes", queue.len());

    let mut registry = WorkerRegistry::new(&ctx.layout);

    // Phase 2: deal the first prefixes out, one per worker.
    let workers: Vec<Rank> = ctx.layout.workers().collect();
    let seeded = workers.len().min(queue.len());
    for worker in workers.iter().take(seeded) {
        let Some(prefix) = queue.pop_front() else {
            break;
        };
        dispatch_prefix(ctx, trace, &mut registry, *worker, prefix)?;
    }
    // Fewer prefixes than workers: the surplus is dead weight unless
    // load balancing can feed it later.
    for worker in workers.iter().skip(seeded) {
        if !ctx.options.lb {
            ctx.mailbox.send(*worker, Message::Kill)?;
            trace.kill(*worker);
            registry.mark_killed(*worker);
        }
    }
    registry.assert_consistent();

    if queue.is_empty() {
        trace.done_with_prefixes();
    }
    if registry.all_free() {
        // Nothing was dispatched at all; the tree ended above the
        // phase-1 depth and the harvest run already covered it.
        return shutdown(ctx, trace, &mut registry).await;
    }

    // Phase 3: steady state.
    loop {
        match ctx.mailbox.try_recv()? {
            Some((from, msg)) => {
                let outcome =
                    handle_message(ctx, trace, &mut registry, &mut queue, from, msg).await?;
                registry.assert_consistent();
                if let Some(outcome) = outcome {
                    return Ok(outcome);
                }
            }
            None => tokio::time::sleep(POLL_BACKOFF).await,
        }
        maybe_initiate_offload(ctx, trace, &mut registry)?;
    }
}

/// Loads the program, runs the engine to the phase-1 depth on this node,
/// and returns the banked prefix queue.
fn harvest_prefixes(ctx: &mut MasterContext) -> Result<VecDeque<Prefix>> {
    let module = ProgramModule::load(&ctx.options).context("fleet start failed")?;
    let mut handler = OutputHandler::create(
        &ctx.options.output_dir,
        MASTER_RANK,
        &module.program_name(),
        ctx.options.artifacts(),
    )?;
    let argv: Vec<String> = std::env::args().collect();
    handler.record_invocation(&argv);

    let config = ctx.options.interpreter_config()?;
    let mut interp = (ctx.factory)(&module, &config);
    interp.set_depth_bound(ctx.options.phase1_depth);
    // The harvest always runs depth-first regardless of the phase-2
    // search policy, so prefix order is stable across runs.
    interp.set_search_policy(crate::config::SearchPolicy::Dfs);
    interp.set_path_file(handler.path_file());
    interp.set_branch_history_file(handler.branch_history_file());
    interp.set_log_file(handler.log_file());

    let mut completed: Vec<PathRecord> = Vec::new();
    let prefixes = interp.run_harvest(&mut |record| completed.push(record))?;
    for record in &completed {
        handler.process_path(record)?;
    }
    handler.finish(&interp.stats());

    Ok(prefixes.into())
}

fn dispatch_prefix(
    ctx: &mut MasterContext,
    trace: &mut MasterTrace,
    registry: &mut WorkerRegistry,
    worker: Rank,
    prefix: Prefix,
) -> Result<()> {
    ctx.mailbox
        .send(worker, Message::StartPrefixTask { prefix })?;
    registry.mark_busy(worker);
    trace.start_work(worker);
    Ok(())
}

/// Dispatches one received message. Returns the terminal outcome once
/// the run is over.
async fn handle_message(
    ctx: &mut MasterContext,
    trace: &mut MasterTrace,
    registry: &mut WorkerRegistry,
    queue: &mut VecDeque<Prefix>,
    from: Rank,
    msg: Message,
) -> Result<Option<MasterOutcome>> {
    match msg {
        Message::Finish => {
            registry.mark_finished(from);
            trace.finish(from, registry.free_count());
            if let Some(prefix) = queue.pop_front() {
                dispatch_prefix(ctx, trace, registry, from, prefix)?;
                if queue.is_empty() {
                    trace.done_with_prefixes();
                }
            } else if registry.all_free() {
                return Ok(Some(shutdown(ctx, trace, registry).await?));
            }
            Ok(None)
        }
        Message::BugFound => {
            trace.bug_found(from);
            trace.elapsed("");
            for worker in registry.live_workers() {
                // Best effort: a worker may already be gone mid-abort.
                if ctx.mailbox.send(worker, Message::Kill).is_ok() {
                    trace.kill(worker);
                }
                registry.mark_killed(worker);
            }
            if ctx.options.drain_kill_acks {
                collect_kill_acks(ctx, registry).await?;
            }
            Ok(Some(MasterOutcome::BugFound { worker: from }))
        }
        Message::Timeout => {
            trace.timeout();
            for worker in registry.live_workers() {
                ctx.mailbox.send(worker, Message::Kill)?;
                trace.kill(worker);
                registry.mark_killed(worker);
            }
            collect_kill_acks(ctx, registry).await?;
            trace.elapsed("Timeout:");
            Ok(Some(MasterOutcome::Timeout))
        }
        Message::ReadyToOffload => {
            registry.set_offload_ready(from);
            Ok(None)
        }
        Message::NotReadyToOffload => {
            registry.clear_offload_ready(from);
            Ok(None)
        }
        Message::OffloadResp { payload } => {
            trace.offload_received(from, payload.len());
            registry.complete_offload(from);
            if let Some(prefix) = Message::offload_payload(&payload) {
                let target = registry
                    .next_free()
                    .context("offload produced work but no worker is free")?;
                trace.prefix_task_send(target, payload.len());
                dispatch_prefix(ctx, trace, registry, target, prefix.to_vec())?;
            } else {
                // The donor had nothing to give; it has to announce
                // readiness again before it can be picked another time.
                registry.clear_offload_ready(from);
            }
            Ok(None)
        }
        Message::KillComp => {
            if registry.is_killed(from) {
                registry.record_kill_ack(from);
                Ok(None)
            } else {
                bail!("unexpected KILL_COMP from live worker {}", from)
            }
        }
        other => bail!(
            "master received an illegal tag {} from rank {}",
            other.name(),
            from
        ),
    }
}

/// Starts one offload exchange when load balancing is on, some but not
/// all workers are free, a donor is ready, and no request is in flight.
fn maybe_initiate_offload(
    ctx: &mut MasterContext,
    trace: &mut MasterTrace,
    registry: &mut WorkerRegistry,
) -> Result<()> {
    if !ctx.options.lb {
        return Ok(());
    }
    let free = registry.free_count();
    if free == 0 || free == registry.worker_count() {
        return Ok(());
    }
    let donor = match ctx.options.offload_policy() {
        OffloadPolicy::Default => registry.begin_offload(),
    };
    if let Some(donor) = donor {
        ctx.mailbox.send(donor, Message::Offload)?;
        trace.offload_sent(donor);
    }
    Ok(())
}

/// All workers are free: kill the fleet, collect every acknowledgement,
/// and report normal completion.
async fn shutdown(
    ctx: &mut MasterContext,
    trace: &mut MasterTrace,
    registry: &mut WorkerRegistry,
) -> Result<MasterOutcome> {
    trace.all_workers_finished();
    for worker in registry.live_workers() {
        ctx.mailbox.send(worker, Message::Kill)?;
        trace.kill(worker);
        registry.mark_killed(worker);
    }
    trace.elapsed(":");
    collect_kill_acks(ctx, registry).await?;
    Ok(MasterOutcome::AllFinished)
}

/// Waits until every worker has acknowledged its kill. Reports that were
/// already in flight when the kill went out are drained and dropped.
async fn collect_kill_acks(ctx: &mut MasterContext, registry: &mut WorkerRegistry) -> Result<()> {
    while registry.kill_ack_count() < registry.worker_count() {
        let (from, msg) = ctx.mailbox.recv().await?;
        match msg {
            Message::KillComp => {
                registry.record_kill_ack(from);
            }
            Message::Finish
            | Message::BugFound
            | Message::ReadyToOffload
            | Message::NotReadyToOffload
            | Message::OffloadResp { .. }
            | Message::Timeout => {
                tracing::debug!(
                    "dropping in-flight {} from rank {} during shutdown",
                    msg.name(),
                    from
                );
            }
            other => bail!(
                "master received an illegal tag {} from rank {} during shutdown",
                other.name(),
                from
            ),
        }
    }
    Ok(())
}

/// Degenerate-mode variant: a single worker's acknowledgement.
async fn await_kill_comp(ctx: &mut MasterContext, worker: Rank) -> Result<()> {
    loop {
        let (from, msg) = ctx.mailbox.recv().await?;
        if from == worker && msg == Message::KillComp {
            return Ok(());
        }
        tracing::debug!(
            "dropping in-flight {} from rank {} while awaiting kill ack",
            msg.name(),
            from
        );
    }
}
