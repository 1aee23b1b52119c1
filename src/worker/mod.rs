//! Worker Task Driver Module
//!
//! A worker is a loop around its mailbox. Task assignments create a fresh
//! engine per task; while a task runs the driver interleaves exploration
//! steps with mailbox polling so it stays responsive to offload requests
//! and kills, and announces frontier growth and shrinkage in FIFO order.


use crate::engine::module::ProgramModule;
use crate::engine::output::OutputHandler;
use crate::engine::{Interpreter, InterpreterFactory, Prefix, StepOutcome};
use crate::fleet::protocol::Message;
use crate::fleet::transport::{Mailbox, TransportError};
use crate::fleet::types::{Rank, MASTER_RANK};
use crate::config::Options;

use anyhow::{bail, Result};

/// Exploration steps between mailbox polls. Small enough to answer an
/// offload request promptly, large enough not to drown in probes.
const OFFLOAD_POLL_INTERVAL: u32 = 64;

/// Frontier size at which a worker announces harvestable sub-work.
const OFFLOAD_READY_THRESHOLD: usize = 2;

/// How the current task ended.
enum TaskEnd {
    Completed,
    Bug,
    Killed,
}

pub struct WorkerContext {
    pub options: Options,
    pub rank: Rank,
    pub mailbox: Mailbox,
    pub factory: InterpreterFactory,
}

impl WorkerContext {
    pub fn new(options: Options, rank: Rank, mailbox: Mailbox) -> WorkerContext {
        WorkerContext {
            options,
            rank,
            mailbox,
            factory: crate::engine::default_factory(),
        }
    }

    pub fn with_factory(mut self, factory: InterpreterFactory) -> WorkerContext {
        self.factory = factory;
        self
    }
}

/// Runs the worker until it is killed or the fleet aborts.
pub async fn run(ctx: &mut WorkerContext) -> Result<()> {
    let module = ProgramModule::load(&ctx.options)?;
    // One result directory per worker process; each task appends to it.
    let mut handler: Option<OutputHandler> = None;

    loop {
        let (from, msg) = match ctx.mailbox.recv().await {
            Ok(received) => received,
            Err(TransportError::Closed) => {
                tracing::info!("fleet link closed, worker {} exiting", ctx.rank);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match msg {
            Message::Kill => {
                tracing::info!("killing worker {}", ctx.rank);
                let _ = ctx.mailbox.send(MASTER_RANK, Message::KillComp);
                return Ok(());
            }
            Message::StartPrefixTask { prefix } => {
                tracing::info!(
                    "worker {} prefix task, length {}",
                    ctx.rank,
                    prefix.len()
                );
                match run_task(ctx, &module, &mut handler, Some(prefix)).await? {
                    TaskEnd::Completed => ctx.mailbox.send(MASTER_RANK, Message::Finish)?,
                    TaskEnd::Bug => ctx.mailbox.send(MASTER_RANK, Message::BugFound)?,
                    TaskEnd::Killed => {
                        let _ = ctx.mailbox.send(MASTER_RANK, Message::KillComp);
                        return Ok(());
                    }
                }
            }
            Message::NormalTask => {
                tracing::info!("worker {} normal task", ctx.rank);
                match run_task(ctx, &module, &mut handler, None).await? {
                    TaskEnd::Completed => ctx.mailbox.send(MASTER_RANK, Message::Finish)?,
                    TaskEnd::Bug => ctx.mailbox.send(MASTER_RANK, Message::BugFound)?,
                    TaskEnd::Killed => {
                        let _ = ctx.mailbox.send(MASTER_RANK, Message::KillComp);
                        return Ok(());
                    }
                }
            }
            Message::Offload => {
                // Idle between tasks: nothing to give.
                ctx.mailbox.send(MASTER_RANK, Message::offload_resp(None))?;
            }
            other => bail!(
                "worker {} received an illegal tag {} from rank {}",
                ctx.rank,
                other.name(),
                from
            ),
        }
    }
}

/// Runs one task to its end, stepping the engine and polling the mailbox
/// in between.
async fn run_task(
    ctx: &mut WorkerContext,
    module: &ProgramModule,
    handler_slot: &mut Option<OutputHandler>,
    prefix: Option<Prefix>,
) -> Result<TaskEnd> {
    if handler_slot.is_none() {
        let mut created = OutputHandler::create(
            &ctx.options.output_dir,
            ctx.rank,
            &module.program_name(),
            ctx.options.artifacts(),
        )?;
        let argv: Vec<String> = std::env::args().collect();
        created.record_invocation(&argv);
        *handler_slot = Some(created);
    }
    let Some(handler) = handler_slot.as_mut() else {
        bail!("worker {} has no output handler", ctx.rank);
    };

    let config = ctx.options.interpreter_config()?;
    let mut interp = (ctx.factory)(module, &config);
    match &prefix {
        Some(p) => {
            interp.set_prefix(p);
            interp.set_depth_bound(ctx.options.phase2_depth);
        }
        None => interp.set_depth_bound(0),
    }
    interp.set_search_policy(ctx.options.search_policy());
    interp.set_path_file(handler.path_file());
    interp.set_branch_history_file(handler.branch_history_file());
    interp.set_log_file(handler.log_file());

    let mut ready_announced = false;
    let mut steps: u32 = 0;
    loop {
        match interp.step()? {
            StepOutcome::Progress => {}
            StepOutcome::PathComplete(record) => {
                handler.process_path(&record)?;
            }
            StepOutcome::Bug(bug) => {
                tracing::warn!("worker {} found a bug: {}", ctx.rank, bug.message);
                handler.process_bug(&bug)?;
                handler.finish(&interp.stats());
                return Ok(TaskEnd::Bug);
            }
            StepOutcome::Exhausted => {
                if ready_announced {
                    ctx.mailbox.send(MASTER_RANK, Message::NotReadyToOffload)?;
                }
                handler.finish(&interp.stats());
                return Ok(TaskEnd::Completed);
            }
        }

        steps += 1;
        if steps % OFFLOAD_POLL_INTERVAL == 0 {
            if let Some(end) = poll_mailbox(ctx, interp.as_mut(), &mut ready_announced)? {
                handler.finish(&interp.stats());
                return Ok(end);
            }
            tokio::task::yield_now().await;
        }
    }
}

/// One mid-task mailbox round: announce frontier transitions, then
/// answer whatever the master sent.
fn poll_mailbox(
    ctx: &mut WorkerContext,
    interp: &mut dyn Interpreter,
    ready_announced: &mut bool,
) -> Result<Option<TaskEnd>> {
    if ctx.options.lb {
        let ready_now = interp.frontier_len() >= OFFLOAD_READY_THRESHOLD;
        if ready_now != *ready_announced {
            let msg = if ready_now {
                Message::ReadyToOffload
            } else {
                Message::NotReadyToOffload
            };
            ctx.mailbox.send(MASTER_RANK, msg)?;
            *ready_announced = ready_now;
        }
    }

    match ctx.mailbox.try_recv()? {
        None => Ok(None),
        Some((_, Message::Offload)) => {
            let harvested = interp.harvest_offload();
            ctx.mailbox.send(MASTER_RANK, Message::offload_resp(harvested))?;
            Ok(None)
        }
        Some((_, Message::Kill)) => Ok(Some(TaskEnd::Killed)),
        Some((from, other)) => bail!(
            "worker {} received an illegal tag {} mid-task from rank {}",
            ctx.rank,
            other.name(),
            from
        ),
    }
}
