//! Interpreter Adapter Module
//!
//! The coordinator drives the symbolic-execution engine through a narrow
//! capability set and never looks inside it. This module defines that
//! boundary:
//!
//! ## Submodules
//! - **`module`**: Loads the program under test and resolves the runtime
//!   libraries requested on the command line. IR-level work (linking,
//!   instrumentation) belongs to the engine behind the trait.
//! - **`output`**: The per-rank output handler. Owns the node's result
//!   directory, the info/messages/warnings streams and test-case emission.
//! - **`sim`**: The bundled reference interpreter, a deterministic
//!   bounded enumerator of the program's branch tree. The fabric is
//!   developed and integration-tested against it; a production engine
//!   links in behind the same trait.
//!
//! ## Ownership
//! The interpreter does not own the output handler. It reports completed
//! paths and bugs through [`StepOutcome`]; the task frame that owns both
//! forwards them to the handler, making their joint lifetime explicit.

pub mod module;
pub mod output;
pub mod sim;

#[cfg(test)]
mod tests;

use crate::config::SearchPolicy;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// An ordered sequence of branch-direction symbols pinning a partial path
/// through the execution tree. Opaque to the coordinator; its length is
/// its depth.
pub type Prefix = Vec<u8>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("error loading program '{path}': {reason}")]
    ModuleLoad { path: PathBuf, reason: String },
    #[error("runtime library not found: {0}")]
    MissingRuntime(PathBuf),
    #[error("cannot create output directory {path}: {reason}")]
    OutputDir { path: PathBuf, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A `name[:line[/line..]]` predicate, shared by the skip-function and
/// error-location options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionLocation {
    pub name: String,
    pub lines: Vec<u32>,
}

/// Engine knobs forwarded verbatim from the command line.
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    pub entry_point: String,
    pub optimize: bool,
    pub check_div_zero: bool,
    pub check_overshift: bool,
    pub skipped_functions: Vec<FunctionLocation>,
    pub inlined_functions: Vec<String>,
    pub error_locations: Vec<FunctionLocation>,
    pub max_error_count: u32,
}

/// Which per-test artifacts the output handler emits.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestArtifacts {
    pub no_output: bool,
    pub kqueries: bool,
    pub cvcs: bool,
    pub smt2s: bool,
    pub cov: bool,
    pub paths: bool,
    pub sym_paths: bool,
    pub test_info: bool,
}

/// One fully explored path, ready for test-case emission.
#[derive(Debug, Clone)]
pub struct PathRecord {
    /// Branch decisions from the root, one symbol per branch.
    pub path: Prefix,
    /// Constraint log of the path in the engine's textual form.
    pub constraints: String,
}

/// A reportable error discovered during exploration.
#[derive(Debug, Clone)]
pub struct BugInfo {
    pub message: String,
    /// Path on which the error was reached.
    pub path: Prefix,
    /// Test-file suffix, e.g. `assert.err`.
    pub suffix: &'static str,
}

/// Counters the engine exposes at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub paths_completed: u64,
    pub instructions: u64,
    pub queries: u64,
    pub forks: u64,
}

/// Result of advancing exploration by one step.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Work remains; nothing user-visible happened.
    Progress,
    /// One path ran to completion.
    PathComplete(PathRecord),
    /// A reportable error was reached; the task ends here.
    Bug(BugInfo),
    /// The constrained tree is fully explored.
    Exhausted,
}

/// The narrow capability set the coordinator uses to drive an engine.
///
/// A task configures bounds first, then either harvests prefixes
/// (phase 1, master side) or steps exploration to completion (phase 2 and
/// degenerate tasks, worker side). Stepping keeps the caller in control
/// between exploration steps so it can poll its mailbox.
pub trait Interpreter: Send {
    /// Bounds additional branching depth beyond the prefix. Zero means
    /// the engine's own limit applies.
    fn set_depth_bound(&mut self, depth: u32);

    /// Pins exploration to paths extending `prefix` (upper and lower
    /// bound at once).
    fn set_prefix(&mut self, prefix: &[u8]);

    fn set_search_policy(&mut self, policy: SearchPolicy);

    /// Auxiliary output files maintained by the engine itself.
    fn set_path_file(&mut self, path: PathBuf);
    fn set_branch_history_file(&mut self, path: PathBuf);
    fn set_log_file(&mut self, path: PathBuf);

    /// Phase-1 use: explores to the depth bound and returns the prefixes
    /// of every path still alive there. Paths completing earlier are
    /// reported through `on_path`.
    fn run_harvest(
        &mut self,
        on_path: &mut dyn FnMut(PathRecord),
    ) -> Result<Vec<Prefix>, EngineError>;

    /// Advances exploration by one step.
    fn step(&mut self) -> Result<StepOutcome, EngineError>;

    /// Number of pending frontier states, the donor-side estimate of
    /// harvestable sub-work.
    fn frontier_len(&self) -> usize;

    /// Releases one pending sub-tree as a prefix for another worker, or
    /// `None` when giving work away would leave this engine idle.
    fn harvest_offload(&mut self) -> Option<Prefix>;

    fn stats(&self) -> RunStats;
}

/// Constructor used by master and workers to obtain a fresh engine per
/// task. Tests substitute scripted engines through the same seam.
pub type InterpreterFactory = Arc<
    dyn Fn(&module::ProgramModule, &InterpreterConfig) -> Box<dyn Interpreter> + Send + Sync,
>;

/// Factory for the bundled reference interpreter.
pub fn default_factory() -> InterpreterFactory {
    Arc::new(|module, config| {
        Box::new(sim::SimInterpreter::new(module, config)) as Box<dyn Interpreter>
    })
}
