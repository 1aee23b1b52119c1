//! Command-line surface of the distribution driver.
//!
//! The option set mirrors the classic single-process driver: a positional
//! bitcode path, the two-phase depth bounds, and a block of interpreter
//! knobs that the coordinator never interprets itself but forwards to the
//! engine. Fleet placement (rank, size, master address) normally arrives
//! through `SYMFLEET_*` environment variables set by the launcher; the
//! flags exist for running nodes by hand.

use crate::engine::FunctionLocation;
use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default global deadline when `--timeOut 0` is given: one day.
pub const DEFAULT_TIMEOUT_SECS: u64 = 86_400;

#[derive(Parser, Debug, Clone)]
#[command(name = "symfleet", about = "Distributed exhaustive symbolic exploration")]
pub struct Options {
    /// Input bitcode of the program under test.
    #[arg(value_name = "INPUT")]
    pub input_file: PathBuf,

    /// Arguments passed to the symbolic program.
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    pub program_args: Vec<String>,

    /// Base directory for results; node output lands in `<base><rank>`.
    #[arg(long = "output-dir")]
    pub output_dir: String,

    /// Function treated as the program entry point.
    #[arg(long = "entry-point", default_value = "main")]
    pub entry_point: String,

    /// Prefix harvest depth; 0 selects degenerate single-worker mode.
    #[arg(long = "phase1Depth", default_value_t = 0)]
    pub phase1_depth: u32,

    /// Suffix extension depth for prefix tasks.
    #[arg(long = "phase2Depth", default_value_t = 0)]
    pub phase2_depth: u32,

    /// Global deadline in seconds; 0 selects the 24-hour default.
    #[arg(long = "timeOut", default_value_t = 0)]
    pub time_out: u64,

    /// Exploration order: DFS, BFS, RAND or COVNEW.
    #[arg(long = "searchPolicy", default_value = "DFS")]
    pub search_policy: String,

    /// Donor-selection policy for work stealing.
    #[arg(long = "offloadPolicy", default_value = "DEFAULT")]
    pub offload_policy: String,

    /// Enable load balancing (work stealing) between workers.
    #[arg(long = "lb")]
    pub lb: bool,

    /// libc flavour linked into the program: none, klee or uclibc.
    #[arg(long = "libc", default_value = "none")]
    pub libc: String,

    /// Link the POSIX runtime model (symbolic argv, env and files).
    #[arg(long = "posix-runtime")]
    pub posix_runtime: bool,

    /// Link the symbolic-argv runtime model only.
    #[arg(long = "sym-arg-runtime")]
    pub sym_arg_runtime: bool,

    /// Comma-separated functions to skip, each `name[:line[/line..]]`.
    #[arg(long = "skip-functions")]
    pub skip_functions: Option<String>,

    /// Comma-separated functions to inline before execution.
    #[arg(long = "inline")]
    pub inlined_functions: Option<String>,

    /// Comma-separated locations where a failure is expected.
    #[arg(long = "error-location")]
    pub error_location: Option<String>,

    /// Maximum reportable errors before the engine halts (0 = first).
    #[arg(long = "max-error-count", default_value_t = 0)]
    pub max_error_count: u32,

    /// Additional bitcode libraries linked before execution.
    #[arg(long = "link-llvm-lib", value_name = "FILE")]
    pub link_libraries: Vec<PathBuf>,

    /// Optimize the module before execution.
    #[arg(long = "optimize")]
    pub optimize: bool,

    /// Inject checks for division by zero.
    #[arg(long = "check-div-zero", action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    pub check_div_zero: bool,

    /// Inject checks for overshift.
    #[arg(long = "check-overshift", action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    pub check_overshift: bool,

    /// Parse the program environment from the given file.
    #[arg(long = "environ", value_name = "FILE")]
    pub environ: Option<PathBuf>,

    /// Change to the given directory prior to executing.
    #[arg(long = "run-in", value_name = "DIR")]
    pub run_in: Option<PathBuf>,

    /// Don't generate test files.
    #[arg(long = "no-output")]
    pub no_output: bool,

    /// Write .kquery files for each test case.
    #[arg(long = "write-kqueries")]
    pub write_kqueries: bool,

    /// Write .cvc files for each test case.
    #[arg(long = "write-cvcs")]
    pub write_cvcs: bool,

    /// Write .smt2 files for each test case.
    #[arg(long = "write-smt2s")]
    pub write_smt2s: bool,

    /// Write coverage information for each test case.
    #[arg(long = "write-cov")]
    pub write_cov: bool,

    /// Write .path files for each test case.
    #[arg(long = "write-paths")]
    pub write_paths: bool,

    /// Write .sym.path files for each test case.
    #[arg(long = "write-sym-paths")]
    pub write_sym_paths: bool,

    /// Write additional per-test information.
    #[arg(long = "write-test-info")]
    pub write_test_info: bool,

    /// On a bug report, collect kill acknowledgements before aborting.
    #[arg(long = "drain-kill-acks")]
    pub drain_kill_acks: bool,

    /// Rank of this node within the fleet.
    #[arg(long = "rank", env = "SYMFLEET_RANK")]
    pub rank: Option<u32>,

    /// Total number of nodes in the fleet (master + timer + workers).
    #[arg(long = "fleet-size", env = "SYMFLEET_FLEET_SIZE")]
    pub fleet_size: Option<usize>,

    /// Address of the master's fleet listener.
    #[arg(long = "master-addr", env = "SYMFLEET_MASTER_ADDR")]
    pub master_addr: Option<SocketAddr>,

    /// Spawn the whole fleet as local child processes and wait for it.
    #[arg(long = "spawn-local")]
    pub spawn_local: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Exploration order used by the engine when picking the next state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPolicy {
    Dfs,
    Bfs,
    Rand,
    CovNew,
}

impl SearchPolicy {
    /// Parses a policy name, warning and falling back to DFS when the
    /// name is unknown.
    pub fn parse_or_default(name: &str) -> Self {
        match name {
            "DFS" => SearchPolicy::Dfs,
            "BFS" => SearchPolicy::Bfs,
            "RAND" => SearchPolicy::Rand,
            "COVNEW" => SearchPolicy::CovNew,
            other => {
                tracing::warn!("unknown searchPolicy '{}', falling back to DFS", other);
                SearchPolicy::Dfs
            }
        }
    }
}

/// Donor-selection policy for the offload exchange. Only the default
/// (lowest-rank ready worker) is implemented; unknown names fall back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadPolicy {
    Default,
}

impl OffloadPolicy {
    pub fn parse_or_default(name: &str) -> Self {
        if name != "DEFAULT" {
            tracing::warn!("unknown offloadPolicy '{}', falling back to DEFAULT", name);
        }
        OffloadPolicy::Default
    }
}

/// libc flavour linked into the program under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibcKind {
    None,
    Klee,
    Uclibc,
}

impl LibcKind {
    pub fn parse_or_default(name: &str) -> Self {
        match name {
            "none" => LibcKind::None,
            "klee" => LibcKind::Klee,
            "uclibc" => LibcKind::Uclibc,
            other => {
                tracing::warn!("unknown libc '{}', falling back to none", other);
                LibcKind::None
            }
        }
    }
}

impl Options {
    pub fn search_policy(&self) -> SearchPolicy {
        SearchPolicy::parse_or_default(&self.search_policy)
    }

    pub fn offload_policy(&self) -> OffloadPolicy {
        OffloadPolicy::parse_or_default(&self.offload_policy)
    }

    pub fn libc(&self) -> LibcKind {
        LibcKind::parse_or_default(&self.libc)
    }

    /// Effective global deadline in seconds.
    pub fn deadline_secs(&self) -> u64 {
        if self.time_out == 0 {
            DEFAULT_TIMEOUT_SECS
        } else {
            self.time_out
        }
    }

    pub fn degenerate_mode(&self) -> bool {
        self.phase1_depth == 0
    }

    /// Interpreter-facing configuration assembled from the forwarded knobs.
    pub fn interpreter_config(&self) -> anyhow::Result<crate::engine::InterpreterConfig> {
        Ok(crate::engine::InterpreterConfig {
            entry_point: self.entry_point.clone(),
            optimize: self.optimize,
            check_div_zero: self.check_div_zero,
            check_overshift: self.check_overshift,
            skipped_functions: parse_location_list(self.skip_functions.as_deref())?,
            inlined_functions: parse_name_list(self.inlined_functions.as_deref()),
            error_locations: parse_location_list(self.error_location.as_deref())?,
            max_error_count: self.max_error_count,
        })
    }

    /// Which per-test artifacts the output handler should emit.
    pub fn artifacts(&self) -> crate::engine::TestArtifacts {
        crate::engine::TestArtifacts {
            no_output: self.no_output,
            kqueries: self.write_kqueries,
            cvcs: self.write_cvcs,
            smt2s: self.write_smt2s,
            cov: self.write_cov,
            paths: self.write_paths,
            sym_paths: self.write_sym_paths,
            test_info: self.write_test_info,
        }
    }
}

/// Parses a comma-separated `name[:line[/line..]]` list, the format shared
/// by `--skip-functions` and `--error-location`.
pub fn parse_location_list(raw: Option<&str>) -> anyhow::Result<Vec<FunctionLocation>> {
    let mut out = Vec::new();
    let Some(raw) = raw else {
        return Ok(out);
    };
    for token in raw.split(',').filter(|t| !t.is_empty()) {
        let mut parts = token.splitn(2, ':');
        let name = parts.next().unwrap_or_default().to_string();
        if name.is_empty() {
            anyhow::bail!("invalid location parameter: {}", token);
        }
        let mut lines = Vec::new();
        if let Some(line_spec) = parts.next() {
            for line in line_spec.split('/') {
                let parsed: u32 = line
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid line number in: {}", token))?;
                lines.push(parsed);
            }
        }
        out.push(FunctionLocation { name, lines });
    }
    Ok(out)
}

fn parse_name_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|r| {
        r.split(',')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
