//! Bundled reference interpreter.
//!
//! A deterministic bounded enumerator of the program's branch tree. The
//! tree shape is derived purely from the loaded module bytes, so every
//! node in the fleet sees the same program: a prefix harvested on the
//! master pins exactly the same sub-tree on any worker. The fabric is
//! developed and integration-tested against this engine; a production
//! symbolic executor links in behind the same trait.
//!
//! Tree rules, all seeded from a hash of the module:
//! - a node stops branching at the program's own depth limit, or early on
//!   one in sixteen paths (a path that exits);
//! - three in four interior nodes fork both ways, the rest continue
//!   single-sided;
//! - error locations designate concrete leaf paths; completing one of
//!   them is a reportable bug.

use super::module::ProgramModule;
use super::{
    BugInfo, EngineError, Interpreter, InterpreterConfig, PathRecord, Prefix, RunStats,
    StepOutcome,
};
use crate::config::SearchPolicy;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const BRANCH_ZERO: u8 = b'0';
const BRANCH_ONE: u8 = b'1';

fn fnv1a(init: u64, bytes: &[u8]) -> u64 {
    let mut h = init;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

pub struct SimInterpreter {
    seed: u64,
    /// The program's own maximum branching depth.
    intrinsic_limit: usize,
    prefix: Prefix,
    depth_bound: u32,
    policy: SearchPolicy,
    frontier: VecDeque<Prefix>,
    started: bool,
    rng: StdRng,
    stats: RunStats,
    /// Designated bug leaves with their location labels.
    bug_paths: Vec<(Prefix, String)>,
    path_file: Option<PathBuf>,
    branch_history_file: Option<PathBuf>,
    log_file: Option<PathBuf>,
}

impl SimInterpreter {
    pub fn new(module: &ProgramModule, config: &InterpreterConfig) -> SimInterpreter {
        let mut seed = fnv1a(FNV_OFFSET, &module.bytes);
        seed = fnv1a(seed, module.entry_point.as_bytes());
        let intrinsic_limit = 8 + (seed % 9) as usize;

        let mut sim = SimInterpreter {
            seed,
            intrinsic_limit,
            prefix: Vec::new(),
            depth_bound: 0,
            policy: SearchPolicy::Dfs,
            frontier: VecDeque::new(),
            started: false,
            rng: StdRng::seed_from_u64(seed),
            stats: RunStats::default(),
            bug_paths: Vec::new(),
            path_file: None,
            branch_history_file: None,
            log_file: None,
        };

        for location in &config.error_locations {
            let mut label = location.name.clone();
            for line in &location.lines {
                label.push_str(&format!(":{}", line));
            }
            let path = sim.designate_bug_path(&label);
            sim.bug_paths.push((path, label));
        }
        sim
    }

    fn node_hash(&self, path: &[u8]) -> u64 {
        fnv1a(fnv1a(FNV_OFFSET, &self.seed.to_le_bytes()), path)
    }

    /// Children of a node, honouring the program's own limit plus the
    /// task's depth bound. An empty result means the path is complete.
    fn children_of(&self, path: &[u8], task_limit: usize) -> Vec<Prefix> {
        let depth = path.len();
        if depth >= self.intrinsic_limit || depth >= task_limit {
            return Vec::new();
        }
        let h = self.node_hash(path);
        if depth > 0 && h % 16 == 0 {
            return Vec::new();
        }
        let mut children = Vec::with_capacity(2);
        // The first symbolic branch always forks; deeper nodes fork on
        // three in four hashes.
        if depth == 0 || h % 4 != 0 {
            for symbol in [BRANCH_ZERO, BRANCH_ONE] {
                let mut child = path.to_vec();
                child.push(symbol);
                children.push(child);
            }
        } else {
            let mut child = path.to_vec();
            child.push(if h & 1 == 0 { BRANCH_ZERO } else { BRANCH_ONE });
            children.push(child);
        }
        children
    }

    /// Walks from the root along the hash bits of `label`, clamped to
    /// the children that actually exist, producing a reachable leaf.
    fn designate_bug_path(&self, label: &str) -> Prefix {
        let h = fnv1a(self.seed, label.as_bytes());
        let mut path = Vec::new();
        loop {
            let mut children = self.children_of(&path, self.intrinsic_limit);
            match children.len() {
                0 => return path,
                1 => path = children.remove(0),
                n => {
                    let bit = ((h >> path.len().min(63)) & 1) as usize;
                    path = children.swap_remove(bit.min(n - 1));
                }
            }
        }
    }

    /// Depth limit of the current task.
    fn task_limit(&self) -> usize {
        if self.depth_bound == 0 {
            self.intrinsic_limit
        } else {
            self.prefix.len() + self.depth_bound as usize
        }
    }

    fn pop_next(&mut self) -> Option<Prefix> {
        if self.frontier.is_empty() {
            return None;
        }
        match self.policy {
            SearchPolicy::Dfs => self.frontier.pop_back(),
            SearchPolicy::Bfs => self.frontier.pop_front(),
            SearchPolicy::Rand => {
                let index = self.rng.gen_range(0..self.frontier.len());
                self.frontier.remove(index)
            }
            SearchPolicy::CovNew => {
                // Novelty stand-in: prefer the state with the highest
                // node hash, which spreads selection across sub-trees.
                let index = (0..self.frontier.len())
                    .max_by_key(|&i| self.node_hash(&self.frontier[i]))
                    .unwrap_or(0);
                self.frontier.remove(index)
            }
        }
    }

    fn bug_at(&self, path: &[u8]) -> Option<BugInfo> {
        self.bug_paths
            .iter()
            .find(|(bug, _)| bug == path)
            .map(|(bug, label)| BugInfo {
                message: format!("error reached at {}", label),
                path: bug.clone(),
                suffix: "assert.err",
            })
    }

    fn record_for(&self, path: Prefix) -> PathRecord {
        let mut constraints = String::new();
        for (i, &b) in path.iter().enumerate() {
            constraints.push_str(&format!("(assert (= b{} {}))\n", i, b as char));
        }
        PathRecord { path, constraints }
    }

    fn flush_aux_files(&self) -> Result<(), EngineError> {
        if let Some(path) = &self.branch_history_file {
            let mut depth_counts = vec![0u64; self.intrinsic_limit + 1];
            for entry in &self.frontier {
                depth_counts[entry.len().min(self.intrinsic_limit)] += 1;
            }
            let mut text = String::new();
            for (depth, count) in depth_counts.iter().enumerate() {
                text.push_str(&format!("{} {}\n", depth, count));
            }
            fs::write(path, text)?;
        }
        if let Some(path) = &self.log_file {
            let mut file = fs::File::create(path)?;
            writeln!(
                file,
                "completed={} instructions={} queries={} forks={}",
                self.stats.paths_completed,
                self.stats.instructions,
                self.stats.queries,
                self.stats.forks
            )?;
        }
        Ok(())
    }
}

impl Interpreter for SimInterpreter {
    fn set_depth_bound(&mut self, depth: u32) {
        self.depth_bound = depth;
    }

    fn set_prefix(&mut self, prefix: &[u8]) {
        self.prefix = prefix.to_vec();
    }

    fn set_search_policy(&mut self, policy: SearchPolicy) {
        self.policy = policy;
    }

    fn set_path_file(&mut self, path: PathBuf) {
        self.path_file = Some(path);
    }

    fn set_branch_history_file(&mut self, path: PathBuf) {
        self.branch_history_file = Some(path);
    }

    fn set_log_file(&mut self, path: PathBuf) {
        self.log_file = Some(path);
    }

    fn run_harvest(
        &mut self,
        on_path: &mut dyn FnMut(PathRecord),
    ) -> Result<Vec<Prefix>, EngineError> {
        let harvest_depth = self.depth_bound as usize;
        let mut prefixes = Vec::new();
        self.frontier.clear();
        self.frontier.push_back(self.prefix.clone());

        while let Some(path) = self.pop_next() {
            self.stats.instructions += 3 * (path.len() as u64 + 1);
            let children = self.children_of(&path, self.intrinsic_limit);
            if children.is_empty() {
                self.stats.paths_completed += 1;
                on_path(self.record_for(path));
                continue;
            }
            if path.len() >= harvest_depth {
                prefixes.push(path);
                continue;
            }
            self.stats.queries += children.len() as u64;
            if children.len() == 2 {
                self.stats.forks += 1;
            }
            for child in children {
                self.frontier.push_back(child);
            }
        }

        if let Some(file) = &self.path_file {
            let mut text = String::new();
            for prefix in &prefixes {
                text.push_str(std::str::from_utf8(prefix).unwrap_or(""));
                text.push('\n');
            }
            fs::write(file, text)?;
        }
        self.flush_aux_files()?;
        Ok(prefixes)
    }

    fn step(&mut self) -> Result<StepOutcome, EngineError> {
        if !self.started {
            self.started = true;
            self.frontier.push_back(self.prefix.clone());
        }
        let Some(path) = self.pop_next() else {
            self.flush_aux_files()?;
            return Ok(StepOutcome::Exhausted);
        };

        self.stats.instructions += 3 * (path.len() as u64 + 1);
        let children = self.children_of(&path, self.task_limit());
        if children.is_empty() {
            self.stats.paths_completed += 1;
            if let Some(bug) = self.bug_at(&path) {
                return Ok(StepOutcome::Bug(bug));
            }
            return Ok(StepOutcome::PathComplete(self.record_for(path)));
        }
        self.stats.queries += children.len() as u64;
        if children.len() == 2 {
            self.stats.forks += 1;
        }
        for child in children {
            self.frontier.push_back(child);
        }
        Ok(StepOutcome::Progress)
    }

    fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    fn harvest_offload(&mut self) -> Option<Prefix> {
        if self.frontier.len() < 2 {
            return None;
        }
        // Steal from the end the search will reach last, so the donor
        // keeps working where it already is. Prefixes at or below the
        // wire sentinel threshold are not shippable and stay put.
        let candidates: Vec<usize> = match self.policy {
            SearchPolicy::Bfs => (0..self.frontier.len()).rev().collect(),
            _ => (0..self.frontier.len()).collect(),
        };
        for index in candidates {
            if self.frontier[index].len() > crate::fleet::protocol::OFFLOAD_EMPTY_THRESHOLD {
                return self.frontier.remove(index);
            }
        }
        None
    }

    fn stats(&self) -> RunStats {
        self.stats
    }
}
