//! Per-rank output handling.
//!
//! Every node owns a disjoint result directory `<base><rank>` holding the
//! `info`, `messages.txt` and `warnings.txt` streams plus one numbered
//! test case per completed path. Auxiliary engine files (`_br_hist`,
//! `_log_file`, `_pathFile_<rank>`) live next to the directory so a run
//! can be swept up by prefix.

use super::{BugInfo, EngineError, PathRecord, RunStats, TestArtifacts};
use crate::fleet::types::Rank;

use chrono::Local;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// How many alternative directory names to probe when the preferred one
/// already exists.
const DIR_PROBE_LIMIT: u32 = 1_000;

pub struct OutputHandler {
    dir: PathBuf,
    artifacts: TestArtifacts,
    program_name: String,
    rank: Rank,
    info: BufWriter<File>,
    messages: BufWriter<File>,
    warnings: BufWriter<File>,
    test_index: u32,
    paths_explored: u64,
    started: Instant,
}

impl OutputHandler {
    /// Creates `<base><rank>`, probing `-1`, `-2`, … suffixes when a
    /// stale directory of a previous run is in the way.
    pub fn create(
        base: &str,
        rank: Rank,
        program_name: &str,
        artifacts: TestArtifacts,
    ) -> Result<OutputHandler, EngineError> {
        let preferred = PathBuf::from(format!("{}{}", base, rank));
        if let Some(parent) = preferred.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut dir = None;
        for attempt in 0..DIR_PROBE_LIMIT {
            let candidate = if attempt == 0 {
                preferred.clone()
            } else {
                PathBuf::from(format!("{}{}-{}", base, rank, attempt))
            };
            match fs::create_dir(&candidate) {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::warn!(
                            "output directory {} existed, using {}",
                            preferred.display(),
                            candidate.display()
                        );
                    }
                    dir = Some(candidate);
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let dir = dir.ok_or_else(|| EngineError::OutputDir {
            path: preferred,
            reason: "probe index out of range".to_string(),
        })?;

        tracing::info!("rank {} output directory is {}", rank, dir.display());

        let info = BufWriter::new(File::create(dir.join("info"))?);
        let messages = BufWriter::new(File::create(dir.join("messages.txt"))?);
        let warnings = BufWriter::new(File::create(dir.join("warnings.txt"))?);

        Ok(OutputHandler {
            dir,
            artifacts,
            program_name: program_name.to_string(),
            rank,
            info,
            messages,
            warnings,
            test_index: 0,
            paths_explored: 0,
            started: Instant::now(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.dir
    }

    pub fn tests_written(&self) -> u32 {
        self.test_index
    }

    pub fn paths_explored(&self) -> u64 {
        self.paths_explored
    }

    /// Engine path file for this node: `<dir>_pathFile_<rank>`.
    pub fn path_file(&self) -> PathBuf {
        PathBuf::from(format!("{}_pathFile_{}", self.dir.display(), self.rank))
    }

    pub fn branch_history_file(&self) -> PathBuf {
        PathBuf::from(format!("{}_br_hist", self.dir.display()))
    }

    pub fn log_file(&self) -> PathBuf {
        PathBuf::from(format!("{}_log_file", self.dir.display()))
    }

    /// Echoes the invocation and PID into the info stream, with a
    /// wall-clock start stamp.
    pub fn record_invocation(&mut self, argv: &[String]) {
        let _ = writeln!(self.info, "{}", argv.join(" "));
        let _ = writeln!(self.info, "PID: {}", std::process::id());
        let _ = writeln!(
            self.info,
            "Started: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        let _ = self.info.flush();
    }

    pub fn message(&mut self, text: &str) {
        let _ = writeln!(self.messages, "{}", text);
    }

    pub fn warning(&mut self, text: &str) {
        tracing::warn!("{}", text);
        let _ = writeln!(self.warnings, "{}", text);
    }

    /// Emits all artifacts describing one completed path. Returns the
    /// assigned test id.
    pub fn process_path(&mut self, record: &PathRecord) -> Result<u32, EngineError> {
        self.paths_explored += 1;
        if self.artifacts.no_output {
            return Ok(self.test_index);
        }
        let emit_started = Instant::now();
        self.test_index += 1;
        let id = self.test_index;

        self.write_ktest(id, &record.path)?;

        if self.artifacts.kqueries {
            self.write_test_file(id, "kquery", record.constraints.as_bytes())?;
        }
        if self.artifacts.cvcs {
            self.write_test_file(id, "cvc", record.constraints.as_bytes())?;
        }
        if self.artifacts.smt2s {
            self.write_test_file(id, "smt2", record.constraints.as_bytes())?;
        }
        if self.artifacts.cov {
            let mut cov = String::new();
            for depth in 0..record.path.len() {
                cov.push_str(&format!("{}:{}\n", self.program_name, depth + 1));
            }
            self.write_test_file(id, "cov", cov.as_bytes())?;
        }
        if self.artifacts.paths {
            self.write_branch_lines(id, "path", &record.path)?;
        }
        if self.artifacts.sym_paths {
            self.write_branch_lines(id, "sym.path", &record.path)?;
        }
        if self.artifacts.test_info {
            let text = format!(
                "Time to generate test case: {}us\n",
                emit_started.elapsed().as_micros()
            );
            self.write_test_file(id, "info", text.as_bytes())?;
        }
        Ok(id)
    }

    /// Emits the test case and error report for a reportable bug.
    pub fn process_bug(&mut self, bug: &BugInfo) -> Result<u32, EngineError> {
        self.paths_explored += 1;
        self.test_index += 1;
        let id = self.test_index;
        self.write_ktest(id, &bug.path)?;
        self.write_test_file(id, bug.suffix, bug.message.as_bytes())?;
        self.message(&format!("ERROR: {}", bug.message));
        Ok(id)
    }

    /// Closes out the info stream with the finish stamp, elapsed time and
    /// the engine's statistics block.
    pub fn finish(&mut self, stats: &RunStats) {
        let elapsed = self.started.elapsed().as_secs();
        let _ = writeln!(
            self.info,
            "Finished: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(self.info, "Elapsed: {}", format_elapsed(elapsed));
        let _ = writeln!(self.info);
        let _ = writeln!(
            self.info,
            "done: explored paths = {}",
            1 + stats.forks
        );
        let _ = writeln!(self.info, "done: total instructions = {}", stats.instructions);
        let _ = writeln!(self.info, "done: total queries = {}", stats.queries);
        let _ = writeln!(
            self.info,
            "done: completed paths = {}",
            stats.paths_completed
        );
        let _ = writeln!(self.info, "done: generated tests = {}", self.test_index);
        let _ = self.info.flush();
        let _ = self.messages.flush();
        let _ = self.warnings.flush();
    }

    fn test_filename(&self, suffix: &str, id: u32) -> PathBuf {
        self.dir.join(format!("test{:06}.{}", id, suffix))
    }

    fn write_test_file(&self, id: u32, suffix: &str, bytes: &[u8]) -> Result<(), EngineError> {
        fs::write(self.test_filename(suffix, id), bytes)?;
        Ok(())
    }

    /// Binary test blob: magic, path length, branch symbols.
    fn write_ktest(&self, id: u32, path: &[u8]) -> Result<(), EngineError> {
        let mut blob = Vec::with_capacity(8 + path.len());
        blob.extend_from_slice(b"SYMT");
        blob.extend_from_slice(&(path.len() as u32).to_be_bytes());
        blob.extend_from_slice(path);
        self.write_test_file(id, "ktest", &blob)
    }

    fn write_branch_lines(&self, id: u32, suffix: &str, path: &[u8]) -> Result<(), EngineError> {
        let mut text = String::with_capacity(path.len() * 2);
        for &b in path {
            text.push(b as char);
            text.push('\n');
        }
        self.write_test_file(id, suffix, text.as_bytes())
    }
}

impl Drop for OutputHandler {
    fn drop(&mut self) {
        let _ = self.info.flush();
        let _ = self.messages.flush();
        let _ = self.warnings.flush();
    }
}

/// Formats a duration as `[D days, ]HH:MM:SS`.
pub fn format_elapsed(total_secs: u64) -> String {
    let mut seconds = total_secs;
    let mut minutes = seconds / 60;
    seconds %= 60;
    let mut hours = minutes / 60;
    minutes %= 60;
    let days = hours / 24;
    hours %= 24;

    if days > 0 {
        format!("{} days, {:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}
