//! Master event trace.
//!
//! A plain-text protocol log kept separate from the tracing output: one
//! line per coordinator event, written to `log_master_<base>` next to the
//! output directories. Post-mortem tooling greps this file, so the line
//! vocabulary (`START_WORK`, `FINISH`, `OFFLOAD_SENT`, ...) is stable.

use crate::engine::output::format_elapsed;
use crate::fleet::types::Rank;

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

pub struct MasterTrace {
    out: BufWriter<File>,
    path: PathBuf,
    started: Instant,
}

impl MasterTrace {
    /// Opens `log_master_<basename>` in the parent of the output base.
    pub fn open(output_dir: &str) -> Result<MasterTrace> {
        let base = Path::new(output_dir);
        let name = format!(
            "log_master_{}",
            base.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "out".to_string())
        );
        let path = match base.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
            _ => PathBuf::from(name),
        };
        let file = File::create(&path)
            .with_context(|| format!("cannot create master log {}", path.display()))?;
        let mut trace = MasterTrace {
            out: BufWriter::new(file),
            path,
            started: Instant::now(),
        };
        trace.line(format_args!(
            "Started: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        Ok(trace)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{}", args);
        let _ = self.out.flush();
    }

    pub fn master_start(&mut self) {
        self.line(format_args!("MASTER_START"));
    }

    pub fn start_work(&mut self, worker: Rank) {
        self.line(format_args!("MASTER->WORKER: START_WORK ID:{}", worker));
    }

    pub fn prefix_task_send(&mut self, worker: Rank, len: usize) {
        self.line(format_args!(
            "MASTER->WORKER: PREFIX_TASK_SEND ID:{} Length:{}",
            worker, len
        ));
    }

    pub fn kill(&mut self, worker: Rank) {
        self.line(format_args!("MASTER->WORKER: KILL ID:{}", worker));
    }

    pub fn finish(&mut self, worker: Rank, free: usize) {
        self.line(format_args!("WORKER->MASTER: FINISH ID:{}", worker));
        self.line(format_args!("WORKER->MASTER: FREELIST SIZE:{}", free));
    }

    pub fn bug_found(&mut self, worker: Rank) {
        self.line(format_args!("WORKER->MASTER: BUG FOUND:{}", worker));
    }

    pub fn offload_sent(&mut self, worker: Rank) {
        self.line(format_args!("MASTER->WORKER: OFFLOAD_SENT ID:{}", worker));
    }

    pub fn offload_received(&mut self, worker: Rank, len: usize) {
        self.line(format_args!(
            "WORKER->MASTER: OFFLOAD RCVD ID:{} Length:{}",
            worker, len
        ));
    }

    pub fn done_with_prefixes(&mut self) {
        self.line(format_args!("MASTER: DONE_WITH_ALL_PREFIXES"));
    }

    pub fn all_workers_finished(&mut self) {
        self.line(format_args!("MASTER: ALL WORKERS FINISHED"));
    }

    pub fn timeout(&mut self) {
        self.line(format_args!("TIMER->MASTER: TIMEOUT"));
    }

    pub fn elapsed(&mut self, label: &str) {
        let secs = self.started.elapsed().as_secs();
        self.line(format_args!("MASTER_ELAPSED {}", label));
        self.line(format_args!("Elapsed: {}", format_elapsed(secs)));
    }
}
