//! Program module loading and runtime-library resolution.
//!
//! This covers the filesystem half of bringing the program under test up:
//! reading the bitcode, resolving the runtime archives requested by
//! `--libc`, `--posix-runtime` and `--link-llvm-lib`, and assembling the
//! symbolic program's argv and environment. Everything at the IR level is
//! owned by the engine behind the [`crate::engine::Interpreter`] trait.

use super::EngineError;
use crate::config::{LibcKind, Options};

use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the runtime library directory.
pub const ENV_RUNTIME_PATH: &str = "SYMFLEET_RUNTIME_PATH";

const KLEE_LIBC_ARCHIVE: &str = "klee-libc.bc";
const UCLIBC_ARCHIVE: &str = "klee-uclibc.bca";
const POSIX_RUNTIME_ARCHIVE: &str = "libkleeRuntimePOSIX.bca";

/// The loaded program plus everything the engine needs to execute it.
#[derive(Debug, Clone)]
pub struct ProgramModule {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub entry_point: String,
    pub linked_libraries: Vec<PathBuf>,
    /// argv of the symbolic program: the input path followed by the
    /// remaining positional arguments.
    pub argv: Vec<String>,
    pub environ: Vec<String>,
}

impl ProgramModule {
    /// Reads the bitcode and resolves every requested runtime library.
    /// Failures here are fleet start errors: the master reports them
    /// before any task is dispatched.
    pub fn load(options: &Options) -> Result<ProgramModule, EngineError> {
        let path = options.input_file.clone();
        let bytes = fs::read(&path).map_err(|e| EngineError::ModuleLoad {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if bytes.is_empty() {
            return Err(EngineError::ModuleLoad {
                path,
                reason: "empty bitcode file".to_string(),
            });
        }

        let mut linked_libraries = Vec::new();
        match options.libc() {
            LibcKind::None => {}
            LibcKind::Klee => linked_libraries.push(resolve_runtime(KLEE_LIBC_ARCHIVE)?),
            LibcKind::Uclibc => linked_libraries.push(resolve_runtime(UCLIBC_ARCHIVE)?),
        }
        if options.posix_runtime {
            linked_libraries.push(resolve_runtime(POSIX_RUNTIME_ARCHIVE)?);
        }
        for lib in &options.link_libraries {
            if !lib.exists() {
                return Err(EngineError::MissingRuntime(lib.clone()));
            }
            tracing::info!("linking in library: {}", lib.display());
            linked_libraries.push(lib.clone());
        }

        let mut argv = vec![path.display().to_string()];
        argv.extend(options.program_args.iter().cloned());

        let environ = match &options.environ {
            Some(file) => read_environ_file(file)?,
            None => Vec::new(),
        };

        Ok(ProgramModule {
            path,
            bytes,
            entry_point: options.entry_point.clone(),
            linked_libraries,
            argv,
            environ,
        })
    }

    /// File name of the program, used to label per-test artifacts.
    pub fn program_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "program".to_string())
    }
}

/// Directory holding the runtime archives: the override variable if set,
/// otherwise `runtime/` next to the executable.
pub fn runtime_library_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_RUNTIME_PATH) {
        return PathBuf::from(dir);
    }
    let mut dir = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
    dir.pop();
    dir.push("runtime");
    dir
}

fn resolve_runtime(name: &str) -> Result<PathBuf, EngineError> {
    let path = runtime_library_dir().join(name);
    if path.exists() {
        tracing::info!("using runtime model: {}", path.display());
        Ok(path)
    } else {
        Err(EngineError::MissingRuntime(path))
    }
}

/// Reads an `env`-format file: one `KEY=value` entry per line, blank
/// lines and surrounding whitespace ignored.
pub fn read_environ_file(path: &Path) -> Result<Vec<String>, EngineError> {
    let raw = fs::read_to_string(path).map_err(|e| EngineError::ModuleLoad {
        path: path.to_path_buf(),
        reason: format!("unable to open --environ file: {}", e),
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}
