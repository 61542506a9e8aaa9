//! Runtime-wide configuration.

use std::env;
use std::path::PathBuf;
use std::thread;

use crate::sdk::RUNTIME_DIR_VARS;
use crate::{Error, Result};

/// Default wait used by [`crate::Finder::wait_for_sources`] callers and
/// [`crate::Ndi::find`] when no timeout is given.
pub const DEFAULT_FIND_TIMEOUT_MS: u32 = 10_000;

/// Default timeout for receive captures.
pub const DEFAULT_CAPTURE_TIMEOUT_MS: u32 = 10_000;

const MAX_DEFAULT_WORKERS: usize = 8;

/// Environment variable overriding the worker count.
pub const WORKERS_VAR: &str = "NDI_BRIDGE_WORKERS";

/// Configuration for an [`crate::Ndi`] context.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Upper bound on native calls running at the same time.
    pub worker_threads: usize,
    /// Directory or file to load the NDI runtime from. `None` searches the
    /// `NDI_RUNTIME_DIR_V6`/`NDI_RUNTIME_DIR_V5` directories and then the
    /// system loader path.
    pub library_path: Option<PathBuf>,
    pub default_find_timeout_ms: u32,
    pub default_capture_timeout_ms: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            worker_threads: cores.min(MAX_DEFAULT_WORKERS),
            library_path: None,
            default_find_timeout_ms: DEFAULT_FIND_TIMEOUT_MS,
            default_capture_timeout_ms: DEFAULT_CAPTURE_TIMEOUT_MS,
        }
    }
}

impl BridgeConfig {
    /// Defaults overridden by `NDI_BRIDGE_WORKERS` and the NDI runtime
    /// directory variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = env::var(WORKERS_VAR) {
            config.worker_threads = parse_workers(&value)?;
        }
        config.library_path = RUNTIME_DIR_VARS
            .iter()
            .find_map(|var| env::var_os(var).map(PathBuf::from));
        Ok(config)
    }

    #[must_use]
    pub fn worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    #[must_use]
    pub fn library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn default_find_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.default_find_timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn default_capture_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.default_capture_timeout_ms = timeout_ms;
        self
    }
}

fn parse_workers(value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::invalid_option(
            WORKERS_VAR,
            format!("expected a positive integer, got {value:?}"),
        )),
    }
}
