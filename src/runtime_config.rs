//! Ambient, environment-driven configuration: `var_dir()`,
//! `PLC_THREAD_AFFINITY_*`, and `STACK_SIZE` env-var conventions covering
//! where this runtime finds its program artifact and plugin descriptors.

use std::env;
use std::path::{Path, PathBuf};

/// Where the runtime keeps transient state (pid file, sockets, …), were
/// any added later.
pub fn var_dir() -> PathBuf {
    env::var("PLC_VAR_DIR").map_or_else(|_| env::temp_dir(), |p| Path::new(&p).to_owned())
}

/// Resolved at startup from the environment; see [`RuntimeConfig::from_env`].
pub struct RuntimeConfig {
    /// A program artifact file, or a directory to search.
    pub program_path: PathBuf,
    /// Plugin descriptor file; absent means no plugins.
    pub plugin_descriptor_path: Option<PathBuf>,
    /// Pin the scan thread to this CPU, if set.
    pub thread_affinity: Option<usize>,
    /// Stack size for the scan thread, in bytes.
    pub stack_size: Option<usize>,
    pub autostart: bool,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            program_path: env::var("PLC_PROGRAM_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| var_dir().join("plc")),
            plugin_descriptor_path: env::var("PLC_PLUGIN_CONFIG").ok().map(PathBuf::from),
            thread_affinity: env::var("PLC_THREAD_AFFINITY_SCAN")
                .ok()
                .and_then(|v| v.parse().ok()),
            stack_size: env::var("STACK_SIZE").ok().and_then(|v| v.parse().ok()),
            autostart: env::var("PLC_AUTOSTART").map_or(true, |v| v != "0"),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program_path: var_dir().join("plc"),
            plugin_descriptor_path: None,
            thread_affinity: None,
            stack_size: None,
            autostart: true,
        }
    }
}
