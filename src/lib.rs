//! Core runtime of a programmable logic controller: a process that hosts
//! a dynamically loaded, precompiled control program and drives it
//! through a periodic scan cycle, while exposing its live I/O image to
//! field drivers, HMI clients, and debuggers.
//!
//! `init`/`Runtime::serve` set up logging, signal handling, and shutdown;
//! the scan-cycle/state-machine/plugin-driver core is grounded in
//! `original_source`'s C implementation.

use log::{debug, info};
use once_cell::sync::OnceCell;
use std::env;
use std::panic;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub mod artifact;
pub mod cell;
pub mod clock;
pub mod debug;
pub mod error;
pub mod image;
pub mod plugin;
pub mod runtime_config;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod watchdog;

pub use error::{FatalError, LoadError, PluginError, StateError};
pub use runtime_config::RuntimeConfig;
pub use state::{PlcState, StateMachine};

pub mod prelude {
    pub use crate::{PlcState, Runtime, RuntimeConfig};
    pub use log::{debug, error, info, trace, warn};
}

pub mod export {
    pub use libloading;
    pub use log;
    pub use once_cell;
    pub use parking_lot;
    #[cfg(feature = "script")]
    pub use pyo3;
    pub use thiserror;
}

static NAME: OnceCell<String> = OnceCell::new();
static HOSTNAME: OnceCell<String> = OnceCell::new();
static STARTUP_TIME: OnceCell<Instant> = OnceCell::new();
static TERM_FLAG: OnceCell<Arc<AtomicBool>> = OnceCell::new();

fn sigterm_received() -> bool {
    TERM_FLAG.get().is_some_and(|f| f.load(Ordering::SeqCst))
}

/// # Panics
///
/// Will panic if syslog is selected but cannot be connected, or if called
/// more than once.
pub fn init(name: &str) {
    panic::set_hook(Box::new(|info| {
        log::error!("PANIC: {info}");
        process::exit(1);
    }));
    HOSTNAME
        .set(
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_owned()),
        )
        .expect("plc_core::init called twice");
    STARTUP_TIME.set(Instant::now()).unwrap();
    NAME.set(name.to_owned()).unwrap();

    let verbose = env::var("VERBOSE").map_or(false, |v| v == "1");
    let use_syslog = env::var("SYSLOG").map_or(false, |v| v == "1");
    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process: name.to_owned(),
            pid: process::id(),
        };
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(
            syslog::unix(formatter).expect("failed to connect to syslog"),
        )))
        .expect("logger already set");
        log::set_max_level(if verbose {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        });
    } else {
        env_logger::Builder::new()
            .target(env_logger::Target::Stdout)
            .filter_level(if verbose {
                log::LevelFilter::Trace
            } else {
                log::LevelFilter::Info
            })
            .init();
    }
    debug!("log initialization completed");
}

/// # Panics
///
/// Will panic if unable to register the SIGTERM/SIGINT handler.
fn register_signals() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag)).unwrap();
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag)).unwrap();
    let _ = TERM_FLAG.set(Arc::clone(&flag));
    flag
}

#[inline]
pub fn hostname() -> &'static str {
    HOSTNAME.get().map(String::as_str).unwrap_or("unknown")
}

#[inline]
pub fn uptime() -> std::time::Duration {
    STARTUP_TIME.get().map_or(std::time::Duration::ZERO, Instant::elapsed)
}

/// Owns the four core subsystems: constructed once at startup,
/// `serve()` blocks until SIGTERM/SIGINT.
pub struct Runtime {
    image: Arc<image::ImageTables>,
    plugins: Arc<plugin::PluginDriver>,
    state: StateMachine,
    heartbeat: Arc<AtomicU64>,
}

impl Runtime {
    pub fn new(config: &RuntimeConfig) -> Self {
        let image = Arc::new(image::ImageTables::new());
        let plugins = Arc::new(plugin::PluginDriver::new(Arc::clone(&image)));
        let stats = Arc::new(stats::ScanStats::new());
        let heartbeat = Arc::new(AtomicU64::new(0));
        let state = StateMachine::with_affinity(
            config.program_path.clone(),
            Arc::clone(&image),
            Arc::clone(&plugins),
            stats,
            Arc::clone(&heartbeat),
            config.thread_affinity,
            config.stack_size,
        );

        if let Some(path) = &config.plugin_descriptor_path {
            if let Err(err) = plugins.load_config(path) {
                log::error!("failed to load plugin descriptors from {path:?}: {err}");
            } else {
                for err in plugins.init() {
                    log::error!("plugin init error: {err}");
                }
                plugins.start();
            }
        }

        Self {
            image,
            plugins,
            state,
            heartbeat,
        }
    }

    pub fn state(&self) -> &StateMachine {
        &self.state
    }

    pub fn image(&self) -> &Arc<image::ImageTables> {
        &self.image
    }

    pub fn plugins(&self) -> &Arc<plugin::PluginDriver> {
        &self.plugins
    }

    /// Process one debug/trace frame request against the currently loaded
    /// artifact, if any. Returns `None` while no artifact is loaded; the
    /// socket transport that would carry this over the wire is out of
    /// scope for this crate.
    pub fn process_debug_frame(&self, request: &[u8]) -> Option<Vec<u8>> {
        let artifact = self.state.current_artifact()?;
        Some(debug::process_frame(artifact.as_ref(), request))
    }

    /// Block running the control loop: start on construction if
    /// `autostart`, otherwise wait for an external `set_state(Running)`
    /// call; install SIGTERM/SIGINT handling; tear down through the state
    /// machine's STOPPED path rather than hard-exiting.
    pub fn serve(&self, config: &RuntimeConfig) {
        info!("{} starting on {}", NAME.get().map_or("plc_core", String::as_str), hostname());
        let term_flag = register_signals();
        let _watchdog = watchdog::spawn(self.state.clone());

        if config.autostart {
            self.state.set_state(PlcState::Running);
        }

        while !term_flag.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(100));
        }

        info!("shutdown requested, stopping scan cycle");
        if self.state.get_state() == PlcState::Running {
            self.state.set_state(PlcState::Stopped);
        }
        self.plugins.destroy();
    }

    pub fn heartbeat_secs(&self) -> u64 {
        self.heartbeat.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_boots_stopped_without_autostart() {
        let config = RuntimeConfig {
            program_path: PathBuf::from("/nonexistent/plc/dir"),
            plugin_descriptor_path: None,
            thread_affinity: None,
            stack_size: None,
            autostart: false,
        };
        let runtime = Runtime::new(&config);
        assert_eq!(runtime.state().get_state(), PlcState::Stopped);
    }
}
