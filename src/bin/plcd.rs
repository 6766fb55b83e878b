//! `plcd` — the runnable PLC core daemon. Thin `clap`-driven entry point
//! wiring [`plc_core::Runtime`] together: load configuration, construct
//! the runtime, serve until terminated.

use clap::Parser;
use plc_core::{Runtime, RuntimeConfig};
use std::path::PathBuf;

/// Core scan-cycle runtime for a PLC hosting dynamically loaded control programs.
#[derive(Parser, Debug)]
#[command(name = "plcd", version, about)]
struct Args {
    /// Program artifact file, or a directory to search for one.
    #[arg(long, env = "PLC_PROGRAM_PATH")]
    program_path: Option<PathBuf>,

    /// Plugin descriptor file.
    #[arg(long, env = "PLC_PLUGIN_CONFIG")]
    plugin_config: Option<PathBuf>,

    /// CPU index to pin the scan thread to.
    #[arg(long, env = "PLC_THREAD_AFFINITY_SCAN")]
    thread_affinity: Option<usize>,

    /// Do not start the scan cycle automatically; wait for an external
    /// `set_state(RUNNING)` call.
    #[arg(long)]
    no_autostart: bool,
}

fn main() {
    plc_core::init("plcd");

    let args = Args::parse();
    let mut config = RuntimeConfig::from_env();
    if let Some(path) = args.program_path {
        config.program_path = path;
    }
    if let Some(path) = args.plugin_config {
        config.plugin_descriptor_path = Some(path);
    }
    if args.thread_affinity.is_some() {
        config.thread_affinity = args.thread_affinity;
    }
    if args.no_autostart {
        config.autostart = false;
    }

    let runtime = Runtime::new(&config);
    runtime.serve(&config);
}
