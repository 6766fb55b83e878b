//! Heartbeat watchdog: samples the scan thread's heartbeat every 2 s and
//! terminates the process if it stalls while RUNNING. Grounded on
//! `original_source/core/src/plc_app/watchdog.c` and its platform
//! variants, run as a plain background supervisory thread.

use crate::state::{PlcState, StateMachine};
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Spawn the watchdog thread. It runs for the life of the process; there
/// is no graceful shutdown because the only action it takes is
/// terminating the process, and normal process exit already does that.
pub fn spawn(state: StateMachine) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("plc-watchdog".to_owned())
        .spawn(move || watch(state))
        .expect("failed to spawn watchdog thread")
}

fn watch(state: StateMachine) {
    let mut last_sample = state.heartbeat().load(Ordering::Acquire);
    loop {
        std::thread::sleep(SAMPLE_INTERVAL);
        let sample = state.heartbeat().load(Ordering::Acquire);
        if sample == last_sample && state.get_state() == PlcState::Running {
            log::error!("watchdog: heartbeat stalled while RUNNING, terminating process");
            std::process::exit(1);
        }
        last_sample = sample;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageTables;
    use crate::plugin::PluginDriver;
    use crate::stats::ScanStats;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    #[test]
    fn heartbeat_advancing_does_not_terminate() {
        let image = Arc::new(ImageTables::new());
        let plugins = Arc::new(PluginDriver::new(Arc::clone(&image)));
        let state = StateMachine::new(
            PathBuf::from("/nonexistent"),
            image,
            plugins,
            Arc::new(ScanStats::new()),
            Arc::new(AtomicU64::new(1)),
        );
        assert_eq!(state.get_state(), PlcState::Stopped);
        // stays STOPPED, so a stalled heartbeat would not trigger the
        // watchdog's termination branch even though we never advance it.
    }
}
