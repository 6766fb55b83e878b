//! PLC state machine: serializes every lifecycle transition and owns the
//! scan-cycle thread handle. Grounded on
//! `original_source/core/src/plc_app/plc_state_manager.c`; the
//! atomic-state-plus-handle shape generalizes this crate's own status
//! primitives to this system's five-state lifecycle.

use crate::artifact::Artifact;
use crate::image::ImageTables;
use crate::plugin::PluginDriver;
use crate::scheduler;
use crate::stats::ScanStats;
use crate::LoadError;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PlcState {
    Init,
    Running,
    Stopped,
    Error,
    Empty,
}

struct Core {
    state: Mutex<PlcState>,
    program_path: PathBuf,
    artifact: Mutex<Option<Arc<Artifact>>>,
    scan_thread: Mutex<Option<JoinHandle<()>>>,
    image: Arc<ImageTables>,
    plugins: Arc<PluginDriver>,
    stats: Arc<ScanStats>,
    heartbeat: Arc<AtomicU64>,
    thread_affinity: Option<usize>,
    stack_size: Option<usize>,
}

/// A cheaply cloneable handle onto the PLC lifecycle. Clones
/// share the same state word, lock, and owned resources; the scan thread
/// holds one clone so it can publish RUNNING itself once it starts.
#[derive(Clone)]
pub struct StateMachine(Arc<Core>);

impl StateMachine {
    pub fn new(
        program_path: PathBuf,
        image: Arc<ImageTables>,
        plugins: Arc<PluginDriver>,
        stats: Arc<ScanStats>,
        heartbeat: Arc<AtomicU64>,
    ) -> Self {
        Self::with_affinity(program_path, image, plugins, stats, heartbeat, None, None)
    }

    pub fn with_affinity(
        program_path: PathBuf,
        image: Arc<ImageTables>,
        plugins: Arc<PluginDriver>,
        stats: Arc<ScanStats>,
        heartbeat: Arc<AtomicU64>,
        thread_affinity: Option<usize>,
        stack_size: Option<usize>,
    ) -> Self {
        Self(Arc::new(Core {
            state: Mutex::new(PlcState::Stopped),
            program_path,
            artifact: Mutex::new(None),
            scan_thread: Mutex::new(None),
            image,
            plugins,
            stats,
            heartbeat,
            thread_affinity,
            stack_size,
        }))
    }

    pub(crate) fn thread_affinity(&self) -> Option<usize> {
        self.0.thread_affinity
    }

    pub fn get_state(&self) -> PlcState {
        *self.0.state.lock()
    }

    pub(crate) fn image(&self) -> &Arc<ImageTables> {
        &self.0.image
    }

    pub(crate) fn plugins(&self) -> &Arc<PluginDriver> {
        &self.0.plugins
    }

    pub(crate) fn stats(&self) -> &Arc<ScanStats> {
        &self.0.stats
    }

    pub(crate) fn heartbeat(&self) -> &Arc<AtomicU64> {
        &self.0.heartbeat
    }

    /// The currently loaded artifact, if any.
    pub fn current_artifact(&self) -> Option<Arc<Artifact>> {
        self.0.artifact.lock().clone()
    }

    /// Called only by the scan thread itself, once it is ready to take
    /// over the cycle.
    pub(crate) fn publish_running(&self) {
        *self.0.state.lock() = PlcState::Running;
    }

    /// Request a transition. Returns `false` if already in `new` or if
    /// `(current, new)` is not one of the documented pairs; in both cases, no side effect occurs.
    pub fn set_state(&self, new: PlcState) -> bool {
        let current = self.get_state();
        if current == new {
            return false;
        }
        match new {
            PlcState::Running => {
                if !matches!(
                    current,
                    PlcState::Stopped | PlcState::Error | PlcState::Empty
                ) {
                    return false;
                }
                self.transition_to_running()
            }
            PlcState::Stopped => {
                if current != PlcState::Running {
                    return false;
                }
                self.transition_to_stopped();
                true
            }
            PlcState::Error => {
                *self.0.state.lock() = PlcState::Error;
                true
            }
            PlcState::Empty => {
                *self.0.state.lock() = PlcState::Empty;
                true
            }
            PlcState::Init => false,
        }
    }

    /// discover artifact path -> loader.open -> spawn scan-cycle thread ->
    /// INIT -> (scan thread) publishes RUNNING.
    fn transition_to_running(&self) -> bool {
        let resolved = match Artifact::discover(&self.0.program_path) {
            Ok(path) => path,
            Err(LoadError::NotFound(_)) => {
                *self.0.state.lock() = PlcState::Empty;
                return false;
            }
            Err(_) => {
                *self.0.state.lock() = PlcState::Error;
                return false;
            }
        };

        let artifact = {
            let mut tables = self.0.image.lock();
            match Artifact::load(&resolved, &mut tables) {
                Ok(a) => a,
                Err(_) => {
                    drop(tables);
                    *self.0.state.lock() = PlcState::Error;
                    return false;
                }
            }
        };
        self.0.image.fill_null_pointers();
        let artifact = Arc::new(artifact);
        *self.0.artifact.lock() = Some(Arc::clone(&artifact));
        self.0.stats.reset();

        *self.0.state.lock() = PlcState::Init;

        let state_for_thread = self.clone();
        let mut builder = std::thread::Builder::new().name("plc-scan".to_owned());
        if let Some(size) = self.0.stack_size {
            builder = builder.stack_size(size);
        }
        let handle = builder
            .spawn(move || scheduler::run(state_for_thread, artifact))
            .expect("failed to spawn scan-cycle thread");
        *self.0.scan_thread.lock() = Some(handle);
        true
    }

    /// store STOPPED -> scan loop observes and exits -> join thread ->
    /// image_tables.clear -> loader.close.
    fn transition_to_stopped(&self) {
        *self.0.state.lock() = PlcState::Stopped;
        if let Some(handle) = self.0.scan_thread.lock().take() {
            let _ = handle.join();
        }
        self.0.image.clear();
        *self.0.artifact.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginDriver;

    fn fresh() -> StateMachine {
        let image = Arc::new(ImageTables::new());
        let plugins = Arc::new(PluginDriver::new(Arc::clone(&image)));
        StateMachine::new(
            PathBuf::from("/nonexistent/plc/dir"),
            image,
            plugins,
            Arc::new(ScanStats::new()),
            Arc::new(AtomicU64::new(0)),
        )
    }

    #[test]
    fn boots_stopped() {
        assert_eq!(fresh().get_state(), PlcState::Stopped);
    }

    #[test]
    fn set_state_to_current_state_returns_false() {
        let sm = fresh();
        assert!(!sm.set_state(PlcState::Stopped));
    }

    #[test]
    fn missing_artifact_directory_moves_to_empty_and_returns_false() {
        let sm = fresh();
        assert!(!sm.set_state(PlcState::Running));
        assert_eq!(sm.get_state(), PlcState::Empty);
    }

    #[test]
    fn error_is_reachable_from_any_state() {
        let sm = fresh();
        assert!(sm.set_state(PlcState::Error));
        assert_eq!(sm.get_state(), PlcState::Error);
    }

    #[test]
    fn stopped_is_unreachable_directly_from_error() {
        let sm = fresh();
        assert!(sm.set_state(PlcState::Error));
        assert!(!sm.set_state(PlcState::Stopped));
    }

    #[test]
    fn init_is_not_a_publicly_settable_target() {
        let sm = fresh();
        assert!(!sm.set_state(PlcState::Init));
    }
}
