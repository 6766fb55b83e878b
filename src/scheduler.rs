//! Scan-cycle scheduler: the scan thread's body. Grounded on
//! `original_source/core/src/plc_app/scan_cycle_manager.c` for the
//! algorithm and its absolute-deadline accumulation pattern.

use crate::artifact::Artifact;
use crate::clock;
use crate::state::{PlcState, StateMachine};
use std::sync::Arc;
use std::time::Duration;

fn apply_thread_affinity(cpu: Option<usize>) {
    let Some(cpu) = cpu else { return };
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.into_iter().find(|c| c.id == cpu) {
        Some(core_id) => {
            if !core_affinity::set_for_current(core_id) {
                log::warn!("failed to pin scan thread to CPU {cpu}, continuing unpinned");
            }
        }
        None => log::warn!("CPU {cpu} not available for scan-thread affinity, continuing unpinned"),
    }
}

#[cfg(target_os = "linux")]
fn apply_realtime_posture() {
    // Best-effort: fixed-priority scheduling class + page-pinned memory so
    // the hot loop does not fault. Never fatal; hosts lacking
    // these primitives (containers without CAP_SYS_NICE, etc.) just log
    // and keep running on the default scheduler.
    unsafe {
        let param = libc::sched_param { sched_priority: 20 };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
            log::warn!("could not set SCHED_FIFO priority 20 for scan thread, continuing best-effort");
        }
        if libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) != 0 {
            log::warn!("mlockall failed for scan thread, continuing without page pinning");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_realtime_posture() {
    log::warn!("real-time scheduling posture is only implemented for Linux; running best-effort");
}

/// The scan thread's entire body, run to
/// completion when the state machine transitions out of RUNNING.
pub fn run(state: StateMachine, artifact: Arc<Artifact>) {
    apply_thread_affinity(state.thread_affinity());
    apply_realtime_posture();
    state.publish_running();

    let tick_time = Duration::from_nanos(artifact.tick_time_ns());
    let mut tick: u64 = 0;
    let mut expected_start_ns = clock::now_ns();

    loop {
        if state.get_state() != PlcState::Running {
            return;
        }

        let cycle_start_ns = clock::now_ns();

        {
            let _tables = state.image().lock();
            state.plugins().cycle_start();
            artifact.run(tick);
            tick = tick.wrapping_add(1);
            artifact.update_time();
            state.plugins().cycle_end();
        }

        state
            .heartbeat()
            .store(wall_now_secs(), std::sync::atomic::Ordering::Release);

        let cycle_end_ns = clock::now_ns();
        state.stats().record_cycle(
            Duration::from_nanos(cycle_start_ns),
            Duration::from_nanos(cycle_end_ns),
            Duration::from_nanos(expected_start_ns),
            tick_time,
        );

        let next_deadline_ns = expected_start_ns + tick_time.as_nanos() as u64;
        clock::sleep_until_ns(next_deadline_ns);
        expected_start_ns = next_deadline_ns;
    }
}

fn wall_now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
