//! Monotonic clock access for the scan-cycle scheduler.
//!
//! `CLOCK_MONOTONIC_RAW` is preferred where the host provides it (it is
//! immune to NTP slewing, unlike `CLOCK_MONOTONIC`); everywhere else we
//! fall back to `CLOCK_MONOTONIC`. Grounded on the `#if defined(__CYGWIN__)
//! ...` fallback in `original_source/core/src/plc_app/scan_cycle_manager.c`.

#[cfg(all(target_os = "linux", not(target_env = "musl")))]
const CLOCK_ID: libc::clockid_t = libc::CLOCK_MONOTONIC_RAW;
#[cfg(not(all(target_os = "linux", not(target_env = "musl"))))]
const CLOCK_ID: libc::clockid_t = libc::CLOCK_MONOTONIC;

/// Nanoseconds since an arbitrary, monotonically increasing epoch. Only
/// differences between two calls are meaningful.
pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, fully initialized out-param; CLOCK_ID is a
    // static, host-supported clock id.
    unsafe {
        libc::clock_gettime(CLOCK_ID, &mut ts);
    }
    #[allow(clippy::cast_sign_loss)]
    {
        (ts.tv_sec as u64)
            .saturating_mul(1_000_000_000)
            .saturating_add(ts.tv_nsec as u64)
    }
}

/// Sleep until the given absolute deadline (nanoseconds on the same clock
/// as [`now_ns`]). A deadline already in the past returns immediately,
/// which is how an overrun surfaces: the next cycle starts late rather
/// than the sleep going negative.
pub fn sleep_until_ns(deadline_ns: u64) {
    let now = now_ns();
    if deadline_ns > now {
        std::thread::sleep(std::time::Duration::from_nanos(deadline_ns - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ns_is_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }

    #[test]
    fn sleep_until_past_deadline_returns_immediately() {
        let start = now_ns();
        sleep_until_ns(start.saturating_sub(1_000_000_000));
        assert!(now_ns() - start < 50_000_000);
    }
}
