//! Monotonic clock and interruptible sleep (§4.7 step 2, §5).
//!
//! `std::thread::sleep` does not expose how much time was actually slept
//! when interrupted, and the design doc calls out `EINTR` recovery
//! explicitly (§7 `NanosleepInterrupted`, §8 scenario 5): "recover: resume
//! with remaining time". `libc::nanosleep`'s `rem` out-parameter is exactly
//! that remaining time, so this wraps it directly rather than going through
//! `std::thread::sleep`'s opaque retry loop.

use std::time::Duration;

/// Monotonic "now", used only to measure elapsed wall-clock time within one
/// epoch (§4.7 step 3's overhead compensation) — never for wall-clock dates.
pub fn now() -> Duration {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// Sleeps for `duration`, re-entering `nanosleep` with the remaining time on
/// every `EINTR` until the full duration has elapsed. Returns the actual
/// time slept, which under normal operation equals `duration` but can run
/// slightly long if a signal handler itself takes measurable time.
pub fn sleep_interruptible(duration: Duration) -> Duration {
    let start = now();
    let mut remaining = duration;
    loop {
        let mut req = libc::timespec {
            tv_sec: remaining.as_secs() as i64,
            tv_nsec: remaining.subsec_nanos() as i64,
        };
        let mut rem = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        let rc = unsafe { libc::nanosleep(&mut req, &mut rem) };
        if rc == 0 {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            remaining = Duration::new(rem.tv_sec as u64, rem.tv_nsec as u32);
            if remaining.is_zero() {
                break;
            }
            continue;
        }
        // Any other nanosleep failure (e.g. EINVAL on a malformed request)
        // is a programming error, not a recoverable runtime condition.
        panic!("nanosleep failed: {err}");
    }
    now().saturating_sub(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleeps_at_least_the_requested_duration() {
        let slept = sleep_interruptible(Duration::from_millis(5));
        assert!(slept >= Duration::from_millis(5));
    }

    #[test]
    fn now_is_monotonically_non_decreasing() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }
}
