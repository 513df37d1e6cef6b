use std::time::{Duration, Instant};

/// Monotonic clock with a fixed reference point, plus the waits the scheduler needs.
pub trait Timer: Clone + Send + Sync {
    /// Nanoseconds since the timer's reference point.
    fn now(&self) -> u64;

    /// Coarse wait. May overshoot by the platform's sleep granularity.
    fn sleep(&self, d: Duration);

    /// Blocks until `now() >= deadline_ns`.
    fn spin_until(&self, deadline_ns: u64);

    fn elapsed(&self, ts: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(ts))
    }

    fn spin_for(&self, d: Duration) {
        let deadline = self.now().saturating_add(duration_ns(d));
        self.spin_until(deadline);
    }

    fn now_secs(&self) -> f64 {
        self.now() as f64 / 1e9
    }
}

pub fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Real clock. `spin_until` sleeps to within `spin_margin` of the deadline and
/// busy-waits the rest; it burns a core on purpose.
#[derive(Debug, Clone)]
pub struct HighPrecisionTimer {
    pub start: Instant,
    pub spin_margin: Duration,
}

impl Timer for HighPrecisionTimer {
    fn now(&self) -> u64 {
        duration_ns(self.start.elapsed())
    }

    fn sleep(&self, d: Duration) {
        self.high_precision_sleep(d)
    }

    fn spin_until(&self, deadline_ns: u64) {
        loop {
            let now = self.now();
            if now >= deadline_ns {
                return;
            }
            let remaining = Duration::from_nanos(deadline_ns - now);
            if remaining > self.spin_margin {
                self.high_precision_sleep(remaining - self.spin_margin);
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

impl HighPrecisionTimer {
    pub const DEFAULT_SPIN_MARGIN: Duration = Duration::from_millis(2);

    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            spin_margin: Self::DEFAULT_SPIN_MARGIN,
        }
    }

    pub fn with_spin_margin(mut self, margin: Duration) -> Self {
        self.spin_margin = margin;
        self
    }

    pub fn high_precision_sleep(&self, duration: Duration) {
        #[cfg(target_os = "windows")]
        self.windows_sleep(duration);
        #[cfg(target_os = "linux")]
        self.linux_sleep(duration);
        #[cfg(target_os = "macos")]
        self.macos_sleep(duration);
        #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
        std::thread::sleep(duration);
    }

    #[cfg(target_os = "windows")]
    fn windows_sleep(&self, duration: Duration) {
        use windows::core::PCWSTR;
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::Threading::{
            CreateWaitableTimerW, SetWaitableTimer, WaitForSingleObject, INFINITE,
        };

        // negative due time is relative, in 100 ns units
        let due_time = -((duration.as_nanos() / 100) as i64);

        unsafe {
            let Ok(timer) = CreateWaitableTimerW(None, true, PCWSTR::null()) else {
                std::thread::sleep(duration);
                return;
            };
            if SetWaitableTimer(timer, &due_time, 0, None, None, false).is_ok() {
                WaitForSingleObject(timer, INFINITE);
            } else {
                std::thread::sleep(duration);
            }
            let _ = CloseHandle(timer);
        }
    }

    #[cfg(target_os = "linux")]
    fn linux_sleep(&self, duration: Duration) {
        use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC, EINTR};

        let mut req = timespec {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_nsec: duration.subsec_nanos() as libc::c_long,
        };
        let mut rem = timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };

        // resume after signal interruptions with whatever is left
        loop {
            let rc = unsafe { clock_nanosleep(CLOCK_MONOTONIC, 0, &req, &mut rem) };
            if rc != EINTR {
                break;
            }
            req = rem;
        }
    }

    #[cfg(target_os = "macos")]
    fn macos_sleep(&self, duration: Duration) {
        use mach2::mach_time::{mach_absolute_time, mach_timebase_info, mach_timebase_info_data_t};

        if duration.as_nanos() < 100_000 {
            unsafe {
                let start = mach_absolute_time();
                let mut timebase = mach_timebase_info_data_t { numer: 0, denom: 0 };
                mach_timebase_info(&mut timebase);

                let target_ticks =
                    duration.as_nanos() as u64 * timebase.denom as u64 / timebase.numer as u64;

                while mach_absolute_time() - start < target_ticks {
                    std::hint::spin_loop();
                }
            }
        } else {
            std::thread::sleep(duration);
        }
    }
}

impl Default for HighPrecisionTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spin_until_never_returns_early() {
        let timer = HighPrecisionTimer::new();
        for step in [0u64, 50_000, 500_000, 3_000_000] {
            let deadline = timer.now() + step;
            timer.spin_until(deadline);
            assert!(timer.now() >= deadline);
        }
    }

    #[test]
    fn spin_for_is_close_to_requested_hold() {
        let timer = HighPrecisionTimer::new();
        let before = timer.now();
        timer.spin_for(Duration::from_millis(5));
        let held = timer.now() - before;
        assert!(held >= 5_000_000);
        // generous bound: CI machines get descheduled
        assert!(held < 50_000_000, "held {held} ns");
    }

    #[test]
    fn now_is_monotonic() {
        let timer = HighPrecisionTimer::new();
        let mut last = timer.now();
        for _ in 0..1000 {
            let now = timer.now();
            assert!(now >= last);
            last = now;
        }
    }
}
