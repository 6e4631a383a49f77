//! Cross-platform time helpers for native and WASM targets

use race_arena_core::Clock;
pub use std::time::Duration;

/// Sleep for a duration.
///
/// On native platforms, uses `tokio::time::sleep`.
/// On WASM, uses `gloo_timers::future::sleep`.
#[cfg(not(target_arch = "wasm32"))]
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(target_arch = "wasm32")]
pub async fn sleep(duration: Duration) {
    gloo_timers::future::sleep(duration).await;
}

/// Create an interval that ticks at the given duration.
///
/// On native platforms, uses `tokio::time::interval`.
/// On WASM, uses a custom implementation with gloo_timers.
#[cfg(not(target_arch = "wasm32"))]
pub fn interval(period: Duration) -> tokio::time::Interval {
    tokio::time::interval(period)
}

/// WASM-compatible interval
#[cfg(target_arch = "wasm32")]
pub struct Interval {
    period: Duration,
}

#[cfg(target_arch = "wasm32")]
impl Interval {
    pub async fn tick(&mut self) {
        gloo_timers::future::sleep(self.period).await;
    }
}

#[cfg(target_arch = "wasm32")]
pub fn interval(period: Duration) -> Interval {
    Interval { period }
}

/// Wall clock for the runtime.
///
/// On native platforms the epoch time is read once and then advanced by the
/// runtime's monotonic clock, so race time stays consistent with the timers
/// that drive ticks (including paused time in tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeClock;

#[cfg(not(target_arch = "wasm32"))]
impl Clock for RuntimeClock {
    fn now_ms(&self) -> u64 {
        use std::sync::OnceLock;
        static ANCHOR: OnceLock<(u64, tokio::time::Instant)> = OnceLock::new();
        let (epoch_ms, origin) =
            ANCHOR.get_or_init(|| (race_arena_core::now_ms(), tokio::time::Instant::now()));
        let now = tokio::time::Instant::now();
        // Paused runtimes may sit behind the anchor.
        if now >= *origin {
            epoch_ms + (now - *origin).as_millis() as u64
        } else {
            epoch_ms.saturating_sub((*origin - now).as_millis() as u64)
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl Clock for RuntimeClock {
    fn now_ms(&self) -> u64 {
        js_sys::Date::now() as u64
    }
}
