//! Configuration types for race-arena

use race_arena_core::{PollCadence, SimTuning};
use std::time::Duration;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Presence heartbeat interval (default: 10s)
    pub heartbeat_interval: Duration,
    /// Poll cadence per phase
    pub poll: PollCadence,
    /// A newly appointed host preserves positions past this much race time (default: 500ms)
    pub takeover_grace_ms: u64,
    /// Countdown length in seconds (default: 3)
    pub countdown_seconds: u32,
    /// Guest render frame interval (default: 16ms)
    pub frame_interval: Duration,
    /// Fraction of the gap to the confirmed position closed per frame (default: 0.12)
    pub smoothing: f64,
    /// Event channel capacity (default: 100)
    pub event_capacity: usize,
    /// Fixed simulation seed; random per race when unset
    pub seed: Option<u64>,
    /// Simulation calibration
    pub tuning: SimTuning,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            poll: PollCadence::default(),
            takeover_grace_ms: 500,
            countdown_seconds: 3,
            frame_interval: Duration::from_millis(16),
            smoothing: 0.12,
            event_capacity: 100,
            seed: None,
            tuning: SimTuning::default(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn poll(mut self, cadence: PollCadence) -> Self {
        self.poll = cadence;
        self
    }

    pub fn takeover_grace_ms(mut self, ms: u64) -> Self {
        self.takeover_grace_ms = ms;
        self
    }

    pub fn countdown_seconds(mut self, secs: u32) -> Self {
        self.countdown_seconds = secs;
        self
    }

    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn smoothing(mut self, factor: f64) -> Self {
        self.smoothing = factor;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn tuning(mut self, tuning: SimTuning) -> Self {
        self.tuning = tuning;
        self
    }
}

/// HTTP room service configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Service origin, e.g. `https://api.example.com`
    pub base_url: String,
    /// Path prefix of the room resource (default: `/api/game/rooms`)
    pub api_prefix: String,
    /// Per-request timeout (default: 10s)
    pub timeout: Duration,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_prefix: "/api/game/rooms".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Absolute URL of `path` under the room resource.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}{}{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix,
            path
        )
    }
}
