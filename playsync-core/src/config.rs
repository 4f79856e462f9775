//! Tunables for the sync protocol

use std::time::Duration;

use crate::media::OfferOptions;

/// Host heartbeat period
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// How long inbound-applied commands suppress outbound echoes
const DEFAULT_LOOP_GUARD_WINDOW: Duration = Duration::from_millis(300);

/// Drift (seconds) at which a client starts reporting desync
const DEFAULT_DRIFT_OBSERVE_THRESHOLD: f64 = 0.5;

/// Drift (seconds) above which a client hard-seeks to the host position
const DEFAULT_DRIFT_CORRECT_THRESHOLD: f64 = 1.0;

/// Sync protocol configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between host heartbeats
    pub heartbeat_interval: Duration,
    /// Loop guard suppression window after applying a remote command
    pub loop_guard_window: Duration,
    /// Lower bound of the diagnostic drift band (seconds)
    pub drift_observe_threshold: f64,
    /// Drift above which the client corrects (seconds)
    pub drift_correct_threshold: f64,
    /// Offer transform passed to the transport when the host sends media
    pub offer: OfferOptions,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            loop_guard_window: DEFAULT_LOOP_GUARD_WINDOW,
            drift_observe_threshold: DEFAULT_DRIFT_OBSERVE_THRESHOLD,
            drift_correct_threshold: DEFAULT_DRIFT_CORRECT_THRESHOLD,
            offer: OfferOptions::default(),
        }
    }
}

impl SyncConfig {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_loop_guard_window(mut self, window: Duration) -> Self {
        self.loop_guard_window = window;
        self
    }

    pub fn with_drift_thresholds(mut self, observe: f64, correct: f64) -> Self {
        self.drift_observe_threshold = observe;
        self.drift_correct_threshold = correct;
        self
    }

    pub fn with_max_bitrate(mut self, max_bitrate_bps: u64) -> Self {
        self.offer.max_bitrate_bps = max_bitrate_bps;
        self
    }
}
