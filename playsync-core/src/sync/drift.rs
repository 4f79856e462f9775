//! Drift correction for clients
//!
//! Compares the local playback position against the host's heartbeat and
//! decides whether to leave it alone, only report it, or hard-seek.

use crate::config::SyncConfig;

/// Outcome of comparing local position against a heartbeat
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftAction {
    /// Drift below the observe threshold, nothing to do
    InSync,
    /// Drift in the hysteresis band: reported, not corrected
    Observed { drift: f64 },
    /// Drift large enough that the local position must jump to `target`
    Correct { drift: f64, target: f64 },
}

/// Decides how to react to a heartbeat
#[derive(Debug, Clone, Copy)]
pub struct DriftCorrector {
    observe_threshold: f64,
    correct_threshold: f64,
}

impl DriftCorrector {
    pub fn new(observe_threshold: f64, correct_threshold: f64) -> Self {
        Self {
            observe_threshold,
            correct_threshold: correct_threshold.max(observe_threshold),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.drift_observe_threshold, config.drift_correct_threshold)
    }

    /// Evaluate drift between our position and the host's reported one
    pub fn evaluate(&self, local: f64, remote: f64) -> DriftAction {
        let drift = (local - remote).abs();

        if drift > self.correct_threshold {
            DriftAction::Correct {
                drift,
                target: remote,
            }
        } else if drift >= self.observe_threshold {
            DriftAction::Observed { drift }
        } else {
            DriftAction::InSync
        }
    }
}

impl Default for DriftCorrector {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
