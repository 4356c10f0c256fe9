// audiometry-core/src/lib.rs

//! The core logic for the self-administered hearing assessment.
//! This crate is responsible for test sequencing, the adaptive staircase,
//! catch-trial reliability scoring and problem-frequency escalation.
//! It is completely headless and contains no terminal or GUI code;
//! tones are played through the [`presenter::TonePresenter`] collaborator.

pub mod analysis;
#[cfg(feature = "audio")]
pub mod audio;
pub mod config;
pub mod error;
pub mod escalation;
pub mod events;
pub mod presenter;
pub mod reliability;
pub mod report;
pub mod response;
pub mod sequencer;
pub mod session;
pub mod staircase;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use config::{AudiometryConfig, SequencerOptions};
pub use error::{ConfigError, ReportError, SequencerError, SessionError};
pub use report::AssessmentReport;
pub use response::{Responder, Response, ResponseSlot};
pub use session::{AssessmentSession, SessionControl};

/// One of the two ears, tested independently throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ear {
    Left,
    Right,
}

impl Ear {
    pub const BOTH: [Ear; 2] = [Ear::Left, Ear::Right];

    /// Stereo pan position: -1.0 is hard left, 1.0 hard right.
    pub fn pan(self) -> f32 {
        match self {
            Ear::Left => -1.0,
            Ear::Right => 1.0,
        }
    }
}

impl fmt::Display for Ear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ear::Left => f.write_str("left"),
            Ear::Right => f.write_str("right"),
        }
    }
}

/// Thresholds measured at a single frequency, in dB HL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<i32>,
}

impl EarThresholds {
    pub fn get(&self, ear: Ear) -> Option<i32> {
        match ear {
            Ear::Left => self.left,
            Ear::Right => self.right,
        }
    }

    pub fn set(&mut self, ear: Ear, threshold_db: i32) {
        match ear {
            Ear::Left => self.left = Some(threshold_db),
            Ear::Right => self.right = Some(threshold_db),
        }
    }
}

/// Frequency (Hz) to per-ear threshold map.
// BTreeMap keeps frequencies sorted, which the drop analysis relies on.
pub type ThresholdMap = BTreeMap<u32, EarThresholds>;

/// Records a threshold into a results map, overwriting any previous value.
pub fn record_threshold(map: &mut ThresholdMap, frequency: u32, ear: Ear, threshold_db: i32) {
    map.entry(frequency).or_default().set(ear, threshold_db);
}

/// Milliseconds since the Unix epoch, used for record timestamps.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
