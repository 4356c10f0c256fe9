//! # Configuration Module
//!
//! Every tunable of the assessment lives here with its default. Configs are
//! stored as JSON; any key left out of the file falls back to the default,
//! so a partial file such as `{"startLevel": 30}` is valid.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Standard audiometric test grid, in Hz.
pub const STANDARD_FREQUENCIES: [u32; 13] = [
    125, 250, 500, 750, 1000, 1500, 2000, 3000, 4000, 6000, 8000, 10000, 12000,
];

/// Options for building a randomized test sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SequencerOptions {
    /// Fraction of the standard test count inserted as catch trials.
    #[serde(alias = "catchTrialProbability")]
    pub catch_trial_frequency: f64,
    /// Minimum number of tests between catch trials.
    pub min_catch_trial_interval: usize,
    /// Upper bound (exclusive) on tests between catch trials.
    pub max_catch_trial_interval: usize,
    /// Avoid presenting frequencies less than half an octave apart back to back.
    pub avoid_adjacent_freqs: bool,
    /// Maximum run length of presentations to the same ear.
    pub max_consecutive_same_ear: usize,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            catch_trial_frequency: 0.15,
            min_catch_trial_interval: 5,
            max_catch_trial_interval: 10,
            avoid_adjacent_freqs: true,
            max_consecutive_same_ear: 2,
        }
    }
}

/// An inclusive-exclusive millisecond range a random duration is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MillisRange {
    pub min: u64,
    pub max: u64,
}

impl MillisRange {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub const fn fixed(ms: u64) -> Self {
        Self { min: ms, max: ms }
    }

    pub fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let ms = if self.max > self.min {
            rng.gen_range(self.min..self.max)
        } else {
            self.min
        };
        Duration::from_millis(ms)
    }
}

/// The full assessment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct AudiometryConfig {
    /// Standard-stage test frequencies in Hz.
    pub frequencies: Vec<u32>,

    pub min_level: i32,
    pub max_level: i32,
    pub start_level: i32,

    pub descend_step: i32,
    pub ascend_step: i32,
    pub fast_track_step: i32,

    pub response_timeout_ms: u64,
    pub tone_duration_ms: MillisRange,
    pub inter_tone_delay_ms: MillisRange,
    pub pre_test_delay_ms: u64,
    pub pause_poll_ms: u64,

    /// Heard responses needed out of three at one ascending level.
    pub required_responses: usize,
    pub max_trials_per_freq: usize,

    /// Standard-stage sequencing.
    pub sequencer: SequencerOptions,
    /// Top-level shorthand for `sequencer.catchTrialFrequency`; wins over
    /// the nested value when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catch_trial_probability: Option<f64>,
    /// Seed for reproducible sequences; fresh entropy when absent.
    pub seed: Option<u64>,

    pub micro_step: u32,
    pub micro_range: u32,
    pub tinnitus_range_min: u32,
    pub tinnitus_range_max: u32,
    pub problem_threshold_db: i32,
    pub enable_micro_audiometry: bool,
}

impl Default for AudiometryConfig {
    fn default() -> Self {
        Self {
            frequencies: STANDARD_FREQUENCIES.to_vec(),
            min_level: -10,
            max_level: 90,
            start_level: 40,
            descend_step: 10,
            ascend_step: 5,
            fast_track_step: 20,
            response_timeout_ms: 2500,
            tone_duration_ms: MillisRange::new(800, 1200),
            inter_tone_delay_ms: MillisRange::new(1000, 2000),
            pre_test_delay_ms: 500,
            pause_poll_ms: 100,
            required_responses: 2,
            max_trials_per_freq: 15,
            sequencer: SequencerOptions {
                catch_trial_frequency: 0.12,
                min_catch_trial_interval: 6,
                max_catch_trial_interval: 12,
                avoid_adjacent_freqs: true,
                max_consecutive_same_ear: 2,
            },
            catch_trial_probability: None,
            seed: None,
            micro_step: 100,
            micro_range: 500,
            tinnitus_range_min: 4000,
            tinnitus_range_max: 7000,
            problem_threshold_db: 15,
            enable_micro_audiometry: true,
        }
    }
}

impl AudiometryConfig {
    /// Loads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// A config with every delay removed and a short response window,
    /// for simulated listeners and tests.
    pub fn instant() -> Self {
        Self::default().without_delays()
    }

    /// Keeps every test parameter but drops the timing, so a listener that
    /// answers immediately runs at full speed.
    pub fn without_delays(self) -> Self {
        Self {
            response_timeout_ms: 5,
            tone_duration_ms: MillisRange::fixed(0),
            inter_tone_delay_ms: MillisRange::fixed(0),
            pre_test_delay_ms: 0,
            pause_poll_ms: 1,
            ..self
        }
    }

    /// Sequencer options with the top-level `catchTrialProbability` applied.
    pub fn sequencer_options(&self) -> SequencerOptions {
        let mut options = self.sequencer.clone();
        if let Some(probability) = self.catch_trial_probability {
            options.catch_trial_frequency = probability;
        }
        options
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.min_level >= self.max_level {
            return invalid(format!(
                "minLevel ({}) must be below maxLevel ({})",
                self.min_level, self.max_level
            ));
        }
        if !(self.min_level..=self.max_level).contains(&self.start_level) {
            return invalid(format!(
                "startLevel ({}) outside [{}, {}]",
                self.start_level, self.min_level, self.max_level
            ));
        }
        if self.descend_step <= 0 || self.ascend_step <= 0 || self.fast_track_step <= 0 {
            return invalid("level steps must be positive".into());
        }
        if self.required_responses == 0 || self.required_responses > 3 {
            return invalid(format!(
                "requiredResponses ({}) must be between 1 and 3",
                self.required_responses
            ));
        }
        if self.max_trials_per_freq == 0 {
            return invalid("maxTrialsPerFreq must be at least 1".into());
        }
        if self.frequencies.contains(&0) {
            return invalid("test frequencies must be positive".into());
        }
        let seq = self.sequencer_options();
        if !(0.0..=1.0).contains(&seq.catch_trial_frequency) {
            return invalid(format!(
                "catch trial probability ({}) must be within [0, 1]",
                seq.catch_trial_frequency
            ));
        }
        if seq.min_catch_trial_interval > seq.max_catch_trial_interval {
            return invalid("minCatchTrialInterval exceeds maxCatchTrialInterval".into());
        }
        if self.micro_step == 0 {
            return invalid("microStep must be positive".into());
        }
        if self.tinnitus_range_min > self.tinnitus_range_max {
            return invalid("tinnitusRangeMin exceeds tinnitusRangeMax".into());
        }
        if self.tone_duration_ms.min > self.tone_duration_ms.max
            || self.inter_tone_delay_ms.min > self.inter_tone_delay_ms.max
        {
            return invalid("millisecond ranges must have min <= max".into());
        }
        Ok(())
    }
}
