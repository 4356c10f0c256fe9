//! # Reliability Tracker
//!
//! Scores how trustworthy the listener's answers are from their behaviour on
//! silent catch trials. Answering "heard" to silence is a false positive.

use crate::now_ms;
use crate::response::Response;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Outcome of one catch trial. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchTrialRecord {
    pub timestamp_ms: i64,
    pub response: Response,
    pub passed: bool,
    pub false_positive: bool,
    pub reaction_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReliabilityLevel {
    Low,
    Moderate,
    Good,
    Excellent,
}

impl ReliabilityLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => ReliabilityLevel::Excellent,
            75..=89 => ReliabilityLevel::Good,
            50..=74 => ReliabilityLevel::Moderate,
            _ => ReliabilityLevel::Low,
        }
    }
}

impl fmt::Display for ReliabilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReliabilityLevel::Excellent => "Excellent",
            ReliabilityLevel::Good => "Good",
            ReliabilityLevel::Moderate => "Moderate",
            ReliabilityLevel::Low => "Low",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReliabilityAssessment {
    pub level: ReliabilityLevel,
    pub score: u32,
    pub false_positive_rate_percent: u32,
    pub false_positives: usize,
    pub catch_trials: usize,
}

impl ReliabilityAssessment {
    /// Human readable summary for reports.
    pub fn message(&self) -> String {
        match self.level {
            ReliabilityLevel::Excellent => format!(
                "High reliability. {} false positives in {} catch trials.",
                self.false_positives, self.catch_trials
            ),
            ReliabilityLevel::Good => format!(
                "Acceptable reliability. {} false positives in {} catch trials.",
                self.false_positives, self.catch_trials
            ),
            ReliabilityLevel::Moderate => format!(
                "Moderate reliability. {} false positives in {} catch trials. Consider repeating the test.",
                self.false_positives, self.catch_trials
            ),
            ReliabilityLevel::Low => format!(
                "Low reliability ({}% false positives). Repeat the test paying closer attention.",
                self.false_positive_rate_percent
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReliabilityTracker {
    trials: Vec<CatchTrialRecord>,
    false_positives: usize,
}

impl ReliabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the answer given to one silent presentation.
    pub fn record(&mut self, response: Response, reaction_time_ms: u64) -> CatchTrialRecord {
        let false_positive = response == Response::Heard;
        let record = CatchTrialRecord {
            timestamp_ms: now_ms() - reaction_time_ms as i64,
            response,
            passed: !false_positive,
            false_positive,
            reaction_time_ms,
        };
        self.trials.push(record);

        if false_positive {
            self.false_positives += 1;
            warn!(
                total = self.false_positives,
                "false positive: listener reported hearing silence"
            );
        } else {
            debug!(?response, "catch trial passed");
        }
        debug!(
            score = self.calculate_reliability_score(),
            catch_trials = self.trials.len(),
            "reliability updated"
        );
        record
    }

    pub fn trials(&self) -> &[CatchTrialRecord] {
        &self.trials
    }

    pub fn false_positives(&self) -> usize {
        self.false_positives
    }

    pub fn passed(&self) -> usize {
        self.trials.iter().filter(|t| t.passed).count()
    }

    /// Percentage of catch trials passed; 100 when none were run.
    pub fn calculate_reliability_score(&self) -> u32 {
        if self.trials.is_empty() {
            return 100;
        }
        ((self.passed() as f64 / self.trials.len() as f64) * 100.0).round() as u32
    }

    pub fn get_reliability_assessment(&self) -> ReliabilityAssessment {
        let score = self.calculate_reliability_score();
        let total = self.trials.len();
        let false_positive_rate_percent = if total > 0 {
            ((self.false_positives as f64 / total as f64) * 100.0).round() as u32
        } else {
            0
        };
        ReliabilityAssessment {
            level: ReliabilityLevel::from_score(score),
            score,
            false_positive_rate_percent,
            false_positives: self.false_positives,
            catch_trials: total,
        }
    }
}
