//! # Assessment Report
//!
//! The serializable bundle emitted when a session ends. Storage medium is
//! up to the caller; JSON file helpers are provided.

use crate::analysis::ResultsAnalysis;
use crate::error::ReportError;
use crate::escalation::ProblemFrequency;
use crate::reliability::{CatchTrialRecord, ReliabilityAssessment};
use crate::sequencer::SequenceExport;
use crate::ThresholdMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Every stage ran to the end.
    Completed,
    /// The session was stopped; results are partial.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReliabilitySummary {
    pub score: u32,
    pub catch_trials: Vec<CatchTrialRecord>,
    pub false_positives: usize,
    pub assessment: ReliabilityAssessment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentReport {
    pub status: SessionStatus,
    pub test_date: DateTime<Utc>,
    pub test_duration_ms: u64,
    pub standard_results: ThresholdMap,
    pub micro_results: ThresholdMap,
    pub problem_frequencies: Vec<ProblemFrequency>,
    pub reliability: ReliabilitySummary,
    pub analysis: ResultsAnalysis,
    /// Thresholds that came from the trial-cap fallback rather than a
    /// converged staircase.
    pub forced_thresholds: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_sequence: Option<SequenceExport>,
}

impl AssessmentReport {
    /// Saves the report as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads a report previously written by [`AssessmentReport::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
