//! # Result Analysis
//!
//! Clinical summary of a finished standard stage: average threshold and
//! hearing-loss grade per ear, steep drops between neighbouring
//! frequencies, and left/right asymmetries.

use crate::reliability::{ReliabilityAssessment, ReliabilityTracker};
use crate::{Ear, ThresholdMap};
use serde::{Deserialize, Serialize};

/// Adjacent-frequency rise (dB) reported as a drop.
const DROP_REPORT_DB: i32 = 20;
/// Left/right difference (dB) reported as an asymmetry.
const ASYMMETRY_DB: i32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HearingLossGrade {
    Normal,
    Mild,
    Moderate,
    ModeratelySevere,
    Severe,
    Profound,
}

impl HearingLossGrade {
    pub fn classify(threshold_db: i32) -> Self {
        match threshold_db {
            ..=25 => HearingLossGrade::Normal,
            26..=40 => HearingLossGrade::Mild,
            41..=55 => HearingLossGrade::Moderate,
            56..=70 => HearingLossGrade::ModeratelySevere,
            71..=90 => HearingLossGrade::Severe,
            _ => HearingLossGrade::Profound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropSeverity {
    Moderate,
    ModeratelySevere,
    Severe,
}

impl DropSeverity {
    pub fn classify(drop_db: i32) -> Self {
        if drop_db > 40 {
            DropSeverity::Severe
        } else if drop_db > 30 {
            DropSeverity::ModeratelySevere
        } else {
            DropSeverity::Moderate
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdDrop {
    pub frequency: u32,
    pub ear: Ear,
    pub threshold: i32,
    pub drop: i32,
    pub severity: DropSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asymmetry {
    pub frequency: u32,
    pub left_threshold: i32,
    pub right_threshold: i32,
    pub difference: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerEar<T> {
    pub left: T,
    pub right: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchTrialSummary {
    pub total: usize,
    pub passed: usize,
    pub false_positives: usize,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsAnalysis {
    pub average_threshold: PerEar<i32>,
    pub hearing_loss: PerEar<HearingLossGrade>,
    pub drops: Vec<ThresholdDrop>,
    pub asymmetry: Vec<Asymmetry>,
    pub reliability: ReliabilityAssessment,
    pub catch_trials: CatchTrialSummary,
}

fn average_threshold(results: &ThresholdMap, ear: Ear) -> i32 {
    let levels: Vec<i32> = results.values().filter_map(|ears| ears.get(ear)).collect();
    if levels.is_empty() {
        return 0;
    }
    (levels.iter().map(|&l| f64::from(l)).sum::<f64>() / levels.len() as f64).round() as i32
}

pub fn analyze_results(results: &ThresholdMap, reliability: &ReliabilityTracker) -> ResultsAnalysis {
    let average = PerEar {
        left: average_threshold(results, Ear::Left),
        right: average_threshold(results, Ear::Right),
    };

    let sorted: Vec<_> = results.iter().collect();
    let mut drops = Vec::new();
    for pair in sorted.windows(2) {
        let (&frequency, curr) = pair[1];
        let prev = pair[0].1;
        for ear in Ear::BOTH {
            if let (Some(before), Some(threshold)) = (prev.get(ear), curr.get(ear)) {
                let drop = threshold - before;
                if drop > DROP_REPORT_DB {
                    drops.push(ThresholdDrop {
                        frequency,
                        ear,
                        threshold,
                        drop,
                        severity: DropSeverity::classify(drop),
                    });
                }
            }
        }
    }

    let asymmetry = results
        .iter()
        .filter_map(|(&frequency, ears)| {
            let (left, right) = (ears.left?, ears.right?);
            let difference = (left - right).abs();
            (difference > ASYMMETRY_DB).then_some(Asymmetry {
                frequency,
                left_threshold: left,
                right_threshold: right,
                difference,
            })
        })
        .collect();

    ResultsAnalysis {
        average_threshold: average,
        hearing_loss: PerEar {
            left: HearingLossGrade::classify(average.left),
            right: HearingLossGrade::classify(average.right),
        },
        drops,
        asymmetry,
        reliability: reliability.get_reliability_assessment(),
        catch_trials: CatchTrialSummary {
            total: reliability.trials().len(),
            passed: reliability.passed(),
            false_positives: reliability.false_positives(),
            score: reliability.calculate_reliability_score(),
        },
    }
}
