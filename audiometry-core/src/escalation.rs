//! # Problem-Frequency Analyzer
//!
//! Inspects the finished standard-stage thresholds for steep drops and
//! elevated thresholds in the tinnitus range, and plans the finer "micro"
//! grid that retests around them.

use crate::config::AudiometryConfig;
use crate::sequencer::TestUnit;
use crate::{Ear, ThresholdMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Drop (dB) that flags a frequency inside the tinnitus range.
const TINNITUS_RANGE_DROP_DB: i32 = 15;
/// Absolute threshold (dB HL) that flags a frequency inside the tinnitus range.
const ELEVATED_THRESHOLD_DB: i32 = 30;
/// Two problems closer than this for the same ear are the same problem.
const DEDUP_DISTANCE_HZ: u32 = 100;
/// Exclusive audible bounds for generated micro frequencies.
const AUDIBLE_MIN_HZ: i64 = 20;
const AUDIBLE_MAX_HZ: i64 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemFrequency {
    pub center_frequency: u32,
    pub ear: Ear,
    pub threshold: i32,
    /// Threshold rise from the next lower frequency; 0 for elevated-only.
    pub drop: i32,
    pub priority: Priority,
}

/// Thresholds for escalating to a micro stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPlanner {
    pub tinnitus_range_min: u32,
    pub tinnitus_range_max: u32,
    pub problem_threshold_db: i32,
    pub micro_step: u32,
    pub micro_range: u32,
}

impl From<&AudiometryConfig> for EscalationPlanner {
    fn from(config: &AudiometryConfig) -> Self {
        Self {
            tinnitus_range_min: config.tinnitus_range_min,
            tinnitus_range_max: config.tinnitus_range_max,
            problem_threshold_db: config.problem_threshold_db,
            micro_step: config.micro_step,
            micro_range: config.micro_range,
        }
    }
}

impl Default for EscalationPlanner {
    fn default() -> Self {
        Self::from(&AudiometryConfig::default())
    }
}

impl EscalationPlanner {
    pub fn in_tinnitus_range(&self, frequency: u32) -> bool {
        (self.tinnitus_range_min..=self.tinnitus_range_max).contains(&frequency)
    }

    /// Flags steep drops between adjacent frequencies and elevated
    /// thresholds inside the tinnitus range. Entries come out in traversal
    /// order, not by severity.
    pub fn identify_problem_frequencies(&self, results: &ThresholdMap) -> Vec<ProblemFrequency> {
        let mut problems = Vec::new();
        // ThresholdMap iterates in ascending frequency order.
        let sorted: Vec<_> = results.iter().map(|(&freq, &ears)| (freq, ears)).collect();

        for pair in sorted.windows(2) {
            let (_, prev) = pair[0];
            let (curr_freq, curr) = pair[1];
            for ear in Ear::BOTH {
                let (Some(prev_level), Some(curr_level)) = (prev.get(ear), curr.get(ear)) else {
                    continue;
                };
                let drop = curr_level - prev_level;
                let in_range = self.in_tinnitus_range(curr_freq);
                if drop > self.problem_threshold_db || (in_range && drop > TINNITUS_RANGE_DROP_DB) {
                    problems.push(ProblemFrequency {
                        center_frequency: curr_freq,
                        ear,
                        threshold: curr_level,
                        drop,
                        priority: if in_range { Priority::High } else { Priority::Normal },
                    });
                }
            }
        }

        for &(freq, ears) in sorted.iter().filter(|(freq, _)| self.in_tinnitus_range(*freq)) {
            for ear in Ear::BOTH {
                let Some(level) = ears.get(ear).filter(|&level| level > ELEVATED_THRESHOLD_DB) else {
                    continue;
                };
                let exists = problems
                    .iter()
                    .any(|p| p.ear == ear && p.center_frequency.abs_diff(freq) < DEDUP_DISTANCE_HZ);
                if !exists {
                    problems.push(ProblemFrequency {
                        center_frequency: freq,
                        ear,
                        threshold: level,
                        drop: 0,
                        priority: Priority::High,
                    });
                }
            }
        }

        info!(count = problems.len(), "problem frequencies identified");
        problems
    }

    /// Candidate frequencies around one center, `center ± micro_range` in
    /// `micro_step` increments, before any exclusion. Values below zero are
    /// possible near the bottom of the range.
    pub fn micro_grid(&self, center: u32) -> impl Iterator<Item = i64> + use<> {
        let start = i64::from(center) - i64::from(self.micro_range);
        let end = i64::from(center) + i64::from(self.micro_range);
        (start..=end).step_by(self.micro_step.max(1) as usize)
    }

    /// Builds the unshuffled micro-stage units for the given problems.
    /// Frequencies already on the standard grid, or outside the audible
    /// band, are skipped. Overlapping windows are not deduplicated, so a
    /// frequency near two problems is tested twice.
    pub fn initialize_micro_audiometry(
        &self,
        problems: &[ProblemFrequency],
        standard_frequencies: &[u32],
    ) -> Vec<TestUnit> {
        let mut units = Vec::new();
        for problem in problems {
            let before = units.len();
            units.extend(
                self.micro_grid(problem.center_frequency)
                    .filter(|&freq| freq > AUDIBLE_MIN_HZ && freq < AUDIBLE_MAX_HZ)
                    .map(|freq| freq as u32)
                    .filter(|freq| !standard_frequencies.contains(freq))
                    .map(|freq| TestUnit::micro(freq, problem.ear, problem.center_frequency)),
            );
            debug!(
                center = problem.center_frequency,
                ear = %problem.ear,
                tests = units.len() - before,
                "micro grid planned"
            );
        }
        info!(tests = units.len(), "micro-audiometry initialized");
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STANDARD_FREQUENCIES;
    use crate::record_threshold;

    fn flat(level: i32) -> ThresholdMap {
        let mut map = ThresholdMap::new();
        for &freq in &STANDARD_FREQUENCIES {
            record_threshold(&mut map, freq, Ear::Left, level);
            record_threshold(&mut map, freq, Ear::Right, level);
        }
        map
    }

    #[test]
    fn flat_audiogram_has_no_problems() {
        let planner = EscalationPlanner::default();
        assert!(planner.identify_problem_frequencies(&flat(10)).is_empty());
    }

    #[test]
    fn steep_drop_inside_tinnitus_range_is_high_priority() {
        let planner = EscalationPlanner::default();
        let mut results = flat(10);
        record_threshold(&mut results, 4000, Ear::Left, 30);
        record_threshold(&mut results, 3000, Ear::Left, 5);

        let problems = planner.identify_problem_frequencies(&results);
        // The 4000 -> 6000 recovery is a negative drop and is not flagged.
        assert_eq!(
            problems,
            vec![ProblemFrequency {
                center_frequency: 4000,
                ear: Ear::Left,
                threshold: 30,
                drop: 25,
                priority: Priority::High,
            }]
        );

        let grid: Vec<i64> = planner.micro_grid(4000).collect();
        assert_eq!(grid.len(), 11);
        assert_eq!(grid.first(), Some(&3500));
        assert_eq!(grid.last(), Some(&4500));

        let units = planner.initialize_micro_audiometry(&problems, &STANDARD_FREQUENCIES);
        assert_eq!(units.len(), 10);
        assert!(units.iter().all(|u| u.ear == Some(Ear::Left)));
        assert!(units.iter().all(|u| u.center_frequency == Some(4000)));
        assert!(units.iter().all(|u| u.frequency != Some(4000)));
    }

    #[test]
    fn drop_outside_tinnitus_range_is_normal_priority() {
        let planner = EscalationPlanner::default();
        let mut results = flat(10);
        record_threshold(&mut results, 2000, Ear::Right, 30);
        let problems = planner.identify_problem_frequencies(&results);
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].center_frequency, 2000);
        assert_eq!(problems[0].priority, Priority::Normal);
    }

    #[test]
    fn elevated_threshold_in_range_is_flagged_once() {
        let planner = EscalationPlanner::default();
        let mut results = flat(35);
        // Uniformly elevated: no drops, but 4000 and 6000 exceed 30 dB.
        record_threshold(&mut results, 4000, Ear::Right, 35);
        let problems = planner.identify_problem_frequencies(&results);
        let right: Vec<_> = problems.iter().filter(|p| p.ear == Ear::Right).collect();
        assert_eq!(right.len(), 2);
        assert!(right.iter().all(|p| p.drop == 0 && p.priority == Priority::High));
    }

    #[test]
    fn elevated_check_skips_frequencies_already_flagged_nearby() {
        let planner = EscalationPlanner::default();
        let mut results = flat(10);
        record_threshold(&mut results, 6000, Ear::Left, 40);
        let problems = planner.identify_problem_frequencies(&results);
        let at_6k: Vec<_> = problems.iter().filter(|p| p.center_frequency == 6000).collect();
        assert_eq!(at_6k.len(), 1);
        assert_eq!(at_6k[0].drop, 30);
    }

    #[test]
    fn overlapping_windows_are_not_deduplicated() {
        let planner = EscalationPlanner::default();
        let problems = [
            ProblemFrequency {
                center_frequency: 4000,
                ear: Ear::Left,
                threshold: 40,
                drop: 20,
                priority: Priority::High,
            },
            ProblemFrequency {
                center_frequency: 4300,
                ear: Ear::Left,
                threshold: 40,
                drop: 0,
                priority: Priority::High,
            },
        ];
        let units = planner.initialize_micro_audiometry(&problems, &[]);
        let at_4200 = units.iter().filter(|u| u.frequency == Some(4200)).count();
        assert_eq!(at_4200, 2);
    }

    #[test]
    fn grid_clips_to_audible_band() {
        let planner = EscalationPlanner::default();
        let problem = ProblemFrequency {
            center_frequency: 250,
            ear: Ear::Right,
            threshold: 40,
            drop: 30,
            priority: Priority::Normal,
        };
        let units = planner.initialize_micro_audiometry(&[problem], &[]);
        // -250, -150 and -50 are dropped; 50..=750 remain.
        let freqs: Vec<_> = units.iter().filter_map(|u| u.frequency).collect();
        assert_eq!(freqs.first(), Some(&50));
        assert_eq!(freqs.last(), Some(&750));
        assert_eq!(freqs.len(), 8);
    }
}
