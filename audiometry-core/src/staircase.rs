//! # Staircase Controller
//!
//! Hughson-Westlake style adaptive procedure for a single (frequency, ear)
//! pair. The level descends in large steps while the tone is heard, turns
//! around at the first miss, then ascends in small steps until one level
//! collects enough "heard" answers.
//!
//! The controller always terminates and always yields a threshold: a trial
//! cap forces termination and [`StaircaseController::calculate_threshold`]
//! falls back to the best available estimate when the 2-of-3 rule never
//! fired.

use crate::config::AudiometryConfig;
use crate::now_ms;
use crate::response::Response;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Distance above the highest miss beyond which a miss jumps by the
/// fast-track step.
const FAST_TRACK_MARGIN_DB: i32 = 20;
/// Maximum spread of the secondary "cluster" criterion.
const CLUSTER_SPAN_DB: i32 = 5;
/// Presentations per level considered by the 2-of-3 rule.
const PRESENTATIONS_PER_LEVEL: usize = 3;
/// Margin added to the highest miss when nothing was ever heard ascending.
const NO_RESPONSE_MARGIN_DB: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Descending,
    Ascending,
    /// A threshold rule fired; further responses are ignored.
    Done,
}

/// One answered presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub level: i32,
    pub heard: bool,
    pub explicit_no: bool,
    pub timestamp_ms: i64,
    pub phase: Phase,
}

impl ResponseRecord {
    /// A miss with no explicit "no" was a timeout.
    pub fn timed_out(&self) -> bool {
        !self.heard && !self.explicit_no
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AscendingResponse {
    level: i32,
    heard: bool,
}

/// Which rule ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdCriterion {
    /// Enough heard answers out of three at one ascending level.
    TwoOfThree,
    /// Three or more heard answers packed within 5 dB.
    Cluster,
    /// The trial cap was exceeded; the threshold is a fallback estimate.
    TrialCap,
}

impl ThresholdCriterion {
    pub fn is_degraded(self) -> bool {
        self == ThresholdCriterion::TrialCap
    }
}

/// Level parameters of a run, copied out of the session config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaircaseParams {
    pub min_level: i32,
    pub max_level: i32,
    pub start_level: i32,
    pub descend_step: i32,
    pub ascend_step: i32,
    pub fast_track_step: i32,
    pub required_responses: usize,
    pub max_trials: usize,
}

impl From<&AudiometryConfig> for StaircaseParams {
    fn from(config: &AudiometryConfig) -> Self {
        Self {
            min_level: config.min_level,
            max_level: config.max_level,
            start_level: config.start_level,
            descend_step: config.descend_step,
            ascend_step: config.ascend_step,
            fast_track_step: config.fast_track_step,
            required_responses: config.required_responses,
            max_trials: config.max_trials_per_freq,
        }
    }
}

impl Default for StaircaseParams {
    fn default() -> Self {
        Self::from(&AudiometryConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct StaircaseController {
    params: StaircaseParams,
    level: i32,
    phase: Phase,
    responses: Vec<ResponseRecord>,
    ascending: Vec<AscendingResponse>,
    lowest_heard: Option<i32>,
    highest_not_heard: Option<i32>,
    criterion: Option<ThresholdCriterion>,
}

impl StaircaseController {
    pub fn new(params: StaircaseParams) -> Self {
        Self {
            params,
            level: params.start_level.clamp(params.min_level, params.max_level),
            phase: Phase::Descending,
            responses: Vec::new(),
            ascending: Vec::new(),
            lowest_heard: None,
            highest_not_heard: None,
            criterion: None,
        }
    }

    /// Level of the next presentation, in dB HL.
    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn responses(&self) -> &[ResponseRecord] {
        &self.responses
    }

    pub fn lowest_heard(&self) -> Option<i32> {
        self.lowest_heard
    }

    pub fn highest_not_heard(&self) -> Option<i32> {
        self.highest_not_heard
    }

    /// Feeds a resolved response slot into the staircase.
    pub fn record(&mut self, response: Response) {
        self.process_response(response == Response::Heard, response == Response::NotHeard);
    }

    /// Core transition: logs the answer at the current level and moves the
    /// level for the next presentation.
    pub fn process_response(&mut self, heard: bool, explicit_no: bool) {
        if self.phase == Phase::Done {
            debug!(heard, "staircase already done, response ignored");
            return;
        }
        let presented = self.level;
        let phase = self.phase;
        self.responses.push(ResponseRecord {
            level: presented,
            heard,
            explicit_no: explicit_no && !heard,
            timestamp_ms: now_ms(),
            phase,
        });

        if heard {
            self.lowest_heard = Some(self.lowest_heard.map_or(presented, |low| low.min(presented)));
        } else {
            self.highest_not_heard =
                Some(self.highest_not_heard.map_or(presented, |high| high.max(presented)));
        }

        let p = self.params;
        match self.phase {
            Phase::Descending if heard => {
                if presented <= p.min_level {
                    // Heard at the floor: nothing left to descend into.
                    self.phase = Phase::Ascending;
                    debug!(level = presented, "descent bottomed out, switching to ascending");
                } else {
                    self.level -= p.descend_step;
                }
            }
            Phase::Descending => {
                self.phase = Phase::Ascending;
                self.level += p.ascend_step;
                debug!(level = self.level, "first miss, switching to ascending");
            }
            Phase::Ascending if heard => {
                self.ascending.push(AscendingResponse {
                    level: presented,
                    heard: true,
                });
                self.level -= p.ascend_step;
            }
            Phase::Ascending => {
                let far_below = self
                    .highest_not_heard
                    .is_some_and(|high| self.level > high + FAST_TRACK_MARGIN_DB);
                if far_below {
                    self.level += p.fast_track_step;
                } else {
                    self.level += p.ascend_step;
                }
            }
            Phase::Done => {}
        }

        // Keeps the trial cap reachable however long the descent would run.
        if self.phase == Phase::Descending && self.responses.len() > p.max_trials {
            self.phase = Phase::Ascending;
        }

        self.level = self.level.clamp(p.min_level, p.max_level);

        if let Some(criterion) = self.evaluate() {
            self.criterion = Some(criterion);
            self.phase = Phase::Done;
        }

        debug!(
            ?phase,
            level = presented,
            heard,
            explicit_no,
            next = self.level,
            "staircase response"
        );
    }

    /// The rule that ended the run, once the controller is [`Phase::Done`].
    pub fn threshold_status(&self) -> Option<ThresholdCriterion> {
        self.criterion
    }

    /// Checks the stopping rules against the history so far. Never fires
    /// while descending.
    fn evaluate(&self) -> Option<ThresholdCriterion> {
        if self.phase == Phase::Descending {
            return None;
        }

        if self.responses.len() > self.params.max_trials {
            return Some(ThresholdCriterion::TrialCap);
        }

        if self.level_stats().values().any(|stats| self.meets_two_of_three(stats)) {
            return Some(ThresholdCriterion::TwoOfThree);
        }

        let heard_levels: Vec<i32> = self
            .ascending
            .iter()
            .filter(|r| r.heard)
            .map(|r| r.level)
            .collect();
        if heard_levels.len() >= 3 {
            let min = heard_levels.iter().copied().min().unwrap_or_default();
            let max = heard_levels.iter().copied().max().unwrap_or_default();
            if max - min <= CLUSTER_SPAN_DB {
                let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
                for level in &heard_levels {
                    *counts.entry(*level).or_default() += 1;
                }
                if counts.values().any(|&count| count >= 2) {
                    return Some(ThresholdCriterion::Cluster);
                }
            }
        }

        None
    }

    pub fn threshold_found(&self) -> bool {
        self.threshold_status().is_some()
    }

    /// Threshold estimate in dB HL, always within the configured level range.
    pub fn calculate_threshold(&self) -> i32 {
        let p = self.params;
        let by_rule = self
            .level_stats()
            .into_iter()
            .find(|(_, stats)| self.meets_two_of_three(stats))
            .map(|(level, _)| level);

        let threshold = match by_rule {
            Some(level) => level,
            None => match self.ascending.iter().filter(|r| r.heard).map(|r| r.level).min() {
                Some(lowest) => {
                    warn!(threshold = lowest, "using fallback threshold (lowest heard)");
                    lowest
                }
                None => {
                    let fallback = self
                        .highest_not_heard
                        .map_or(p.max_level, |high| high + NO_RESPONSE_MARGIN_DB);
                    warn!(threshold = fallback, "no positive responses, using fallback");
                    fallback
                }
            },
        };

        threshold.clamp(p.min_level, p.max_level)
    }

    /// Logs and returns the outcome once the run has ended.
    pub fn outcome(&self) -> Option<StaircaseOutcome> {
        let criterion = self.threshold_status()?;
        let outcome = StaircaseOutcome {
            threshold_db: self.calculate_threshold(),
            criterion,
            trials: self.responses.len(),
            timeouts: self.responses.iter().filter(|r| r.timed_out()).count(),
        };
        if criterion.is_degraded() {
            warn!(
                trials = outcome.trials,
                threshold = outcome.threshold_db,
                "max trials reached, forcing threshold calculation"
            );
        } else {
            info!(
                ?criterion,
                trials = outcome.trials,
                threshold = outcome.threshold_db,
                "threshold found"
            );
        }
        Some(outcome)
    }

    /// Ascending answers grouped by exact level, lowest level first.
    fn level_stats(&self) -> BTreeMap<i32, LevelStats> {
        let mut by_level: BTreeMap<i32, LevelStats> = BTreeMap::new();
        for r in &self.ascending {
            let stats = by_level.entry(r.level).or_default();
            stats.total += 1;
            if r.heard {
                stats.heard += 1;
            }
        }
        by_level
    }

    fn meets_two_of_three(&self, stats: &LevelStats) -> bool {
        stats.total >= PRESENTATIONS_PER_LEVEL && stats.heard >= self.params.required_responses
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LevelStats {
    total: usize,
    heard: usize,
}

/// Result of a finished staircase run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaircaseOutcome {
    pub threshold_db: i32,
    pub criterion: ThresholdCriterion,
    pub trials: usize,
    pub timeouts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> StaircaseController {
        StaircaseController::new(StaircaseParams::default())
    }

    /// Drives the controller with a listener whose true threshold is `true_db`.
    fn run_ideal_listener(true_db: i32) -> (StaircaseController, usize) {
        let mut staircase = controller();
        let mut calls = 0;
        while !staircase.threshold_found() {
            let heard = staircase.level() >= true_db;
            staircase.process_response(heard, !heard);
            calls += 1;
            assert!(calls <= 16, "did not terminate");
        }
        (staircase, calls)
    }

    #[test]
    fn responses_after_threshold_are_ignored() {
        let (mut staircase, calls) = run_ideal_listener(25);
        assert_eq!(staircase.phase(), Phase::Done);
        let level = staircase.level();
        let outcome = staircase.outcome().unwrap();

        staircase.process_response(true, false);
        staircase.process_response(false, true);

        assert_eq!(staircase.responses().len(), calls);
        assert_eq!(staircase.level(), level);
        assert_eq!(staircase.outcome(), Some(outcome));
    }

    #[test]
    fn descends_by_ten_while_heard() {
        let mut staircase = controller();
        staircase.process_response(true, false);
        assert_eq!(staircase.level(), 30);
        assert_eq!(staircase.phase(), Phase::Descending);
        assert!(!staircase.threshold_found());
    }

    #[test]
    fn first_miss_turns_ascending() {
        let mut staircase = controller();
        staircase.process_response(true, false); // 40 -> 30
        staircase.process_response(false, true); // miss at 30 -> 35
        assert_eq!(staircase.phase(), Phase::Ascending);
        assert_eq!(staircase.level(), 35);
        assert_eq!(staircase.highest_not_heard(), Some(30));
        assert_eq!(staircase.lowest_heard(), Some(40));
    }

    #[test]
    fn ideal_listener_converges_on_true_threshold() {
        let (staircase, _) = run_ideal_listener(25);
        assert_eq!(staircase.threshold_status(), Some(ThresholdCriterion::TwoOfThree));
        assert_eq!(staircase.calculate_threshold(), 25);
    }

    #[test]
    fn floor_hearing_listener_terminates_at_min_level() {
        let mut staircase = controller();
        let mut calls = 0;
        while !staircase.threshold_found() {
            staircase.process_response(true, false);
            calls += 1;
            assert!(calls <= 16);
        }
        assert_eq!(staircase.calculate_threshold(), -10);
    }

    #[test]
    fn alternating_answers_converge_at_minus_five() {
        let mut staircase = controller();
        // Heard all the way down to the floor.
        for expected in [40, 30, 20, 10, 0, -10] {
            assert_eq!(staircase.level(), expected);
            staircase.process_response(true, false);
        }
        assert_eq!(staircase.phase(), Phase::Ascending);
        assert_eq!(staircase.level(), -10);
        // Alternate: miss at -10, heard at -5.
        let mut calls = 0;
        while !staircase.threshold_found() {
            let heard = staircase.level() == -5;
            staircase.process_response(heard, !heard);
            calls += 1;
            assert!(calls < 10);
        }
        assert_eq!(staircase.threshold_status(), Some(ThresholdCriterion::TwoOfThree));
        assert_eq!(staircase.calculate_threshold(), -5);
    }

    #[test]
    fn all_timeouts_hit_the_trial_cap() {
        let mut staircase = controller();
        staircase.process_response(false, false);
        assert_eq!(staircase.level(), 45);
        let mut calls = 1;
        while !staircase.threshold_found() {
            staircase.process_response(false, false);
            calls += 1;
        }
        assert_eq!(calls, 16);
        assert_eq!(staircase.threshold_status(), Some(ThresholdCriterion::TrialCap));
        // highest_not_heard (90) + 5 exceeds the range and is clamped.
        assert_eq!(staircase.highest_not_heard(), Some(90));
        assert_eq!(staircase.calculate_threshold(), 90);
        let outcome = staircase.outcome().unwrap();
        assert_eq!(outcome.timeouts, 16);
        assert!(outcome.criterion.is_degraded());
    }

    #[test]
    fn fallback_uses_lowest_heard_ascending_level() {
        let mut staircase = controller();
        staircase.process_response(false, true); // 40 miss -> 45
        staircase.process_response(true, false); // heard 45 -> 40
        staircase.process_response(false, true); // miss 40 -> 45
        staircase.process_response(true, false); // heard 45 -> 40
        assert!(!staircase.threshold_found());
        assert_eq!(staircase.calculate_threshold(), 45);
    }

    #[test]
    fn fallback_above_highest_miss_when_nothing_heard() {
        let mut staircase = controller();
        staircase.process_response(false, true);
        assert_eq!(staircase.calculate_threshold(), 45);
    }

    #[test]
    fn cluster_criterion_fires_on_tight_heard_group() {
        let mut staircase = controller();
        staircase.process_response(false, true); // 40 miss -> 45
        staircase.process_response(true, false); // heard 45 -> 40
        staircase.process_response(true, false); // heard 40 -> 35
        assert!(!staircase.threshold_found());
        staircase.process_response(false, true); // miss 35 -> 40
        staircase.process_response(true, false); // heard 40 -> 35
        assert_eq!(staircase.threshold_status(), Some(ThresholdCriterion::Cluster));
        assert_eq!(staircase.calculate_threshold(), 40);
    }

    #[test]
    fn timeouts_are_tracked_apart_from_explicit_no() {
        let mut staircase = controller();
        staircase.record(Response::Timeout);
        staircase.record(Response::NotHeard);
        let records = staircase.responses();
        assert!(records[0].timed_out());
        assert!(!records[1].timed_out());
        assert!(records[1].explicit_no);
    }

    #[test]
    fn level_stays_within_range() {
        let params = StaircaseParams {
            start_level: 85,
            ..StaircaseParams::default()
        };
        let mut staircase = StaircaseController::new(params);
        for _ in 0..10 {
            staircase.process_response(false, false);
            assert!(staircase.level() <= params.max_level);
        }
    }
}
