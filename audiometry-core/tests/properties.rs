//! Property tests for the sequencer, staircase and reliability tracker.

use audiometry_core::config::STANDARD_FREQUENCIES;
use audiometry_core::reliability::ReliabilityTracker;
use audiometry_core::sequencer::{Sequencer, TestKind};
use audiometry_core::staircase::{StaircaseController, StaircaseParams, ThresholdCriterion};
use audiometry_core::{Ear, Response, SequencerOptions};
use proptest::prelude::*;
use std::collections::HashSet;

fn response_strategy() -> impl Strategy<Value = Response> {
    prop_oneof![
        Just(Response::Heard),
        Just(Response::NotHeard),
        Just(Response::Timeout),
    ]
}

fn options_strategy() -> impl Strategy<Value = SequencerOptions> {
    (0.0f64..=0.5, 1usize..8, 0usize..8, any::<bool>(), 1usize..4).prop_map(
        |(fraction, min, spread, avoid, same_ear)| SequencerOptions {
            catch_trial_frequency: fraction,
            min_catch_trial_interval: min,
            max_catch_trial_interval: min + spread,
            avoid_adjacent_freqs: avoid,
            max_consecutive_same_ear: same_ear,
        },
    )
}

proptest! {
    #[test]
    fn every_pair_is_queued_exactly_once(
        count in 1usize..=STANDARD_FREQUENCIES.len(),
        seed in any::<u64>(),
        options in options_strategy(),
    ) {
        let frequencies = &STANDARD_FREQUENCIES[..count];
        let mut sequencer = Sequencer::new(Some(seed));
        let units = sequencer.generate_sequence(frequencies, &Ear::BOTH, &options).to_vec();

        let pairs: Vec<(u32, Ear)> = units.iter().filter_map(|u| u.target()).collect();
        let unique: HashSet<(u32, Ear)> = pairs.iter().copied().collect();
        prop_assert_eq!(pairs.len(), count * 2);
        prop_assert_eq!(unique.len(), count * 2);

        let catches = units.iter().filter(|u| u.kind == TestKind::Catch).count();
        let cap = (count as f64 * 2.0 * options.catch_trial_frequency).floor() as usize;
        prop_assert!(catches <= cap);
        prop_assert_eq!(catches, sequencer.catch_positions().len());

        for (index, unit) in units.iter().enumerate() {
            prop_assert_eq!(unit.id, index);
            prop_assert!(!unit.tested);
        }
    }

    #[test]
    fn same_seed_gives_same_order(seed in any::<u64>()) {
        let options = SequencerOptions::default();
        let mut a = Sequencer::new(Some(seed));
        let mut b = Sequencer::new(Some(seed));
        prop_assert_eq!(
            a.generate_sequence(&STANDARD_FREQUENCIES, &Ear::BOTH, &options).to_vec(),
            b.generate_sequence(&STANDARD_FREQUENCIES, &Ear::BOTH, &options).to_vec()
        );
    }

    #[test]
    fn draining_the_queue_reaches_full_progress(seed in any::<u64>()) {
        let mut sequencer = Sequencer::new(Some(seed));
        sequencer.generate_sequence(&STANDARD_FREQUENCIES[..4], &Ear::BOTH, &SequencerOptions::default());
        let total = sequencer.units().len();
        while let Some(unit) = sequencer.get_next() {
            sequencer.mark_completed(&unit).unwrap();
        }
        prop_assert!(sequencer.is_complete());
        prop_assert_eq!(sequencer.completed_tests().len(), total);
        prop_assert_eq!(sequencer.get_progress().percentage, 100);
    }

    #[test]
    fn staircase_ends_within_the_trial_cap(
        responses in proptest::collection::vec(response_strategy(), 64),
        max_trials in 1usize..30,
    ) {
        let params = StaircaseParams {
            max_trials,
            ..StaircaseParams::default()
        };
        let mut staircase = StaircaseController::new(params);
        let mut presented = 0;
        for response in responses.iter().copied() {
            if staircase.threshold_found() {
                break;
            }
            prop_assert!((params.min_level..=params.max_level).contains(&staircase.level()));
            staircase.record(response);
            presented += 1;
        }

        prop_assert!(staircase.threshold_found());
        prop_assert!(presented <= max_trials + 1);

        let outcome = staircase.outcome().unwrap();
        prop_assert!((params.min_level..=params.max_level).contains(&outcome.threshold_db));
        if outcome.criterion == ThresholdCriterion::TrialCap {
            prop_assert_eq!(outcome.trials, max_trials + 1);
        }
    }

    #[test]
    fn ideal_listener_is_measured_exactly(threshold in -2i32..=18) {
        // Reachable levels from a start of 40 with 10 down and 5 up.
        let threshold = threshold * 5;
        let mut staircase = StaircaseController::new(StaircaseParams::default());
        while !staircase.threshold_found() {
            let heard = staircase.level() >= threshold;
            staircase.process_response(heard, !heard);
        }
        let outcome = staircase.outcome().unwrap();
        prop_assert_eq!(outcome.threshold_db, threshold);
        prop_assert!(!outcome.criterion.is_degraded());
    }

    #[test]
    fn reliability_score_stays_in_range(
        responses in proptest::collection::vec(response_strategy(), 0..40),
    ) {
        let mut tracker = ReliabilityTracker::new();
        for response in &responses {
            tracker.record(*response, 300);
        }
        let score = tracker.calculate_reliability_score();
        prop_assert!(score <= 100);

        let heard = responses.iter().filter(|r| **r == Response::Heard).count();
        prop_assert_eq!(tracker.false_positives(), heard);
        prop_assert_eq!(tracker.passed() + heard, responses.len());
        if responses.is_empty() {
            prop_assert_eq!(score, 100);
        }
    }
}
