//! # Randomized Test Sequencer
//!
//! Orders the (frequency, ear) test pairs so the listener cannot anticipate
//! what comes next, and sprinkles silent catch trials in between to detect
//! false-positive responding.
//!
//! ## Ordering constraints
//! - No more than `max_consecutive_same_ear` presentations to one ear in a row
//! - Consecutive frequencies at least half an octave apart (optional)
//!
//! When no remaining unit satisfies both constraints the shuffle falls back
//! to picking among all remaining units. Each fallback is counted in
//! [`SequenceStatistics::constraint_relaxations`].

use crate::config::SequencerOptions;
use crate::error::SequencerError;
use crate::{now_ms, Ear};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// What a test unit presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Standard,
    /// Silent presentation; `frequency` and `ear` are `None`.
    Catch,
    /// Fine-grid retest around a problem frequency.
    Micro,
}

/// A single entry of the test sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestUnit {
    /// Identity within the sequence it was created for.
    pub id: usize,
    pub frequency: Option<u32>,
    pub ear: Option<Ear>,
    pub kind: TestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_frequency: Option<u32>,
    pub tested: bool,
}

impl TestUnit {
    pub fn standard(frequency: u32, ear: Ear) -> Self {
        Self {
            id: 0,
            frequency: Some(frequency),
            ear: Some(ear),
            kind: TestKind::Standard,
            center_frequency: None,
            tested: false,
        }
    }

    pub fn catch_trial() -> Self {
        Self {
            id: 0,
            frequency: None,
            ear: None,
            kind: TestKind::Catch,
            center_frequency: None,
            tested: false,
        }
    }

    pub fn micro(frequency: u32, ear: Ear, center_frequency: u32) -> Self {
        Self {
            id: 0,
            frequency: Some(frequency),
            ear: Some(ear),
            kind: TestKind::Micro,
            center_frequency: Some(center_frequency),
            tested: false,
        }
    }

    pub fn is_catch(&self) -> bool {
        self.kind == TestKind::Catch
    }

    /// The (frequency, ear) pair of a tone-bearing unit.
    pub fn target(&self) -> Option<(u32, Ear)> {
        self.frequency.zip(self.ear)
    }
}

/// A completed unit together with its completion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTest {
    pub unit: TestUnit,
    pub completed_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub remaining: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStatistics {
    pub total_tests: usize,
    pub standard_tests: usize,
    pub micro_tests: usize,
    pub catch_trials: usize,
    pub completed: usize,
    pub remaining: usize,
    pub percentage: u32,
    pub constraint_relaxations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceExportEntry {
    pub index: usize,
    pub frequency: Option<u32>,
    pub ear: Option<Ear>,
    pub kind: TestKind,
    pub tested: bool,
}

/// Serializable listing of a sequence, for offline analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceExport {
    pub sequence: Vec<SequenceExportEntry>,
    pub statistics: SequenceStatistics,
}

/// Owns the test queue of one stage.
#[derive(Debug)]
pub struct Sequencer {
    queue: Vec<TestUnit>,
    completed: Vec<CompletedTest>,
    catch_positions: Vec<usize>,
    relaxations: usize,
    rng: StdRng,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Sequencer {
    /// Creates an empty sequencer. A seed makes every shuffle reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            queue: Vec::new(),
            completed: Vec::new(),
            catch_positions: Vec::new(),
            relaxations: 0,
            rng,
        }
    }

    /// Builds the randomized sequence for the given frequencies and ears,
    /// replacing any previous queue.
    pub fn generate_sequence(
        &mut self,
        frequencies: &[u32],
        ears: &[Ear],
        options: &SequencerOptions,
    ) -> &[TestUnit] {
        info!(
            frequencies = frequencies.len(),
            ears = ears.len(),
            "generating randomized sequence"
        );

        let pairs: Vec<TestUnit> = frequencies
            .iter()
            .flat_map(|&freq| ears.iter().map(move |&ear| TestUnit::standard(freq, ear)))
            .collect();

        self.completed.clear();
        self.catch_positions.clear();
        self.relaxations = 0;
        self.queue = self.shuffle_with_constraints(pairs, options);
        self.insert_catch_trials(options);
        self.assign_ids();

        info!(
            total = self.queue.len(),
            catch_trials = self.catch_positions.len(),
            relaxations = self.relaxations,
            "sequence generated"
        );
        &self.queue
    }

    /// Replaces the queue with the given units in a plain random order.
    /// No ear or adjacency constraints and no catch trials are applied.
    pub fn load_units(&mut self, mut units: Vec<TestUnit>) -> &[TestUnit] {
        units.shuffle(&mut self.rng);
        self.queue = units;
        self.completed.clear();
        self.catch_positions.clear();
        self.relaxations = 0;
        self.assign_ids();
        debug!(total = self.queue.len(), "sequence loaded");
        &self.queue
    }

    fn assign_ids(&mut self) {
        for (id, unit) in self.queue.iter_mut().enumerate() {
            unit.id = id;
            unit.tested = false;
        }
    }

    fn shuffle_with_constraints(
        &mut self,
        mut remaining: Vec<TestUnit>,
        options: &SequencerOptions,
    ) -> Vec<TestUnit> {
        let mut shuffled = Vec::with_capacity(remaining.len());
        let mut last_ear: Option<Ear> = None;
        let mut last_freq: Option<u32> = None;
        let mut consecutive_ear = 0usize;

        while !remaining.is_empty() {
            let mut candidates: Vec<usize> = remaining
                .iter()
                .enumerate()
                .filter(|(_, unit)| {
                    if unit.ear == last_ear && consecutive_ear >= options.max_consecutive_same_ear {
                        return false;
                    }
                    if options.avoid_adjacent_freqs {
                        if let (Some(prev), Some(freq)) = (last_freq, unit.frequency) {
                            if octave_distance(freq, prev) < 0.5 {
                                return false;
                            }
                        }
                    }
                    true
                })
                .map(|(i, _)| i)
                .collect();

            if candidates.is_empty() {
                self.relaxations += 1;
                debug!(
                    remaining = remaining.len(),
                    "relaxing constraints: no valid candidates"
                );
                candidates = (0..remaining.len()).collect();
            }

            let pick = candidates[self.rng.gen_range(0..candidates.len())];
            let selected = remaining.remove(pick);

            if selected.ear == last_ear {
                consecutive_ear += 1;
            } else {
                consecutive_ear = 1;
            }
            last_ear = selected.ear;
            last_freq = selected.frequency;
            shuffled.push(selected);
        }

        shuffled
    }

    fn insert_catch_trials(&mut self, options: &SequencerOptions) {
        let standard = self.queue.len();
        let wanted = (standard as f64 * options.catch_trial_frequency).floor() as usize;
        let min = options.min_catch_trial_interval;
        let max = options.max_catch_trial_interval;

        let mut positions = Vec::with_capacity(wanted);
        let mut last = min;
        for _ in 0..wanted {
            let interval = if max > min { self.rng.gen_range(min..max) } else { min };
            last += interval;
            // Positions past the end are dropped, not wrapped.
            if last < standard {
                positions.push(last);
            }
        }

        // Back to front so earlier offsets stay valid.
        for &pos in positions.iter().rev() {
            self.queue.insert(pos, TestUnit::catch_trial());
            self.catch_positions.push(pos);
        }

        info!(
            requested = wanted,
            inserted = positions.len(),
            ?positions,
            "catch trials inserted"
        );
    }

    /// The first untested unit in sequence order.
    pub fn get_next(&self) -> Option<TestUnit> {
        let next = self.queue.iter().find(|unit| !unit.tested).copied();
        match &next {
            Some(unit) if unit.is_catch() => debug!(id = unit.id, "next test: catch trial"),
            Some(unit) => debug!(
                id = unit.id,
                frequency = ?unit.frequency,
                ear = ?unit.ear,
                "next test"
            ),
            None => debug!("no more tests in sequence"),
        }
        next
    }

    /// Marks a unit returned by [`Sequencer::get_next`] as tested.
    /// Each unit may be marked exactly once.
    pub fn mark_completed(&mut self, unit: &TestUnit) -> Result<(), SequencerError> {
        let slot = self
            .queue
            .get_mut(unit.id)
            .filter(|slot| slot.kind == unit.kind && slot.frequency == unit.frequency && slot.ear == unit.ear)
            .ok_or(SequencerError::UnknownUnit(unit.id))?;
        if slot.tested {
            return Err(SequencerError::AlreadyCompleted(unit.id));
        }
        slot.tested = true;
        self.completed.push(CompletedTest {
            unit: *slot,
            completed_at_ms: now_ms(),
        });
        debug!(remaining = self.queue.len() - self.completed.len(), "test completed");
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.queue.iter().all(|unit| unit.tested)
    }

    pub fn get_progress(&self) -> Progress {
        let total = self.queue.len();
        let completed = self.queue.iter().filter(|unit| unit.tested).count();
        let percentage = if total == 0 {
            100
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u32
        };
        Progress {
            total,
            completed,
            remaining: total - completed,
            percentage,
        }
    }

    pub fn get_statistics(&self) -> SequenceStatistics {
        let progress = self.get_progress();
        let count = |kind: TestKind| self.queue.iter().filter(|unit| unit.kind == kind).count();
        SequenceStatistics {
            total_tests: progress.total,
            standard_tests: count(TestKind::Standard),
            micro_tests: count(TestKind::Micro),
            catch_trials: count(TestKind::Catch),
            completed: progress.completed,
            remaining: progress.remaining,
            percentage: progress.percentage,
            constraint_relaxations: self.relaxations,
        }
    }

    pub fn export(&self) -> SequenceExport {
        SequenceExport {
            sequence: self
                .queue
                .iter()
                .enumerate()
                .map(|(index, unit)| SequenceExportEntry {
                    index,
                    frequency: unit.frequency,
                    ear: unit.ear,
                    kind: unit.kind,
                    tested: unit.tested,
                })
                .collect(),
            statistics: self.get_statistics(),
        }
    }

    pub fn units(&self) -> &[TestUnit] {
        &self.queue
    }

    pub fn completed_tests(&self) -> &[CompletedTest] {
        &self.completed
    }

    /// Insertion offsets of the catch trials, in insertion order.
    pub fn catch_positions(&self) -> &[usize] {
        &self.catch_positions
    }
}

/// Absolute distance between two frequencies in octaves.
pub fn octave_distance(a: u32, b: u32) -> f64 {
    (a as f64 / b as f64).log2().abs()
}
