//! # Assessment Session
//!
//! Drives a whole assessment: the standard stage over the configured
//! frequency grid, then, when the results show problem areas, a micro stage
//! on a finer grid around them.
//!
//! ## Flow
//! 1. The sequencer hands out the next unit
//! 2. Catch units present silence and feed the reliability tracker
//! 3. Tone units run a staircase until it reports a threshold
//! 4. The threshold is stored in the active stage's results
//!
//! Exactly one presentation is in flight at a time. A [`SessionControl`]
//! handle, usable from any thread, can pause, resume or stop the loop
//! between tones.

use crate::analysis::analyze_results;
use crate::config::AudiometryConfig;
use crate::error::SessionError;
use crate::escalation::{EscalationPlanner, ProblemFrequency};
use crate::events::{EventBus, Prompt, SessionEvent, StageKind};
use crate::presenter::TonePresenter;
use crate::reliability::ReliabilityTracker;
use crate::report::{AssessmentReport, ReliabilitySummary, SessionStatus};
use crate::response::{Responder, Response, ResponseSlot};
use crate::sequencer::{Sequencer, TestUnit};
use crate::staircase::{StaircaseController, StaircaseOutcome, StaircaseParams};
use crate::{record_threshold, Ear, ThresholdMap};
use crossbeam_channel::{Receiver, Sender};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One stage of the assessment with its own queue and results.
#[derive(Debug)]
pub struct Stage {
    pub kind: StageKind,
    pub sequencer: Sequencer,
    pub results: ThresholdMap,
}

impl Stage {
    fn new(kind: StageKind, sequencer: Sequencer) -> Self {
        Self {
            kind,
            sequencer,
            results: ThresholdMap::new(),
        }
    }
}

#[derive(Debug)]
struct ControlState {
    stopped: AtomicBool,
    paused: AtomicBool,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    progress: Mutex<Option<SessionProgress>>,
}

/// Cross-thread pause/resume/stop handle for a running session.
#[derive(Debug, Clone)]
pub struct SessionControl {
    state: Arc<ControlState>,
}

impl Default for SessionControl {
    fn default() -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            state: Arc::new(ControlState {
                stopped: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                wake_tx,
                wake_rx,
                progress: Mutex::new(None),
            }),
        }
    }
}

impl SessionControl {
    pub fn stop(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        self.state.paused.store(false, Ordering::SeqCst);
        let _ = self.state.wake_tx.try_send(());
    }

    /// Suspends the loop before the next tone. The staircase in progress
    /// keeps its responses.
    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        if self.state.paused.swap(false, Ordering::SeqCst) {
            let _ = self.state.wake_tx.try_send(());
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::SeqCst)
    }

    /// Latest progress published by the running session, readable from
    /// any thread. `None` before the session starts.
    pub fn progress(&self) -> Option<SessionProgress> {
        *self.state.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, progress: SessionProgress) {
        *self.state.progress.lock().unwrap_or_else(PoisonError::into_inner) = Some(progress);
    }

    /// Sleeps for `duration` unless stopped first. Returns `false` when the
    /// session was stopped before or during the sleep.
    fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        if !duration.is_zero() {
            let _ = self.state.wake_rx.recv_timeout(duration);
        }
        !self.is_stopped()
    }
}

/// Readout for progress displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub stage: StageKind,
    pub completed: usize,
    pub total: usize,
    pub percentage: u32,
    pub current_frequency: Option<u32>,
    pub current_ear: Option<Ear>,
    pub problem_frequencies_found: usize,
}

enum StageEnd {
    Exhausted,
    Stopped,
}

pub struct AssessmentSession<P: TonePresenter> {
    config: AudiometryConfig,
    presenter: P,
    slot: ResponseSlot,
    control: SessionControl,
    events: EventBus,
    reliability: ReliabilityTracker,
    standard: Stage,
    micro: Option<Stage>,
    problems: Vec<ProblemFrequency>,
    forced_thresholds: usize,
    current_target: Option<(u32, Ear)>,
    rng: StdRng,
    started: Option<Instant>,
}

impl<P: TonePresenter> AssessmentSession<P> {
    pub fn new(config: AudiometryConfig, presenter: P) -> Result<Self, SessionError> {
        Self::with_response_slot(config, presenter, ResponseSlot::new())
    }

    /// Builds a session around a slot the caller already handed responders
    /// out for, e.g. to a presenter that answers on its own.
    pub fn with_response_slot(
        config: AudiometryConfig,
        presenter: P,
        slot: ResponseSlot,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            standard: Stage::new(StageKind::Standard, Sequencer::new(config.seed)),
            config,
            presenter,
            slot,
            control: SessionControl::default(),
            events: EventBus::new(),
            reliability: ReliabilityTracker::new(),
            micro: None,
            problems: Vec::new(),
            forced_thresholds: 0,
            current_target: None,
            rng,
            started: None,
        })
    }

    /// Handle for the front-end to answer presentations.
    pub fn responder(&self) -> Responder {
        self.slot.responder()
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn events(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn config(&self) -> &AudiometryConfig {
        &self.config
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn into_presenter(self) -> P {
        self.presenter
    }

    pub fn reliability(&self) -> &ReliabilityTracker {
        &self.reliability
    }

    pub fn standard_results(&self) -> &ThresholdMap {
        &self.standard.results
    }

    pub fn micro_results(&self) -> Option<&ThresholdMap> {
        self.micro.as_ref().map(|stage| &stage.results)
    }

    pub fn problem_frequencies(&self) -> &[ProblemFrequency] {
        &self.problems
    }

    fn active_stage(&self) -> &Stage {
        self.micro.as_ref().unwrap_or(&self.standard)
    }

    fn active_stage_mut(&mut self) -> &mut Stage {
        self.micro.as_mut().unwrap_or(&mut self.standard)
    }

    pub fn progress(&self) -> SessionProgress {
        let stage = self.active_stage();
        let progress = stage.sequencer.get_progress();
        SessionProgress {
            stage: stage.kind,
            completed: progress.completed,
            total: progress.total,
            percentage: progress.percentage,
            current_frequency: self.current_target.map(|(freq, _)| freq),
            current_ear: self.current_target.map(|(_, ear)| ear),
            problem_frequencies_found: self.problems.len(),
        }
    }

    /// Refreshes the snapshot behind [`SessionControl::progress`]. Called
    /// before the matching event is emitted so handlers see current data.
    fn publish_progress(&self) {
        self.control.publish(self.progress());
    }

    /// Runs every stage to the end, or until stopped, and returns the
    /// report bundle. Non-convergence and timeouts never fail the session.
    pub fn run(&mut self) -> Result<AssessmentReport, SessionError> {
        self.started = Some(Instant::now());
        self.reliability = ReliabilityTracker::new();
        self.micro = None;
        self.problems.clear();
        self.forced_thresholds = 0;
        self.standard = Stage::new(StageKind::Standard, Sequencer::new(self.config.seed));

        let frequencies = self.config.frequencies.clone();
        let options = self.config.sequencer_options();
        self.standard
            .sequencer
            .generate_sequence(&frequencies, &Ear::BOTH, &options);
        let stats = self.standard.sequencer.get_statistics();
        info!(
            standard = stats.standard_tests,
            catch_trials = stats.catch_trials,
            total = stats.total_tests,
            "starting standard audiometry"
        );
        self.current_target = None;
        self.publish_progress();
        self.events.emit(SessionEvent::StageChanged {
            stage: StageKind::Standard,
            problem_count: 0,
        });

        loop {
            if let StageEnd::Stopped = self.run_stage()? {
                info!("session stopped");
                return Ok(self.build_report(SessionStatus::Stopped));
            }
            if self.micro.is_none() && self.config.enable_micro_audiometry && self.begin_micro_stage() {
                continue;
            }
            break;
        }

        info!("assessment complete");
        self.events.emit(SessionEvent::Complete);
        Ok(self.build_report(SessionStatus::Completed))
    }

    /// Plans the micro stage from the standard results. Returns `false`
    /// when there is nothing to retest.
    fn begin_micro_stage(&mut self) -> bool {
        let planner = EscalationPlanner::from(&self.config);
        self.problems = planner.identify_problem_frequencies(&self.standard.results);
        if self.problems.is_empty() {
            info!("no problem frequencies identified");
            return false;
        }

        let units = planner.initialize_micro_audiometry(&self.problems, &self.config.frequencies);
        let mut sequencer = Sequencer::new(self.config.seed.map(|seed| seed.wrapping_add(1)));
        sequencer.load_units(units);
        info!(
            problems = self.problems.len(),
            tests = sequencer.units().len(),
            "starting micro-audiometry"
        );
        self.micro = Some(Stage::new(StageKind::Micro, sequencer));
        self.current_target = None;
        self.publish_progress();
        self.events.emit(SessionEvent::StageChanged {
            stage: StageKind::Micro,
            problem_count: self.problems.len(),
        });
        true
    }

    fn run_stage(&mut self) -> Result<StageEnd, SessionError> {
        loop {
            // Catch units honour pause too; a paused window would score as passed.
            if !self.wait_while_paused() {
                return Ok(StageEnd::Stopped);
            }
            let Some(unit) = self.active_stage().sequencer.get_next() else {
                return Ok(StageEnd::Exhausted);
            };

            match unit.target() {
                None => self.run_catch_trial()?,
                Some((frequency, ear)) => match self.run_staircase(&unit, frequency, ear)? {
                    Some(outcome) => self.store_threshold(frequency, ear, outcome),
                    None => return Ok(StageEnd::Stopped),
                },
            }

            let stage = self.active_stage_mut();
            stage.sequencer.mark_completed(&unit)?;
            let progress = stage.sequencer.get_progress();
            let kind = stage.kind;
            self.publish_progress();
            self.events.emit(SessionEvent::Progress {
                stage: kind,
                completed: progress.completed,
                total: progress.total,
            });
        }
    }

    fn run_catch_trial(&mut self) -> Result<(), SessionError> {
        info!("catch trial: presenting silence");
        self.current_target = None;
        self.publish_progress();
        let started = Instant::now();
        let armed = self.slot.arm();
        self.events.emit(SessionEvent::ResponseRequired(Prompt::Catch));
        self.presenter.present_catch().map_err(SessionError::Presenter)?;
        let response = armed.wait(self.config.response_timeout());
        self.reliability
            .record(response, started.elapsed().as_millis() as u64);
        Ok(())
    }

    /// Returns `None` when the session was stopped mid-run.
    fn run_staircase(
        &mut self,
        unit: &TestUnit,
        frequency: u32,
        ear: Ear,
    ) -> Result<Option<StaircaseOutcome>, SessionError> {
        info!(frequency, %ear, kind = ?unit.kind, "testing");
        self.current_target = Some((frequency, ear));
        self.publish_progress();

        if !self.control.sleep(Duration::from_millis(self.config.pre_test_delay_ms)) {
            return Ok(None);
        }

        let mut staircase = StaircaseController::new(StaircaseParams::from(&self.config));
        while !staircase.threshold_found() {
            if !self.wait_while_paused() {
                return Ok(None);
            }
            let delay = self.config.inter_tone_delay_ms.sample(&mut self.rng);
            if !self.control.sleep(delay) {
                return Ok(None);
            }
            let response = self.present_and_wait(frequency, ear, staircase.level())?;
            staircase.record(response);
        }
        Ok(staircase.outcome())
    }

    /// Blocks while paused. Returns `false` if stopped meanwhile.
    fn wait_while_paused(&self) -> bool {
        if self.control.is_paused() {
            debug!("session paused");
        }
        let poll = Duration::from_millis(self.config.pause_poll_ms.max(1));
        while self.control.is_paused() {
            if !self.control.sleep(poll) {
                return false;
            }
        }
        !self.control.is_stopped()
    }

    fn present_and_wait(
        &mut self,
        frequency: u32,
        ear: Ear,
        level_db: i32,
    ) -> Result<Response, SessionError> {
        let duration = self.config.tone_duration_ms.sample(&mut self.rng);
        // Armed before the tone starts so an instant answer is not lost.
        let armed = self.slot.arm();
        self.events.emit(SessionEvent::TonePresented {
            frequency,
            ear,
            level_db,
        });
        self.events.emit(SessionEvent::ResponseRequired(Prompt::Tone));
        self.presenter
            .present_tone(frequency, ear, level_db, duration)
            .map_err(SessionError::Presenter)?;
        let response = armed.wait(self.config.response_timeout());
        if response == Response::Timeout {
            debug!(frequency, %ear, level_db, "timeout: no response");
        }
        Ok(response)
    }

    fn store_threshold(&mut self, frequency: u32, ear: Ear, outcome: StaircaseOutcome) {
        if outcome.criterion.is_degraded() {
            self.forced_thresholds += 1;
        }
        let stage = self.active_stage_mut();
        record_threshold(&mut stage.results, frequency, ear, outcome.threshold_db);
        let kind = stage.kind;
        if outcome.criterion.is_degraded() {
            warn!(
                stage = ?kind,
                frequency,
                %ear,
                threshold = outcome.threshold_db,
                "threshold forced by trial cap"
            );
        } else {
            info!(
                stage = ?kind,
                frequency,
                %ear,
                threshold = outcome.threshold_db,
                "threshold found"
            );
        }
        self.events.emit(SessionEvent::ThresholdFound {
            stage: kind,
            frequency,
            ear,
            threshold_db: outcome.threshold_db,
            criterion: outcome.criterion,
        });
    }

    fn build_report(&self, status: SessionStatus) -> AssessmentReport {
        let duration = self.started.map(|t| t.elapsed()).unwrap_or_default();
        AssessmentReport {
            status,
            test_date: chrono::Utc::now(),
            test_duration_ms: duration.as_millis() as u64,
            standard_results: self.standard.results.clone(),
            micro_results: self
                .micro
                .as_ref()
                .map(|stage| stage.results.clone())
                .unwrap_or_default(),
            problem_frequencies: self.problems.clone(),
            reliability: ReliabilitySummary {
                score: self.reliability.calculate_reliability_score(),
                catch_trials: self.reliability.trials().to_vec(),
                false_positives: self.reliability.false_positives(),
                assessment: self.reliability.get_reliability_assessment(),
            },
            analysis: analyze_results(&self.standard.results, &self.reliability),
            forced_thresholds: self.forced_thresholds,
            standard_sequence: Some(self.standard.sequencer.export()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_sleep_is_cut_short_by_stop() {
        let control = SessionControl::default();
        let remote = control.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.stop();
        });
        let started = Instant::now();
        assert!(!control.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn stop_clears_pause() {
        let control = SessionControl::default();
        control.pause();
        assert!(control.is_paused());
        control.stop();
        assert!(!control.is_paused());
        assert!(control.is_stopped());
        assert!(!control.sleep(Duration::ZERO));
    }

    #[test]
    fn resume_wakes_and_clears_pause() {
        let control = SessionControl::default();
        control.pause();
        control.resume();
        assert!(!control.is_paused());
        assert!(control.sleep(Duration::ZERO));
    }
}
