//! # Tone Presentation
//!
//! The session does not synthesize sound. It asks a [`TonePresenter`] to
//! play one tone at a time and then waits on the response slot. This module
//! defines that seam and a [`SimulatedListener`] that answers through a
//! [`Responder`] like a real front-end would, for tests and demos.

use crate::response::{Responder, Response};
use crate::{Ear, ThresholdMap};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;

/// Opaque token for the presentation currently playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToneHandle(pub u64);

/// Plays stimuli on behalf of the session. At most one presentation is
/// active at a time.
pub trait TonePresenter {
    fn present_tone(
        &mut self,
        frequency: u32,
        ear: Ear,
        level_db: i32,
        duration: Duration,
    ) -> Result<ToneHandle>;

    /// Called at the start of a silent catch trial.
    fn present_catch(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Converts a hearing level to a linear output gain.
///
/// 0 dB HL is taken as roughly -10 dB SPL and 0.3 as a comfortable
/// reference gain. This is an uncalibrated approximation; absolute levels
/// depend on the playback hardware.
pub fn db_hl_to_gain(db_hl: i32) -> f32 {
    const REFERENCE_GAIN: f32 = 0.3;
    let db_spl = db_hl as f32 - 10.0;
    REFERENCE_GAIN * 10f32.powf(db_spl / 20.0)
}

/// How a [`SimulatedListener`] decides whether it heard a tone.
#[derive(Debug, Clone)]
pub enum ListenerModel {
    /// Hears every tone at or above its threshold. Frequencies without an
    /// entry use the nearest known frequency for that ear.
    Thresholds(ThresholdMap),
    /// Replays a fixed list of answers, then times out forever.
    Scripted(VecDeque<Response>),
}

/// A virtual listener that answers presentations immediately.
#[derive(Debug)]
pub struct SimulatedListener {
    responder: Responder,
    model: ListenerModel,
    /// Probability of answering "heard" to a catch trial.
    false_positive_rate: f64,
    /// When true the listener says "not heard" explicitly instead of
    /// letting the window time out.
    explicit_no: bool,
    rng: StdRng,
    next_handle: u64,
    presented: Vec<(u32, Ear, i32)>,
}

impl SimulatedListener {
    pub fn new(responder: Responder, model: ListenerModel) -> Self {
        Self {
            responder,
            model,
            false_positive_rate: 0.0,
            explicit_no: true,
            rng: StdRng::seed_from_u64(0),
            next_handle: 0,
            presented: Vec::new(),
        }
    }

    pub fn with_false_positive_rate(mut self, rate: f64, seed: u64) -> Self {
        self.false_positive_rate = rate.clamp(0.0, 1.0);
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Lets misses time out instead of answering "not heard".
    pub fn silent_misses(mut self) -> Self {
        self.explicit_no = false;
        self
    }

    /// Every (frequency, ear, level) presented so far.
    pub fn presented(&self) -> &[(u32, Ear, i32)] {
        &self.presented
    }

    fn true_threshold(map: &ThresholdMap, frequency: u32, ear: Ear) -> Option<i32> {
        map.iter()
            .filter_map(|(&freq, ears)| ears.get(ear).map(|t| (freq.abs_diff(frequency), t)))
            .min_by_key(|&(distance, _)| distance)
            .map(|(_, threshold)| threshold)
    }

    fn answer(&mut self, heard: bool) {
        if heard {
            self.responder.heard();
        } else if self.explicit_no {
            self.responder.not_heard();
        }
    }
}

impl TonePresenter for SimulatedListener {
    fn present_tone(
        &mut self,
        frequency: u32,
        ear: Ear,
        level_db: i32,
        _duration: Duration,
    ) -> Result<ToneHandle> {
        self.presented.push((frequency, ear, level_db));
        self.next_handle += 1;
        let handle = ToneHandle(self.next_handle);

        match &mut self.model {
            ListenerModel::Thresholds(map) => {
                let heard = Self::true_threshold(map, frequency, ear)
                    .is_some_and(|threshold| level_db >= threshold);
                self.answer(heard);
            }
            ListenerModel::Scripted(script) => {
                if let Some(response) = script.pop_front() {
                    self.responder.resolve(response);
                }
            }
        }
        Ok(handle)
    }

    fn present_catch(&mut self) -> Result<()> {
        if let ListenerModel::Scripted(script) = &mut self.model {
            if let Some(response) = script.pop_front() {
                self.responder.resolve(response);
            }
            return Ok(());
        }
        if self.false_positive_rate > 0.0 && self.rng.gen_bool(self.false_positive_rate) {
            self.responder.heard();
        } else if self.explicit_no {
            self.responder.not_heard();
        }
        Ok(())
    }
}
