//! # Audio Output Module
//!
//! Plays test tones through CPAL (Cross-Platform Audio Library).
//! It selects the default output device, opens a stereo stream and
//! synthesizes the pure tones requested by the session.
//!
//! ## Features
//! - Automatic output device selection
//! - Stereo f32 stream closest to 44.1 kHz
//! - Short linear fades to avoid clicks
//! - Hard left/right panning per tested ear

use crate::presenter::{db_hl_to_gain, ToneHandle, TonePresenter};
use crate::Ear;
use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{error, info};

/// Fade-in length, in seconds.
const FADE_IN_S: f32 = 0.01;
/// Fade-out length, in seconds.
const FADE_OUT_S: f32 = 0.05;

/// The tone currently being rendered by the stream callback.
#[derive(Debug, Default)]
struct ToneState {
    frequency: f32,
    gain: f32,
    pan: f32,
    /// Total samples per channel for this tone.
    length: usize,
    /// Samples already rendered.
    position: usize,
}

impl ToneState {
    fn envelope(&self, sample_rate: f32) -> f32 {
        let t = self.position as f32 / sample_rate;
        let total = self.length as f32 / sample_rate;
        if t < FADE_IN_S {
            t / FADE_IN_S
        } else if t > total - FADE_OUT_S {
            ((total - t) / FADE_OUT_S).max(0.0)
        } else {
            1.0
        }
    }
}

/// Tone presenter backed by the default output device.
pub struct CpalTonePresenter {
    stream: cpal::Stream,
    state: Arc<Mutex<ToneState>>,
    sample_rate: u32,
    next_handle: u64,
}

impl CpalTonePresenter {
    /// Opens the default output device and starts a silent stream.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available"))?;

        info!(device = %device.name()?, "using audio output device");

        let configs = device.supported_output_configs()?.collect::<Vec<_>>();
        let supported_config = find_supported_config(configs, 44100)
            .ok_or_else(|| anyhow!("No suitable stereo f32 output format found"))?;

        let min = supported_config.min_sample_rate().0;
        let max = supported_config.max_sample_rate().0;
        let config = supported_config.with_sample_rate(cpal::SampleRate(44100.clamp(min, max)));
        let sample_rate = config.sample_rate().0;
        let config: cpal::StreamConfig = config.into();
        let channels = config.channels as usize;

        info!(sample_rate, "selected output sample rate");

        let state = Arc::new(Mutex::new(ToneState::default()));
        let callback_state = Arc::clone(&state);
        let rate = sample_rate as f32;

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut tone = callback_state.lock().unwrap_or_else(PoisonError::into_inner);
                for frame in data.chunks_mut(channels) {
                    let sample = if tone.position < tone.length {
                        let phase = 2.0 * std::f32::consts::PI * tone.frequency * tone.position as f32 / rate;
                        let value = phase.sin() * tone.gain * tone.envelope(rate);
                        tone.position += 1;
                        value
                    } else {
                        0.0
                    };
                    let (left, right) = if tone.pan < 0.0 { (sample, 0.0) } else { (0.0, sample) };
                    for (channel, out) in frame.iter_mut().enumerate() {
                        *out = match channel {
                            0 => left,
                            1 => right,
                            _ => 0.0,
                        };
                    }
                }
            },
            |err| error!("an error occurred on the audio stream: {err}"),
            None,
        )?;

        stream.play()?;

        Ok(Self {
            stream,
            state,
            sample_rate,
            next_handle: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl TonePresenter for CpalTonePresenter {
    fn present_tone(
        &mut self,
        frequency: u32,
        ear: Ear,
        level_db: i32,
        duration: Duration,
    ) -> Result<ToneHandle> {
        let mut tone = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *tone = ToneState {
            frequency: frequency as f32,
            gain: db_hl_to_gain(level_db).min(1.0),
            pan: ear.pan(),
            length: (duration.as_secs_f32() * self.sample_rate as f32) as usize,
            position: 0,
        };
        self.next_handle += 1;
        Ok(ToneHandle(self.next_handle))
    }
}

impl Drop for CpalTonePresenter {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            error!("error pausing output stream: {e}");
        }
    }
}

/// Picks the output configuration to open the tone stream with.
///
/// Only ranges the stereo mixer can write into qualify:
/// - At least 2 channels (left and right are panned hard)
/// - 32-bit float samples
///
/// Among those, the range whose nearest edge lies closest to `target_rate`
/// wins; the caller clamps the rate into that range.
///
/// # Arguments
/// * `configs` - Output ranges reported by the device
/// * `target_rate` - Preferred sample rate in Hz (44.1 kHz for tones)
///
/// # Returns
/// * `Some(range)` - The closest qualifying range
/// * `None` - The device offers no stereo f32 output
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.channels() >= 2 && c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min_diff = (c.min_sample_rate().0 as i32 - target_rate as i32).abs();
            let max_diff = (c.max_sample_rate().0 as i32 - target_rate as i32).abs();
            min_diff.min(max_diff)
        })
}
