//! # sound
//!
//! The buzzer is a continuous tone whose gain is steered rather than switched:
//! the oscillator runs the whole time and the gate only moves its gain toward
//! a level, following an exponential approach with a short time constant.
//! Jumping the gain straight from 0 to the target would click.
use crate::error::AudioError;
use beep::beep;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_RAMP_MS: f64 = 10.0;
pub const DEFAULT_LEVEL: f32 = 0.005;
pub const DEFAULT_TONE_HZ: f32 = 440.0;

/// a ramp counts as finished after this many time constants (< 1% left)
const SETTLE_TIME_CONSTANTS: f64 = 5.0;

/// A tone generator with a steerable gain.
pub trait ToneDevice {
    /// start moving the gain toward `level` with the given time constant
    fn ramp_to(&mut self, level: f32, time_constant: Duration) -> Result<(), AudioError>;

    /// gain to zero right now
    fn silence(&mut self) -> Result<(), AudioError>;
}

pub type DeviceOpener = Box<dyn FnMut() -> Result<Box<dyn ToneDevice>, AudioError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    RampingUp,
    RampingDown,
}

/// Follows the machine's sound flag and issues one ramp per flag change.
/// The device is only opened on the first ramp up, since hosts commonly
/// refuse audio until the user has interacted with the program.
pub struct AudioGate {
    opener: DeviceOpener,
    device: Option<Box<dyn ToneDevice>>,
    state: GateState,
    level: f32,
    time_constant: Duration,
    ramp_started_ms: f64,
}

impl AudioGate {
    pub fn new(opener: DeviceOpener, level: f32, ramp_ms: f64) -> Self {
        AudioGate {
            opener,
            device: None,
            state: GateState::Idle,
            level,
            time_constant: Duration::from_micros((ramp_ms.max(0.0) * 1000.0).round() as u64),
            ramp_started_ms: 0.0,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// feed the sound flag read after this tick's steps
    pub fn observe(&mut self, sound_active: bool, now_ms: f64) -> Result<(), AudioError> {
        match (self.state, sound_active) {
            (GateState::Idle | GateState::RampingDown, true) => {
                let (level, time_constant) = (self.level, self.time_constant);
                self.device()?.ramp_to(level, time_constant)?;
                self.enter(GateState::RampingUp, now_ms);
            }
            (GateState::RampingUp, false) => {
                if let Some(device) = self.device.as_mut() {
                    device.ramp_to(0.0, self.time_constant)?;
                }
                self.enter(GateState::RampingDown, now_ms);
            }
            (GateState::RampingDown, false) => {
                let settle = self.time_constant.as_secs_f64() * 1000.0 * SETTLE_TIME_CONSTANTS;
                if now_ms - self.ramp_started_ms >= settle {
                    self.enter(GateState::Idle, now_ms);
                }
            }
            (GateState::RampingUp, true) | (GateState::Idle, false) => {}
        }
        Ok(())
    }

    /// cut the tone without a ramp; used when the host hides us
    pub fn silence(&mut self) -> Result<(), AudioError> {
        if let Some(device) = self.device.as_mut() {
            device.silence()?;
        }
        self.state = GateState::Idle;
        Ok(())
    }

    fn device(&mut self) -> Result<&mut Box<dyn ToneDevice>, AudioError> {
        if self.device.is_none() {
            let device = (self.opener)()?;
            tracing::debug!("tone device opened");
            self.device = Some(device);
        }
        self.device.as_mut().ok_or(AudioError::NoDevice)
    }

    fn enter(&mut self, state: GateState, now_ms: f64) {
        tracing::trace!(from = ?self.state, to = ?state, "audio gate");
        self.state = state;
        self.ramp_started_ms = now_ms;
    }
}

/// shared between the gate and the audio callback
struct ToneControl {
    /// f32 bits
    target: AtomicU32,
    /// f32 bits, per-sample smoothing coefficient
    coefficient: AtomicU32,
    hard_stop: AtomicBool,
}

/// Square-wave oscillator on the default cpal output, with one-pole gain
/// smoothing: each sample moves gain a fixed fraction of the way to target.
pub struct CpalTone {
    _stream: Stream, // must be held to keep audio alive
    control: Arc<ToneControl>,
    sample_rate: u32,
}

/// output sample rate in Hz
const SAMPLE_RATE: u32 = 44100;

impl CpalTone {
    pub fn new(frequency: f32) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let control = Arc::new(ToneControl {
            target: AtomicU32::new(0f32.to_bits()),
            coefficient: AtomicU32::new(1f32.to_bits()),
            hard_stop: AtomicBool::new(false),
        });
        let shared = Arc::clone(&control);
        let half_period = SAMPLE_RATE as f32 / frequency.max(1.0) / 2.0;
        let mut gain = 0f32;
        let mut phase = 0f32;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if shared.hard_stop.swap(false, Ordering::Relaxed) {
                        gain = 0.0;
                    }
                    let target = f32::from_bits(shared.target.load(Ordering::Relaxed));
                    let k = f32::from_bits(shared.coefficient.load(Ordering::Relaxed));
                    for sample in data.iter_mut() {
                        gain += (target - gain) * k;
                        phase += 1.0;
                        if phase >= half_period * 2.0 {
                            phase -= half_period * 2.0;
                        }
                        *sample = if phase < half_period { gain } else { -gain };
                    }
                },
                |err| tracing::error!("audio stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::Device(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::Device(e.to_string()))?;

        Ok(CpalTone {
            _stream: stream,
            control,
            sample_rate: SAMPLE_RATE,
        })
    }
}

/// fraction of the remaining distance covered per sample for a time constant
fn smoothing_coefficient(time_constant: Duration, sample_rate: u32) -> f32 {
    let samples = time_constant.as_secs_f64() * sample_rate as f64;
    if samples <= 0.0 {
        1.0
    } else {
        (1.0 - (-1.0 / samples).exp()) as f32
    }
}

impl ToneDevice for CpalTone {
    fn ramp_to(&mut self, level: f32, time_constant: Duration) -> Result<(), AudioError> {
        let k = smoothing_coefficient(time_constant, self.sample_rate);
        self.control.coefficient.store(k.to_bits(), Ordering::Relaxed);
        self.control.target.store(level.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn silence(&mut self) -> Result<(), AudioError> {
        self.control.target.store(0f32.to_bits(), Ordering::Relaxed);
        self.control.hard_stop.store(true, Ordering::Relaxed);
        Ok(())
    }
}

const SIMPLEBEEP_PITCH: u16 = 2093; // C

/// PC speaker. It has no volume control, so any non-zero level is on.
pub struct SimpleBeep {
    is_beeping: bool,
}

impl SimpleBeep {
    pub fn new() -> Self {
        SimpleBeep { is_beeping: false }
    }

    /// make sure the speaker can actually be driven
    pub fn open() -> Result<Self, AudioError> {
        beep(0).map_err(|e| AudioError::Device(e.to_string()))?;
        Ok(Self::new())
    }
}

impl Default for SimpleBeep {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneDevice for SimpleBeep {
    fn ramp_to(&mut self, level: f32, _time_constant: Duration) -> Result<(), AudioError> {
        let on = level > 0.0;
        if on != self.is_beeping {
            beep(if on { SIMPLEBEEP_PITCH } else { 0 })
                .map_err(|e| AudioError::Device(e.to_string()))?;
            self.is_beeping = on;
        }
        Ok(())
    }

    fn silence(&mut self) -> Result<(), AudioError> {
        self.ramp_to(0.0, Duration::ZERO)
    }
}

pub struct Mute {}
impl Mute {
    pub fn new() -> Self {
        Mute {}
    }
}
impl Default for Mute {
    fn default() -> Self {
        Self::new()
    }
}
impl ToneDevice for Mute {
    fn ramp_to(&mut self, _level: f32, _time_constant: Duration) -> Result<(), AudioError> {
        Ok(())
    }

    fn silence(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Opens the best device available when first asked: cpal, then the PC
/// speaker, then nothing.
pub fn fallback_opener(frequency: f32) -> DeviceOpener {
    Box::new(move || match CpalTone::new(frequency) {
        Ok(tone) => {
            tracing::info!("audio: cpal output at {} Hz tone", frequency);
            Ok(Box::new(tone) as Box<dyn ToneDevice>)
        }
        Err(e) => {
            tracing::warn!("audio: cpal unavailable ({}), trying pc speaker", e);
            match SimpleBeep::open() {
                Ok(speaker) => Ok(Box::new(speaker) as Box<dyn ToneDevice>),
                Err(e) => {
                    tracing::warn!("audio: pc speaker unavailable ({}), muted", e);
                    Ok(Box::new(Mute::new()) as Box<dyn ToneDevice>)
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{recording_opener, ToneCall};

    #[test]
    fn test_one_ramp_per_flag_change() {
        let (opener, log, opens) = recording_opener();
        let mut gate = AudioGate::new(opener, DEFAULT_LEVEL, DEFAULT_RAMP_MS);
        for (t, active) in [true, true, true, false].into_iter().enumerate() {
            gate.observe(active, t as f64 * 16.0).unwrap();
        }
        assert_eq!(
            *log.borrow(),
            vec![
                ToneCall::Ramp(DEFAULT_LEVEL, Duration::from_millis(10)),
                ToneCall::Ramp(0.0, Duration::from_millis(10)),
            ]
        );
        assert_eq!(opens.get(), 1);
        assert_eq!(gate.state(), GateState::RampingDown);
    }

    #[test]
    fn test_device_opened_lazily() {
        let (opener, log, opens) = recording_opener();
        let mut gate = AudioGate::new(opener, DEFAULT_LEVEL, DEFAULT_RAMP_MS);
        for t in 0..10 {
            gate.observe(false, t as f64).unwrap();
        }
        assert!(!gate.is_open());
        assert_eq!(opens.get(), 0);
        assert!(log.borrow().is_empty());
        gate.observe(true, 10.0).unwrap();
        assert!(gate.is_open());
        assert_eq!(opens.get(), 1);
    }

    #[test]
    fn test_ramp_down_settles_to_idle() {
        let (opener, _log, _) = recording_opener();
        let mut gate = AudioGate::new(opener, DEFAULT_LEVEL, DEFAULT_RAMP_MS);
        gate.observe(true, 0.0).unwrap();
        gate.observe(false, 100.0).unwrap();
        gate.observe(false, 120.0).unwrap();
        assert_eq!(gate.state(), GateState::RampingDown);
        gate.observe(false, 150.0).unwrap();
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn test_rapid_toggle_ramps_each_edge() {
        let (opener, log, _) = recording_opener();
        let mut gate = AudioGate::new(opener, DEFAULT_LEVEL, DEFAULT_RAMP_MS);
        for (t, active) in [true, false, true, false].into_iter().enumerate() {
            gate.observe(active, t as f64).unwrap();
        }
        assert_eq!(log.borrow().len(), 4);
        assert_eq!(gate.state(), GateState::RampingDown);
    }

    #[test]
    fn test_silence_is_immediate() {
        let (opener, log, _) = recording_opener();
        let mut gate = AudioGate::new(opener, DEFAULT_LEVEL, DEFAULT_RAMP_MS);
        gate.observe(true, 0.0).unwrap();
        gate.silence().unwrap();
        assert_eq!(gate.state(), GateState::Idle);
        assert_eq!(log.borrow().last(), Some(&ToneCall::Silence));
        // next activation ramps again
        gate.observe(true, 1.0).unwrap();
        assert_eq!(gate.state(), GateState::RampingUp);
    }

    #[test]
    fn test_silence_without_device_does_not_open_one() {
        let (opener, _log, opens) = recording_opener();
        let mut gate = AudioGate::new(opener, DEFAULT_LEVEL, DEFAULT_RAMP_MS);
        gate.silence().unwrap();
        assert_eq!(opens.get(), 0);
    }

    #[test]
    fn test_open_failure_propagates() {
        let mut gate = AudioGate::new(
            Box::new(|| -> Result<Box<dyn ToneDevice>, AudioError> { Err(AudioError::NoDevice) }),
            DEFAULT_LEVEL,
            DEFAULT_RAMP_MS,
        );
        assert!(matches!(gate.observe(true, 0.0), Err(AudioError::NoDevice)));
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn test_smoothing_coefficient() {
        assert_eq!(smoothing_coefficient(Duration::ZERO, SAMPLE_RATE), 1.0);
        let k = smoothing_coefficient(Duration::from_millis(10), SAMPLE_RATE);
        // after one time constant (441 samples) ~63% of the way there
        let left = (1.0 - k as f64).powi(441);
        assert!((left - (-1f64).exp()).abs() < 0.01, "left {left}");
    }

    #[test]
    fn test_mute_accepts_everything() {
        let mut m = Mute::new();
        assert!(m.ramp_to(1.0, Duration::from_millis(1)).is_ok());
        assert!(m.silence().is_ok());
    }
}
