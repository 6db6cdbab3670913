use crate::display::{Rgba, DEFAULT_OFF_COLOR, DEFAULT_ON_COLOR};
use crate::error::ConfigError;
use crate::frame::DEFAULT_FRAME_RATE;
use crate::input::DEFAULT_KEY_HOLD_MS;
use crate::keypad::KeyLayout;
use crate::scheduler::DEFAULT_CYCLES_PER_SECOND;
use crate::sound::{DEFAULT_LEVEL, DEFAULT_RAMP_MS, DEFAULT_TONE_HZ};
use crate::telemetry::DEFAULT_HISTORY_DEPTH;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Drive layer configuration. Every field has a default, so a config file
/// only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriveConfig {
    /// instructions per second
    pub target_cycles_per_second: f64,
    /// carry the fractional cycle budget from tick to tick
    pub carry_cycle_remainder: bool,
    pub on_color: Rgba,
    pub off_color: Rgba,
    /// how many recent opcodes the debug panel keeps
    pub history_depth: usize,
    /// turn the register/opcode sampler off entirely
    pub telemetry: bool,
    /// audio gain time constant
    pub audio_ramp_ms: f64,
    /// gain while the buzzer sounds
    pub audio_level: f32,
    pub tone_hz: f32,
    /// how often the host fires the frame callback
    pub frame_rate: f64,
    pub key_layout: KeyLayout,
    /// terminal only: how long a key stays down after its last repeat
    pub key_hold_ms: f64,
    /// program names the host can cycle through
    pub programs: Vec<String>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        DriveConfig {
            target_cycles_per_second: DEFAULT_CYCLES_PER_SECOND,
            carry_cycle_remainder: false,
            on_color: DEFAULT_ON_COLOR,
            off_color: DEFAULT_OFF_COLOR,
            history_depth: DEFAULT_HISTORY_DEPTH,
            telemetry: true,
            audio_ramp_ms: DEFAULT_RAMP_MS,
            audio_level: DEFAULT_LEVEL,
            tone_hz: DEFAULT_TONE_HZ,
            frame_rate: DEFAULT_FRAME_RATE,
            key_layout: KeyLayout::default(),
            key_hold_ms: DEFAULT_KEY_HOLD_MS,
            programs: Vec::new(),
        }
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be a positive number, got {value}"),
        })
    }
}

impl DriveConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: DriveConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading config");
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("target_cycles_per_second", self.target_cycles_per_second)?;
        positive("frame_rate", self.frame_rate)?;
        positive("audio_ramp_ms", self.audio_ramp_ms)?;
        positive("tone_hz", self.tone_hz as f64)?;
        positive("key_hold_ms", self.key_hold_ms)?;
        if !(0.0..=1.0).contains(&self.audio_level) {
            return Err(ConfigError::Invalid {
                field: "audio_level",
                reason: format!("must be within 0..=1, got {}", self.audio_level),
            });
        }
        Ok(())
    }

    /// Apply command line flags on top of this config. Anything that is not a
    /// flag is taken as a program name.
    pub fn apply_args<I, S>(&mut self, args: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let arg = arg.as_ref();
            let mut value = |flag: &str| {
                args.next()
                    .map(|v| v.as_ref().to_string())
                    .ok_or_else(|| ConfigError::Usage(format!("{flag} needs a value")))
            };
            match arg {
                "--rate" => {
                    let v = value(arg)?;
                    self.target_cycles_per_second = v
                        .parse()
                        .map_err(|_| ConfigError::Usage(format!("bad --rate {v:?}")))?;
                }
                "--layout" => {
                    let v = value(arg)?;
                    self.key_layout = KeyLayout::parse(&v)
                        .ok_or_else(|| ConfigError::Usage(format!("unknown layout {v:?}")))?;
                }
                "--carry" => self.carry_cycle_remainder = true,
                "--no-telemetry" => self.telemetry = false,
                flag if flag.starts_with("--") => {
                    return Err(ConfigError::Usage(format!("unknown flag {flag}")))
                }
                program => self.programs.push(program.to_string()),
            }
        }
        self.validate()
    }
}
