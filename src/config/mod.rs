//! Configuration loading.
//!
//! `config.toml` is parsed into [`Config`]; every section falls back to
//! its defaults so a missing or partial file is always usable.

pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use self::schema::{check_range, parse_duration};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speech: SpeechConfig,
    pub session: SessionConfig,
    pub simulator: SimulatorConfig,
    pub logging: LoggingConfig,
}

/// Synthesis defaults and playback timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Voice identifier handed to the engine. Unknown voices fall back
    /// to the engine default.
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub pre_utterance_delay: String,
    pub post_utterance_delay: String,
    /// Queue length at or below which the producer is asked for more text.
    pub low_water_mark: usize,
    pub pause_debounce: String,
    pub stop_debounce: String,
    pub starvation_retry: String,
    pub max_starvation_retries: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            voice: Some("com.apple.speech.synthesis.voice.Alex".to_string()),
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            pre_utterance_delay: "0ms".to_string(),
            post_utterance_delay: "0ms".to_string(),
            low_water_mark: 100,
            pause_debounce: "200ms".to_string(),
            stop_debounce: "20ms".to_string(),
            starvation_retry: "100ms".to_string(),
            max_starvation_retries: 50,
        }
    }
}

/// Audio session category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCategory {
    Ambient,
    Playback,
    PlayAndRecord,
}

/// Audio session mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Default,
    VoiceChat,
    SpokenAudio,
}

/// Routing / mixing options applied with the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOption {
    MixWithOthers,
    DuckOthers,
    AllowBluetooth,
    DefaultToSpeaker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub category: SessionCategory,
    pub mode: SessionMode,
    pub options: Vec<SessionOption>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            category: SessionCategory::Playback,
            mode: SessionMode::VoiceChat,
            options: vec![
                SessionOption::MixWithOthers,
                SessionOption::AllowBluetooth,
                SessionOption::DefaultToSpeaker,
            ],
        }
    }
}

/// Timing model for the simulated voice engine used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub ms_per_char: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            ms_per_char: 60.0,
            min_duration_ms: 200.0,
            max_duration_ms: 15000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Parsed playback timing, see [`SpeechConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTiming {
    pub pause_debounce: Duration,
    pub stop_debounce: Duration,
    pub starvation_retry: Duration,
    pub max_starvation_retries: u32,
    pub low_water_mark: usize,
}

impl Default for PlaybackTiming {
    fn default() -> Self {
        Self {
            pause_debounce: Duration::from_millis(200),
            stop_debounce: Duration::from_millis(20),
            starvation_retry: Duration::from_millis(100),
            max_starvation_retries: 50,
            low_water_mark: 100,
        }
    }
}

impl SpeechConfig {
    pub fn timing(&self) -> Result<PlaybackTiming> {
        Ok(PlaybackTiming {
            pause_debounce: duration_field("speech.pause_debounce", &self.pause_debounce)?,
            stop_debounce: duration_field("speech.stop_debounce", &self.stop_debounce)?,
            starvation_retry: duration_field("speech.starvation_retry", &self.starvation_retry)?,
            max_starvation_retries: self.max_starvation_retries,
            low_water_mark: self.low_water_mark,
        })
    }

    pub fn pre_delay(&self) -> Result<Duration> {
        duration_field("speech.pre_utterance_delay", &self.pre_utterance_delay)
    }

    pub fn post_delay(&self) -> Result<Duration> {
        duration_field("speech.post_utterance_delay", &self.post_utterance_delay)
    }
}

fn duration_field(name: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| anyhow::anyhow!("{}: {}", name, e))
}

impl Config {
    /// Default config file location (`<config_dir>/talkie/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "talkie").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from an explicit path, or the default location.
    ///
    /// A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let expanded = shellexpand::tilde(p).to_string();
                Self::load_from(Path::new(&expanded))?
            }
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::load_from(&p)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let speech = &self.speech;
        check_range("speech.rate", speech.rate, 0.0, 2.0).map_err(anyhow::Error::msg)?;
        check_range("speech.pitch", speech.pitch, 0.5, 2.0).map_err(anyhow::Error::msg)?;
        check_range("speech.volume", speech.volume, 0.0, 1.0).map_err(anyhow::Error::msg)?;

        let timing = speech.timing()?;
        if timing.starvation_retry.is_zero() {
            bail!("speech.starvation_retry must be greater than zero");
        }
        speech.pre_delay()?;
        speech.post_delay()?;

        let sim = &self.simulator;
        if sim.ms_per_char.is_nan() || sim.ms_per_char <= 0.0 {
            bail!("simulator.ms_per_char must be positive");
        }
        if sim.min_duration_ms.is_nan()
            || sim.min_duration_ms < 0.0
            || sim.min_duration_ms > sim.max_duration_ms
        {
            bail!(
                "simulator durations must satisfy 0 <= min_duration_ms ({}) <= max_duration_ms ({})",
                sim.min_duration_ms,
                sim.max_duration_ms
            );
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }
}
