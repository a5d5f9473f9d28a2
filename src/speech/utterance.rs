//! Speakable units handed to the voice engine.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Monotonic identifier assigned when an utterance is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UtteranceId(pub u64);

impl fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// Synthesis parameters attached to each utterance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisParams {
    /// `None` means the engine's default voice.
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub pre_delay: Duration,
    pub post_delay: Duration,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            voice: None,
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            pre_delay: Duration::ZERO,
            post_delay: Duration::ZERO,
        }
    }
}

/// One normalized clause plus the parameters it will be spoken with.
///
/// Created by the segmenter, consumed exactly once by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    pub params: SynthesisParams,
}

impl Utterance {
    pub fn new(id: UtteranceId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            params: SynthesisParams::default(),
        }
    }

    /// Same utterance, spoken with `params`.
    pub fn with_params(mut self, params: SynthesisParams) -> Self {
        self.params = params;
        self
    }
}

/// A live adjustment of the in-flight utterance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    Rate(f32),
    Pitch(f32),
    Volume(f32),
}

impl Adjustment {
    /// Write the (clamped) value into `params`.
    pub fn apply(self, params: &mut SynthesisParams) {
        match self {
            Adjustment::Rate(v) => params.rate = v.clamp(0.0, 2.0),
            Adjustment::Pitch(v) => params.pitch = v.clamp(0.5, 2.0),
            Adjustment::Volume(v) => params.volume = v.clamp(0.0, 1.0),
        }
    }
}
