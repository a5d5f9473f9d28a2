//! Voice engine seam.
//!
//! The engine is driven synchronously by the coordinator (speak / pause /
//! continue / stop) and reports progress asynchronously by pushing
//! [`EngineEvent`]s into a channel the playback service consumes.  The
//! coordinator is the engine's only caller.

pub mod mock;

use thiserror::Error;
use tokio::sync::mpsc;

use super::utterance::{SynthesisParams, Utterance, UtteranceId};

/// Where an in-progress utterance may be cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Immediate,
    Word,
}

/// Progress notifications emitted by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Started(UtteranceId),
    Paused(UtteranceId),
    Continued(UtteranceId),
    Finished(UtteranceId),
    Cancelled(UtteranceId),
}

impl EngineEvent {
    pub fn utterance_id(&self) -> UtteranceId {
        match *self {
            EngineEvent::Started(id)
            | EngineEvent::Paused(id)
            | EngineEvent::Continued(id)
            | EngineEvent::Finished(id)
            | EngineEvent::Cancelled(id) => id,
        }
    }

    /// The utterance is over, one way or another.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineEvent::Finished(_) | EngineEvent::Cancelled(_))
    }
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Channel an engine reports on.
pub fn event_channel() -> (EngineEventSender, EngineEventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("voice not available: {0}")]
    VoiceUnavailable(String),
}

/// A speech synthesizer that plays utterances one at a time.
pub trait VoiceEngine: Send {
    /// Start speaking `utterance`.  Completion arrives later as an event.
    ///
    /// Engines may queue behind an utterance that is still sounding, so
    /// callers stop the previous one first.
    fn speak(&mut self, utterance: &Utterance) -> Result<(), EngineError>;

    /// Pause the current utterance.  Returns `false` if nothing was paused.
    fn pause(&mut self, at: Boundary) -> bool;

    /// Continue a paused utterance.  Returns `false` if there was nothing
    /// to continue.
    fn resume(&mut self) -> bool;

    /// Stop the current utterance.  Returns `false` if nothing was playing.
    fn stop(&mut self, at: Boundary) -> bool;

    /// Whether anything is still sounding (or paused mid-utterance).
    fn is_speaking(&self) -> bool;

    /// Apply new parameters to the in-flight utterance.
    fn update_params(&mut self, _id: UtteranceId, _params: &SynthesisParams) {}

    /// Whether `voice` can be used.  Engines without a voice catalogue
    /// accept everything.
    fn has_voice(&self, _voice: &str) -> bool {
        true
    }

    /// Human-readable engine name.
    fn name(&self) -> &str;
}
