//! Streaming speech pipeline
//!
//! Turns streamed chat text into continuous, interruptible speech:
//! text fragments → segmenter → utterance queue → coordinator → voice
//! engine → completion event → coordinator (advance or request more).

pub mod control;
pub mod coordinator;
pub mod engine;
pub mod normalize;
pub mod producer;
pub mod queue;
pub mod segmenter;
pub mod service;
pub mod session;
pub mod state;
pub mod utterance;

mod e2e_test;

pub use control::{CommandStatus, ControlError, ControlSurface, RemoteCommand};
pub use coordinator::{Coordinator, PipelineSnapshot};
pub use engine::{EngineEvent, VoiceEngine};
pub use session::{AudioSession, InterruptionEvent, NowPlaying, SessionController};
pub use state::PlaybackState;
pub use utterance::{SynthesisParams, Utterance, UtteranceId};

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{Config, SpeechConfig};
use engine::EngineEventReceiver;
use service::PlaybackService;

/// Default synthesis parameters from the `[speech]` section.
pub fn synthesis_defaults(speech: &SpeechConfig) -> Result<SynthesisParams> {
    Ok(SynthesisParams {
        voice: speech.voice.clone(),
        rate: speech.rate,
        pitch: speech.pitch,
        volume: speech.volume,
        pre_delay: speech.pre_delay()?,
        post_delay: speech.post_delay()?,
    })
}

/// Top-level speech subsystem.
/// Owns the audio session controller and the playback service task.
pub struct SpeechManager {
    control: ControlSurface,
    sessions: Arc<SessionController>,
    task: Option<JoinHandle<()>>,
}

impl SpeechManager {
    /// Configure and activate the audio session, then start the playback
    /// service.  Must be called from within a tokio runtime.
    pub fn start(
        config: &Config,
        engine: Box<dyn VoiceEngine>,
        engine_events: EngineEventReceiver,
        session: Box<dyn AudioSession>,
    ) -> Result<Self> {
        let timing = config.speech.timing()?;
        let defaults = synthesis_defaults(&config.speech)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let control = ControlSurface::new(tx);

        let sessions = Arc::new(SessionController::new(session, Arc::new(control.clone())));
        sessions
            .configure(&config.session)
            .context("failed to configure audio session")?;
        sessions
            .activate()
            .context("failed to activate audio session")?;

        let engine_name = engine.name().to_string();
        let coordinator = Coordinator::new(engine, defaults, timing);
        let task = tokio::spawn(PlaybackService::new(coordinator, rx, engine_events).run());

        info!(
            engine = %engine_name,
            low_water_mark = timing.low_water_mark,
            "Speech manager started"
        );
        Ok(Self {
            control,
            sessions,
            task: Some(task),
        })
    }

    pub fn control(&self) -> ControlSurface {
        self.control.clone()
    }

    pub fn sessions(&self) -> Arc<SessionController> {
        Arc::clone(&self.sessions)
    }

    /// Apply a remote-control command, then refresh the now-playing
    /// metadata so the OS controls show the resulting state.
    pub async fn remote(&self, command: RemoteCommand) -> Result<CommandStatus> {
        let status = self.control.remote(command).await?;
        let snapshot = self.control.snapshot().await?;
        self.sessions.update_now_playing(&NowPlaying::from(&snapshot));
        Ok(status)
    }

    /// Stop speech, wait for the service to exit and release the session.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Speech manager shutting down");
        // Already closed means the service is gone.
        let _ = self.control.shutdown();
        if let Some(task) = self.task.take() {
            task.await.context("playback service panicked")?;
        }
        self.sessions
            .deactivate()
            .context("failed to deactivate audio session")?;
        Ok(())
    }
}
