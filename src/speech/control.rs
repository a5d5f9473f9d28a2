//! Control surface.
//!
//! [`ControlSurface`] is the cloneable handle the UI, remote controls,
//! the session controller and producers use to drive the pipeline.  Every
//! call becomes a [`Command`] on the playback service's channel, so calls
//! from any task are serialized with engine events and deferred work.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::coordinator::{Coordinator, PipelineSnapshot, RequestMore};
use super::session::PlaybackControl;
use super::utterance::Adjustment;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("speech pipeline is closed")]
    Closed,
}

/// Lock-screen / media-key commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemoteCommand {
    Play,
    Pause,
    TogglePlayPause,
}

/// What a remote command reports back to the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandStatus {
    Success,
    CommandFailed,
}

impl RemoteCommand {
    /// Apply to the coordinator.  Play only succeeds when not playing and
    /// Pause only when playing, so the OS control reflects true state.
    pub fn apply(self, coordinator: &mut Coordinator) -> CommandStatus {
        let playing = coordinator.is_playing();
        let status = match self {
            RemoteCommand::Play if playing => CommandStatus::CommandFailed,
            RemoteCommand::Play => {
                coordinator.resume();
                CommandStatus::Success
            }
            RemoteCommand::Pause if playing => {
                coordinator.pause();
                CommandStatus::Success
            }
            RemoteCommand::Pause => CommandStatus::CommandFailed,
            RemoteCommand::TogglePlayPause => {
                if playing {
                    coordinator.pause();
                } else {
                    coordinator.resume();
                }
                CommandStatus::Success
            }
        };
        debug!(command = ?self, ?status, "Remote command");
        status
    }
}

/// Messages accepted by the playback service.
pub enum Command {
    /// Text fragment for the segmenter.
    Speak(String),
    EndOfStream,
    Pause,
    Resume,
    Stop,
    Reset,
    Mute(bool),
    Adjust(Adjustment),
    /// Change a default parameter for utterances not yet spoken.
    SetDefault(Adjustment),
    Remote {
        command: RemoteCommand,
        reply: oneshot::Sender<CommandStatus>,
    },
    SetRequestMore(Option<RequestMore>),
    /// Register a one-shot notification for the end of the current turn.
    OnTurnComplete(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<PipelineSnapshot>),
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Speak(text) => f.debug_tuple("Speak").field(&text.len()).finish(),
            Command::EndOfStream => f.write_str("EndOfStream"),
            Command::Pause => f.write_str("Pause"),
            Command::Resume => f.write_str("Resume"),
            Command::Stop => f.write_str("Stop"),
            Command::Reset => f.write_str("Reset"),
            Command::Mute(m) => f.debug_tuple("Mute").field(m).finish(),
            Command::Adjust(a) => f.debug_tuple("Adjust").field(a).finish(),
            Command::SetDefault(a) => f.debug_tuple("SetDefault").field(a).finish(),
            Command::Remote { command, .. } => f.debug_tuple("Remote").field(command).finish(),
            Command::SetRequestMore(cb) => f
                .debug_tuple("SetRequestMore")
                .field(&cb.is_some())
                .finish(),
            Command::OnTurnComplete(_) => f.write_str("OnTurnComplete"),
            Command::Snapshot(_) => f.write_str("Snapshot"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Handle for driving the pipeline.  Cheap to clone.
#[derive(Clone)]
pub struct ControlSurface {
    tx: mpsc::UnboundedSender<Command>,
}

/// Resolves when the speech turn it was registered for ends.
pub type TurnComplete = oneshot::Receiver<()>;

impl ControlSurface {
    pub fn new(tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { tx }
    }

    fn send(&self, command: Command) -> Result<(), ControlError> {
        self.tx.send(command).map_err(|_| ControlError::Closed)
    }

    /// Submit a text fragment.
    pub fn speak(&self, text: impl Into<String>) -> Result<(), ControlError> {
        self.send(Command::Speak(text.into()))
    }

    /// Submit text spoken at `rate`, which stays the default rate for
    /// later utterances (media intents carry a playback speed).
    pub fn speak_with_rate(&self, text: impl Into<String>, rate: f32) -> Result<(), ControlError> {
        self.send(Command::SetDefault(Adjustment::Rate(rate)))?;
        self.speak(text)
    }

    /// No more text is coming for this turn.
    pub fn end_of_stream(&self) -> Result<(), ControlError> {
        self.send(Command::EndOfStream)
    }

    pub fn pause(&self) -> Result<(), ControlError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), ControlError> {
        self.send(Command::Resume)
    }

    pub fn stop(&self) -> Result<(), ControlError> {
        self.send(Command::Stop)
    }

    /// Stop and clear everything before a new turn.
    pub fn reset(&self) -> Result<(), ControlError> {
        self.send(Command::Reset)
    }

    pub fn mute(&self, muted: bool) -> Result<(), ControlError> {
        self.send(Command::Mute(muted))
    }

    pub fn adjust_rate(&self, rate: f32) -> Result<(), ControlError> {
        self.send(Command::Adjust(Adjustment::Rate(rate)))
    }

    pub fn adjust_pitch(&self, pitch: f32) -> Result<(), ControlError> {
        self.send(Command::Adjust(Adjustment::Pitch(pitch)))
    }

    pub fn adjust_volume(&self, volume: f32) -> Result<(), ControlError> {
        self.send(Command::Adjust(Adjustment::Volume(volume)))
    }

    /// Register the producer's request-more callback.
    pub fn set_request_more(&self, callback: Option<RequestMore>) -> Result<(), ControlError> {
        self.send(Command::SetRequestMore(callback))
    }

    /// Notification for the end of the current turn (drained or stopped).
    ///
    /// Registering again replaces the earlier registration, whose
    /// receiver then resolves with an error.
    pub fn turn_complete(&self) -> Result<TurnComplete, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::OnTurnComplete(tx))?;
        Ok(rx)
    }

    /// Speak a complete text and wait until it has been spoken (or the
    /// turn was stopped).
    pub async fn speak_all(&self, text: impl Into<String>) -> Result<(), ControlError> {
        let done = self.turn_complete()?;
        self.speak(text)?;
        self.end_of_stream()?;
        // A replaced registration counts as done too.
        let _ = done.await;
        Ok(())
    }

    /// Forward a remote-control command and report its status.
    pub async fn remote(&self, command: RemoteCommand) -> Result<CommandStatus, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Remote { command, reply })?;
        rx.await.map_err(|_| ControlError::Closed)
    }

    pub async fn snapshot(&self) -> Result<PipelineSnapshot, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| ControlError::Closed)
    }

    pub async fn is_playing(&self) -> Result<bool, ControlError> {
        Ok(self.snapshot().await?.state.is_playing())
    }

    pub async fn is_paused(&self) -> Result<bool, ControlError> {
        Ok(self.snapshot().await?.state.is_paused())
    }

    /// Ask the service to stop and exit its loop.
    pub fn shutdown(&self) -> Result<(), ControlError> {
        info!("Speech pipeline shutdown requested");
        self.send(Command::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PlaybackControl for ControlSurface {
    fn pause(&self) {
        if ControlSurface::pause(self).is_err() {
            debug!("Pause dropped: pipeline closed");
        }
    }

    fn resume(&self) {
        if ControlSurface::resume(self).is_err() {
            debug!("Resume dropped: pipeline closed");
        }
    }
}
