//! Audio session and interruption handling.
//!
//! The [`SessionController`] is the only component allowed to configure
//! or (de)activate the output session.  It translates OS interruption and
//! route-change notifications into pause/resume calls and keeps no
//! playback state of its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::coordinator::PipelineSnapshot;
use crate::config::{SessionCategory, SessionConfig};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("audio session rejected category {0:?}")]
    CategoryRejected(SessionCategory),
    #[error("failed to change audio session activation: {0}")]
    Activation(String),
}

/// Platform audio output session.
pub trait AudioSession: Send {
    /// Apply category, mode and routing options.
    fn configure(&mut self, config: &SessionConfig) -> Result<(), SessionError>;

    fn set_active(&mut self, active: bool) -> Result<(), SessionError>;

    /// Refresh the lock-screen / media-center metadata.
    fn publish_now_playing(&mut self, _info: &NowPlaying) -> Result<(), SessionError> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Metadata shown by the OS media controls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    /// Text currently being spoken.
    pub title: Option<String>,
    pub playing: bool,
}

impl From<&PipelineSnapshot> for NowPlaying {
    fn from(snapshot: &PipelineSnapshot) -> Self {
        Self {
            title: snapshot.current_text.clone(),
            playing: snapshot.state.is_playing(),
        }
    }
}

/// Interruption notification from the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InterruptionEvent {
    Began,
    Ended { should_resume: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouteChangeReason {
    NewDeviceAvailable,
    /// Headphones unplugged, Bluetooth device gone.
    OldDeviceUnavailable,
    CategoryChange,
    Override,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteChange {
    pub reason: RouteChangeReason,
}

/// The playback operations interruptions map onto.
#[cfg_attr(test, mockall::automock)]
pub trait PlaybackControl: Send + Sync {
    fn pause(&self);
    fn resume(&self);
}

pub struct SessionController {
    session: Mutex<Box<dyn AudioSession>>,
    playback: Arc<dyn PlaybackControl>,
    active: AtomicBool,
}

impl SessionController {
    pub fn new(session: Box<dyn AudioSession>, playback: Arc<dyn PlaybackControl>) -> Self {
        Self {
            session: Mutex::new(session),
            playback,
            active: AtomicBool::new(false),
        }
    }

    fn session(&self) -> MutexGuard<'_, Box<dyn AudioSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn configure(&self, config: &SessionConfig) -> Result<(), SessionError> {
        let mut session = self.session();
        session.configure(config)?;
        info!(
            session = session.name(),
            category = ?config.category,
            mode = ?config.mode,
            options = ?config.options,
            "Audio session configured"
        );
        Ok(())
    }

    pub fn activate(&self) -> Result<(), SessionError> {
        self.session().set_active(true)?;
        self.active.store(true, Ordering::Release);
        debug!("Audio session active");
        Ok(())
    }

    pub fn deactivate(&self) -> Result<(), SessionError> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.session().set_active(false)?;
        debug!("Audio session inactive");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Push now-playing metadata to the session.  Failures are logged.
    pub fn update_now_playing(&self, info: &NowPlaying) {
        if let Err(e) = self.session().publish_now_playing(info) {
            warn!(error = %e, "Failed to update now-playing info");
        } else {
            debug!(playing = info.playing, "Now-playing info updated");
        }
    }

    pub fn on_interruption(&self, event: InterruptionEvent) {
        info!(?event, "Audio session interruption");
        match event {
            InterruptionEvent::Began => self.playback.pause(),
            InterruptionEvent::Ended {
                should_resume: true,
            } => self.playback.resume(),
            InterruptionEvent::Ended {
                should_resume: false,
            } => {}
        }
    }

    pub fn on_route_change(&self, change: RouteChange) {
        if change.reason == RouteChangeReason::OldDeviceUnavailable {
            info!("Output device went away, pausing");
            self.playback.pause();
        } else {
            debug!(reason = ?change.reason, "Route change ignored");
        }
    }
}

/// What an [`InMemorySession`] has been told.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionRecord {
    pub config: Option<SessionConfig>,
    pub active: bool,
    pub activations: usize,
    pub now_playing: Option<NowPlaying>,
}

/// Session that only records requests.  Used when no platform audio
/// session exists (CLI simulator, tests).  Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemorySession {
    record: Arc<Mutex<SessionRecord>>,
    reject: Option<SessionCategory>,
}

impl InMemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session that refuses `category`.
    pub fn rejecting(category: SessionCategory) -> Self {
        Self {
            reject: Some(category),
            ..Self::default()
        }
    }

    pub fn record(&self) -> SessionRecord {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AudioSession for InMemorySession {
    fn configure(&mut self, config: &SessionConfig) -> Result<(), SessionError> {
        if self.reject == Some(config.category) {
            return Err(SessionError::CategoryRejected(config.category));
        }
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .config = Some(config.clone());
        Ok(())
    }

    fn set_active(&mut self, active: bool) -> Result<(), SessionError> {
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        if active && record.config.is_none() {
            return Err(SessionError::Activation(
                "session must be configured before activation".to_string(),
            ));
        }
        record.active = active;
        if active {
            record.activations += 1;
        }
        Ok(())
    }

    fn publish_now_playing(&mut self, info: &NowPlaying) -> Result<(), SessionError> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .now_playing = Some(info.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
