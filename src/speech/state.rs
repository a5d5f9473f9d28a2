//! Playback state machine.
//!
//! A single enum replaces the `playing`/`paused`/`stop issued`/
//! `should resume` flags, so contradictory combinations cannot be
//! represented.  [`PlaybackState::next`] is the transition table; inputs
//! that do not apply to the current state return `None`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing sounding.  `resume_pending` is set when a resume found
    /// nothing to continue; the next advance restarts playback.
    Idle { resume_pending: bool },
    /// Playing, but the queue ran dry and the producer was asked for text.
    Buffering,
    /// An utterance is with the engine.
    Speaking,
    /// Paused by the user or the session.  `engine_paused` records
    /// whether the (debounced) engine pause has actually been issued.
    Paused { engine_paused: bool },
    /// Stop issued; nothing advances until new text re-arms playback.
    Stopped,
}

/// Inputs to the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// An utterance was handed to the engine.
    Speak,
    /// Advance found the queue empty and asked the producer for more.
    Starve,
    /// The engine finished (or cancelled) the in-flight utterance.
    Finish,
    /// The turn drained; nothing more to say.
    Drain,
    Pause,
    /// The deferred engine pause was issued.
    EnginePaused,
    /// Resume continued (or never needed to interrupt) the engine.
    Resume,
    /// Resume found nothing to continue.
    ResumeDeferred,
    Stop,
    /// New text arrived after a stop.
    Rearm,
}

impl PlaybackState {
    pub const IDLE: PlaybackState = PlaybackState::Idle {
        resume_pending: false,
    };

    pub fn next(self, input: Input) -> Option<PlaybackState> {
        use Input as I;
        use PlaybackState as S;

        let next = match (self, input) {
            (_, I::Stop) => S::Stopped,
            (S::Stopped, I::Rearm) => S::IDLE,
            (S::Stopped, _) => return None,

            (S::Idle { .. } | S::Buffering | S::Speaking, I::Speak) => S::Speaking,
            (S::Idle { .. } | S::Buffering, I::Starve) => S::Buffering,

            (S::Speaking | S::Buffering | S::Idle { .. }, I::Finish) => S::IDLE,
            (S::Paused { .. }, I::Finish) => S::Paused {
                engine_paused: false,
            },
            (S::Idle { .. } | S::Buffering | S::Speaking, I::Drain) => S::IDLE,

            (S::Speaking | S::Buffering, I::Pause) => S::Paused {
                engine_paused: false,
            },
            (
                S::Paused {
                    engine_paused: false,
                },
                I::EnginePaused,
            ) => S::Paused {
                engine_paused: true,
            },
            (S::Paused { .. }, I::Resume) => S::Speaking,
            (S::Paused { .. }, I::ResumeDeferred) => S::Idle {
                resume_pending: true,
            },

            _ => return None,
        };
        Some(next)
    }

    /// Audio is (or is about to be) sounding.
    pub fn is_playing(self) -> bool {
        matches!(self, PlaybackState::Speaking | PlaybackState::Buffering)
    }

    pub fn is_paused(self) -> bool {
        matches!(self, PlaybackState::Paused { .. })
    }

    pub fn is_stopped(self) -> bool {
        matches!(self, PlaybackState::Stopped)
    }

    pub fn resume_pending(self) -> bool {
        matches!(
            self,
            PlaybackState::Idle {
                resume_pending: true
            }
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            PlaybackState::Idle { .. } => "idle",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Speaking => "speaking",
            PlaybackState::Paused { .. } => "paused",
            PlaybackState::Stopped => "stopped",
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::IDLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAUSED: PlaybackState = PlaybackState::Paused {
        engine_paused: false,
    };
    const ENGINE_PAUSED: PlaybackState = PlaybackState::Paused {
        engine_paused: true,
    };

    #[test]
    fn idle_speak_finish_loop() {
        let s = PlaybackState::IDLE.next(Input::Speak).unwrap();
        assert_eq!(s, PlaybackState::Speaking);
        assert_eq!(s.next(Input::Speak), Some(PlaybackState::Speaking));
        assert_eq!(s.next(Input::Finish), Some(PlaybackState::IDLE));
    }

    #[test]
    fn pause_resume_round_trip() {
        let s = PlaybackState::Speaking.next(Input::Pause).unwrap();
        assert_eq!(s, PAUSED);
        let s = s.next(Input::EnginePaused).unwrap();
        assert_eq!(s, ENGINE_PAUSED);
        assert_eq!(s.next(Input::Resume), Some(PlaybackState::Speaking));
    }

    #[test]
    fn pause_requires_playing() {
        assert_eq!(PlaybackState::IDLE.next(Input::Pause), None);
        assert_eq!(PAUSED.next(Input::Pause), None);
        assert_eq!(PlaybackState::Stopped.next(Input::Pause), None);
    }

    #[test]
    fn resume_requires_paused() {
        assert_eq!(PlaybackState::Speaking.next(Input::Resume), None);
        assert_eq!(PlaybackState::IDLE.next(Input::Resume), None);
    }

    #[test]
    fn deferred_resume_marks_pending() {
        let s = PAUSED.next(Input::ResumeDeferred).unwrap();
        assert!(s.resume_pending());
        assert!(!s.is_playing());
        assert!(!s.is_paused());
    }

    #[test]
    fn stop_from_every_state() {
        for s in [
            PlaybackState::IDLE,
            PlaybackState::Buffering,
            PlaybackState::Speaking,
            PAUSED,
            ENGINE_PAUSED,
            PlaybackState::Stopped,
        ] {
            assert_eq!(s.next(Input::Stop), Some(PlaybackState::Stopped));
        }
    }

    #[test]
    fn stopped_only_leaves_on_rearm() {
        let s = PlaybackState::Stopped;
        for input in [
            Input::Speak,
            Input::Starve,
            Input::Finish,
            Input::Pause,
            Input::Resume,
            Input::Drain,
        ] {
            assert_eq!(s.next(input), None, "{:?} must not leave Stopped", input);
        }
        assert_eq!(s.next(Input::Rearm), Some(PlaybackState::IDLE));
    }

    #[test]
    fn rearm_outside_stopped_is_ignored() {
        assert_eq!(PlaybackState::Speaking.next(Input::Rearm), None);
    }

    #[test]
    fn finish_while_paused_stays_paused() {
        assert_eq!(ENGINE_PAUSED.next(Input::Finish), Some(PAUSED));
    }

    #[test]
    fn playing_and_paused_are_exclusive() {
        for s in [
            PlaybackState::IDLE,
            PlaybackState::Buffering,
            PlaybackState::Speaking,
            PAUSED,
            ENGINE_PAUSED,
            PlaybackState::Stopped,
        ] {
            assert!(!(s.is_playing() && s.is_paused()));
        }
    }

    #[test]
    fn buffering_counts_as_playing() {
        let s = PlaybackState::IDLE.next(Input::Starve).unwrap();
        assert!(s.is_playing());
        assert_eq!(s.next(Input::Speak), Some(PlaybackState::Speaking));
    }
}
