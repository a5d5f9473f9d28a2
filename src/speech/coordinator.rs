//! Playback coordinator.
//!
//! Synchronous core of the pipeline: owns the segmenter, the utterance
//! queue, the voice engine and the playback state.  It never sleeps;
//! delayed work (debounced engine pause/stop, the starvation retry) is
//! recorded as [`Deferred`] entries which the owning service drains with
//! [`Coordinator::take_scheduled`] and feeds back through
//! [`Coordinator::run_deferred`] once the delay has elapsed.
//!
//! Every deferred entry carries the epoch it was created in.  `stop` and
//! `reset` bump the epoch, so a retry scheduled before the barrier can
//! never restart playback after it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::engine::{Boundary, EngineEvent, VoiceEngine};
use super::queue::UtteranceQueue;
use super::segmenter::Segmenter;
use super::state::{Input, PlaybackState};
use super::utterance::{Adjustment, SynthesisParams, Utterance, UtteranceId};
use crate::config::PlaybackTiming;
use crate::utils::preview;

/// Producer callback invoked when the queue runs low.
pub type RequestMore = Arc<dyn Fn() + Send + Sync>;

/// One-shot handler fired when the current speech turn ends.
pub type CompletionHandler = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredAction {
    /// Try `advance` again after the producer was asked for text.
    RetryAdvance,
    /// Debounced engine pause for the pause request numbered `seq`.
    PauseEngine { seq: u64 },
    /// Debounced engine stop, aimed at the utterance in flight when the
    /// stop was issued.
    StopEngine { target: Option<UtteranceId> },
}

/// Work to run after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deferred {
    pub delay: Duration,
    pub epoch: u64,
    pub action: DeferredAction,
}

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSnapshot {
    pub state: PlaybackState,
    pub queue_len: usize,
    pub pending_text: String,
    pub current_text: Option<String>,
    pub muted: bool,
    pub stream_open: bool,
}

pub struct Coordinator {
    segmenter: Segmenter,
    queue: UtteranceQueue,
    engine: Box<dyn VoiceEngine>,
    state: PlaybackState,
    /// Utterance handed to the engine and not yet finished.
    current: Option<Utterance>,
    defaults: SynthesisParams,
    timing: PlaybackTiming,
    muted: bool,

    next_id: u64,
    epoch: u64,
    pause_seq: u64,

    /// Producer signalled that no more text is coming this turn.
    stream_ended: bool,
    /// A request-more call is outstanding (cleared by the next submit).
    requested: bool,
    retry_scheduled: bool,
    starvation_retries: u32,
    /// The engine still owes a stop for an utterance from before the
    /// last stop barrier.
    engine_stop_pending: bool,

    request_more: Option<RequestMore>,
    completion: Option<CompletionHandler>,
    scheduled: Vec<Deferred>,
}

impl Coordinator {
    pub fn new(
        engine: Box<dyn VoiceEngine>,
        defaults: SynthesisParams,
        timing: PlaybackTiming,
    ) -> Self {
        Self {
            segmenter: Segmenter::new(),
            queue: UtteranceQueue::new(timing.low_water_mark),
            engine,
            state: PlaybackState::IDLE,
            current: None,
            defaults,
            timing,
            muted: false,
            next_id: 1,
            epoch: 0,
            pause_seq: 0,
            stream_ended: false,
            requested: false,
            retry_scheduled: false,
            starvation_retries: 0,
            engine_stop_pending: false,
            request_more: None,
            completion: None,
            scheduled: Vec::new(),
        }
    }

    // ── Producer side ────────────────────────────────────────────

    /// Register (or clear) the producer's request-more callback.
    pub fn set_request_more(&mut self, callback: Option<RequestMore>) {
        self.request_more = callback;
        self.requested = false;
    }

    /// Register the one-shot handler for the current turn, replacing any
    /// previous one.
    pub fn on_turn_complete(&mut self, handler: CompletionHandler) {
        self.completion = Some(handler);
    }

    /// Feed a text fragment through the segmenter.
    pub fn submit(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if self.state.is_stopped() {
            self.transition(Input::Rearm);
            info!("Playback re-armed by new text");
        }
        self.stream_ended = false;
        self.requested = false;

        let clauses = self.segmenter.submit(fragment);
        let emitted = !clauses.is_empty();
        for text in clauses {
            let id = self.allocate_id();
            self.queue.push(Utterance::new(id, text));
        }

        if emitted && self.current.is_none() && !self.state.is_paused() {
            self.advance();
        } else {
            self.top_up();
        }
    }

    /// The producer has nothing more for this turn.
    ///
    /// Pending text without a trailing delimiter is emitted as a final
    /// clause; once the queue drains the turn completes.
    pub fn end_of_stream(&mut self) {
        self.stream_ended = true;
        if self.state.is_stopped() {
            return;
        }

        for text in self.segmenter.flush() {
            let id = self.allocate_id();
            self.queue.push(Utterance::new(id, text));
        }
        debug!(queue_len = self.queue.len(), "End of stream");

        if self.current.is_some() || self.state.is_paused() {
            return;
        }
        if self.queue.is_empty() {
            self.drain();
        } else {
            self.advance();
        }
    }

    // ── Playback loop ────────────────────────────────────────────

    /// Hand the next queued utterance to the engine.
    ///
    /// No-op while stopped, paused, or while an utterance is in flight.
    pub fn advance(&mut self) {
        if self.state.is_stopped() {
            trace!("Advance suppressed: stopped");
            return;
        }
        if self.state.is_paused() || self.current.is_some() {
            return;
        }

        loop {
            let Some(utterance) = self.queue.pop() else {
                self.starve();
                return;
            };
            let utterance = utterance.with_params(self.params_for_next());

            // Nothing from before a stop may keep sounding under new speech.
            self.flush_engine_stop();
            match self.engine.speak(&utterance) {
                Ok(()) => {
                    debug!(
                        utterance_id = %utterance.id,
                        queue_len = self.queue.len(),
                        text = %preview(&utterance.text),
                        "Utterance submitted"
                    );
                    self.transition(Input::Speak);
                    self.current = Some(utterance);
                    self.starvation_retries = 0;
                    break;
                }
                Err(e) => {
                    warn!(utterance_id = %utterance.id, "Skipping utterance: {}", e);
                }
            }
        }

        self.top_up();
    }

    /// Handle a progress event from the engine.
    pub fn on_engine_event(&mut self, event: EngineEvent) {
        if !event.is_terminal() {
            trace!(?event, "Engine event");
            return;
        }
        let id = event.utterance_id();
        if self.current.as_ref().map(|u| u.id) != Some(id) {
            debug!(utterance_id = %id, ?event, "Ignoring stale engine event");
            return;
        }
        self.current = None;
        self.on_synthesis_finished();
    }

    fn on_synthesis_finished(&mut self) {
        match self.state {
            PlaybackState::Stopped => return,
            PlaybackState::Paused { .. } => {
                // Utterance ended before the pause landed; resume picks
                // up from the queue.
                self.transition(Input::Finish);
                return;
            }
            _ => {}
        }

        let resume_pending = self.state.resume_pending();
        self.transition(Input::Finish);
        if resume_pending {
            self.advance();
            return;
        }

        self.request_more_text(true);
        if !self.queue.is_empty() {
            self.advance();
        } else if self.stream_ended || self.request_more.is_none() {
            // Nobody will send more text: end the turn.
            self.starve();
        }
    }

    fn starve(&mut self) {
        if self.stream_ended {
            self.drain();
            return;
        }
        if self.request_more.is_none() {
            info!("Queue empty with no producer registered, ending turn");
            self.stop();
            return;
        }
        if self.starvation_retries >= self.timing.max_starvation_retries {
            warn!(
                retries = self.starvation_retries,
                "Producer did not supply text, ending turn"
            );
            self.drain();
            return;
        }

        self.transition(Input::Starve);
        self.starvation_retries += 1;
        self.request_more_text(true);
        if !self.retry_scheduled {
            self.retry_scheduled = true;
            self.schedule(self.timing.starvation_retry, DeferredAction::RetryAdvance);
        }
    }

    /// Queue drained and nothing more coming: end the turn.
    fn drain(&mut self) {
        self.transition(Input::Drain);
        self.starvation_retries = 0;
        debug!("Speech turn drained");
        self.fire_completion();
    }

    /// Ask the producer for text when the queue is at or below the
    /// low-water mark.
    fn top_up(&mut self) {
        if self.queue.is_low() {
            self.request_more_text(false);
        }
    }

    fn request_more_text(&mut self, force: bool) {
        if self.state.is_stopped() || self.stream_ended {
            return;
        }
        if self.requested && !force {
            return;
        }
        if let Some(callback) = &self.request_more {
            trace!(queue_len = self.queue.len(), "Requesting more text");
            self.requested = true;
            callback();
        }
    }

    // ── Controls ─────────────────────────────────────────────────

    /// Pause playback.  Returns `false` when nothing was playing.
    ///
    /// The engine itself is paused after the pause debounce so a pause
    /// right after an utterance starts does not race its start event.
    pub fn pause(&mut self) -> bool {
        if !self.state.is_playing() {
            debug!(state = self.state.label(), "Pause ignored: not playing");
            return false;
        }
        self.transition(Input::Pause);
        self.pause_seq += 1;
        let seq = self.pause_seq;
        self.schedule(self.timing.pause_debounce, DeferredAction::PauseEngine { seq });
        true
    }

    /// Resume after a pause.  Returns `false` when not paused.
    pub fn resume(&mut self) -> bool {
        let PlaybackState::Paused { engine_paused } = self.state else {
            debug!(state = self.state.label(), "Resume ignored: not paused");
            return false;
        };
        // Invalidates a debounced engine pause that has not fired yet.
        self.pause_seq += 1;

        if engine_paused {
            if self.engine.resume() {
                self.transition(Input::Resume);
                return true;
            }
            debug!("Engine could not continue, restarting from queue");
            self.current = None;
        } else if self.current.is_some() {
            self.transition(Input::Resume);
            return true;
        }

        self.transition(Input::ResumeDeferred);
        self.advance();
        true
    }

    /// Stop speaking and discard everything queued or pending.
    ///
    /// Takes effect immediately; the engine is told to stop after the
    /// stop debounce.  Idempotent.
    pub fn stop(&mut self) {
        let target = self.current.take().map(|u| u.id);
        let sounding = target.is_some() || self.engine.is_speaking();
        let was = self.state;
        self.state = PlaybackState::Stopped;
        self.epoch += 1;
        self.retry_scheduled = false;
        self.starvation_retries = 0;
        self.requested = false;

        let dropped = self.queue.clear();
        self.segmenter.clear();
        if !was.is_stopped() {
            info!(from = was.label(), dropped, "Playback stopped");
        }

        if sounding {
            self.engine_stop_pending = true;
            self.schedule(self.timing.stop_debounce, DeferredAction::StopEngine { target });
        }
        self.fire_completion();
    }

    /// Stop, and prepare for a brand-new turn.
    pub fn reset(&mut self) {
        self.stop();
        self.stream_ended = false;
        debug!("Pipeline reset");
    }

    /// Change a default parameter for utterances not yet spoken.
    pub fn set_default(&mut self, adjustment: Adjustment) {
        adjustment.apply(&mut self.defaults);
        debug!(?adjustment, "Default synthesis parameters changed");
    }

    /// Zero or restore the volume without touching playback state.
    pub fn mute(&mut self, muted: bool) {
        self.muted = muted;
        let volume = if muted { 0.0 } else { self.defaults.volume };
        if let Some(current) = self.current.as_mut() {
            current.params.volume = volume;
            self.engine.update_params(current.id, &current.params);
        }
        info!(muted, "Mute changed");
    }

    /// Pause, change a parameter of the in-flight utterance, resume.
    ///
    /// Dropped when nothing is in flight.  Returns whether it applied.
    pub fn adjust(&mut self, adjustment: Adjustment) -> bool {
        let Some(id) = self.current.as_ref().map(|u| u.id) else {
            debug!(?adjustment, "Adjustment dropped: no active utterance");
            return false;
        };

        let paused_here = !self.state.is_paused() && self.engine.pause(Boundary::Immediate);
        if let Some(current) = self.current.as_mut() {
            adjustment.apply(&mut current.params);
            if self.muted {
                current.params.volume = 0.0;
            }
            self.engine.update_params(id, &current.params);
        }
        if paused_here {
            self.engine.resume();
        }
        debug!(utterance_id = %id, ?adjustment, "Adjusted utterance");
        true
    }

    // ── Deferred work ────────────────────────────────────────────

    /// Deferred entries recorded since the last call.
    pub fn take_scheduled(&mut self) -> Vec<Deferred> {
        std::mem::take(&mut self.scheduled)
    }

    /// Run a deferred entry whose delay has elapsed.
    pub fn run_deferred(&mut self, deferred: Deferred) {
        match deferred.action {
            DeferredAction::RetryAdvance => {
                if deferred.epoch != self.epoch || self.state.is_stopped() {
                    trace!("Dropping stale retry");
                    return;
                }
                self.retry_scheduled = false;
                self.advance();
            }
            DeferredAction::PauseEngine { seq } => {
                let still_wanted = deferred.epoch == self.epoch
                    && seq == self.pause_seq
                    && self.state
                        == PlaybackState::Paused {
                            engine_paused: false,
                        }
                    && self.current.is_some();
                if !still_wanted {
                    trace!("Dropping stale engine pause");
                    return;
                }
                if self.engine.pause(Boundary::Word) {
                    self.transition(Input::EnginePaused);
                }
            }
            DeferredAction::StopEngine { target } => {
                if !self.engine_stop_pending {
                    trace!(?target, "Engine stop already issued");
                    return;
                }
                self.flush_engine_stop();
            }
        }
    }

    /// Issue an owed engine stop now instead of waiting out the debounce.
    pub fn flush_engine_stop(&mut self) {
        if !self.engine_stop_pending {
            return;
        }
        self.engine_stop_pending = false;
        let stopped = self.engine.stop(Boundary::Word);
        debug!(stopped, "Engine stopped");
    }

    fn schedule(&mut self, delay: Duration, action: DeferredAction) {
        let deferred = Deferred {
            delay,
            epoch: self.epoch,
            action,
        };
        if delay.is_zero() {
            self.run_deferred(deferred);
        } else {
            self.scheduled.push(deferred);
        }
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn current(&self) -> Option<&Utterance> {
        self.current.as_ref()
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            state: self.state,
            queue_len: self.queue.len(),
            pending_text: self.segmenter.pending().to_string(),
            current_text: self.current.as_ref().map(|u| u.text.clone()),
            muted: self.muted,
            stream_open: !self.stream_ended,
        }
    }

    // ── Internals ────────────────────────────────────────────────

    fn params_for_next(&self) -> SynthesisParams {
        let mut params = self.defaults.clone();
        if self.muted {
            params.volume = 0.0;
        }
        if let Some(voice) = &params.voice {
            if !self.engine.has_voice(voice) {
                warn!(voice = %voice, engine = self.engine.name(), "Voice not available, using default");
                params.voice = None;
            }
        }
        params
    }

    fn allocate_id(&mut self) -> UtteranceId {
        let id = UtteranceId(self.next_id);
        self.next_id += 1;
        id
    }

    fn transition(&mut self, input: Input) {
        match self.state.next(input) {
            Some(next) => {
                if next != self.state {
                    debug!(from = self.state.label(), to = next.label(), ?input, "Playback state");
                }
                self.state = next;
            }
            None => trace!(state = self.state.label(), ?input, "Transition not applicable"),
        }
    }

    fn fire_completion(&mut self) {
        if let Some(handler) = self.completion.take() {
            handler();
        }
    }
}
