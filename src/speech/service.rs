//! Playback service.
//!
//! Single task that owns the [`Coordinator`].  Control commands, engine
//! events and expired deferred work all arrive on channels and are
//! handled one at a time, which is what serializes every mutation of the
//! segmenter buffer, the queue and the playback state.

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info};

use super::control::Command;
use super::coordinator::{Coordinator, Deferred};
use super::engine::EngineEventReceiver;

pub struct PlaybackService {
    coordinator: Coordinator,
    commands: mpsc::UnboundedReceiver<Command>,
    engine_events: EngineEventReceiver,
    wake_tx: mpsc::UnboundedSender<Deferred>,
    wake_rx: mpsc::UnboundedReceiver<Deferred>,
}

impl PlaybackService {
    pub fn new(
        coordinator: Coordinator,
        commands: mpsc::UnboundedReceiver<Command>,
        engine_events: EngineEventReceiver,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        Self {
            coordinator,
            commands,
            engine_events,
            wake_tx,
            wake_rx,
        }
    }

    /// Run until a `Shutdown` command arrives or every control handle is
    /// dropped.
    pub async fn run(mut self) {
        info!(engine = self.coordinator.engine_name(), "Playback service started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(event) = self.engine_events.recv() => {
                    self.coordinator.on_engine_event(event);
                }
                Some(deferred) = self.wake_rx.recv() => {
                    self.coordinator.run_deferred(deferred);
                }
            }
            self.arm_timers();
        }

        self.coordinator.stop();
        // No loop left to wait out the debounce.
        self.coordinator.flush_engine_stop();
        info!("Playback service stopped");
    }

    fn handle(&mut self, command: Command) {
        debug!(?command, "Playback command");
        let coordinator = &mut self.coordinator;
        match command {
            Command::Speak(text) => coordinator.submit(&text),
            Command::EndOfStream => coordinator.end_of_stream(),
            Command::Pause => {
                coordinator.pause();
            }
            Command::Resume => {
                coordinator.resume();
            }
            Command::Stop => coordinator.stop(),
            Command::Reset => coordinator.reset(),
            Command::Mute(muted) => coordinator.mute(muted),
            Command::Adjust(adjustment) => {
                coordinator.adjust(adjustment);
            }
            Command::SetDefault(adjustment) => coordinator.set_default(adjustment),
            Command::Remote { command, reply } => {
                let _ = reply.send(command.apply(coordinator));
            }
            Command::SetRequestMore(callback) => coordinator.set_request_more(callback),
            Command::OnTurnComplete(done) => {
                coordinator.on_turn_complete(Box::new(move || {
                    let _ = done.send(());
                }));
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(coordinator.snapshot());
            }
            // Intercepted by `run`.
            Command::Shutdown => {}
        }
    }

    fn arm_timers(&mut self) {
        for deferred in self.coordinator.take_scheduled() {
            let tx = self.wake_tx.clone();
            tokio::spawn(async move {
                sleep(deferred.delay).await;
                // Service gone: nothing left to wake.
                let _ = tx.send(deferred);
            });
        }
    }
}
