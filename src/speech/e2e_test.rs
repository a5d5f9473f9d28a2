//! End-to-end tests for the speech pipeline.
//!
//! Runs the whole loop (producer → segmenter → coordinator → simulated
//! engine → completion) through [`SpeechManager`] with paused tokio time.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::{StreamExt, stream};
    use tokio::time::sleep;

    use crate::config::{Config, SessionCategory};
    use crate::speech::engine::{Boundary, event_channel};
    use crate::speech::engine::mock::{EngineCall, MockEngineHandle, MockVoiceEngine};
    use crate::speech::producer::{FeedOutcome, StreamFeeder};
    use crate::speech::session::{InMemorySession, RouteChange, RouteChangeReason};
    use crate::speech::{
        CommandStatus, InterruptionEvent, NowPlaying, PlaybackState, RemoteCommand,
        SpeechManager,
    };

    // ── Test Helpers ─────────────────────────────────────────────

    fn start_with(session: InMemorySession) -> (SpeechManager, MockEngineHandle) {
        let config = Config::default();
        let (tx, rx) = event_channel();
        let (engine, handle) = MockVoiceEngine::simulated(&config.simulator, tx);
        let manager = SpeechManager::start(&config, Box::new(engine), rx, Box::new(session))
            .expect("speech manager should start");
        (manager, handle)
    }

    fn start() -> (SpeechManager, MockEngineHandle, InMemorySession) {
        let session = InMemorySession::new();
        let (manager, engine) = start_with(session.clone());
        (manager, engine, session)
    }

    // ── Tests ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn full_turn_and_lifecycle() {
        let (manager, engine, session) = start();
        assert!(session.record().active);
        assert!(manager.sessions().is_active());

        let control = manager.control();
        control
            .speak_all("Hi there! I'm your guide, and I know the way.")
            .await
            .unwrap();
        assert_eq!(
            engine.spoken(),
            vec!["Hi there", "I am your guide", "and I know the way"]
        );

        manager.shutdown().await.unwrap();
        let record = session.record();
        assert!(!record.active);
        assert_eq!(record.activations, 1);
        assert!(control.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn interruption_pauses_and_resumes() {
        let (manager, engine, _session) = start();
        let control = manager.control();
        let sessions = manager.sessions();

        let done = control.turn_complete().unwrap();
        control.speak("First sentence here. Second sentence here.").unwrap();
        control.end_of_stream().unwrap();
        sleep(Duration::from_millis(100)).await;
        assert!(control.is_playing().await.unwrap());

        sessions.on_interruption(InterruptionEvent::Began);
        sleep(Duration::from_millis(500)).await;
        assert_eq!(
            control.snapshot().await.unwrap().state,
            PlaybackState::Paused {
                engine_paused: true
            }
        );
        // Time passes while paused; the engine must not finish.
        sleep(Duration::from_secs(10)).await;
        assert_eq!(engine.spoken().len(), 1);

        sessions.on_interruption(InterruptionEvent::Ended {
            should_resume: true,
        });
        assert!(control.is_playing().await.unwrap());

        done.await.unwrap();
        assert_eq!(
            engine.spoken(),
            vec!["First sentence here", "Second sentence here"]
        );
        assert_eq!(engine.count(|c| matches!(c, EngineCall::Pause(_))), 1);
        assert_eq!(engine.count(|c| matches!(c, EngineCall::Resume)), 1);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unplugged_route_pauses() {
        let (manager, _engine, _session) = start();
        let control = manager.control();
        control.speak("Listen to this.").unwrap();
        assert!(control.is_playing().await.unwrap());

        manager.sessions().on_route_change(RouteChange {
            reason: RouteChangeReason::OldDeviceUnavailable,
        });
        assert!(control.is_paused().await.unwrap());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_speech_then_new_turn() {
        let (manager, engine, _session) = start();
        let control = manager.control();

        control
            .speak("This is a long answer. It keeps going. And going.")
            .unwrap();
        sleep(Duration::from_millis(300)).await;
        control.stop().unwrap();
        let snap = control.snapshot().await.unwrap();
        assert_eq!(snap.state, PlaybackState::Stopped);
        assert_eq!(snap.queue_len, 0);

        sleep(Duration::from_millis(100)).await;
        assert!(engine.calls().contains(&EngineCall::Stop(Boundary::Word)));

        control.speak_all("Hi.").await.unwrap();
        assert_eq!(engine.spoken(), vec!["This is a long answer", "Hi"]);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn remote_commands_reflect_true_state() {
        let (manager, _engine, _session) = start();
        let control = manager.control();

        assert_eq!(
            control.remote(RemoteCommand::Pause).await.unwrap(),
            CommandStatus::CommandFailed
        );

        control.speak("Remote control test.").unwrap();
        assert_eq!(
            control.remote(RemoteCommand::Play).await.unwrap(),
            CommandStatus::CommandFailed
        );
        assert_eq!(
            control.remote(RemoteCommand::Pause).await.unwrap(),
            CommandStatus::Success
        );
        assert_eq!(
            control.remote(RemoteCommand::Pause).await.unwrap(),
            CommandStatus::CommandFailed
        );
        assert_eq!(
            control.remote(RemoteCommand::Play).await.unwrap(),
            CommandStatus::Success
        );
        assert!(control.is_playing().await.unwrap());
        assert_eq!(
            control.remote(RemoteCommand::TogglePlayPause).await.unwrap(),
            CommandStatus::Success
        );
        assert!(control.is_paused().await.unwrap());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn remote_command_refreshes_now_playing() {
        let (manager, _engine, session) = start();
        let control = manager.control();
        control.speak("Now playing this.").unwrap();

        assert_eq!(
            manager.remote(RemoteCommand::Pause).await.unwrap(),
            CommandStatus::Success
        );
        assert_eq!(
            session.record().now_playing,
            Some(NowPlaying {
                title: Some("Now playing this".to_string()),
                playing: false,
            })
        );

        assert_eq!(
            manager.remote(RemoteCommand::Play).await.unwrap(),
            CommandStatus::Success
        );
        assert!(session.record().now_playing.is_some_and(|n| n.playing));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn speak_without_producer_completes_turn() {
        let (manager, engine, _session) = start();
        let control = manager.control();

        let done = control.turn_complete().unwrap();
        control.speak("Just this.").unwrap();
        done.await.unwrap();
        assert_eq!(engine.spoken(), vec!["Just this"]);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn speak_with_rate_sets_rate_for_the_turn() {
        let (manager, engine, _session) = start();
        let control = manager.control();

        let done = control.turn_complete().unwrap();
        control.speak_with_rate("Fast one. Fast two.", 1.5).unwrap();
        control.end_of_stream().unwrap();
        done.await.unwrap();

        assert_eq!(engine.spoken(), vec!["Fast one", "Fast two"]);
        assert_eq!(engine.last_params().map(|p| p.rate), Some(1.5));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn barge_in_discards_old_answer() {
        let (manager, engine, _session) = start();
        let control = manager.control();

        let old = stream::iter(vec![
            Ok::<_, anyhow::Error>("Old answer one.".to_string()),
            Ok(" Old answer two.".to_string()),
        ])
        .chain(stream::pending());
        let feeder = StreamFeeder::spawn(control.clone(), old);
        sleep(Duration::from_millis(100)).await;

        feeder.cancel();
        assert_eq!(
            feeder.join().await.unwrap(),
            FeedOutcome::Cancelled { chunks: 2 }
        );

        control.speak_all("New answer.").await.unwrap();
        assert_eq!(engine.spoken(), vec!["Old answer one", "New answer"]);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn mute_and_adjust_during_turn() {
        let (manager, engine, _session) = start();
        let control = manager.control();

        control.speak("Quiet please. Still quiet.").unwrap();
        control.mute(true).unwrap();
        control.adjust_rate(1.5).unwrap();
        let snap = control.snapshot().await.unwrap();
        assert!(snap.muted);
        assert_eq!(snap.state, PlaybackState::Speaking);

        let done = control.turn_complete().unwrap();
        control.end_of_stream().unwrap();
        done.await.unwrap();

        assert_eq!(engine.last_params().map(|p| p.volume), Some(0.0));
        assert!(engine.calls().iter().any(|c| matches!(
            c,
            EngineCall::UpdateParams { params, .. } if params.rate == 1.5 && params.volume == 0.0
        )));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_session_fails_start() {
        let config = Config::default();
        let (tx, rx) = event_channel();
        let (engine, _handle) = MockVoiceEngine::simulated(&config.simulator, tx);
        let session = InMemorySession::rejecting(SessionCategory::Playback);

        let result = SpeechManager::start(&config, Box::new(engine), rx, Box::new(session));
        let err = match result {
            Ok(_) => panic!("start should fail"),
            Err(e) => e,
        };
        assert!(format!("{:#}", err).contains("failed to configure audio session"));
    }
}
