//! Text producers.
//!
//! Two ways of feeding a chat completion into the pipeline:
//!
//! - [`StreamFeeder`] pushes every chunk of a text stream as it arrives.
//! - [`ChunkProducer`] pulls: it registers itself as the request-more
//!   callback and fetches one chunk from a [`ChunkSource`] per request.
//!
//! Both signal end-of-stream when their input is exhausted or fails, and
//! both can be cancelled for barge-in, which also resets the pipeline.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::control::{ControlError, ControlSurface};

/// How a producer task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Input exhausted; end-of-stream was signalled.
    Completed { chunks: usize },
    /// Input failed part way; end-of-stream was signalled.
    Failed { chunks: usize },
    /// Cancelled for barge-in; the pipeline was reset.
    Cancelled { chunks: usize },
    /// The pipeline shut down underneath the producer.
    Closed { chunks: usize },
}

// ── Push ─────────────────────────────────────────────────────────

/// Feeds a text stream into the pipeline from a background task.
pub struct StreamFeeder {
    cancel: CancellationToken,
    task: JoinHandle<FeedOutcome>,
}

impl StreamFeeder {
    pub fn spawn<S>(surface: ControlSurface, stream: S) -> Self
    where
        S: Stream<Item = Result<String>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            // Pushed chunks arrive on their own; registering keeps a gap
            // between chunks from being taken for the end of the answer.
            let _ = surface.set_request_more(Some(Arc::new(|| {
                trace!("Text stream asked for more, waiting on next chunk")
            })));
            let mut stream = Box::pin(stream);
            let mut chunks = 0;

            let outcome = loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!(chunks, "Text stream cancelled");
                        let _ = surface.reset();
                        break FeedOutcome::Cancelled { chunks };
                    }
                    item = stream.next() => match item {
                        Some(Ok(chunk)) => {
                            chunks += 1;
                            if surface.speak(chunk).is_err() {
                                break FeedOutcome::Closed { chunks };
                            }
                        }
                        Some(Err(e)) => {
                            warn!(chunks, "Text stream failed: {:#}", e);
                            let _ = surface.end_of_stream();
                            break FeedOutcome::Failed { chunks };
                        }
                        None => {
                            debug!(chunks, "Text stream finished");
                            break match surface.end_of_stream() {
                                Ok(()) => FeedOutcome::Completed { chunks },
                                Err(_) => FeedOutcome::Closed { chunks },
                            };
                        }
                    }
                }
            };
            let _ = surface.set_request_more(None);
            outcome
        });

        Self { cancel, task }
    }

    /// Barge-in: abandon the stream and reset the pipeline.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<FeedOutcome> {
        Ok(self.task.await?)
    }
}

// ── Pull ─────────────────────────────────────────────────────────

/// Source of text chunks, asked for one chunk at a time.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Next chunk, or `None` when the response is complete.
    async fn next_chunk(&self) -> Result<Option<String>>;
}

/// Pull-based producer driven by the coordinator's request-more calls.
///
/// Requests that arrive while a fetch is in progress collapse into one.
pub struct ChunkProducer {
    cancel: CancellationToken,
    task: JoinHandle<FeedOutcome>,
}

impl ChunkProducer {
    pub fn spawn(
        surface: ControlSurface,
        source: Arc<dyn ChunkSource>,
    ) -> Result<Self, ControlError> {
        let wanted = Arc::new(Notify::new());
        let signal = Arc::clone(&wanted);
        surface.set_request_more(Some(Arc::new(move || signal.notify_one())))?;
        // First chunk is fetched without waiting to be asked.
        wanted.notify_one();

        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut chunks = 0;
            let outcome = loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!(chunks, "Chunk producer cancelled");
                        let _ = surface.reset();
                        break FeedOutcome::Cancelled { chunks };
                    }
                    _ = wanted.notified() => {}
                }

                let fetched = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        let _ = surface.reset();
                        break FeedOutcome::Cancelled { chunks };
                    }
                    fetched = source.next_chunk() => fetched,
                };

                match fetched {
                    Ok(Some(chunk)) => {
                        chunks += 1;
                        if surface.speak(chunk).is_err() {
                            break FeedOutcome::Closed { chunks };
                        }
                    }
                    Ok(None) => {
                        debug!(chunks, "Chunk source exhausted");
                        let _ = surface.end_of_stream();
                        break FeedOutcome::Completed { chunks };
                    }
                    Err(e) => {
                        warn!(chunks, "Chunk source failed: {:#}", e);
                        let _ = surface.end_of_stream();
                        break FeedOutcome::Failed { chunks };
                    }
                }
            };
            let _ = surface.set_request_more(None);
            outcome
        });

        Ok(Self { cancel, task })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<FeedOutcome> {
        Ok(self.task.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaybackTiming;
    use crate::speech::coordinator::Coordinator;
    use crate::speech::engine::event_channel;
    use crate::speech::engine::mock::{MockEngineHandle, MockVoiceEngine};
    use crate::speech::service::PlaybackService;
    use crate::speech::state::PlaybackState;
    use crate::speech::utterance::SynthesisParams;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn pipeline() -> (ControlSurface, MockEngineHandle) {
        let (events_tx, events_rx) = event_channel();
        let (engine, handle) = MockVoiceEngine::timed(40.0, events_tx);
        let coordinator = Coordinator::new(
            Box::new(engine),
            SynthesisParams::default(),
            PlaybackTiming::default(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(PlaybackService::new(coordinator, rx, events_rx).run());
        (ControlSurface::new(tx), handle)
    }

    fn chunks(parts: &[&str]) -> Vec<Result<String>> {
        parts.iter().map(|p| Ok(p.to_string())).collect()
    }

    struct ScriptedSource {
        chunks: Mutex<VecDeque<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(parts: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                chunks: Mutex::new(parts.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChunkSource for ScriptedSource {
        async fn next_chunk(&self) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.chunks.lock().unwrap().pop_front().transpose()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn feeder_speaks_stream_then_ends_turn() {
        let (surface, engine) = pipeline();
        let done = surface.turn_complete().unwrap();

        let feeder = StreamFeeder::spawn(
            surface.clone(),
            stream::iter(chunks(&["Hel", "lo there. ", "How are", " you"])),
        );
        assert_eq!(
            feeder.join().await.unwrap(),
            FeedOutcome::Completed { chunks: 4 }
        );
        done.await.unwrap();

        assert_eq!(engine.spoken(), vec!["Hello there", "How are you"]);
    }

    #[tokio::test(start_paused = true)]
    async fn feeder_waits_out_gaps_between_chunks() {
        let (surface, engine) = pipeline();
        let done = surface.turn_complete().unwrap();

        // "First" is spoken well before the second chunk shows up.
        let items = stream::iter(vec![
            (Duration::ZERO, "First."),
            (Duration::from_secs(1), "Second."),
        ])
        .then(|(delay, text)| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, anyhow::Error>(text.to_string())
        });
        let feeder = StreamFeeder::spawn(surface.clone(), items);
        assert_eq!(
            feeder.join().await.unwrap(),
            FeedOutcome::Completed { chunks: 2 }
        );
        done.await.unwrap();

        assert_eq!(engine.spoken(), vec!["First", "Second"]);
        assert_eq!(surface.snapshot().await.unwrap().state, PlaybackState::IDLE);
    }

    #[tokio::test(start_paused = true)]
    async fn feeder_error_still_flushes_tail() {
        let (surface, engine) = pipeline();
        let done = surface.turn_complete().unwrap();

        let items = vec![
            Ok("First part. ".to_string()),
            Err(anyhow::anyhow!("connection reset")),
        ];
        let feeder = StreamFeeder::spawn(surface.clone(), stream::iter(items));
        assert_eq!(
            feeder.join().await.unwrap(),
            FeedOutcome::Failed { chunks: 1 }
        );
        done.await.unwrap();
        assert_eq!(engine.spoken(), vec!["First part"]);
    }

    #[tokio::test(start_paused = true)]
    async fn feeder_cancel_resets_pipeline() {
        let (surface, _engine) = pipeline();
        let items = stream::iter(chunks(&["Still typing, and"])).chain(stream::pending());
        let feeder = StreamFeeder::spawn(surface.clone(), items);

        tokio::time::sleep(Duration::from_millis(10)).await;
        feeder.cancel();
        assert_eq!(
            feeder.join().await.unwrap(),
            FeedOutcome::Cancelled { chunks: 1 }
        );

        let snap = surface.snapshot().await.unwrap();
        assert_eq!(snap.state, PlaybackState::Stopped);
        assert_eq!(snap.queue_len, 0);
        assert_eq!(snap.pending_text, "");
    }

    #[tokio::test(start_paused = true)]
    async fn producer_pulls_until_exhausted() {
        let (surface, engine) = pipeline();
        let done = surface.turn_complete().unwrap();
        let source = ScriptedSource::new(chunks(&["One", " two.", " Three", " four."]));

        let producer = ChunkProducer::spawn(surface.clone(), source.clone()).unwrap();
        assert_eq!(
            producer.join().await.unwrap(),
            FeedOutcome::Completed { chunks: 4 }
        );
        done.await.unwrap();

        assert_eq!(engine.spoken(), vec!["One two", "Three four"]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
        assert!(!surface.snapshot().await.unwrap().stream_open);
    }

    #[tokio::test(start_paused = true)]
    async fn producer_failure_ends_turn() {
        let (surface, engine) = pipeline();
        let done = surface.turn_complete().unwrap();
        let source = ScriptedSource::new(vec![
            Ok("Partial answer".to_string()),
            Err(anyhow::anyhow!("rate limited")),
        ]);

        let producer = ChunkProducer::spawn(surface.clone(), source).unwrap();
        assert_eq!(
            producer.join().await.unwrap(),
            FeedOutcome::Failed { chunks: 1 }
        );
        done.await.unwrap();
        assert_eq!(engine.spoken(), vec!["Partial answer"]);
    }

    #[tokio::test(start_paused = true)]
    async fn producer_cancel_resets_pipeline() {
        struct Silent;

        #[async_trait]
        impl ChunkSource for Silent {
            async fn next_chunk(&self) -> Result<Option<String>> {
                futures::future::pending().await
            }
        }

        let (surface, _engine) = pipeline();
        let producer = ChunkProducer::spawn(surface.clone(), Arc::new(Silent)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        producer.cancel();
        assert_eq!(
            producer.join().await.unwrap(),
            FeedOutcome::Cancelled { chunks: 0 }
        );
        assert_eq!(
            surface.snapshot().await.unwrap().state,
            PlaybackState::Stopped
        );
    }
}
