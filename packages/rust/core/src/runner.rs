//! Detached execution of pipeline runs.
//!
//! Each run is a tokio task. A semaphore caps how many run at once; queued
//! runs wait for a permit without blocking the submitter. Every run keeps a
//! join handle and a cancellation token. A run whose pipeline panics is
//! still recorded as failed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use heritix_shared::{HeritixError, KnowledgeId, Result};

use crate::pipeline::{Pipeline, RunOutcome};

type ActiveRuns = Arc<Mutex<HashMap<KnowledgeId, CancellationToken>>>;

/// Removes a run from the active table however its task ends.
struct ActiveEntry {
    active: ActiveRuns,
    id: KnowledgeId,
}

impl Drop for ActiveEntry {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.remove(&self.id);
    }
}

/// Handle to one submitted run.
#[derive(Debug)]
pub struct PipelineJob {
    pub record_id: KnowledgeId,
    handle: JoinHandle<RunOutcome>,
    cancel: CancellationToken,
}

impl PipelineJob {
    /// Ask the run to stop at the next stage boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to end. A task that never produced an outcome is reported as an error.
    pub async fn wait(self) -> Result<RunOutcome> {
        self.handle.await.map_err(|e| {
            HeritixError::Pipeline(format!("run for {} did not finish: {e}", self.record_id))
        })
    }
}

/// Owns detached runs.
#[derive(Clone)]
pub struct PipelineRunner {
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    active: ActiveRuns,
}

impl PipelineRunner {
    pub fn new(pipeline: Arc<Pipeline>, max_concurrent_runs: usize) -> Self {
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn a run for a record already moved to `processing`.
    pub fn submit(&self, record_id: KnowledgeId) -> PipelineJob {
        let cancel = CancellationToken::new();
        if let Ok(mut active) = self.active.lock() {
            active.insert(record_id.clone(), cancel.clone());
        }

        let pipeline = self.pipeline.clone();
        let permits = self.permits.clone();
        let active = self.active.clone();
        let token = cancel.clone();
        let id = record_id.clone();

        let handle = tokio::spawn(async move {
            let _entry = ActiveEntry {
                active,
                id: id.clone(),
            };

            // A cancelled run stops waiting and fails at its first checkpoint
            let _permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                _ = token.cancelled() => None,
            };
            debug!(record_id = %id, "run acquired slot");

            let run = tokio::spawn({
                let pipeline = pipeline.clone();
                let id = id.clone();
                async move { pipeline.run(&id, &token).await }
            });
            match run.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let message = abort_message(e);
                    error!(record_id = %id, %message, "pipeline run aborted");
                    pipeline.abort(&id, message).await
                }
            }
        });

        PipelineJob {
            record_id,
            handle,
            cancel,
        }
    }

    /// Request cancellation of an active run. Returns whether one was active.
    pub fn cancel(&self, record_id: &KnowledgeId) -> bool {
        let token = self
            .active
            .lock()
            .ok()
            .and_then(|active| active.get(record_id).cloned());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of submitted runs that have not finished.
    pub fn active_runs(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }
}

fn abort_message(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("run aborted: {err}");
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into());
    format!("pipeline panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use heritix_agents::Capability;
    use heritix_shared::{LogOutcome, ProcessingStatus, RetryConfig, Stage};
    use heritix_storage::{NewKnowledge, Storage};

    use super::*;
    use crate::audio::{AudioStore, LocalAudioStore};
    use crate::executor::StageExecutor;
    use crate::pipeline::CANCELLED_MESSAGE;
    use crate::testing::{
        Behaviour, FakeAgent, FakeStt, fast_config, registry, temp_audio_store, temp_storage,
    };

    struct Fixture {
        runner: PipelineRunner,
        storage: Arc<Storage>,
        audio: Arc<LocalAudioStore>,
    }

    async fn fixture(stt: FakeStt, max_concurrent_runs: usize) -> Fixture {
        fixture_with(stt, max_concurrent_runs, vec![]).await
    }

    async fn fixture_with(
        stt: FakeStt,
        max_concurrent_runs: usize,
        overrides: Vec<FakeAgent>,
    ) -> Fixture {
        let storage = temp_storage().await;
        let audio = temp_audio_store();
        let (agents, _) = registry(overrides);
        let pipeline = Pipeline::new(
            storage.clone(),
            agents,
            Arc::new(stt),
            audio.clone(),
            StageExecutor::new(RetryConfig::from(&fast_config())),
            "en",
        );
        Fixture {
            runner: PipelineRunner::new(Arc::new(pipeline), max_concurrent_runs),
            storage,
            audio,
        }
    }

    impl Fixture {
        /// A record already moved to `processing`.
        async fn claimed_record(&self) -> KnowledgeId {
            let id = KnowledgeId::new();
            let audio_url = self
                .audio
                .store(b"RIFF....WAVE", &format!("{id}_story.wav"))
                .await
                .unwrap();
            self.storage
                .insert_record(&NewKnowledge {
                    id: id.clone(),
                    title: "Story".into(),
                    contributor: "Anonymous".into(),
                    consent: true,
                    audio_url,
                    original_filename: "story.wav".into(),
                })
                .await
                .unwrap();
            let claimed = self
                .storage
                .transition_status(&id, ProcessingStatus::Uploaded, ProcessingStatus::Processing)
                .await
                .unwrap();
            assert!(claimed);
            id
        }
    }

    fn slow_stt() -> FakeStt {
        FakeStt {
            delay: Duration::from_millis(100),
            ..FakeStt::speaking("en")
        }
    }

    #[tokio::test]
    async fn runs_past_the_cap_queue_and_complete() {
        let fx = fixture(slow_stt(), 1).await;
        let a = fx.runner.submit(fx.claimed_record().await);
        let b = fx.runner.submit(fx.claimed_record().await);
        assert!(!a.is_finished());
        assert_eq!(fx.runner.active_runs(), 2);

        assert_eq!(a.wait().await.unwrap(), RunOutcome::Completed);
        assert_eq!(b.wait().await.unwrap(), RunOutcome::Completed);
        assert_eq!(fx.runner.active_runs(), 0);
    }

    #[tokio::test]
    async fn cancelled_queued_run_fails_before_transcription() {
        let fx = fixture(slow_stt(), 1).await;
        let first = fx.runner.submit(fx.claimed_record().await);
        let queued_id = fx.claimed_record().await;
        let queued = fx.runner.submit(queued_id.clone());
        queued.cancel();

        assert_eq!(
            queued.wait().await.unwrap(),
            RunOutcome::Failed {
                stage: Stage::SpeechToText,
                message: CANCELLED_MESSAGE.into(),
            }
        );
        assert_eq!(first.wait().await.unwrap(), RunOutcome::Completed);

        let meta = fx.storage.get_metadata(&queued_id).await.unwrap().unwrap();
        assert_eq!(meta.processing_status, ProcessingStatus::Failed);
        assert!(meta.transcript.is_none());
    }

    #[tokio::test]
    async fn panicking_agent_fails_the_record() {
        let fx = fixture_with(
            FakeStt::speaking("en"),
            2,
            vec![FakeAgent::new(Capability::Context, Behaviour::Panic)],
        )
        .await;
        let id = fx.claimed_record().await;

        let outcome = fx.runner.submit(id.clone()).wait().await.unwrap();
        let RunOutcome::Failed { stage, message } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(stage, Stage::Pipeline);
        assert!(message.contains("context agent exploded"), "{message}");
        assert_eq!(fx.runner.active_runs(), 0);

        let meta = fx.storage.get_metadata(&id).await.unwrap().unwrap();
        assert_eq!(meta.processing_status, ProcessingStatus::Failed);

        let history = fx.storage.logs_chronological(&id).await.unwrap();
        let last = history.last().unwrap();
        assert_eq!((last.stage, last.outcome), (Stage::Pipeline, LogOutcome::Failed));
        assert!(last.error_message.as_deref().unwrap().contains("exploded"));

        // Results from before the panic are kept
        let content = fx.storage.get_content(&id).await.unwrap().unwrap();
        assert!(content.extraction_data.is_some());
        assert!(content.context_data.is_none());
    }

    #[tokio::test]
    async fn cancel_unknown_record_is_noop() {
        let fx = fixture(FakeStt::speaking("en"), 2).await;
        assert!(!fx.runner.cancel(&KnowledgeId::new()));
    }
}
