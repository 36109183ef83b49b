//! Append-only audit trail of stage attempts per record.

use std::sync::Arc;

use heritix_shared::{KnowledgeId, LogOutcome, ProcessingLogEntry, Result, Stage};
use heritix_storage::Storage;
use tracing::debug;

/// Writes the processing log. Entries are never rewritten.
#[derive(Clone)]
pub struct AuditLog {
    storage: Arc<Storage>,
}

impl AuditLog {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub async fn record(
        &self,
        id: &KnowledgeId,
        stage: Stage,
        outcome: LogOutcome,
        message: Option<&str>,
    ) -> Result<ProcessingLogEntry> {
        let entry = self.storage.append_log(id, stage, outcome, message).await?;
        debug!(record_id = %id, %stage, %outcome, seq = entry.seq, "audit entry");
        Ok(entry)
    }

    pub async fn started(&self, id: &KnowledgeId, stage: Stage) -> Result<ProcessingLogEntry> {
        self.record(id, stage, LogOutcome::Started, None).await
    }

    /// `note` carries the reason when the stage produced degraded output.
    pub async fn success(
        &self,
        id: &KnowledgeId,
        stage: Stage,
        note: Option<&str>,
    ) -> Result<ProcessingLogEntry> {
        self.record(id, stage, LogOutcome::Success, note).await
    }

    pub async fn failed(
        &self,
        id: &KnowledgeId,
        stage: Stage,
        message: &str,
    ) -> Result<ProcessingLogEntry> {
        self.record(id, stage, LogOutcome::Failed, Some(message)).await
    }
}

#[cfg(test)]
mod tests {
    use heritix_storage::NewKnowledge;

    use super::*;
    use crate::testing::temp_storage;

    async fn seeded() -> (AuditLog, Arc<Storage>, KnowledgeId) {
        let storage = temp_storage().await;
        let id = KnowledgeId::new();
        storage
            .insert_record(&NewKnowledge {
                id: id.clone(),
                title: "Rain song".into(),
                contributor: "Anonymous".into(),
                consent: true,
                audio_url: "file:///tmp/rain.mp3".into(),
                original_filename: "rain.mp3".into(),
            })
            .await
            .unwrap();
        (AuditLog::new(storage.clone()), storage, id)
    }

    #[tokio::test]
    async fn entries_keep_write_order() {
        let (audit, storage, id) = seeded().await;
        audit.started(&id, Stage::Extraction).await.unwrap();
        audit
            .success(&id, Stage::Extraction, Some("missing keys: details"))
            .await
            .unwrap();
        audit.started(&id, Stage::Categorization).await.unwrap();
        audit
            .failed(&id, Stage::Categorization, "503 service unavailable")
            .await
            .unwrap();

        let history = storage.logs_chronological(&id).await.unwrap();
        let outcomes: Vec<_> = history.iter().map(|e| (e.stage, e.outcome)).collect();
        assert_eq!(
            outcomes,
            vec![
                (Stage::Extraction, LogOutcome::Started),
                (Stage::Extraction, LogOutcome::Success),
                (Stage::Categorization, LogOutcome::Started),
                (Stage::Categorization, LogOutcome::Failed),
            ]
        );
        assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));
        assert_eq!(history[1].error_message.as_deref(), Some("missing keys: details"));

        let recent = storage.recent_logs(&id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].outcome, LogOutcome::Failed);
        assert_eq!(recent[1].stage, Stage::Categorization);
    }
}
