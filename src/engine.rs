//! Composition root: catalog + session store + metrics.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::device::DeviceUpload;
use crate::error::EngineError;
use crate::metrics::Metrics;
use crate::registry::{InMemorySessionStore, SessionStore};
use crate::session::{QuestionPayload, Session, SessionDocument, Step};

/// Response to starting a session.
#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub session_id: String,
    pub total_assets: usize,
    #[serde(flatten)]
    pub question: QuestionPayload,
}

/// Response to importing a session.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResponse {
    pub session_id: String,
    #[serde(flatten)]
    pub step: Step,
}

pub struct Engine {
    catalog: Arc<Catalog>,
    sessions: Arc<dyn SessionStore>,
    metrics: Mutex<Metrics>,
}

impl Engine {
    pub fn new(catalog: Arc<Catalog>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            catalog,
            sessions,
            metrics: Mutex::new(Metrics::new()),
        }
    }

    /// Engine backed by an [`InMemorySessionStore`].
    pub fn in_memory(catalog: Catalog) -> Self {
        Self::new(Arc::new(catalog), Arc::new(InMemorySessionStore::new()))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn live_sessions(&self) -> usize {
        self.sessions.len().await
    }

    pub async fn metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }

    async fn track<T>(&self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        let mut metrics = self.metrics.lock().await;
        match &result {
            Ok(_) => metrics.record_success(),
            Err(e) => {
                metrics.record_failure();
                warn!(kind = e.kind(), error = %e, "request failed");
            }
        }
        result
    }

    /// Start a new session for an uploaded device.
    pub async fn start_session(&self, upload: DeviceUpload) -> Result<StartResponse, EngineError> {
        let result = self.start_inner(upload).await;
        self.track(result).await
    }

    /// Start a new session from a raw device document.
    pub async fn start_session_from_slice(&self, bytes: &[u8]) -> Result<StartResponse, EngineError> {
        match DeviceUpload::from_slice(bytes) {
            Ok(upload) => self.start_session(upload).await,
            Err(e) => self.track(Err(e)).await,
        }
    }

    async fn start_inner(&self, upload: DeviceUpload) -> Result<StartResponse, EngineError> {
        let device = upload.into_device()?;
        let session = Session::start(Uuid::new_v4().to_string(), device, &self.catalog)?;

        let mut question = match session.current_step(&self.catalog)? {
            Step::Question(q) => q,
            Step::Finished(_) => {
                return Err(EngineError::CorruptState("new session is already finished".into()))
            }
        };
        question.asset_index = Some(0);

        let response = StartResponse {
            session_id: session.session_id.clone(),
            total_assets: session.device.asset_count(),
            question,
        };
        self.sessions.create(session).await?;
        self.metrics.lock().await.sessions_started += 1;
        Ok(response)
    }

    /// Apply an answer to a session's current question.
    pub async fn submit_answer(&self, session_id: &str, answer: bool) -> Result<Step, EngineError> {
        let result = self.answer_inner(session_id, answer).await;
        self.track(result).await
    }

    async fn answer_inner(&self, session_id: &str, answer: bool) -> Result<Step, EngineError> {
        let handle = self.sessions.get(session_id).await?;
        let mut session = handle.lock().await;
        let step = session.apply_answer(&self.catalog, answer)?;
        drop(session);

        let mut metrics = self.metrics.lock().await;
        metrics.answers_applied += 1;
        if step.is_finished() {
            metrics.sessions_finished += 1;
        }
        Ok(step)
    }

    /// Snapshot a session as an export document.
    pub async fn export_session(&self, session_id: &str) -> Result<SessionDocument, EngineError> {
        let result = self.export_inner(session_id).await;
        self.track(result).await
    }

    async fn export_inner(&self, session_id: &str) -> Result<SessionDocument, EngineError> {
        let handle = self.sessions.get(session_id).await?;
        let doc = handle.lock().await.to_document();
        info!(session_id = %session_id, finished = doc.finished, "session exported");
        self.metrics.lock().await.sessions_exported += 1;
        Ok(doc)
    }

    /// Restore a session from an export document, replacing any live session
    /// with the same id.
    pub async fn import_session(&self, doc: SessionDocument) -> Result<ImportResponse, EngineError> {
        let result = self.import_inner(doc).await;
        self.track(result).await
    }

    /// Restore a session from raw export bytes.
    pub async fn import_session_from_slice(&self, bytes: &[u8]) -> Result<ImportResponse, EngineError> {
        match serde_json::from_slice::<SessionDocument>(bytes) {
            Ok(doc) => self.import_session(doc).await,
            Err(e) => {
                let err = EngineError::InvalidInput(format!("invalid session file: {}", e));
                self.track(Err(err)).await
            }
        }
    }

    async fn import_inner(&self, doc: SessionDocument) -> Result<ImportResponse, EngineError> {
        let session = Session::restore(doc, &self.catalog)?;
        let step = session.current_step(&self.catalog)?;
        let session_id = session.session_id.clone();

        self.sessions.put(session).await;
        info!(session_id = %session_id, finished = step.is_finished(), "session imported");
        self.metrics.lock().await.sessions_imported += 1;
        Ok(ImportResponse { session_id, step })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> Engine {
        Engine::in_memory(
            Catalog::from_value(json!({
                "trees": [{"id": "T0", "title": "Only", "root": "q0",
                           "nodes": {"q0": {"true": "r_pass", "false": "r_fail"}}}],
                "results": {"r_pass": {"status": "PASS"}, "r_fail": {"status": "FAIL"}}
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_start_response_shape() {
        let engine = engine();
        let resp = engine
            .start_session_from_slice(br#"{"device_name": "Cam", "assets": [{"id": "a", "name": "Lens"}]}"#)
            .await
            .unwrap();

        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["session_id"], resp.session_id.as_str());
        assert_eq!(value["total_assets"], 1);
        assert_eq!(value["asset_index"], 0);
        assert_eq!(value["finished"], false);
        assert_eq!(value["tree_id"], "T0");
        assert_eq!(engine.metrics().await.sessions_started, 1);
    }

    #[tokio::test]
    async fn test_start_with_empty_catalog_fails() {
        let engine = Engine::in_memory(Catalog::empty());
        let err = engine
            .start_session_from_slice(br#"{"assets": [{"id": "a", "name": "Lens"}]}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let metrics = engine.metrics().await;
        assert_eq!(metrics.requests_failed, 1);
        assert_eq!(metrics.sessions_started, 0);
    }

    #[tokio::test]
    async fn test_answer_unknown_session() {
        let err = engine().submit_answer("nope", true).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_answer_counts_finish() {
        let engine = engine();
        let resp = engine
            .start_session_from_slice(br#"{"assets": [{"id": "a", "name": "Lens"}]}"#)
            .await
            .unwrap();
        let step = engine.submit_answer(&resp.session_id, true).await.unwrap();
        assert!(step.is_finished());

        let metrics = engine.metrics().await;
        assert_eq!(metrics.answers_applied, 1);
        assert_eq!(metrics.sessions_finished, 1);
    }
}
