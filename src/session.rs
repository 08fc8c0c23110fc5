use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::analyzer::LocationAnalyzer;
use crate::error::AppError;
use crate::extraction::analyze_response;
use crate::model::{AnalysisResult, UploadedImage};
use crate::presentation::{AnalysisView, Language};
use crate::reconcile::Reconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppStatus {
    Idle,
    Analyzing,
    Success,
    Error,
}

#[derive(Debug)]
struct SessionState {
    image: Option<UploadedImage>,
    status: AppStatus,
    result: Option<AnalysisResult>,
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: AppStatus,
    pub preview: Option<String>,
    pub mime_type: Option<String>,
    pub error: Option<String>,
    pub result: Option<AnalysisResult>,
    pub view: Option<AnalysisView>,
}

/// The single image/analysis the user is working on. At most one inference
/// request is in flight; the lock is never held across it.
pub struct AnalysisSession {
    state: Mutex<SessionState>,
    reconciler: Reconciler,
    language: Language,
}

impl AnalysisSession {
    pub fn new(reconciler: Reconciler, language: Language) -> Self {
        Self {
            state: Mutex::new(SessionState {
                image: None,
                status: AppStatus::Idle,
                result: None,
                error: None,
            }),
            reconciler,
            language,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, SessionState>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Generic("session state lock poisoned".into()))
    }

    pub fn select_image(&self, image: UploadedImage) -> Result<(), AppError> {
        let mut state = self.state()?;
        if state.status == AppStatus::Analyzing {
            return Err(AppError::Busy);
        }
        log::debug!("New {} image selected, resetting session", image.mime_type);
        state.image = Some(image);
        state.status = AppStatus::Idle;
        state.result = None;
        state.error = None;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), AppError> {
        let mut state = self.state()?;
        if state.status == AppStatus::Analyzing {
            return Err(AppError::Busy);
        }
        log::debug!("Clearing session");
        state.image = None;
        state.status = AppStatus::Idle;
        state.result = None;
        state.error = None;
        Ok(())
    }

    /// Runs one analysis of the current image. A call made while another is
    /// in flight does nothing and reports the in-flight state. Inference
    /// failures are recorded in the session, not returned.
    pub async fn analyze(&self, analyzer: &dyn LocationAnalyzer) -> Result<SessionSnapshot, AppError> {
        let (image, previous) = {
            let mut state = self.state()?;
            if state.status == AppStatus::Analyzing {
                log::debug!("Analysis already in progress, ignoring request");
                return Ok(self.snapshot_of(&state));
            }
            let image = state.image.clone().ok_or(AppError::NoImage)?;
            let previous = state.status;
            state.status = AppStatus::Analyzing;
            state.error = None;
            (image, previous)
        };
        let mut in_flight = InFlight { session: self, previous, finished: false };

        let outcome = analyzer.analyze(&image).await;

        let mut state = self.state()?;
        match outcome {
            Ok(raw) => {
                let result = analyze_response(raw);
                log::info!(
                    "Analysis finished, best guess present: {}",
                    result.best_guess.is_some()
                );
                state.result = Some(result);
                state.status = AppStatus::Success;
            }
            Err(e) => {
                log::error!("Analysis failed: {}", e);
                state.result = None;
                state.error = Some(self.language.strings().analysis_failed.to_string());
                state.status = AppStatus::Error;
            }
        }
        in_flight.finished = true;
        Ok(self.snapshot_of(&state))
    }

    pub fn snapshot(&self) -> Result<SessionSnapshot, AppError> {
        let state = self.state()?;
        Ok(self.snapshot_of(&state))
    }

    fn snapshot_of(&self, state: &SessionState) -> SessionSnapshot {
        SessionSnapshot {
            status: state.status,
            preview: state.image.as_ref().map(|i| i.preview.clone()),
            mime_type: state.image.as_ref().map(|i| i.mime_type.clone()),
            error: state.error.clone(),
            result: state.result.clone(),
            view: state
                .result
                .as_ref()
                .map(|r| AnalysisView::build(r, &self.reconciler, self.language)),
        }
    }
}

/// Releases the gate if an analysis future is dropped before it completes,
/// e.g. when the HTTP client disconnects mid-request.
struct InFlight<'a> {
    session: &'a AnalysisSession,
    previous: AppStatus,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        log::warn!("Analysis abandoned before completion, releasing session");
        if let Ok(mut state) = self.session.state.lock() {
            if state.status == AppStatus::Analyzing {
                state.status = self.previous;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{GroundingReference, RawModelResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    pub(crate) struct CannedAnalyzer {
        pub response: Option<RawModelResponse>,
        pub calls: AtomicUsize,
    }

    impl CannedAnalyzer {
        pub(crate) fn tokyo() -> Self {
            Self {
                response: Some(RawModelResponse {
                    text: "Japan.\n```json\n{\"lat\": 35.6, \"lng\": 139.7, \"locationName\": \"Tokyo\"}\n```"
                        .into(),
                    grounding_references: vec![GroundingReference::Place {
                        uri: Some("https://maps.google.com/@34.0,-118.0,15z".into()),
                        title: "Los Angeles".into(),
                    }],
                }),
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing() -> Self {
            Self { response: None, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl LocationAnalyzer for CannedAnalyzer {
        async fn analyze(&self, _image: &UploadedImage) -> Result<RawModelResponse, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response
                .clone()
                .ok_or_else(|| AppError::Inference("quota exceeded".into()))
        }
    }

    struct GatedAnalyzer {
        started: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LocationAnalyzer for GatedAnalyzer {
        async fn analyze(&self, _image: &UploadedImage) -> Result<RawModelResponse, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            Ok(RawModelResponse { text: "done".into(), grounding_references: vec![] })
        }
    }

    struct StalledAnalyzer {
        started: Notify,
    }

    #[async_trait]
    impl LocationAnalyzer for StalledAnalyzer {
        async fn analyze(&self, _image: &UploadedImage) -> Result<RawModelResponse, AppError> {
            self.started.notify_one();
            std::future::pending().await
        }
    }

    pub(crate) fn image() -> UploadedImage {
        UploadedImage {
            base64: "AAAA".into(),
            mime_type: "image/png".into(),
            preview: "data:image/png;base64,AAAA".into(),
        }
    }

    fn session() -> AnalysisSession {
        AnalysisSession::new(Reconciler::default(), Language::En)
    }

    #[tokio::test]
    async fn analyze_without_image_is_refused_before_any_request() {
        let analyzer = CannedAnalyzer::tokyo();
        let err = session().analyze(&analyzer).await.unwrap_err();
        assert!(matches!(err, AppError::NoImage));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_analysis_exposes_result_and_markers() {
        let session = session();
        session.select_image(image()).unwrap();
        let snap = session.analyze(&CannedAnalyzer::tokyo()).await.unwrap();

        assert_eq!(snap.status, AppStatus::Success);
        let result = snap.result.unwrap();
        assert_eq!(result.display_text, "Japan.");
        let view = snap.view.unwrap();
        assert_eq!(view.markers.len(), 2);
        assert!(view.markers[0].primary);
        assert_eq!(view.markers[0].candidate.title, "Tokyo");
    }

    #[tokio::test]
    async fn failure_shows_generic_message_without_partial_result() {
        let session = session();
        session.select_image(image()).unwrap();
        session.analyze(&CannedAnalyzer::tokyo()).await.unwrap();

        let snap = session.analyze(&CannedAnalyzer::failing()).await.unwrap();
        assert_eq!(snap.status, AppStatus::Error);
        assert!(snap.result.is_none());
        assert!(snap.view.is_none());
        assert_eq!(snap.error.as_deref(), Some(Language::En.strings().analysis_failed));
    }

    #[tokio::test]
    async fn new_image_and_clear_reset_state() {
        let session = session();
        session.select_image(image()).unwrap();
        session.analyze(&CannedAnalyzer::failing()).await.unwrap();

        session.select_image(image()).unwrap();
        let snap = session.snapshot().unwrap();
        assert_eq!(snap.status, AppStatus::Idle);
        assert!(snap.error.is_none());
        assert!(snap.preview.is_some());

        session.clear().unwrap();
        let snap = session.snapshot().unwrap();
        assert!(snap.preview.is_none());
        assert!(snap.result.is_none());
    }

    #[tokio::test]
    async fn resubmission_while_in_flight_is_a_no_op() {
        let session = Arc::new(session());
        session.select_image(image()).unwrap();
        let analyzer = Arc::new(GatedAnalyzer {
            started: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });

        let first = {
            let session = session.clone();
            let analyzer = analyzer.clone();
            tokio::spawn(async move { session.analyze(analyzer.as_ref()).await })
        };
        analyzer.started.notified().await;

        let again = session.analyze(analyzer.as_ref()).await.unwrap();
        assert_eq!(again.status, AppStatus::Analyzing);
        assert!(matches!(session.select_image(image()), Err(AppError::Busy)));
        assert!(matches!(session.clear(), Err(AppError::Busy)));

        analyzer.release.notify_one();
        let done = first.await.unwrap().unwrap();
        assert_eq!(done.status, AppStatus::Success);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_analysis_releases_the_session() {
        let session = Arc::new(session());
        session.select_image(image()).unwrap();
        let analyzer = Arc::new(StalledAnalyzer { started: Notify::new() });

        let task = {
            let session = session.clone();
            let analyzer = analyzer.clone();
            tokio::spawn(async move { session.analyze(analyzer.as_ref()).await })
        };
        analyzer.started.notified().await;
        assert_eq!(session.snapshot().unwrap().status, AppStatus::Analyzing);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let snap = session.snapshot().unwrap();
        assert_eq!(snap.status, AppStatus::Idle);
        assert!(snap.preview.is_some());
        session.select_image(image()).unwrap();
        session.clear().unwrap();
    }
}
