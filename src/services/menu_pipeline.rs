use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use chrono::Utc;
use log::{error, info};
use std::time::Instant;

use crate::clients::gemini_client::{ExtractionError, MenuExtractor};
use crate::error::ErrorResponse;
use crate::services::menu_persistence::{persist_candidates, MenuItemWriter, RecordOutcome};
use crate::services::response_sanitizer::{parse_menu_items, SanitizeError};
use crate::services::staging_store::StagingStore;

/// Result of one processing run, returned to the trigger endpoint.
#[derive(Debug)]
pub struct ProcessingSummary {
    pub total: usize,
    pub inserted: usize,
    pub errors: usize,
    pub outcomes: Vec<RecordOutcome>,
    pub elapsed_seconds: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Gemini API key is not configured")]
    ServiceUnconfigured,
    #[error("no staged menu document found; upload a PDF first")]
    NoDocument,
    #[error("staged menu document has expired; upload the PDF again")]
    DocumentExpired,
    #[error("Gemini rate limit still exceeded after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },
    #[error("menu extraction failed: {0}")]
    Extraction(String),
    #[error("could not parse extraction output: {reason}")]
    MalformedExtraction {
        reason: String,
        raw_excerpt: String,
        cleaned_excerpt: String,
    },
}

impl PipelineError {
    pub fn error_type(&self) -> &'static str {
        match self {
            PipelineError::ServiceUnconfigured => "service_unconfigured",
            PipelineError::NoDocument => "no_document",
            PipelineError::DocumentExpired => "document_expired",
            PipelineError::RateLimitExhausted { .. } => "rate_limit_exhausted",
            PipelineError::Extraction(_) => "extraction_failed",
            PipelineError::MalformedExtraction { .. } => "malformed_extraction",
        }
    }
}

impl From<ExtractionError> for PipelineError {
    fn from(error: ExtractionError) -> Self {
        match error {
            ExtractionError::Unconfigured => PipelineError::ServiceUnconfigured,
            ExtractionError::RateLimitExhausted { attempts } => {
                PipelineError::RateLimitExhausted { attempts }
            }
            ExtractionError::Service(msg) => PipelineError::Extraction(msg),
        }
    }
}

impl From<SanitizeError> for PipelineError {
    fn from(error: SanitizeError) -> Self {
        match error {
            SanitizeError::Malformed {
                reason,
                raw_excerpt,
                cleaned_excerpt,
            } => PipelineError::MalformedExtraction {
                reason,
                raw_excerpt,
                cleaned_excerpt,
            },
        }
    }
}

impl ResponseError for PipelineError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_response = ErrorResponse {
            code: status_code.as_u16(),
            message: self.to_string(),
            error_type: self.error_type().to_string(),
        };

        HttpResponse::build(status_code).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::ServiceUnconfigured => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::NoDocument => StatusCode::BAD_REQUEST,
            PipelineError::DocumentExpired => StatusCode::BAD_REQUEST,
            PipelineError::RateLimitExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::Extraction(_) => StatusCode::BAD_GATEWAY,
            PipelineError::MalformedExtraction { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Sequences one processing run: preflight, fetch, extract, sanitize,
/// persist, finalize. The staging slot is cleared on every terminal outcome
/// except a preflight failure, which never reads the slot.
pub struct MenuPipeline<E, W> {
    staging: StagingStore,
    extractor: Option<E>,
    writer: W,
}

impl<E: MenuExtractor, W: MenuItemWriter> MenuPipeline<E, W> {
    pub fn new(staging: StagingStore, extractor: Option<E>, writer: W) -> Self {
        Self {
            staging,
            extractor,
            writer,
        }
    }

    pub async fn run(&self, restaurant_id: i64) -> Result<ProcessingSummary, PipelineError> {
        let started = Instant::now();

        // Preflight: no credential means no run, and the staged document
        // stays put for a retry once configuration is fixed.
        let Some(extractor) = self.extractor.as_ref() else {
            error!("Menu processing rejected: Gemini API key is not configured");
            return Err(PipelineError::ServiceUnconfigured);
        };

        // Fetch
        let Some(document) = self.staging.get(restaurant_id) else {
            return Err(PipelineError::NoDocument);
        };

        if document.is_expired_at(Utc::now(), self.staging.freshness_window()) {
            info!(
                "Staged document \"{}\" for restaurant {} has expired, clearing slot",
                document.file_name, restaurant_id
            );
            self.staging.clear(restaurant_id);
            return Err(PipelineError::DocumentExpired);
        }

        // Extract
        let raw = match extractor.extract_menu(&document).await {
            Ok(raw) => raw,
            Err(e) => {
                self.staging.clear(restaurant_id);
                return Err(e.into());
            }
        };

        // Sanitize
        let candidates = match parse_menu_items(&raw) {
            Ok(candidates) => candidates,
            Err(e) => {
                if let SanitizeError::Malformed {
                    raw_excerpt,
                    cleaned_excerpt,
                    ..
                } = &e
                {
                    error!(
                        "Extraction output unparseable. Raw: {:?} | Cleaned: {:?}",
                        raw_excerpt, cleaned_excerpt
                    );
                }
                self.staging.clear(restaurant_id);
                return Err(e.into());
            }
        };

        // Persist
        let report = persist_candidates(&self.writer, restaurant_id, &candidates).await;

        // Finalize
        self.staging.clear(restaurant_id);

        let summary = ProcessingSummary {
            total: candidates.len(),
            inserted: report.inserted,
            errors: report.errors,
            outcomes: report.outcomes,
            elapsed_seconds: started.elapsed().as_secs_f64(),
        };

        info!(
            "Menu processing complete for restaurant {}: {} inserted, {} errors out of {} items in {:.2}s",
            restaurant_id, summary.inserted, summary.errors, summary.total, summary.elapsed_seconds
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use crate::services::staging_store::StagedDocument;
    use async_trait::async_trait;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedExtractor {
        response: String,
    }

    #[async_trait]
    impl MenuExtractor for FixedExtractor {
        async fn extract_menu(&self, _document: &StagedDocument) -> Result<String, ExtractionError> {
            Ok(self.response.clone())
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl MenuExtractor for FailingExtractor {
        async fn extract_menu(&self, _document: &StagedDocument) -> Result<String, ExtractionError> {
            Err(ExtractionError::RateLimitExhausted { attempts: 3 })
        }
    }

    #[derive(Default)]
    struct CollectingWriter {
        rows: Mutex<Vec<(i64, String, String)>>,
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    #[async_trait]
    impl MenuItemWriter for CollectingWriter {
        async fn insert_menu_item(&self, restaurant_id: i64, item: &str, info: &str) -> AppResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&call) {
                return Err(AppError::Database("insert rejected".to_string()));
            }
            self.rows
                .lock()
                .unwrap()
                .push((restaurant_id, item.to_string(), info.to_string()));
            Ok(())
        }
    }

    fn staged_pdf() -> StagedDocument {
        StagedDocument::new(
            "menu.pdf".to_string(),
            "application/pdf".to_string(),
            b"%PDF-1.4 menu".to_vec(),
        )
    }

    fn store() -> StagingStore {
        StagingStore::new(Duration::seconds(300))
    }

    const TACO_RESPONSE: &str = "```json\n[{\"item\":\"Taco\",\"info\":\"300 cal, contains dairy\"}]\n```";

    #[tokio::test]
    async fn test_run_processes_staged_document_end_to_end() {
        let staging = store();
        staging.put(7, staged_pdf());

        let pipeline = MenuPipeline::new(
            staging.clone(),
            Some(FixedExtractor {
                response: TACO_RESPONSE.to_string(),
            }),
            CollectingWriter::default(),
        );

        let summary = pipeline.run(7).await.unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.outcomes.len(), 1);
        assert!(summary.outcomes[0].inserted);
        assert_eq!(summary.outcomes[0].item, "Taco");
        assert!(summary.elapsed_seconds >= 0.0);

        // The staging slot is empty after a completed run
        assert!(staging.get(7).is_none());

        let rows = pipeline.writer.rows.lock().unwrap();
        assert_eq!(
            rows.as_slice(),
            &[(7, "Taco".to_string(), "300 cal, contains dairy".to_string())]
        );
    }

    #[tokio::test]
    async fn test_second_run_without_upload_reports_no_document() {
        let staging = store();
        staging.put(7, staged_pdf());

        let pipeline = MenuPipeline::new(
            staging,
            Some(FixedExtractor {
                response: TACO_RESPONSE.to_string(),
            }),
            CollectingWriter::default(),
        );

        assert!(pipeline.run(7).await.is_ok());
        assert!(matches!(
            pipeline.run(7).await,
            Err(PipelineError::NoDocument)
        ));
    }

    #[tokio::test]
    async fn test_expired_document_is_cleared_and_rejected() {
        let staging = store();
        let mut document = staged_pdf();
        document.staged_at = Utc::now() - Duration::seconds(301);
        staging.put(7, document);

        let pipeline = MenuPipeline::new(
            staging.clone(),
            Some(FixedExtractor {
                response: TACO_RESPONSE.to_string(),
            }),
            CollectingWriter::default(),
        );

        assert!(matches!(
            pipeline.run(7).await,
            Err(PipelineError::DocumentExpired)
        ));
        assert!(staging.get(7).is_none());
    }

    #[tokio::test]
    async fn test_preflight_failure_leaves_staging_untouched() {
        let staging = store();
        staging.put(7, staged_pdf());

        let pipeline: MenuPipeline<FixedExtractor, CollectingWriter> =
            MenuPipeline::new(staging.clone(), None, CollectingWriter::default());

        assert!(matches!(
            pipeline.run(7).await,
            Err(PipelineError::ServiceUnconfigured)
        ));

        // Document survives for a retry once the key is configured
        assert!(staging.get(7).is_some());
    }

    #[tokio::test]
    async fn test_extraction_failure_clears_staging() {
        let staging = store();
        staging.put(7, staged_pdf());

        let pipeline = MenuPipeline::new(
            staging.clone(),
            Some(FailingExtractor),
            CollectingWriter::default(),
        );

        assert!(matches!(
            pipeline.run(7).await,
            Err(PipelineError::RateLimitExhausted { attempts: 3 })
        ));
        assert!(staging.get(7).is_none());
    }

    #[tokio::test]
    async fn test_malformed_extraction_clears_staging() {
        let staging = store();
        staging.put(7, staged_pdf());

        let pipeline = MenuPipeline::new(
            staging.clone(),
            Some(FixedExtractor {
                response: "I'm sorry, that PDF was unreadable.".to_string(),
            }),
            CollectingWriter::default(),
        );

        match pipeline.run(7).await {
            Err(PipelineError::MalformedExtraction { raw_excerpt, .. }) => {
                assert!(raw_excerpt.contains("unreadable"));
            }
            other => panic!("expected MalformedExtraction, got {:?}", other),
        }
        assert!(staging.get(7).is_none());
    }

    #[tokio::test]
    async fn test_partial_persistence_failure_is_a_completed_run() {
        let staging = store();
        staging.put(7, staged_pdf());

        let response = serde_json::to_string(
            &(1..=5)
                .map(|i| serde_json::json!({ "item": format!("Item {}", i), "info": "100 cal" }))
                .collect::<Vec<_>>(),
        )
        .unwrap();

        let writer = CollectingWriter {
            fail_on: vec![3],
            ..CollectingWriter::default()
        };

        let pipeline = MenuPipeline::new(
            staging.clone(),
            Some(FixedExtractor { response }),
            writer,
        );

        let summary = pipeline.run(7).await.unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.inserted, 4);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.outcomes.len(), 5);
        assert!(staging.get(7).is_none());
    }

    #[test]
    fn test_error_kinds_map_to_statuses() {
        use actix_web::http::StatusCode;

        let cases = [
            (PipelineError::ServiceUnconfigured, StatusCode::INTERNAL_SERVER_ERROR, "service_unconfigured"),
            (PipelineError::NoDocument, StatusCode::BAD_REQUEST, "no_document"),
            (PipelineError::DocumentExpired, StatusCode::BAD_REQUEST, "document_expired"),
            (PipelineError::RateLimitExhausted { attempts: 3 }, StatusCode::TOO_MANY_REQUESTS, "rate_limit_exhausted"),
            (PipelineError::Extraction("boom".to_string()), StatusCode::BAD_GATEWAY, "extraction_failed"),
            (
                PipelineError::MalformedExtraction {
                    reason: "not json".to_string(),
                    raw_excerpt: String::new(),
                    cleaned_excerpt: String::new(),
                },
                StatusCode::BAD_GATEWAY,
                "malformed_extraction",
            ),
        ];

        for (error, status, kind) in cases {
            assert_eq!(error.status_code(), status);
            assert_eq!(error.error_type(), kind);
        }
    }
}
