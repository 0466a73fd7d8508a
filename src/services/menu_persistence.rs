use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::services::response_sanitizer::MenuItemCandidate;

/// Single-row insert seam implemented by the menu item repository; stubbed
/// in tests to exercise partial-failure reporting.
#[async_trait]
pub trait MenuItemWriter: Send + Sync {
    async fn insert_menu_item(&self, restaurant_id: i64, item: &str, info: &str) -> AppResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub item: String,
    pub inserted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct PersistReport {
    pub inserted: usize,
    pub errors: usize,
    pub outcomes: Vec<RecordOutcome>,
}

/// Writes each candidate independently. A failed insert is recorded in the
/// report and the batch moves on; nothing here retries or rolls back.
pub async fn persist_candidates<W: MenuItemWriter + ?Sized>(
    writer: &W,
    restaurant_id: i64,
    candidates: &[MenuItemCandidate],
) -> PersistReport {
    let mut report = PersistReport::default();

    for (index, candidate) in candidates.iter().enumerate() {
        debug!(
            "Inserting menu item {}/{}: \"{}\"",
            index + 1,
            candidates.len(),
            candidate.item
        );

        match writer
            .insert_menu_item(restaurant_id, &candidate.item, &candidate.info)
            .await
        {
            Ok(()) => {
                report.inserted += 1;
                report.outcomes.push(RecordOutcome {
                    item: candidate.item.clone(),
                    inserted: true,
                    error: None,
                });
            }
            Err(e) => {
                error!("Failed to insert menu item \"{}\": {}", candidate.item, e);
                report.errors += 1;
                report.outcomes.push(RecordOutcome {
                    item: candidate.item.clone(),
                    inserted: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every call whose 1-based sequence number is in `fail_on`.
    struct FlakyWriter {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    impl FlakyWriter {
        fn new(fail_on: Vec<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on,
            }
        }
    }

    #[async_trait]
    impl MenuItemWriter for FlakyWriter {
        async fn insert_menu_item(&self, _restaurant_id: i64, item: &str, _info: &str) -> AppResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&call) {
                Err(AppError::Database(format!("duplicate key for \"{}\"", item)))
            } else {
                Ok(())
            }
        }
    }

    fn candidates(count: usize) -> Vec<MenuItemCandidate> {
        (1..=count)
            .map(|i| MenuItemCandidate {
                item: format!("Item {}", i),
                info: format!("{} cal", i * 100),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failed_record_does_not_abort_batch() {
        let writer = FlakyWriter::new(vec![3]);
        let report = persist_candidates(&writer, 7, &candidates(5)).await;

        assert_eq!(report.inserted, 4);
        assert_eq!(report.errors, 1);
        assert_eq!(report.outcomes.len(), 5);

        let failed = &report.outcomes[2];
        assert_eq!(failed.item, "Item 3");
        assert!(!failed.inserted);
        assert!(failed.error.as_deref().unwrap().contains("duplicate key"));

        // Every other record was still attempted and succeeded
        for outcome in report.outcomes.iter().filter(|o| o.item != "Item 3") {
            assert!(outcome.inserted);
            assert!(outcome.error.is_none());
        }
    }

    #[tokio::test]
    async fn test_all_records_failing_is_reported_not_fatal() {
        let writer = FlakyWriter::new(vec![1, 2, 3]);
        let report = persist_candidates(&writer, 7, &candidates(3)).await;

        assert_eq!(report.inserted, 0);
        assert_eq!(report.errors, 3);
        assert_eq!(report.outcomes.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_produces_empty_report() {
        let writer = FlakyWriter::new(vec![]);
        let report = persist_candidates(&writer, 7, &[]).await;

        assert_eq!(report.inserted, 0);
        assert_eq!(report.errors, 0);
        assert!(report.outcomes.is_empty());
        assert_eq!(writer.calls.load(Ordering::SeqCst), 0);
    }
}
