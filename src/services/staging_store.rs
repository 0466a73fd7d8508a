use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One uploaded menu PDF waiting to be processed.
#[derive(Debug, Clone)]
pub struct StagedDocument {
    pub file_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
    pub size: usize,
    pub staged_at: DateTime<Utc>,
}

impl StagedDocument {
    pub fn new(file_name: String, mime_type: String, content: Vec<u8>) -> Self {
        let size = content.len();
        Self {
            file_name,
            mime_type,
            content,
            size,
            staged_at: Utc::now(),
        }
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.staged_at
    }

    /// A document whose age has reached the window is already stale. The
    /// store never evicts on its own; callers check this before use.
    pub fn is_expired_at(&self, now: DateTime<Utc>, freshness_window: Duration) -> bool {
        self.age_at(now) >= freshness_window
    }
}

/// Holds at most one staged document per restaurant. A new upload for the
/// same restaurant replaces the previous one (last writer wins).
#[derive(Clone)]
pub struct StagingStore {
    slots: Arc<DashMap<i64, StagedDocument>>,
    freshness_window: Duration,
}

impl StagingStore {
    pub fn new(freshness_window: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            freshness_window,
        }
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    pub fn put(&self, restaurant_id: i64, document: StagedDocument) {
        info!(
            restaurant_id,
            file_name = %document.file_name,
            size = document.size,
            staged_at = %document.staged_at,
            "menu_document_staged"
        );
        self.slots.insert(restaurant_id, document);
    }

    pub fn get(&self, restaurant_id: i64) -> Option<StagedDocument> {
        self.slots.get(&restaurant_id).map(|entry| entry.value().clone())
    }

    pub fn clear(&self, restaurant_id: i64) {
        if self.slots.remove(&restaurant_id).is_some() {
            debug!(restaurant_id, "menu_document_cleared");
        }
    }
}
