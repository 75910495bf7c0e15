//! In-memory evidence store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{EvidenceStore, StoreError};
use crate::domain::{Evidence, EvidenceStatus, EvidenceUpdate, NewEvidence};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    records: BTreeMap<i64, Evidence>,
}

/// Evidence store held in process memory. Each operation is atomic.
#[derive(Debug, Default)]
pub struct MemoryEvidenceStore {
    inner: Mutex<Inner>,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn get_by_id(&self, id: i64) -> Result<Option<Evidence>, StoreError> {
        Ok(self.inner.lock().await.records.get(&id).cloned())
    }

    async fn update(&self, id: i64, update: EvidenceUpdate) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.records.get_mut(&id) {
            Some(evidence) => {
                update.apply_to(evidence);
                evidence.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert(&self, evidence: NewEvidence) -> Result<Evidence, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;

        let now = Utc::now();
        let record = Evidence {
            id: inner.next_id,
            claim_id: evidence.claim_id,
            source: evidence.source,
            excerpt: evidence.excerpt,
            file_path: evidence.file_path,
            status: EvidenceStatus::Pending,
            score: None,
            reason: None,
            created_at: now,
            updated_at: now,
        };
        inner.records.insert(record.id, record.clone());

        Ok(record)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.records.remove(&id).is_some())
    }

    async fn list(&self, claim_id: Option<i64>) -> Result<Vec<Evidence>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .rev()
            .filter(|e| claim_id.map_or(true, |c| e.claim_id == c))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_starts_pending() {
        let store = MemoryEvidenceStore::new();
        let ev = store
            .insert(NewEvidence::text(1, "Journal of X", "excerpt"))
            .await
            .unwrap();

        assert_eq!(ev.id, 1);
        assert_eq!(ev.status, EvidenceStatus::Pending);
        assert_eq!(ev.score, None);
        assert_eq!(store.get_by_id(ev.id).await.unwrap(), Some(ev));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = MemoryEvidenceStore::new();
        let updated = store.update(99, EvidenceUpdate::running()).await.unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_list_newest_first_by_claim() {
        let store = MemoryEvidenceStore::new();
        store.insert(NewEvidence::text(1, "a", "a")).await.unwrap();
        store.insert(NewEvidence::text(2, "b", "b")).await.unwrap();
        store.insert(NewEvidence::text(1, "c", "c")).await.unwrap();

        let all = store.list(None).await.unwrap();
        assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 2, 1]);

        let claim1 = store.list(Some(1)).await.unwrap();
        assert_eq!(claim1.len(), 2);
        assert!(claim1.iter().all(|e| e.claim_id == 1));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryEvidenceStore::new();
        let ev = store.insert(NewEvidence::text(1, "a", "a")).await.unwrap();

        assert!(store.delete(ev.id).await.unwrap());
        assert!(!store.delete(ev.id).await.unwrap());
        assert!(store.is_empty().await);
    }
}
