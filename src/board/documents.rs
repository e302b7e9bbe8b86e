//! Document synchronization over the document collection, plus the
//! grouped-by-day view.

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{Datelike, Local, NaiveDate, TimeZone, Utc, Weekday};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::backend::Snapshot;
use super::collection::Collection;
use super::models::{Document, DocumentDraft, DocumentPatch};
use crate::errors::SyncError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatus {
    pub loading: bool,
    pub error: Option<String>,
    pub revision: u64,
    pub document_count: usize,
}

struct DocumentState {
    documents: Vec<Document>,
    loading: bool,
    error: Option<String>,
    revision: u64,
}

pub struct DocumentSync {
    collection: Arc<Collection<Document>>,
    state: Arc<RwLock<DocumentState>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl DocumentSync {
    pub fn mount(collection: Arc<Collection<Document>>) -> Self {
        let mut feed = collection.subscribe();
        let initial = feed.borrow_and_update().clone();
        let state = Arc::new(RwLock::new(DocumentState {
            documents: Vec::new(),
            loading: true,
            error: None,
            revision: 0,
        }));
        apply(&mut write(&state), initial);

        let listener_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            while feed.changed().await.is_ok() {
                let snapshot = feed.borrow_and_update().clone();
                apply(&mut write(&listener_state), snapshot);
            }
            tracing::warn!("Document snapshot feed closed");
            write(&listener_state).error = Some("Failed to subscribe to documents".into());
        });

        Self {
            collection,
            state,
            listener: Mutex::new(Some(handle)),
        }
    }

    /// All documents, newest first.
    pub fn documents(&self) -> Vec<Document> {
        self.read_state().documents.clone()
    }

    pub fn status(&self) -> DocumentStatus {
        let state = self.read_state();
        DocumentStatus {
            loading: state.loading,
            error: state.error.clone(),
            revision: state.revision,
            document_count: state.documents.len(),
        }
    }

    pub fn grouped_by_day(&self, today: NaiveDate) -> Vec<DayGroup> {
        group_by_day(&self.read_state().documents, today)
    }

    pub async fn create_document(&self, draft: DocumentDraft) -> Result<Document, SyncError> {
        let document = draft.into_document(Utc::now())?;
        let stored = self
            .collection
            .upsert(document)
            .inspect_err(|e| self.record_error("create", e))?;
        self.catch_up();
        Ok(stored)
    }

    pub async fn update_document(
        &self,
        id: &str,
        patch: DocumentPatch,
    ) -> Result<Document, SyncError> {
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(SyncError::Validation("Document title cannot be empty".into()));
        }
        let updated = self
            .collection
            .update(id, |doc| doc.apply_patch(&patch))
            .inspect_err(|e| self.record_error("update", e))?
            .ok_or_else(|| SyncError::document_not_found(id))?;
        self.catch_up();
        Ok(updated)
    }

    /// Delete by id. Absent ids are a no-op.
    pub async fn delete_document(&self, id: &str) -> Result<(), SyncError> {
        self.collection
            .remove(id)
            .inspect_err(|e| self.record_error("delete", e))?;
        self.catch_up();
        Ok(())
    }

    /// Read one document straight from the collection.
    pub async fn get_document_by_id(&self, id: &str) -> Result<Option<Document>, SyncError> {
        Ok(self.collection.get(id)?)
    }

    /// Re-read the collection and clear any recorded error.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let snapshot = self.collection.snapshot();
        let mut state = self.write_state();
        state.revision = snapshot.revision;
        state.documents = sorted_newest_first(snapshot.items);
        state.loading = false;
        state.error = None;
        Ok(())
    }

    pub fn close(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Apply the collection's latest snapshot now instead of waiting for
    /// the listener, so a caller reads its own write.
    fn catch_up(&self) {
        let snapshot = self.collection.snapshot();
        apply(&mut self.write_state(), snapshot);
    }

    fn record_error(&self, op: &str, err: &crate::errors::BackendError) {
        tracing::warn!(op, error = %err, "Document write failed");
        self.write_state().error = Some(format!("Failed to {} document: {}", op, err));
    }

    fn read_state(&self) -> RwLockReadGuard<'_, DocumentState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, DocumentState> {
        write(&self.state)
    }
}

impl Drop for DocumentSync {
    fn drop(&mut self) {
        self.close();
    }
}

fn write(state: &RwLock<DocumentState>) -> RwLockWriteGuard<'_, DocumentState> {
    state.write().unwrap_or_else(PoisonError::into_inner)
}

fn apply(state: &mut DocumentState, snapshot: Snapshot<Document>) {
    state.loading = false;
    if snapshot.revision < state.revision {
        return;
    }
    state.revision = snapshot.revision;
    state.documents = sorted_newest_first(snapshot.items);
    state.error = None;
}

fn sorted_newest_first(mut docs: Vec<Document>) -> Vec<Document> {
    docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    docs
}

// ── Grouping by day ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DayGroup {
    pub label: String,
    pub date: NaiveDate,
    pub documents: Vec<Document>,
}

/// Bucket documents by local creation date, newest day first. Documents
/// inside a bucket are newest first. The input is left untouched.
pub fn group_by_day(docs: &[Document], today: NaiveDate) -> Vec<DayGroup> {
    group_by_day_in(docs, today, &Local)
}

/// [`group_by_day`] with the calendar day taken in `tz`.
pub fn group_by_day_in<Tz: TimeZone>(docs: &[Document], today: NaiveDate, tz: &Tz) -> Vec<DayGroup> {
    let mut sorted: Vec<&Document> = docs.iter().collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut groups: Vec<DayGroup> = Vec::new();
    for doc in sorted {
        let date = doc.created_at.with_timezone(tz).date_naive();
        match groups.last_mut() {
            Some(group) if group.date == date => group.documents.push(doc.clone()),
            _ => groups.push(DayGroup {
                label: day_label(date, today),
                date,
                documents: vec![doc.clone()],
            }),
        }
    }
    groups
}

/// "Hoy", "Ayer", or a weekday and date such as "lunes 12 de octubre".
pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        return "Hoy".to_string();
    }
    if today.pred_opt() == Some(date) {
        return "Ayer".to_string();
    }
    format!(
        "{} {} de {}",
        weekday_name(date.weekday()),
        date.day(),
        month_name(date.month())
    )
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "lunes",
        Weekday::Tue => "martes",
        Weekday::Wed => "miércoles",
        Weekday::Thu => "jueves",
        Weekday::Fri => "viernes",
        Weekday::Sat => "sábado",
        Weekday::Sun => "domingo",
    }
}

fn month_name(month: u32) -> &'static str {
    const MONTHS: [&str; 12] = [
        "enero",
        "febrero",
        "marzo",
        "abril",
        "mayo",
        "junio",
        "julio",
        "agosto",
        "septiembre",
        "octubre",
        "noviembre",
        "diciembre",
    ];
    MONTHS
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::DocumentType;
    use chrono::Duration;

    fn doc_at(title: &str, created: chrono::DateTime<Utc>) -> Document {
        let mut d = DocumentDraft::titled(title).into_document(created).unwrap();
        d.id = title.to_string();
        d
    }

    #[test]
    fn test_group_by_day_labels_and_order() {
        let now = Utc.with_ymd_and_hms(2024, 10, 17, 15, 0, 0).unwrap();
        let today = now.date_naive();
        let docs = vec![
            doc_at("old", now - Duration::days(5)),
            doc_at("today", now),
            doc_at("yesterday", now - Duration::days(1)),
        ];
        let snapshot = docs.clone();

        let groups = group_by_day_in(&docs, today, &Utc);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].label, "Hoy");
        assert_eq!(groups[1].label, "Ayer");
        assert_eq!(groups[2].label, "sábado 12 de octubre");
        assert!(groups[0].date > groups[1].date && groups[1].date > groups[2].date);
        assert_eq!(groups[2].documents[0].title, "old");
        assert_eq!(docs, snapshot);
    }

    #[test]
    fn test_same_day_documents_share_a_group() {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let docs = vec![
            doc_at("morning", now - Duration::hours(4)),
            doc_at("noon", now),
        ];
        let groups = group_by_day_in(&docs, now.date_naive(), &Utc);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].documents[0].title, "noon");
        assert_eq!(groups[0].documents[1].title, "morning");
    }

    #[test]
    fn test_group_by_day_empty() {
        assert!(group_by_day(&[], Utc::now().date_naive()).is_empty());
    }

    #[test]
    fn test_day_label_month_names() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let label = day_label(NaiveDate::from_ymd_opt(2023, 12, 25).unwrap(), today);
        assert_eq!(label, "lunes 25 de diciembre");
    }

    #[tokio::test]
    async fn test_create_then_read_back() {
        let sync = DocumentSync::mount(Arc::new(Collection::new_in_memory()));
        assert!(!sync.status().loading);
        let created = sync
            .create_document(DocumentDraft {
                title: Some("Weekly news".into()),
                doc_type: Some(DocumentType::News),
                ..DocumentDraft::default()
            })
            .await
            .unwrap();
        assert_eq!(sync.documents().len(), 1);
        assert!(created.tags.is_empty());
        let fetched = sync.get_document_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.doc_type, DocumentType::News);
    }

    #[tokio::test]
    async fn test_update_unknown_document_is_not_found() {
        let sync = DocumentSync::mount(Arc::new(Collection::new_in_memory()));
        let err = sync
            .update_document("missing", DocumentPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_stamps_updated_at() {
        let sync = DocumentSync::mount(Arc::new(Collection::new_in_memory()));
        let created = sync
            .create_document(DocumentDraft::titled("Draft"))
            .await
            .unwrap();
        let updated = sync
            .update_document(
                &created.id,
                DocumentPatch {
                    content: Some("body".into()),
                    ..DocumentPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.content, "body");
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_delete_missing_document_is_noop() {
        let sync = DocumentSync::mount(Arc::new(Collection::new_in_memory()));
        sync.create_document(DocumentDraft::titled("keep"))
            .await
            .unwrap();
        sync.delete_document("missing").await.unwrap();
        assert_eq!(sync.documents().len(), 1);
    }

    #[tokio::test]
    async fn test_documents_sorted_newest_first() {
        let collection = Arc::new(Collection::new_in_memory());
        let now = Utc::now();
        collection
            .upsert(doc_at("older", now - Duration::days(2)))
            .unwrap();
        collection.upsert(doc_at("newer", now)).unwrap();
        let sync = DocumentSync::mount(collection);
        let titles: Vec<String> = sync.documents().into_iter().map(|d| d.title).collect();
        assert_eq!(titles, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn test_external_writes_are_pushed() {
        let collection = Arc::new(Collection::new_in_memory());
        let sync = DocumentSync::mount(Arc::clone(&collection));
        collection.upsert(doc_at("remote", Utc::now())).unwrap();
        for _ in 0..100 {
            if sync.documents().len() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(sync.documents().len(), 1);
    }
}
