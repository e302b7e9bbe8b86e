use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::errors::SyncError;

// ── Task enums ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    #[default]
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "To Do")]
    ToDo,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Done")]
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [Self::ToDo, Self::InProgress, Self::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToDo => "To Do",
            Self::InProgress => "In Progress",
            Self::Done => "Done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "todo" => Ok(Self::ToDo),
            "inprogress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Assignee {
    Jose,
    Orbit,
    #[default]
    None,
}

impl Assignee {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jose => "jose",
            Self::Orbit => "orbit",
            Self::None => "none",
        }
    }

    /// Display name shown on task cards.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Jose => "Jose",
            Self::Orbit => "ORBIT",
            Self::None => "Sin asignar",
        }
    }
}

impl FromStr for Assignee {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jose" => Ok(Self::Jose),
            "orbit" => Ok(Self::Orbit),
            "none" | "" => Ok(Self::None),
            _ => Err(format!("Invalid assignee: {}", s)),
        }
    }
}

// ── Task ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub assignee: Assignee,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Merge the fields present in `draft` over this task. The id never changes.
    pub fn apply(&mut self, draft: &TaskDraft) {
        if let Some(title) = &draft.title {
            self.title = title.clone();
        }
        if let Some(description) = &draft.description {
            self.description = description.clone();
        }
        if let Some(priority) = draft.priority {
            self.priority = priority;
        }
        if let Some(status) = draft.status {
            self.status = status;
        }
        if let Some(assignee) = draft.assignee {
            self.assignee = assignee;
        }
        if let Some(due_date) = &draft.due_date {
            self.due_date = due_date.clone();
        }
    }
}

impl From<&Task> for TaskDraft {
    /// Every field present, so a merge replaces the whole task. A missing due
    /// date serializes as an explicit `null` and clears the stored one.
    fn from(task: &Task) -> Self {
        Self {
            id: Some(task.id.clone()),
            title: Some(task.title.clone()),
            description: Some(task.description.clone()),
            priority: Some(task.priority),
            status: Some(task.status),
            assignee: Some(task.assignee),
            due_date: Some(task.due_date.clone()),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial task as submitted by a user or an API client.
///
/// Every field is optional so the same shape serves creation (title
/// required, checked by [`TaskDraft::into_task`]) and merge updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Assignee>,
    /// `Some(None)` clears the due date on merge.
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<String>>,
}

impl TaskDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Build a full task, filling enum defaults and assigning a fresh id when
    /// the draft carries none.
    pub fn into_task(self) -> Result<Task, SyncError> {
        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::Validation("Task title is required".into()))?;
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_id);
        Ok(Task {
            id,
            title,
            description: self.description.unwrap_or_default(),
            priority: self.priority.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            assignee: self.assignee.unwrap_or_default(),
            due_date: self.due_date.flatten(),
            created_at: None,
            updated_at: None,
        })
    }
}

/// Millisecond timestamp plus a random suffix, so two ids minted in the same
/// millisecond still differ.
pub fn generate_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

// ── Board view ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardColumn {
    pub title: String,
    pub status: TaskStatus,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub columns: Vec<BoardColumn>,
}

impl BoardView {
    /// Group tasks into the three status columns, keeping input order inside
    /// each column.
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let columns = TaskStatus::ALL
            .iter()
            .map(|status| BoardColumn {
                title: status.as_str().to_string(),
                status: *status,
                tasks: tasks
                    .iter()
                    .filter(|t| t.status == *status)
                    .cloned()
                    .collect(),
            })
            .collect();
        Self { columns }
    }

    pub fn column(&self, status: TaskStatus) -> Option<&BoardColumn> {
        self.columns.iter().find(|c| c.status == status)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assignee: Option<Assignee>,
    pub priority: Option<Priority>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| task.status == s)
            && self.assignee.is_none_or(|a| task.assignee == a)
            && self.priority.is_none_or(|p| task.priority == p)
    }

    pub fn apply<'a>(&self, tasks: &'a [Task]) -> Vec<&'a Task> {
        tasks.iter().filter(|t| self.matches(t)).collect()
    }
}

// ── Documents ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    News,
    Reports,
    Content,
    Proposals,
    Memory,
    #[default]
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::News => "news",
            Self::Reports => "reports",
            Self::Content => "content",
            Self::Proposals => "proposals",
            Self::Memory => "memory",
            Self::Other => "other",
        }
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "news" => Ok(Self::News),
            "reports" => Ok(Self::Reports),
            "content" => Ok(Self::Content),
            "proposals" => Ok(Self::Proposals),
            "memory" => Ok(Self::Memory),
            "other" => Ok(Self::Other),
            _ => Err(format!("Invalid document type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub doc_type: DocumentType,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn apply_patch(&mut self, patch: &DocumentPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(doc_type) = patch.doc_type {
            self.doc_type = doc_type;
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDraft {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "type", default)]
    pub doc_type: Option<DocumentType>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl DocumentDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn into_document(self, now: DateTime<Utc>) -> Result<Document, SyncError> {
        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::Validation("Document title is required".into()))?;
        Ok(Document {
            id: generate_id(),
            title,
            content: self.content.unwrap_or_default(),
            doc_type: self.doc_type.unwrap_or_default(),
            category: self.category.unwrap_or_default(),
            tags: self.tags.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "type", default)]
    pub doc_type: Option<DocumentType>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn task(id: &str, status: TaskStatus) -> Task {
        let mut t = TaskDraft::titled(format!("task {}", id)).into_task().unwrap();
        t.id = id.to_string();
        t.status = status;
        t
    }

    #[test]
    fn test_task_wire_format() {
        let t = TaskDraft {
            title: Some("Deploy".into()),
            status: Some(TaskStatus::InProgress),
            priority: Some(Priority::High),
            assignee: Some(Assignee::Orbit),
            ..TaskDraft::default()
        }
        .into_task()
        .unwrap();
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["status"], "In Progress");
        assert_eq!(json["priority"], "High");
        assert_eq!(json["assignee"], "orbit");
        assert!(json.get("createdAt").is_none());
        assert!(json.get("dueDate").is_none());
    }

    #[test]
    fn test_draft_fills_defaults() {
        let t = TaskDraft::titled("X").into_task().unwrap();
        assert_eq!(t.title, "X");
        assert_eq!(t.priority, Priority::Low);
        assert_eq!(t.status, TaskStatus::ToDo);
        assert_eq!(t.assignee, Assignee::None);
        assert!(!t.id.is_empty());
    }

    #[test]
    fn test_draft_rejects_blank_title() {
        let err = TaskDraft::titled("   ").into_task().unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        let err = TaskDraft::default().into_task().unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_draft_keeps_supplied_id() {
        let draft = TaskDraft {
            id: Some("abc".into()),
            ..TaskDraft::titled("X")
        };
        assert_eq!(draft.into_task().unwrap().id, "abc");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: std::collections::HashSet<String> = (0..500).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_status_from_str_variants() {
        assert_eq!(TaskStatus::from_str("To Do").unwrap(), TaskStatus::ToDo);
        assert_eq!(TaskStatus::from_str("todo").unwrap(), TaskStatus::ToDo);
        assert_eq!(
            TaskStatus::from_str("in_progress").unwrap(),
            TaskStatus::InProgress
        );
        assert_eq!(
            TaskStatus::from_str("In Progress").unwrap(),
            TaskStatus::InProgress
        );
        assert_eq!(TaskStatus::from_str("DONE").unwrap(), TaskStatus::Done);
        assert!(TaskStatus::from_str("blocked").is_err());
    }

    #[test]
    fn test_apply_merges_present_fields_only() {
        let mut t = TaskDraft::titled("Original").into_task().unwrap();
        let id = t.id.clone();
        t.apply(&TaskDraft {
            id: Some("ignored".into()),
            status: Some(TaskStatus::Done),
            ..TaskDraft::default()
        });
        assert_eq!(t.id, id);
        assert_eq!(t.title, "Original");
        assert_eq!(t.status, TaskStatus::Done);
    }

    #[test]
    fn test_full_task_draft_clears_due_date() {
        let mut stored = TaskDraft {
            due_date: Some(Some("2024-10-31".into())),
            ..TaskDraft::titled("Renew domain")
        }
        .into_task()
        .unwrap();
        let mut edited = stored.clone();
        edited.due_date = None;

        let wire = serde_json::to_value(TaskDraft::from(&edited)).unwrap();
        assert_eq!(wire["dueDate"], Value::Null);
        let draft: TaskDraft = serde_json::from_value(wire).unwrap();
        assert_eq!(draft.due_date, Some(None));

        stored.apply(&draft);
        assert_eq!(stored.due_date, None);
    }

    #[test]
    fn test_absent_due_date_leaves_stored_value() {
        let mut stored = TaskDraft {
            due_date: Some(Some("2024-10-31".into())),
            ..TaskDraft::titled("Renew domain")
        }
        .into_task()
        .unwrap();
        let draft: TaskDraft = serde_json::from_value(json!({"status": "Done"})).unwrap();
        assert_eq!(draft.due_date, None);
        stored.apply(&draft);
        assert_eq!(stored.due_date.as_deref(), Some("2024-10-31"));
    }

    #[test]
    fn test_null_description_decodes_as_empty() {
        let task: Task =
            serde_json::from_value(json!({"id": "1", "title": "t", "description": null}))
                .unwrap();
        assert_eq!(task.description, "");
    }

    #[test]
    fn test_board_groups_by_status_preserving_order() {
        let tasks = vec![
            task("1", TaskStatus::Done),
            task("2", TaskStatus::ToDo),
            task("3", TaskStatus::Done),
            task("4", TaskStatus::InProgress),
        ];
        let board = BoardView::from_tasks(&tasks);
        assert_eq!(board.columns.len(), 3);
        assert_eq!(board.columns[0].title, "To Do");
        let done: Vec<&str> = board
            .column(TaskStatus::Done)
            .unwrap()
            .tasks
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(done, vec!["1", "3"]);
    }

    #[test]
    fn test_filter_matches() {
        let mut a = task("1", TaskStatus::ToDo);
        a.assignee = Assignee::Jose;
        let b = task("2", TaskStatus::ToDo);
        let tasks = vec![a, b];
        let filter = TaskFilter {
            assignee: Some(Assignee::Jose),
            ..TaskFilter::default()
        };
        let hits = filter.apply(&tasks);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");
        assert_eq!(TaskFilter::default().apply(&tasks).len(), 2);
    }

    #[test]
    fn test_document_draft_tags_default_to_empty() {
        let doc = DocumentDraft::titled("Weekly report")
            .into_document(Utc::now())
            .unwrap();
        assert!(doc.tags.is_empty());
        assert_eq!(doc.doc_type, DocumentType::Other);
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["tags"].is_array());
        assert_eq!(json["type"], "other");
    }

    #[test]
    fn test_document_patch() {
        let mut doc = DocumentDraft::titled("Draft").into_document(Utc::now()).unwrap();
        doc.apply_patch(&DocumentPatch {
            tags: Some(vec!["ai".into()]),
            doc_type: Some(DocumentType::News),
            ..DocumentPatch::default()
        });
        assert_eq!(doc.title, "Draft");
        assert_eq!(doc.tags, vec!["ai".to_string()]);
        assert_eq!(doc.doc_type, DocumentType::News);
    }
}
