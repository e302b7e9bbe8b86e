//! Backward-compatible decoding of persisted task lists.
//!
//! Older snapshots stored tasks without an `assignee`, and the oldest ones
//! stored a map of per-person buckets (`{ "jose": [...], "orbit": [...] }`)
//! instead of a flat array. Every load path (local snapshot, key-value store,
//! HTTP responses) runs its raw JSON through [`migrate_tasks`] so the rest of
//! the crate only ever sees well-formed [`Task`] values.

use serde_json::{Map, Value};

use super::models::{Assignee, Task};

/// Backfill a missing, null, or empty `assignee` with `fallback`.
///
/// Returns true when the object was changed. Re-applying is a no-op.
pub fn backfill_assignee(entry: &mut Map<String, Value>, fallback: Assignee) -> bool {
    let needs_fill = match entry.get("assignee") {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    };
    if needs_fill {
        entry.insert(
            "assignee".to_string(),
            Value::String(fallback.as_str().to_string()),
        );
    }
    needs_fill
}

/// Decode a raw persisted task list, applying the assignee migration once.
///
/// Entries that cannot be repaired (not an object, no id, empty title, or an
/// unknown enum value) are dropped and logged; the rest are kept in order.
pub fn migrate_tasks(raw: Value) -> Vec<Task> {
    let entries: Vec<(Value, Assignee)> = match raw {
        Value::Array(items) => items.into_iter().map(|v| (v, Assignee::None)).collect(),
        Value::Object(buckets) => {
            // Legacy per-assignee layout.
            let mut out = Vec::new();
            for (owner, items) in buckets {
                let fallback = owner.parse::<Assignee>().unwrap_or_default();
                match items {
                    Value::Array(items) => out.extend(items.into_iter().map(|v| (v, fallback))),
                    other => {
                        tracing::warn!(bucket = %owner, kind = %json_kind(&other), "Skipping non-array task bucket");
                    }
                }
            }
            out
        }
        Value::Null => Vec::new(),
        other => {
            tracing::warn!(kind = %json_kind(&other), "Persisted task list is not an array, starting empty");
            Vec::new()
        }
    };

    let mut tasks = Vec::with_capacity(entries.len());
    for (mut value, fallback) in entries {
        let Some(obj) = value.as_object_mut() else {
            tracing::warn!(kind = %json_kind(&value), "Dropping non-object task entry");
            continue;
        };
        backfill_assignee(obj, fallback);
        match serde_json::from_value::<Task>(value) {
            Ok(task) if !task.id.trim().is_empty() && !task.title.trim().is_empty() => {
                tasks.push(task)
            }
            Ok(task) => {
                tracing::warn!(id = %task.id, "Dropping task with empty id or title");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unreadable task entry");
            }
        }
    }
    tasks
}

/// Raw entries of a stored task list, for read-modify-write cycles.
///
/// Nothing is dropped here: object entries get the assignee backfill and
/// everything else passes through untouched, so writing the list back keeps
/// records this crate cannot decode. Returns `None` when the stored value has
/// no list shape (a scalar, or a bucket that is not an array).
pub fn raw_entries(raw: Value) -> Option<Vec<Value>> {
    match raw {
        Value::Null => Some(Vec::new()),
        Value::Array(items) => Some(
            items
                .into_iter()
                .map(|v| backfilled(v, Assignee::None))
                .collect(),
        ),
        Value::Object(buckets) => {
            let mut out = Vec::new();
            for (owner, items) in buckets {
                let Value::Array(items) = items else {
                    return None;
                };
                let fallback = owner.parse::<Assignee>().unwrap_or_default();
                out.extend(items.into_iter().map(|v| backfilled(v, fallback)));
            }
            Some(out)
        }
        _ => None,
    }
}

fn backfilled(mut value: Value, fallback: Assignee) -> Value {
    if let Some(obj) = value.as_object_mut() {
        backfill_assignee(obj, fallback);
    }
    value
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_assignee_is_backfilled() {
        let raw = json!([
            {"id": "1", "title": "Old task", "priority": "High", "status": "Done"},
            {"id": "2", "title": "Null assignee", "assignee": null},
            {"id": "3", "title": "Empty assignee", "assignee": ""},
            {"id": "4", "title": "Assigned", "assignee": "jose"}
        ]);
        let tasks = migrate_tasks(raw);
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[0].assignee, Assignee::None);
        assert_eq!(tasks[1].assignee, Assignee::None);
        assert_eq!(tasks[2].assignee, Assignee::None);
        assert_eq!(tasks[3].assignee, Assignee::Jose);
    }

    #[test]
    fn test_migration_is_idempotent() {
        let raw = json!([
            {"id": "1", "title": "a"},
            {"id": "2", "title": "b", "assignee": "orbit"}
        ]);
        let once = migrate_tasks(raw);
        let twice = migrate_tasks(serde_json::to_value(&once).unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_raw_entries_keep_unreadable_items() {
        let raw = json!([
            {"id": "1", "title": "ok"},
            {"id": "2", "title": "odd", "priority": "urgent"},
            "not an object"
        ]);
        let entries = raw_entries(raw).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["assignee"], "none");
        assert_eq!(entries[1]["priority"], "urgent");
        assert_eq!(entries[2], "not an object");
    }

    #[test]
    fn test_raw_entries_flatten_buckets() {
        let raw = json!({"orbit": [{"id": "1", "title": "Scan"}]});
        let entries = raw_entries(raw).unwrap();
        assert_eq!(entries[0]["assignee"], "orbit");

        assert!(raw_entries(json!({"orbit": "oops"})).is_none());
        assert!(raw_entries(json!(42)).is_none());
        assert_eq!(raw_entries(Value::Null), Some(Vec::new()));
    }

    #[test]
    fn test_backfill_reports_change_once() {
        let mut obj = json!({"id": "1", "title": "a"}).as_object().unwrap().clone();
        assert!(backfill_assignee(&mut obj, Assignee::None));
        assert!(!backfill_assignee(&mut obj, Assignee::None));
        assert_eq!(obj["assignee"], "none");
    }

    #[test]
    fn test_legacy_bucket_layout() {
        let raw = json!({
            "jose": [{"id": "1", "title": "Call vendor"}],
            "orbit": [{"id": "2", "title": "Summarize news", "assignee": "jose"}]
        });
        let mut tasks = migrate_tasks(raw);
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(tasks[0].assignee, Assignee::Jose);
        // An explicit assignee wins over the bucket it was stored in.
        assert_eq!(tasks[1].assignee, Assignee::Jose);
    }

    #[test]
    fn test_unrepairable_entries_are_dropped() {
        let raw = json!([
            {"id": "1", "title": "ok"},
            {"id": "", "title": "no id"},
            {"id": "3", "title": "   "},
            {"id": "4", "title": "bad enum", "priority": "Urgent"},
            42,
            {"title": "missing id"}
        ]);
        let tasks = migrate_tasks(raw);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "1");
    }

    #[test]
    fn test_non_array_yields_empty() {
        assert!(migrate_tasks(json!("garbage")).is_empty());
        assert!(migrate_tasks(Value::Null).is_empty());
    }
}
