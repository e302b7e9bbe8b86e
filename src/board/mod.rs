//! Mission Board: task and document synchronization back-end.
//!
//! ## Overview
//!
//! Tasks live on a kanban board with three columns. One of several stores is
//! the system of record; a local snapshot file takes over when that store
//! cannot be reached. Documents live in a single collection with a live
//! snapshot feed. A small HTTP server exposes both, plus an inbox for
//! externally submitted tasks and a queue of agent jobs.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!      │                │         │ KvBackend (read-modify-write)          │
//!      │                │         v                                        │
//!      │                │  kv.rs  (KvStore: MemoryKv, FileKv, RestKv)      │
//!      │                └──────────────────────────────────────────────────┘
//!      │
//!      │ TaskSync::mount(backend, local)
//!      v
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  sync.rs  (TaskSync: Loading -> Ready | Degraded)                    │
//! │     │ TaskBackend trait                                              │
//! │     ├─ http.rs        (HttpBackend, pull)                            │
//! │     ├─ kv.rs          (KvBackend, pull)                              │
//! │     ├─ collection.rs  (CollectionBackend, snapshot feed)             │
//! │     └─ local.rs       (LocalStore, fallback snapshot)                │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                            |
//! |-------------|-----------------------------------------------------------|
//! | `models`    | `Task`, `TaskDraft`, `BoardView`, `Document` and drafts   |
//! | `migrate`   | Assignee backfill applied to every loaded task list       |
//! | `backend`   | `TaskBackend` trait, `BackendKind`, `Snapshot`            |
//! | `documents` | `DocumentSync` and the grouped-by-day view                |
//! | `inbox`     | `inbox.json` flat file behind `/api/add-task`             |
//! | `agents`    | `AgentQueue`, `AgentDispatcher`, background processor     |
//! | `ws`        | `WsMessage` enum + `broadcast_message()` helper           |
//!
//! ## Typical Mutation Flow (add a task)
//!
//! 1. `TaskSync::add_task(draft)` validates the title and appends the task to
//!    the in-memory list right away.
//! 2. The task is persisted through the active `TaskBackend`. An unreachable
//!    backend flips the hook into degraded mode.
//! 3. The full list is mirrored to the local snapshot file.
//! 4. On the collection backend the next snapshot from the feed replaces the
//!    list, so the server revision has the last word.

pub mod agents;
pub mod api;
pub mod backend;
pub mod collection;
pub mod documents;
pub mod http;
pub mod inbox;
pub mod kv;
pub mod local;
pub mod migrate;
pub mod models;
pub mod server;
pub mod sync;
pub mod ws;
