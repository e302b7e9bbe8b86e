//! Task commands: `mission-board tasks list|add|move|delete`.

use std::sync::Arc;

use anyhow::{Context, Result};

use mission_board::board::backend::{BackendKind, TaskBackend};
use mission_board::board::collection::{Collection, CollectionBackend};
use mission_board::board::http::HttpBackend;
use mission_board::board::kv::KvBackend;
use mission_board::board::local::LocalStore;
use mission_board::board::models::{Priority, Task, TaskDraft, TaskFilter};
use mission_board::board::server::ServerConfig;
use mission_board::board::sync::TaskSync;
use mission_board::config::BoardConfig;

use super::super::TasksCommands;

/// Collection file used by the `collection` backend from the CLI.
pub const TASKS_COLLECTION_FILE: &str = "tasks-collection.json";

fn open_backend(config: &BoardConfig, kind: BackendKind) -> Result<Arc<dyn TaskBackend>> {
    let data_dir = config.data_dir();
    Ok(match kind {
        BackendKind::Http => Arc::new(HttpBackend::new(&config.toml.sync.server_url)),
        BackendKind::Kv => {
            let store = ServerConfig::from_config(config).kv_store()?;
            Arc::new(KvBackend::new(store, config.toml.storage.tasks_key.as_str()))
        }
        BackendKind::Collection => Arc::new(CollectionBackend::new(Arc::new(Collection::open(
            &data_dir.join(TASKS_COLLECTION_FILE),
        )))),
        BackendKind::Local => Arc::new(LocalStore::in_dir(data_dir)),
    })
}

pub async fn cmd_tasks(
    config: &BoardConfig,
    backend: Option<BackendKind>,
    command: TasksCommands,
) -> Result<()> {
    let kind = backend.unwrap_or(config.toml.sync.backend);
    std::fs::create_dir_all(config.data_dir()).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.data_dir().display()
        )
    })?;

    let sync = TaskSync::mount(
        open_backend(config, kind)?,
        LocalStore::in_dir(config.data_dir()),
    )
    .await;
    if let Some(error) = sync.status().error {
        eprintln!("{} {}", console::style("⚠").yellow(), error);
    }

    let result = run(&sync, command).await;
    sync.close();
    result
}

async fn run(sync: &TaskSync, command: TasksCommands) -> Result<()> {
    match command {
        TasksCommands::List {
            status,
            assignee,
            priority,
            json,
        } => {
            let filter = TaskFilter {
                status,
                assignee,
                priority,
            };
            let tasks = sync.tasks();
            if json {
                let matching: Vec<&Task> = filter.apply(&tasks);
                println!("{}", serde_json::to_string_pretty(&matching)?);
                return Ok(());
            }
            print_board(sync, &filter);
        }
        TasksCommands::Add {
            title,
            description,
            priority,
            status,
            assignee,
            due,
        } => {
            let task = sync
                .add_task(TaskDraft {
                    id: None,
                    title: Some(title),
                    description,
                    priority,
                    status,
                    assignee,
                    due_date: due.map(Some),
                })
                .await?;
            println!(
                "{} {} {}",
                console::style("Created").green().bold(),
                task.id,
                task.title
            );
            warn_on_persist_error(sync);
        }
        TasksCommands::Move { id, status } => {
            let mut task = find(sync, &id)?;
            task.apply(&TaskDraft {
                status: Some(status),
                ..TaskDraft::default()
            });
            let task = sync.update_task(task).await?;
            println!(
                "{} {} → {}",
                console::style("Moved").green().bold(),
                task.title,
                task.status.as_str()
            );
            warn_on_persist_error(sync);
        }
        TasksCommands::Delete { id } => {
            let existed = sync.tasks().iter().any(|t| t.id == id);
            sync.delete_task(&id).await?;
            if existed {
                println!("{} {}", console::style("Deleted").green().bold(), id);
                warn_on_persist_error(sync);
            } else {
                println!("No task with id {}", id);
            }
        }
    }
    Ok(())
}

fn find(sync: &TaskSync, id: &str) -> Result<Task> {
    sync.tasks()
        .into_iter()
        .find(|t| t.id == id)
        .with_context(|| format!("Task {} not found", id))
}

fn warn_on_persist_error(sync: &TaskSync) {
    let status = sync.status();
    if !status.degraded
        && let Some(error) = status.error
    {
        eprintln!("{} {}", console::style("⚠").yellow(), error);
    }
}

fn print_board(sync: &TaskSync, filter: &TaskFilter) {
    let status = sync.status();
    println!(
        "{} ({} backend, {} tasks)",
        console::style("Mission Board").bold().cyan(),
        status.backend,
        status.task_count
    );

    for column in sync.board().columns {
        if filter.status.is_some_and(|s| s != column.status) {
            continue;
        }
        let tasks: Vec<&Task> = filter.apply(&column.tasks);
        println!();
        println!(
            "{} {}",
            console::style(&column.title).bold(),
            console::style(format!("({})", tasks.len())).dim()
        );
        for task in tasks {
            let priority = console::style(task.priority.as_str());
            let priority = match task.priority {
                Priority::High => priority.red(),
                Priority::Medium => priority.yellow(),
                Priority::Low => priority.dim(),
            };
            println!(
                "  {} [{}] {} {}",
                console::style(&task.id).dim(),
                priority,
                task.title,
                console::style(format!("@{}", task.assignee.display_name())).dim()
            );
        }
    }
}
