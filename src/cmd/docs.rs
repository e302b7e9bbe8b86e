//! Document commands: `mission-board docs list|add`.

use std::sync::Arc;

use anyhow::Result;
use chrono::Local;

use mission_board::board::collection::Collection;
use mission_board::board::documents::DocumentSync;
use mission_board::board::models::DocumentDraft;
use mission_board::board::server::DOCUMENTS_FILE;
use mission_board::config::BoardConfig;

use super::super::DocsCommands;

pub async fn cmd_docs(config: &BoardConfig, command: DocsCommands) -> Result<()> {
    let collection = Arc::new(Collection::open(&config.data_dir().join(DOCUMENTS_FILE)));
    let docs = DocumentSync::mount(collection);

    let result = run(&docs, command).await;
    docs.close();
    result
}

async fn run(docs: &DocumentSync, command: DocsCommands) -> Result<()> {
    match command {
        DocsCommands::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&docs.documents())?);
                return Ok(());
            }
            let groups = docs.grouped_by_day(Local::now().date_naive());
            if groups.is_empty() {
                println!("No documents yet.");
            }
            for group in groups {
                println!("{}", console::style(&group.label).bold().cyan());
                for doc in &group.documents {
                    println!(
                        "  {} {} {}",
                        console::style(&doc.id).dim(),
                        doc.title,
                        console::style(format!("[{}]", doc.doc_type.as_str())).dim()
                    );
                }
                println!();
            }
        }
        DocsCommands::Add {
            title,
            content,
            doc_type,
            category,
            tags,
        } => {
            let doc = docs
                .create_document(DocumentDraft {
                    title: Some(title),
                    content,
                    doc_type,
                    category,
                    tags: Some(tags),
                })
                .await?;
            println!(
                "{} {} {}",
                console::style("Created").green().bold(),
                doc.id,
                doc.title
            );
        }
    }
    Ok(())
}
