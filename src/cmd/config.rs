//! Configuration view and validation commands: `mission-board config`.

use anyhow::Result;

use mission_board::config::{
    BoardConfig, BoardToml, ENV_API_SECRET, ENV_KV_REST_TOKEN, ENV_KV_REST_URL,
};

use super::super::ConfigCommands;

fn set_or_missing(value: bool) -> console::StyledObject<&'static str> {
    if value {
        console::style("set").green()
    } else {
        console::style("not set").dim()
    }
}

pub fn cmd_config(config: &BoardConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &config.config_path;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("{}", console::style("Mission Board Configuration").bold().cyan());
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No board.toml found at {}", config_path.display());
                println!("Run 'mission-board config init' to create one.");
            }
            println!();

            // Effective values, after env and CLI overrides.
            let toml = &config.toml;
            println!("[server]");
            println!("  host = \"{}\"", toml.server.host);
            println!("  port = {}", toml.server.port);
            println!("  dev = {}", toml.server.dev);
            println!();
            println!("[storage]");
            println!("  data_dir = \"{}\"", toml.storage.data_dir.display());
            println!("  kv = \"{}\"", toml.storage.kv);
            println!("  tasks_key = \"{}\"", toml.storage.tasks_key);
            println!();
            println!("[sync]");
            println!("  backend = \"{}\"", toml.sync.backend);
            println!("  server_url = \"{}\"", toml.sync.server_url);
            println!();
            println!("[agents]");
            println!("  poll_interval_secs = {}", toml.agents.poll_interval_secs);
            println!();
            println!("Secrets (environment only):");
            println!(
                "  {} {}",
                ENV_API_SECRET,
                set_or_missing(config.secrets.api_secret.is_some())
            );
            println!(
                "  {} {}",
                ENV_KV_REST_URL,
                set_or_missing(config.secrets.kv_rest_url.is_some())
            );
            println!(
                "  {} {}",
                ENV_KV_REST_TOKEN,
                set_or_missing(config.secrets.kv_rest_token.is_some())
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("board.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            BoardToml::default().save(config_path)?;

            println!("Created board.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, dev");
            println!("  - [storage] data_dir, kv, tasks_key");
            println!("  - [sync] backend, server_url");
            println!("  - [agents] poll_interval_secs");
            println!();
            println!("Secrets go in the environment or .env, never in board.toml.");
            println!();
        }
    }

    Ok(())
}
