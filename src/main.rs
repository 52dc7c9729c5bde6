use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use ralph_loop::TaskRegistry;
use ralph_loop::agent::CommandAgentRunner;
use ralph_loop::config::{Config, load_config};
use ralph_loop::domain::{LoopEvent, StartConfig, TaskKey};
use ralph_loop::events::BroadcastEmitter;
use ralph_loop::storage::FileStateStore;
use tokio::sync::broadcast::error::RecvError;

mod cli;

use cli::render::{render_detail, render_event, render_summary};
use cli::{Cli, Commands};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ralph-loop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("ralph-loop.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn build_registry(config: &Config) -> Result<TaskRegistry> {
    let store = FileStateStore::new(&config.storage.state_dir).context("Failed to open state directory")?;
    let emitter = BroadcastEmitter::new(config.events.channel_capacity);
    let runner = CommandAgentRunner::new(config.agent.clone());
    Ok(TaskRegistry::from_config(
        config,
        Arc::new(store),
        Arc::new(runner),
        Arc::new(emitter),
    ))
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    let registry = build_registry(config)?;

    match &cli.command {
        Commands::Run {
            project_id,
            task,
            max_turns,
            worker_model,
            reviewer_model,
        } => {
            let start = StartConfig {
                task_description: task.clone(),
                max_turns: *max_turns,
                worker_model: worker_model.clone(),
                reviewer_model: reviewer_model.clone(),
            };
            handle_run_command(&registry, project_id, start, cli.is_verbose()).await
        }
        Commands::List { project_id } => handle_list_command(&registry, project_id).await,
        Commands::Show { project_id, task_id } => {
            let state = registry.get(project_id, task_id).await?;
            print!("{}", render_detail(&state));
            Ok(())
        }
        Commands::Delete { project_id, task_id } => {
            registry.delete(project_id, task_id).await?;
            println!("{} {}/{}", "Deleted".green(), project_id, task_id);
            Ok(())
        }
        Commands::Recover => {
            let recovered = registry.recover_orphans().await?;
            if recovered.is_empty() {
                println!("{}", "No unfinished loops found".dimmed());
            }
            for state in &recovered {
                println!("{} {}", "Recovered".yellow(), render_summary(state));
            }
            Ok(())
        }
    }
}

async fn handle_run_command(registry: &TaskRegistry, project_id: &str, start: StartConfig, verbose: bool) -> Result<()> {
    let mut events = registry
        .subscribe()
        .ok_or_else(|| eyre::eyre!("event stream unavailable"))?;
    let initial = registry.start(project_id, start).await?;
    let key = initial.key();
    println!("{} {}", "Started".green().bold(), key);

    let follow = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event.task_key() != key {
                        continue;
                    }
                    if let Some(line) = render_event(&event, verbose) {
                        println!("{}", line);
                    }
                    if matches!(event, LoopEvent::Complete { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Event stream lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    tokio::select! {
        _ = follow => {}
        _ = tokio::signal::ctrl_c() => {
            println!("{}", "Stopping...".yellow());
            stop_quietly(registry, &key).await;
        }
    }

    let final_state = registry.wait(&key.project_id, &key.task_id).await?;
    println!();
    print!("{}", render_detail(&final_state));
    Ok(())
}

async fn stop_quietly(registry: &TaskRegistry, key: &TaskKey) {
    if let Err(e) = registry.stop(&key.project_id, &key.task_id).await {
        log::debug!("Stop of {} skipped: {}", key, e);
    }
}

async fn handle_list_command(registry: &TaskRegistry, project_id: &str) -> Result<()> {
    let states = registry.list(project_id).await?;
    if states.is_empty() {
        println!("{}", format!("No loops for project {}", project_id).dimmed());
    }
    for state in &states {
        println!("{}", render_summary(state));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
