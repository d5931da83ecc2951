//! Run command handler.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use weft_core::config::Config;
use weft_core::core::events::{EventSender, TaskEventRx, create_event_channel};
use weft_core::core::orchestrator::Orchestrator;
use weft_core::memory::InMemoryStore;
use weft_core::providers::ScriptedProvider;
use weft_core::tools::ToolRegistry;

pub struct RunOptions<'a> {
    pub session: &'a str,
    pub query: &'a str,
    pub script: &'a Path,
    pub priority: Option<i32>,
    pub events: bool,
    pub config: &'a Config,
}

pub async fn run(options: RunOptions<'_>) -> Result<()> {
    let script = std::fs::read_to_string(options.script)
        .with_context(|| format!("read script {}", options.script.display()))?;
    let provider = Arc::new(ScriptedProvider::from_script(&script));
    let memory = Arc::new(InMemoryStore::new(options.config.memory.capacity));

    let mut orchestrator = Orchestrator::from_config(options.config, provider, memory);
    let printer = if options.events {
        let (tx, rx) = create_event_channel();
        orchestrator = orchestrator.with_events(EventSender::new(tx));
        Some(tokio::spawn(print_events(rx)))
    } else {
        None
    };

    let tools = ToolRegistry::builtins();
    let priority = options
        .priority
        .unwrap_or(options.config.default_priority);
    let result = orchestrator
        .run_task_with_priority(options.session, options.query, &tools, priority)
        .await;

    // Closes the event channel so the printer drains and exits.
    drop(orchestrator);
    if let Some(printer) = printer {
        printer.await.context("event printer")?;
    }

    let final_text = result.with_context(|| format!("run task for session '{}'", options.session))?;
    println!("{final_text}");
    Ok(())
}

async fn print_events(mut rx: TaskEventRx) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&*event) {
            Ok(line) => eprintln!("{line}"),
            Err(err) => tracing::warn!(error = %err, "failed to serialize task event"),
        }
    }
}
