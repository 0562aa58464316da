//! CLI command handlers.

use std::io::Write;
use std::sync::Arc;

use crate::agent::{AgentClient, HttpAgentClient};
use crate::config::{try_parse_duration, EventideConfig};
use crate::orchestrator::{OrchestratorSettings, TurnOrchestrator, TurnStatus};
use crate::reducer::{ToolCallRecord, TurnProjection};
use crate::session::{FileSessionBackend, HttpSessionBackend, SessionBackend, SessionStore};
use crate::stream::HttpEventStreamClient;
use crate::types::{AgentRef, Role};

use super::{ChatArgs, Cli, SessionCommands};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Resolve configuration, applying command-line overrides.
pub fn load_config(cli: &Cli) -> Result<EventideConfig, Box<dyn std::error::Error>> {
    let mut config = EventideConfig::load()?;
    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
    }
    Ok(config)
}

/// Session store backed by the data directory, or by the server with `--remote`.
pub async fn open_store(config: &EventideConfig, remote: bool) -> Result<SessionStore, Box<dyn std::error::Error>> {
    let backend: Arc<dyn SessionBackend> = if remote {
        Arc::new(HttpSessionBackend::new(config)?)
    } else {
        Arc::new(FileSessionBackend::in_data_dir(&config.data_dir))
    };
    let store = SessionStore::new()
        .with_ttl(config.session_ttl)
        .with_backend(backend);
    store.restore().await;
    Ok(store)
}

/// Handle `eventide agents`.
pub async fn handle_agents(config: &EventideConfig) -> CliResult {
    let client = HttpAgentClient::new(config)?;
    let agents = client.list_agents().await?;
    if agents.is_empty() {
        println!("No agents found.");
        return Ok(());
    }
    for agent in agents {
        println!("{:<32} {:<16} {}", agent.name, agent.namespace, agent.status);
    }
    Ok(())
}

/// Handle `eventide chat`.
pub async fn handle_chat(config: EventideConfig, remote: bool, args: ChatArgs) -> CliResult {
    let mut config = config;
    if let Some(timeout) = &args.timeout {
        let limit = try_parse_duration(timeout)
            .ok_or_else(|| format!("Invalid timeout '{timeout}'. Use e.g. 30s, 5m"))?;
        config.turn_timeout = Some(limit);
    }

    let store = open_store(&config, remote).await?;
    let agent = AgentRef::new(args.agent, args.namespace);
    let orchestrator = TurnOrchestrator::new(
        Arc::new(HttpAgentClient::new(&config)?),
        Arc::new(HttpEventStreamClient::new(&config)?),
        store,
        OrchestratorSettings::from_config(&config, Some(agent)),
    );
    if let Some(session_id) = &args.session {
        orchestrator.select_session(session_id)?;
    }

    let mut snapshots = orchestrator.watch_snapshot();
    let handle = orchestrator.send(args.prompt).await?;
    let session_id = handle.session_id().to_string();
    let mut printer = DeltaPrinter::new(args.show_tools);

    let pending = handle.wait();
    tokio::pin!(pending);
    let result = loop {
        tokio::select! {
            result = &mut pending => break result,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break pending.await;
                }
                if let Some(projection) = &snapshots.borrow_and_update().projection {
                    printer.update(projection);
                }
            }
        }
    };

    // The final text may differ from what streamed (output fallback).
    if let Some(message) = &result.message {
        printer.finish(&message.content);
    }
    println!();
    eprintln!("session: {session_id}");

    match result.status {
        TurnStatus::Completed => Ok(()),
        TurnStatus::Incomplete => {
            eprintln!("warning: stream ended without a terminal event");
            Ok(())
        }
        TurnStatus::Failed => Err(result.error.unwrap_or_else(|| "turn failed".into()).into()),
        TurnStatus::Canceled => Err("turn canceled".into()),
    }
}

/// Handle `eventide sessions ...`.
pub async fn handle_sessions(config: &EventideConfig, remote: bool, command: SessionCommands) -> CliResult {
    let store = open_store(config, remote).await?;
    match command {
        SessionCommands::List => {
            let summaries = store.summaries();
            if summaries.is_empty() {
                println!("No sessions.");
            }
            for s in summaries {
                let valid = if store.is_valid(&s.session_id) { "" } else { " (expired)" };
                println!(
                    "{}  {:<24} {:>3} msgs  {}{}",
                    s.session_id,
                    s.agent.to_string(),
                    s.message_count,
                    s.title,
                    valid
                );
            }
        }
        SessionCommands::Show(args) => {
            let session = store
                .get(&args.session_id)
                .ok_or_else(|| format!("Session not found: {}", args.session_id))?;
            println!("{}  {} ({})", session.session_id, session.title, session.agent);
            if let Some(thread) = &session.thread_id {
                println!("thread: {thread}");
            }
            for message in &session.messages {
                let who = match message.role {
                    Role::User => "you",
                    Role::Assistant => "agent",
                };
                println!("\n[{who}] {}", message.content);
                if !message.events.is_empty() {
                    println!("  ({} events)", message.events.len());
                }
            }
        }
        SessionCommands::Delete(args) => {
            if store.delete(&args.session_id).await {
                println!("Deleted {}", args.session_id);
            } else {
                return Err(format!("Session not found: {}", args.session_id).into());
            }
        }
    }
    Ok(())
}

/// Prints streamed text incrementally.
struct DeltaPrinter {
    printed: String,
    resolved_tools: usize,
    show_tools: bool,
}

impl DeltaPrinter {
    fn new(show_tools: bool) -> Self {
        Self {
            printed: String::new(),
            resolved_tools: 0,
            show_tools,
        }
    }

    fn update(&mut self, projection: &TurnProjection) {
        if self.show_tools {
            let resolved: Vec<&ToolCallRecord> = projection
                .tool_calls
                .iter()
                .filter(|call| !call.is_pending())
                .collect();
            for call in resolved.iter().skip(self.resolved_tools) {
                eprintln!("\n[tool] {} -> {}", call.tool_name, preview(call));
            }
            self.resolved_tools = resolved.len();
        }
        self.emit(&projection.partial_text);
    }

    fn finish(&mut self, content: &str) {
        self.emit(content);
    }

    fn emit(&mut self, text: &str) {
        let Some(rest) = text.strip_prefix(self.printed.as_str()) else {
            return;
        };
        if !rest.is_empty() {
            print!("{rest}");
            let _ = std::io::stdout().flush();
            self.printed = text.to_string();
        }
    }
}

fn preview(call: &ToolCallRecord) -> String {
    let output = call
        .result
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_default();
    match output.char_indices().nth(200) {
        Some((end, _)) => format!("{}...", &output[..end]),
        None => output,
    }
}
