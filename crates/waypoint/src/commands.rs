//! Waypoint command implementations

use anyhow::{Context, Result};
use std::future::Future;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use waypoint_a2a::{A2aServer, AgentCard, DelegationBridge, LoopExecutor};
use waypoint_agent::tools::DistanceTool;
use waypoint_agent::{AgentLoop, ContextBuilder, ToolRegistry};
use waypoint_config::{self, Config};
use waypoint_provider::{OllamaProvider, Provider};

/// Write the default config and the instructions template
pub async fn init_command() -> Result<()> {
    println!("◆ Initializing Waypoint...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = waypoint_config::init().await?;
    let data_dir = waypoint_config::data_dir();
    create_template(&data_dir, "INSTRUCTIONS.md", INSTRUCTIONS_MD).await?;

    println!("\n◆ Waypoint initialized");
    println!("\nNext steps:");
    println!("  1. Make sure Ollama is running at {}", config.ollama.base_url);
    println!("     and the model is pulled: ollama pull {}", config.agent.model);
    println!("  2. Start chatting: waypoint chat -m \"How far is Bochum from Hattingen?\"");

    Ok(())
}

async fn create_template(dir: &std::path::Path, filename: &str, content: &str) -> Result<()> {
    let path = dir.join(filename);
    if !path.exists() {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, content).await?;
        info!("◆ Created {}", path.display());
    }
    Ok(())
}

/// Show configuration
pub async fn status_command() -> Result<()> {
    let config_path = waypoint_config::config_path();

    println!("◆ Waypoint Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_path.exists() { "[OK]" } else { "[Missing]" }
    );

    let config = Config::load().await?;
    println!("Agent:     {}", config.agent.name);
    println!("Model:     {}", config.agent.model);
    println!("Backend:   {}", config.ollama.base_url);
    println!("Tool loops: {} per request", config.max_tool_loops());
    println!("Streaming: {}", on_off(config.agent.stream));
    println!("Thinking:  {}", on_off(config.agent.think));
    println!("Timeout:   {}s", config.timeout().as_secs());
    println!("Serves at: {}", config.server_url());
    if config.remotes.is_empty() {
        println!("Remotes:   none");
    } else {
        println!("Remotes:");
        for remote in &config.remotes {
            println!("  - {}", remote);
        }
    }

    Ok(())
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Build an initialized agent with the local tools and every remote skill
async fn build_agent(config: &Config, remotes: &[String]) -> Result<AgentLoop<OllamaProvider>> {
    let provider = OllamaProvider::new(&config.ollama.base_url, &config.agent.model, config.timeout())
        .context("Failed to create the Ollama client")?;

    let mut tools = ToolRegistry::new();
    tools.register(DistanceTool);

    if !remotes.is_empty() {
        let bridge = DelegationBridge::connect(remotes)
            .await
            .context("Failed to connect to remote agents")?;
        let count = bridge.register(&mut tools);
        info!("◆ {} remote skills available", count);
    }

    let prompt = ContextBuilder::new(&config.agent.name)
        .with_workspace(waypoint_config::data_dir())
        .build_system_prompt()
        .await;

    let mut agent = AgentLoop::from_config(config, Arc::new(provider), Arc::new(tools)).with_system_prompt(prompt);

    if !agent.initialize().await {
        warn!("{} is not connected to a model backend", agent.name());
    }

    Ok(agent)
}

/// Chat with the agent
pub async fn chat_command(message: Option<String>, remotes: Vec<String>) -> Result<()> {
    let config = Config::load().await?;

    let all_remotes = merge_remotes(&config.remotes, remotes);
    let mut agent = build_agent(&config, &all_remotes).await?;

    if let Some(msg) = message {
        let response = ask(&mut agent, &msg, tokio::signal::ctrl_c()).await?;
        println!("\n◆ {}", response);
        return Ok(());
    }

    println!("◆ Interactive mode (type 'exit' or press Ctrl-C to quit, Ctrl-C also cancels a running request)");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut lines = spawn_stdin_reader();
    loop {
        print!("◆ ");
        std::io::stdout().flush()?;

        let Some(input) = next_input(&mut lines, tokio::signal::ctrl_c()).await else {
            println!();
            break;
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        match ask(&mut agent, input, tokio::signal::ctrl_c()).await {
            Ok(response) => println!("\n◆ {}: {}\n", agent.name(), response),
            Err(e) => println!("\n✗ {:#}\n", e),
        }
    }

    Ok(())
}

/// Configured remotes followed by extra ones, each URL once, in first-seen order
fn merge_remotes(configured: &[String], extra: Vec<String>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(configured.len() + extra.len());
    for remote in configured.iter().cloned().chain(extra) {
        if !merged.contains(&remote) {
            merged.push(remote);
        }
    }
    merged
}

/// Stdin lines, read on a plain thread so a pending read never holds up shutdown
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Next input line; `None` on end of input or when `interrupt` fires first
async fn next_input<I: Future>(lines: &mut mpsc::UnboundedReceiver<String>, interrupt: I) -> Option<String> {
    tokio::select! {
        biased;
        _ = interrupt => None,
        line = lines.recv() => line,
    }
}

/// One request; when `interrupt` fires the request is aborted and its
/// conversation rolled back
async fn ask<P, I>(agent: &mut AgentLoop<P>, input: &str, interrupt: I) -> Result<String>
where
    P: Provider,
    I: Future,
{
    let abort = agent.abort_handle();
    let request = agent.process_user_input(input);
    tokio::pin!(request);

    tokio::select! {
        biased;
        response = &mut request => return Ok(response?.content),
        _ = interrupt => {
            info!("◆ Interrupted, cancelling the request");
            abort.abort();
        }
    }

    Ok(request.await?.content)
}

/// Host the agent over the remote agent protocol
pub async fn serve_command(port: Option<u16>) -> Result<()> {
    let mut config = Config::load().await?;
    if let Some(port) = port {
        config.server.port = port;
    }

    let agent = build_agent(&config, &merge_remotes(&config.remotes, Vec::new())).await?;
    let card = AgentCard::from_config(&config);
    let executor = Arc::new(LoopExecutor::new(agent));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    A2aServer::new(card, executor)
        .bind(&addr)
        .await
        .with_context(|| format!("Server on {} stopped", addr))?;

    Ok(())
}

const INSTRUCTIONS_MD: &str = r#"# Instructions

Be concise and practical. Prefer tools over guessing when a question needs
coordinates, distances or knowledge another agent has.

## Guidelines

- Answer in the language of the question
- State the unit of every distance
"#;
