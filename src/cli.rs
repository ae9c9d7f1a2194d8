// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! CLI (C12): `serve` / `run` / `pull` / `remove` / `list` / `show` over a `clap::Parser` /
//! `Subcommand` dispatch.

use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::engine::GenerateOptions;
use crate::orchestrator::{ChatEvent, ChatMessage, Orchestrator};

#[derive(Debug, Parser)]
#[command(name = "myllm", about = "Local LLM runtime server and client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server.
    Serve,
    /// Start an interactive chat REPL against a loaded model.
    Run {
        model: String,
        #[arg(long)]
        system: Option<String>,
        #[arg(long, default_value_t = 0.7)]
        temperature: f32,
    },
    /// Print instructions for obtaining a model's weights (no network transfer is performed).
    Pull { model: String },
    /// Remove a model's directory from the models root.
    Remove {
        model: String,
        #[arg(long)]
        force: bool,
    },
    /// List every model discovered under the models root.
    List,
    /// Show a single model's configuration.
    Show { model: String },
}

pub async fn run_serve(orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let settings = orchestrator.settings().clone();
    let state = crate::api::AppState::new(orchestrator);
    let router = crate::api::build_router(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    tracing::info!(%addr, "starting server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub async fn run_interactive(
    orchestrator: Arc<Orchestrator>,
    model: String,
    system: Option<String>,
    temperature: f32,
) -> anyhow::Result<()> {
    println!("myllm interactive chat with '{model}'. Commands: /exit, /clear, /help");

    let mut session_id: Option<String> = None;
    if let Some(system) = &system {
        println!("(system prompt: {system})");
    }

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();

        match line {
            "" => continue,
            "/exit" => break,
            "/clear" => {
                session_id = None;
                println!("session cleared");
                continue;
            }
            "/help" => {
                println!("/exit quits, /clear starts a new session, /help shows this message");
                continue;
            }
            _ => {}
        }

        let mut messages = Vec::new();
        if session_id.is_none() {
            if let Some(system) = &system {
                messages.push(ChatMessage { role: "system".to_string(), content: system.clone() });
            }
        }
        messages.push(ChatMessage { role: "user".to_string(), content: line.to_string() });

        let options = GenerateOptions { temperature, ..GenerateOptions::default() };
        let (new_session_id, mut rx) =
            orchestrator.chat(&model, messages, session_id.clone(), options).await?;
        session_id = Some(new_session_id);

        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::Token(text) => {
                    print!("{text}");
                    std::io::stdout().flush()?;
                }
                ChatEvent::Done { .. } => {
                    println!();
                    break;
                }
                ChatEvent::Error(err) => {
                    eprintln!("\nerror: {err}");
                    break;
                }
            }
        }
    }

    Ok(())
}

pub fn run_pull(model: &str) {
    println!("myllm does not download model weights automatically.");
    println!("To add '{model}', create this directory layout under your models root:");
    println!();
    println!("  models/{model}/model.gguf");
    println!("  models/{model}/config.json");
    println!();
    println!("Example config.json:");
    println!(
        "{}",
        serde_json::json!({
            "name": model,
            "family": "llama3",
            "quantization": "Q4_K_M",
            "context_size": 8192,
            "template": "llama3",
        })
    );
}

pub fn run_remove(models_dir: &str, model: &str, force: bool) -> anyhow::Result<()> {
    let model_dir = std::path::Path::new(models_dir).join(model);
    if !model_dir.exists() {
        anyhow::bail!("model '{model}' is not registered under {models_dir}");
    }

    if !force {
        print!("remove '{model}' and all its files at {}? [y/N] ", model_dir.display());
        std::io::stdout().flush()?;
        let mut confirm = String::new();
        std::io::stdin().read_line(&mut confirm)?;
        if !confirm.trim().eq_ignore_ascii_case("y") {
            println!("aborted");
            return Ok(());
        }
    }

    std::fs::remove_dir_all(&model_dir)?;
    println!("removed '{model}'");
    Ok(())
}

pub fn run_list(registry: &crate::registry::ModelRegistry) {
    let models = registry.list();
    if models.is_empty() {
        println!("no models registered");
        return;
    }
    for model in models {
        println!(
            "{:<20} family={:<8} ctx={:<6} loaded={}",
            model.config.name, model.config.family, model.config.context_size, model.loaded
        );
    }
}

pub fn run_show(registry: &crate::registry::ModelRegistry, model: &str) -> anyhow::Result<()> {
    let info = registry.get(model)?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
