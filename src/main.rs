// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Binary entrypoint: parse CLI args, load settings, wire the composition root, dispatch.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use myllm::cache::ModelCache;
use myllm::cli::{Cli, Commands};
use myllm::config::Settings;
use myllm::orchestrator::Orchestrator;
use myllm::registry::ModelRegistry;
use myllm::session::SessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(None)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = Arc::new(ModelRegistry::new(settings.models_dir.as_str()));
    registry.scan()?;

    let backend = Arc::new(llama_cpp_2::llama_backend::LlamaBackend::init()?);
    let cache = Arc::new(ModelCache::new(
        settings.max_loaded_models,
        registry.clone(),
        backend,
        settings.default_n_gpu_layers,
        num_cpus(),
    )?);
    let sessions = Arc::new(SessionStore::open(&settings.db_path)?);

    let orchestrator = Arc::new(Orchestrator::new(registry.clone(), cache, sessions, settings.clone()));

    match cli.command {
        Commands::Serve => myllm::cli::run_serve(orchestrator).await?,
        Commands::Run { model, system, temperature } => {
            myllm::cli::run_interactive(orchestrator, model, system, temperature).await?
        }
        Commands::Pull { model } => myllm::cli::run_pull(&model),
        Commands::Remove { model, force } => {
            myllm::cli::run_remove(&settings.models_dir, &model, force)?
        }
        Commands::List => myllm::cli::run_list(&registry),
        Commands::Show { model } => myllm::cli::run_show(&registry, &model)?,
    }

    Ok(())
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism().map(|n| n.get() as i32).unwrap_or(4)
}
