mod face;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use page_saboteur::pages::page_source;
use page_saboteur::{AgentRunner, Frame, HttpBrain, PageController, RunnerConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agent", about = "Adversarial agent for a sandboxed page")]
struct Args {
    /// HTML file to sabotage. A built-in checkout page is used otherwise.
    #[arg(long, env = "AGENT_PAGE")]
    page: Option<PathBuf>,

    /// Collaborator endpoint receiving each turn.
    #[arg(long, env = "AGENT_ENDPOINT", default_value = "http://127.0.0.1:8787/api/agent")]
    endpoint: String,

    #[arg(long, env = "AGENT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Iterations per objective when the console does not say.
    #[arg(long, env = "AGENT_ITERATIONS", default_value_t = 3)]
    iterations: usize,

    /// First console port tried; the next nine are fallbacks.
    #[arg(long, env = "AGENT_PORT", default_value_t = 3000)]
    port: u16,

    #[arg(long, env = "AGENT_DELAY_MS", default_value_t = 1000)]
    delay_ms: u64,

    /// Leave navigation, popups and history writes unguarded.
    #[arg(long)]
    no_guards: bool,

    /// Run this objective once and exit instead of waiting on the console.
    #[arg(long)]
    objective: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("starting page agent");

    let custom = match &args.page {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading page {}", path.display()))?,
        ),
        None => None,
    };
    let (url, html) = page_source(custom);

    let frame = Frame::new();
    frame.load_html(&url, &html);
    let page = Arc::new(PageController::new(&frame));
    page.enable_nav_guards(!args.no_guards);
    info!(%url, guards = page.guards_active(), "page loaded");

    let brain = HttpBrain::new(&args.endpoint).with_api_key(args.api_key.clone());
    info!(endpoint = brain.endpoint(), "collaborator configured");

    let config = RunnerConfig {
        iteration_delay: Duration::from_millis(args.delay_ms),
        ..RunnerConfig::default()
    };
    let runner = Arc::new(AgentRunner::new(page, Arc::new(brain), config));

    if let Some(objective) = &args.objective {
        drive(&runner, objective, args.iterations, shutdown_signal()).await;
        runner.page().dispose();
        return Ok(());
    }

    let mut cmd_rx = face::start_server(Arc::clone(&runner), args.port).await?;
    info!("waiting for objectives");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                runner.abort();
                break;
            }
            command = cmd_rx.recv() => {
                let Some(command) = command else { break };
                let iterations = command.iterations.unwrap_or(args.iterations);
                info!(objective = %command.objective, iterations, "received objective");
                if drive(&runner, &command.objective, iterations, shutdown_signal()).await {
                    break;
                }
            }
        }
    }

    runner.page().dispose();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Runs one objective to its end, aborting it if `shutdown` resolves first.
/// Returns whether the session was interrupted.
async fn drive(
    runner: &AgentRunner,
    objective: &str,
    iterations: usize,
    shutdown: impl Future<Output = ()>,
) -> bool {
    let session = runner.run_iterations(objective, iterations);
    tokio::pin!(session);
    let (result, interrupted) = tokio::select! {
        result = &mut session => (result, false),
        () = shutdown => {
            info!("shutting down");
            runner.abort();
            (session.await, true)
        }
    };
    match result {
        Ok(summary) => info!(?summary, "objective finished"),
        Err(err) => error!(%err, "objective rejected"),
    }
    interrupted
}
