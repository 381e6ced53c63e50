use std::process::Command;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use judged::cache::{ArtifactCache, sweep_loop};
use judged::config::CliArgs;
use judged::pipeline::PipelineHandler;
use judged::routes::ServerContext;
use judged::sandbox::{ProcessSandbox, SandboxRuntime};
use judged::scheduler::{Scheduler, dispatch_loop, retention_loop};
use judged::web_server::build_server;

/// Check if a command exists in the system PATH
fn check_command_exists(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Check if the current user is root and warn if so
fn check_running_user() {
    if std::env::var("USER").unwrap_or_default() == "root"
        || std::env::var("LOGNAME").unwrap_or_default() == "root"
        || unsafe { libc::getuid() } == 0
    {
        log::warn!("WARNING: Running as root user is not recommended for security reasons!");
        log::warn!("Please consider running this application with a non-privileged user account.");
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = CliArgs::parse();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&cli.log_level));

    if cli.threads == 0 {
        log::error!("The number of worker threads must not be 0");
        std::process::exit(1);
    }
    if cli.token.is_none() {
        log::warn!("JUDGE_TOKEN is not set; authenticated routes will answer 500 until it is");
    }
    if !check_command_exists("g++") {
        log::warn!("Command 'g++' not found in PATH; compile tasks will fail");
    }
    check_running_user();

    let cache = Arc::new(ArtifactCache::new(&cli.cache_root).unwrap_or_else(|e| {
        log::error!("Failed to initialize artifact cache: {e:#}");
        std::process::exit(1);
    }));
    let sandbox: Arc<dyn SandboxRuntime> =
        Arc::new(ProcessSandbox::build(cli.checker_dir.clone()).unwrap_or_else(|e| {
            log::error!("Failed to initialize sandbox runtime: {e:#}");
            std::process::exit(1);
        }));
    let scheduler = Arc::new(Scheduler::new(cli.threads));
    let handler = Arc::new(PipelineHandler::new(
        cache.clone(),
        sandbox,
        std::env::temp_dir(),
    ));
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    workers.spawn(dispatch_loop(
        scheduler.clone(),
        handler,
        shutdown_token.clone(),
    ));
    workers.spawn(sweep_loop(cache.clone(), shutdown_token.clone()));
    workers.spawn(retention_loop(scheduler.clone(), shutdown_token.clone()));

    let server = build_server(
        &cli.host,
        cli.port,
        cache,
        scheduler,
        ServerContext::new(cli.token.clone()),
    )
    .unwrap_or_else(|e| {
        log::error!("Failed to start web server: {e}");
        std::process::exit(1);
    });
    log::info!("listening on {}:{}", cli.host, cli.port);

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    let mut sigterm = signal(SignalKind::terminate())?;

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("SIGINT received, shutting down...");
        }
        _ = sigterm.recv() => {
            log::info!("SIGTERM received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {res_server:?}");
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A background worker terminated unexpectedly: {res_worker:?}");
        }
    }

    // 1. Shutdown the HTTP server gracefully
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to the dispatch loop and sweepers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait until every background task terminates
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                log::error!("Worker handle panicked: {e:?}");
            } else {
                log::error!("Worker handle finished with error: {e:?}");
            }
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
