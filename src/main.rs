mod capability;
mod cli;
mod client;
mod compose;
mod config;
mod control;
mod error;
mod health;
mod ipc;
mod metrics;
mod registry;
mod router;

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use control::Hub;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start {
            port,
            config_path,
            log_level,
            background,
        } => {
            if background {
                start_background(port, config_path, log_level).await
            } else {
                start_foreground(port, config_path, log_level).await
            }
        }
        Command::Stop => ipc::stop::run(),
        Command::Restart {
            port,
            config_path,
            log_level,
        } => {
            let _ = ipc::stop::run();
            start_background(port, config_path, log_level).await
        }
        Command::Status { port } => {
            let outcome = ipc::status::run(resolve_port(port)).await?;
            std::process::exit(outcome.exit_code());
        }
        Command::Servers { port } => print_servers(resolve_port(port)).await,
        Command::Logs { follow, lines } => print_logs(follow, lines),
    }
}

fn resolve_port(explicit: Option<u16>) -> u16 {
    explicit.unwrap_or_else(|| {
        std::env::var("PROXY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000)
    })
}

fn init_settings(
    port: Option<u16>,
    config_path: Option<std::path::PathBuf>,
    log_level: Option<String>,
) -> Result<config::Settings> {
    if let Some(p) = port {
        unsafe { std::env::set_var("PROXY_PORT", p.to_string()) };
    }
    if let Some(c) = config_path {
        unsafe { std::env::set_var("MCP_COMPOSE_FILE", c) };
    }
    if let Some(l) = log_level {
        unsafe { std::env::set_var("LOG_LEVEL", l) };
    }
    config::Settings::from_env()
}

async fn start_foreground(
    port: Option<u16>,
    config_path: Option<std::path::PathBuf>,
    log_level: Option<String>,
) -> Result<()> {
    let settings = init_settings(port, config_path, log_level)?;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!(port = settings.port, "mcp-hub starting");
    let hub = std::sync::Arc::new(Hub::start(settings).await?);
    control::spawn_reload_on_sighup(std::sync::Arc::clone(&hub))?;

    let serve_task = tokio::spawn({
        let hub = std::sync::Arc::clone(&hub);
        async move { hub.serve().await }
    });

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigint.recv() => tracing::info!("received SIGINT"),
        }
        hub.shutdown().await;
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        hub.shutdown().await;
    }

    serve_task.await?
}

async fn start_background(
    port: Option<u16>,
    config_path: Option<std::path::PathBuf>,
    log_level: Option<String>,
) -> Result<()> {
    let settings_port = resolve_port(port);
    let compose_file = config_path.unwrap_or_else(|| {
        std::env::var("MCP_COMPOSE_FILE")
            .unwrap_or_else(|_| "./docker-compose.yml".to_string())
            .into()
    });
    let args = ipc::daemon::BackgroundArgs {
        port: settings_port,
        compose_file,
        log_level: log_level.unwrap_or_else(|| {
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
        }),
    };
    let pid = ipc::daemon::spawn(args, std::time::Duration::from_secs(10)).await?;
    println!("started proxy in background (PID {pid}, port {settings_port})");
    Ok(())
}

async fn print_servers(port: u16) -> Result<()> {
    let url = format!("http://127.0.0.1:{port}/servers");
    let body: serde_json::Value = reqwest::get(&url).await?.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn print_logs(follow: bool, lines: usize) -> Result<()> {
    let path = ipc::pidfile::log_path();
    if !path.exists() {
        bail!("no log file at {}", path.display());
    }

    let contents = std::fs::read_to_string(&path)?;
    let tail: Vec<&str> = contents.lines().rev().take(lines).collect();
    for line in tail.into_iter().rev() {
        println!("{line}");
    }

    if follow {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = std::fs::File::open(&path)?;
        file.seek(SeekFrom::End(0))?;
        loop {
            let mut buf = String::new();
            file.read_to_string(&mut buf)?;
            if !buf.is_empty() {
                print!("{buf}");
            }
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
    }

    Ok(())
}
