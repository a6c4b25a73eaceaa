use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use driftwatch_core::{port_file_path, status_file_path, PortRecord, StatusRecord};
use driftwatch_server::config::ServerConfig;
use driftwatch_server::dispatch::ToolDispatcher;
use driftwatch_server::state::ServerContext;
use driftwatch_server::{stdio, web};

#[derive(Parser)]
#[command(name = "driftwatch")]
#[command(about = "Project deviation monitoring MCP server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory to watch
    #[arg(long, env = "DRIFTWATCH_PROJECT_PATH")]
    project: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WebSocket server
    Serve {
        /// Preferred port; the first free port at or above it is bound
        #[arg(long)]
        port: Option<u16>,
        /// Disable the file-change broadcaster
        #[arg(long)]
        no_watch: bool,
    },
    /// Run as an MCP server over stdio
    Mcp,
    /// Analyze a single file and print the result
    Analyze {
        /// File path, absolute or relative to the project root
        file: String,
    },
    /// Show the status of a running server
    Status,
    /// Stop a running server via its port record
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.command {
        // stdout carries the MCP protocol in stdio mode; log to stderr
        Commands::Mcp => {
            init_stderr_tracing()?;
            ServerConfig::load()?
        }
        _ => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::EnvFilter::from_default_env())
                .init();
            ServerConfig::load()?
        }
    };

    if let Some(project) = cli.project {
        config.project_path = project;
    }

    match cli.command {
        Commands::Serve { port, no_watch } => {
            if let Some(port) = port {
                config.preferred_port = port;
                if config.port_range_end < port {
                    config.port_range_end = port;
                }
            }
            if no_watch {
                config.watch = false;
            }
            web::serve(config).await?;
        }
        Commands::Mcp => {
            let ctx = Arc::new(ServerContext::new(config, 0));
            let dispatcher = Arc::new(ToolDispatcher::new(ctx));
            stdio::serve_stdio(dispatcher).await?;
        }
        Commands::Analyze { file } => {
            run_analyze(config, &file).await?;
        }
        Commands::Status => {
            run_status(&config)?;
        }
        Commands::Stop => {
            run_stop(&config).await?;
        }
    }

    Ok(())
}

fn init_stderr_tracing() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("driftwatch_server=info".parse()?);

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }

    Ok(())
}

async fn run_analyze(config: ServerConfig, file: &str) -> Result<()> {
    let ctx = Arc::new(ServerContext::new(config, 0));
    let dispatcher = ToolDispatcher::new(ctx);

    let result = dispatcher
        .invoke("analyze_deviation", serde_json::json!({ "filePath": file }))
        .await;

    match result.first_text() {
        Some(text) => println!("{}", text),
        None => println!("(no output)"),
    }

    if result.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_status(config: &ServerConfig) -> Result<()> {
    let status_path = status_file_path(&config.project_path);
    if !status_path.exists() {
        println!("No status record found - server not running?");
        return Ok(());
    }

    let raw = std::fs::read_to_string(&status_path)?;
    let status: StatusRecord = serde_json::from_str(&raw)?;

    println!("Server status: {}", status.status);
    println!("  Port: {}", status.port);
    println!("  PID: {}", status.pid);
    println!("  Clients: {}", status.clients);
    println!("  Uptime: {:.0}s", status.uptime);
    println!("  Last update: {}", status.last_update);
    println!();
    println!("Note: the record is advisory; the process may have died without");
    println!("cleanup. Probe http://localhost:{}/health to be sure.", status.port);
    Ok(())
}

async fn run_stop(config: &ServerConfig) -> Result<()> {
    let record_path = port_file_path(&config.project_path);
    if !record_path.exists() {
        println!("No port record found - server not running?");
        return Ok(());
    }

    let raw = std::fs::read_to_string(&record_path)?;
    let record: PortRecord = serde_json::from_str(&raw)?;

    println!("Stopping server (pid {}, port {})...", record.pid, record.port);

    #[cfg(unix)]
    {
        let _ = unsafe { libc::kill(record.pid as i32, libc::SIGTERM) };
    }

    // Give the server a moment to clean up after itself
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    // Remove leftovers if the process died without cleanup
    let _ = std::fs::remove_file(&record_path);
    let _ = std::fs::remove_file(status_file_path(&config.project_path));

    println!("Server stopped.");
    Ok(())
}
