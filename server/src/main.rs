//! bpy2obj server
//! - Script validation and OBJ conversion over HTTP
//! - Embedded Lua engine on a dedicated worker thread
//! - Or one headless Blender process per request

use anyhow::{Context, Result};
use bpy2obj::{BlenderLauncher, EngineConfig, ExportOptions, LauncherConfig};
use clap::{Parser, ValueEnum};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, Level};

mod backend;
mod error;
mod payload;
mod routes;
mod worker;

use backend::Backend;
use worker::EngineWorker;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
    pub options: ExportOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    /// In-process Lua engine, one script at a time
    Embedded,
    /// Headless Blender child process per request
    Blender,
}

#[derive(Parser, Debug)]
#[command(name = "bpy2obj-server")]
#[command(about = "Convert scene scripts to OBJ meshes over HTTP")]
#[command(version)]
struct Args {
    /// Host to bind the server to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Engine that runs the scripts
    #[arg(long, value_enum, default_value_t = EngineKind::Embedded)]
    engine: EngineKind,

    /// Blender executable (required with --engine blender)
    #[arg(long, env = "BLENDER_PATH")]
    blender_path: Option<PathBuf>,

    /// Hard limit for one script run, in seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Blender processes allowed at once
    #[arg(long, default_value_t = 4)]
    max_processes: usize,

    /// Pass scripts to Blender exactly as received
    #[arg(long)]
    no_normalize: bool,

    /// Triangulate exported meshes
    #[arg(long)]
    triangulate: bool,
}

fn build_backend(args: &Args) -> Result<Backend> {
    let timeout = Duration::from_secs(args.timeout_secs);

    match args.engine {
        EngineKind::Embedded => {
            let worker = EngineWorker::spawn(EngineConfig {
                timeout,
                ..EngineConfig::default()
            })?;
            Ok(Backend::Embedded(worker))
        }
        EngineKind::Blender => {
            let blender_path = args
                .blender_path
                .clone()
                .context("--engine blender needs --blender-path or BLENDER_PATH")?;
            let launcher = BlenderLauncher::new(LauncherConfig {
                blender_path,
                timeout,
                max_concurrent: args.max_processes,
                normalize: !args.no_normalize,
                temp_root: None,
            })?;
            Ok(Backend::Blender(launcher))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let backend = build_backend(&args)?;
    info!("Engine: {}", backend.name());

    let state = AppState {
        backend: Arc::new(backend),
        options: ExportOptions {
            triangulate: args.triangulate,
            ..ExportOptions::default()
        },
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", args.host, args.port))?;
    info!("Server: http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
