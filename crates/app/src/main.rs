//! Easel - command-line client for a ComfyUI-style diffusion server

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use easel_config::ConfigError;
use easel_diffusion::output::unique_asset_name;
use easel_diffusion::{
    DiffusionError, ProgressCallback, RemoteDiffusion, ServerClient, Workflow, apply_defaults,
};
use easel_ipc::SubmitOptions;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

mod config;
mod request;

use config::{CliOverrides, LogFormat, load_settings};
use request::WorkflowArgs;

#[derive(Parser, Debug)]
#[command(name = "easel", version, about, long_about = None)]
struct Cli {
    /// Server base URL (overrides EASEL_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Folder the server saves images to (overrides EASEL_OUTPUT_DIR)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Seconds to wait for the server (overrides EASEL_READY_TIMEOUT)
    #[arg(long, global = true)]
    ready_timeout: Option<f32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait until the server answers its health probe
    Ready,
    /// Print a workflow graph without submitting it
    Build {
        #[command(flatten)]
        workflow: WorkflowArgs,
        /// Indent the JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Submit graph JSON from a file ("-" for stdin) and print the job id
    Submit {
        graph: PathBuf,
        #[arg(long)]
        client_id: Option<String>,
    },
    /// Run a workflow and print the path of the generated image
    Generate {
        #[command(flatten)]
        workflow: WorkflowArgs,
        /// Copy the image into this folder under a unique name
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Diffusion(#[from] DiffusionError),
    #[error(transparent)]
    Ipc(#[from] easel_ipc::IpcError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging(LogFormat::from_env());

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    match format {
        LogFormat::Compact => tracing_subscriber::registry()
            .with(layer.compact().with_filter(env_filter))
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(layer.pretty().with_filter(env_filter))
            .init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let overrides = CliOverrides {
        base_url: cli.base_url,
        output_dir: cli.output_dir,
        ready_timeout: cli.ready_timeout,
    };
    let settings = load_settings(&overrides)?;

    match cli.command {
        Command::Ready => {
            let client = ServerClient::from_settings(&settings);
            let cancel = cancel_on_ctrl_c();
            let body = client
                .ensure_ready(settings.ready_timeout(), &cancel)
                .await?
                .into_result()?;
            info!("Server at {} is ready", settings.base_url);
            println!("{body}");
        }
        Command::Build { workflow, pretty } => {
            let mut request = workflow.into_request();
            apply_defaults(&mut request, &settings);
            let graph = request.build();
            let json = if pretty {
                serde_json::to_string_pretty(&graph.to_value()?).map_err(easel_ipc::IpcError::from)?
            } else {
                graph.to_json()?
            };
            println!("{json}");
        }
        Command::Submit { graph, client_id } => {
            let text = read_graph(&graph).await?;
            let client = ServerClient::from_settings(&settings);
            let job_id = client.submit(&text, &SubmitOptions { client_id }).await?;
            println!("{job_id}");
        }
        Command::Generate { workflow, save_dir } => {
            let mut backend = RemoteDiffusion::new(settings);
            let cancel = backend.cancel_handle();
            let watcher = cancel_on_ctrl_c();
            tokio::spawn(async move {
                watcher.cancelled().await;
                cancel.cancel();
            });

            let progress: ProgressCallback =
                Box::new(|fraction, _| info!("Progress: {:.0}%", fraction * 100.0));
            let path = backend
                .generate_to_file(workflow.into_request(), Some(&progress))
                .await?;
            let path = match save_dir {
                Some(dir) => save_copy(&path, &dir).await?,
                None => path,
            };
            println!("{}", path.display());
        }
    }

    Ok(())
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    token
}

async fn read_graph(path: &Path) -> Result<String, std::io::Error> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        tokio::io::stdin().read_to_string(&mut text).await?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(path).await
    }
}

async fn save_copy(source: &Path, dir: &Path) -> Result<PathBuf, std::io::Error> {
    tokio::fs::create_dir_all(dir).await?;
    let target = unique_asset_name(dir, "Generated", |candidate| {
        candidate.with_extension("png").exists()
    })
    .with_extension("png");
    tokio::fs::copy(source, &target).await?;
    info!("Saved {}", target.display());
    Ok(target)
}
