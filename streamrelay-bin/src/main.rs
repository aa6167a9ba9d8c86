use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use streamrelay_core::{
    config::{Config, Credentials, clone_secret},
    model::InboundRequest,
    server::{self, AppState},
    stream::OutboundEvent,
    validator::check,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "streamrelay: SSE relay for streaming chat completions", long_about = None)]
struct Cli {
    /// JSON or TOML config file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP relay on /stream
    Serve {
        #[arg(long, help = "Listen port (overrides PORT)")]
        port: Option<u16>,
    },
    /// Relay one prompt and print deltas live
    Stream {
        #[arg(short, long, help = "Prompt to send upstream")]
        prompt: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let base = match path {
        Some(p) => Config::from_path(p)?,
        None => Config::default(),
    };
    Ok(base.with_process_env()?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_ref())?;
    let credentials = Credentials::from_process_env(&cfg.upstream);
    if credentials.api_key().is_none() {
        tracing::warn!(
            env = %cfg.upstream.api_key_env,
            "no API key configured; requests will be answered with an in-band error"
        );
    }

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                cfg.server.port = port;
            }
            let state = AppState::from_config(&cfg, credentials)?;
            server::serve(&cfg, state, shutdown_signal()).await?;
        }
        Commands::Stream { prompt } => {
            let state = AppState::from_config(&cfg, credentials)?;
            let request = InboundRequest {
                prompt,
                stream: true,
            };
            let mut events = match check(request, state.credentials()) {
                Ok(valid) => {
                    let key = clone_secret(valid.api_key);
                    state.bridge().relay(valid.request.prompt, key)
                }
                Err(err) => state.bridge().reject(err),
            };

            use std::io::{self, Write};
            let mut saw_delta = false;
            while let Some(ev) = events.next().await {
                match ev {
                    OutboundEvent::Content(txt) => {
                        saw_delta = true;
                        print!("{}", txt);
                        io::stdout().flush().ok();
                    }
                    OutboundEvent::Error(msg) => {
                        eprintln!("[error: {}]", msg);
                    }
                    OutboundEvent::Done => {
                        if saw_delta {
                            println!();
                        }
                        eprintln!("[done]");
                    }
                }
            }
        }
    }

    Ok(())
}

