//! LLM router command line entry point
//!
//! `serve` runs the status server with periodic provider probes; the other
//! commands exercise the router once and exit.

use clap::{Parser, Subcommand};
use futures::StreamExt;
use llm_router::classifier::{detect_arabic_content, is_arabic_dominant, DEFAULT_ARABIC_THRESHOLD};
use llm_router::config::{RouterConfig, DEFAULT_CONFIG_PATHS};
use llm_router::llm::provider::{Message, ProviderId, StreamChunk};
use llm_router::observability::{init_default_logging, init_logging_from_config, StatusServer};
use llm_router::policy::{DataClassification, Feature, RouterRequest};
use llm_router::registry::ProviderRegistry;
use llm_router::router::{ChatOptions, LlmRouter};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// Policy-driven LLM provider router
#[derive(Parser)]
#[command(name = "llm-router")]
#[command(about = "Route LLM requests across providers by policy, health and cost")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "LLM_ROUTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the status server and provider probes until interrupted
    Serve,
    /// Validate configuration
    Config {
        /// Print the parsed configuration
        #[arg(long)]
        show: bool,
    },
    /// Report the Arabic character ratio of a text
    Classify {
        text: String,
        #[arg(long, default_value_t = DEFAULT_ARABIC_THRESHOLD)]
        threshold: f64,
    },
    /// Show which provider a request would be routed to
    Route {
        #[arg(long)]
        org: String,
        #[arg(long, default_value = "chat")]
        feature: Feature,
        #[arg(long)]
        classification: Option<DataClassification>,
        #[arg(long)]
        prefer: Option<ProviderId>,
        text: String,
    },
    /// Send one message through the router
    Chat {
        #[arg(long)]
        org: String,
        #[arg(long, default_value = "cli")]
        user: String,
        #[arg(long, default_value = "chat")]
        feature: Feature,
        #[arg(long)]
        classification: Option<DataClassification>,
        #[arg(long)]
        prefer: Option<ProviderId>,
        #[arg(long)]
        system: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Print chunks as they arrive
        #[arg(long)]
        stream: bool,
        message: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Classify { text, threshold } = &cli.command {
        let ratio = detect_arabic_content(text);
        println!(
            "{}",
            serde_json::json!({
                "ratio": ratio,
                "threshold": threshold,
                "arabic_dominant": is_arabic_dominant(text, *threshold),
            })
        );
        return;
    }

    let config = match load_configuration(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            init_default_logging();
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    init_logging_from_config(&config.logging);

    let result = match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Route {
            org,
            feature,
            classification,
            prefer,
            text,
        } => {
            let request = build_request(org, "cli".to_string(), feature, classification, prefer, None);
            route(config, request, &text).await
        }
        Commands::Chat {
            org,
            user,
            feature,
            classification,
            prefer,
            system,
            temperature,
            max_tokens,
            stream,
            message,
        } => {
            let request = build_request(org, user, feature, classification, prefer, system);
            let options = ChatOptions {
                temperature,
                max_tokens,
                skip_dedup: false,
            };
            chat(config, request, message, options, stream).await
        }
        Commands::Classify { .. } => Ok(()),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(path: Option<&PathBuf>) -> Result<RouterConfig, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return Ok(RouterConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Ok(RouterConfig::load_from_file(&path)?);
        }
    }

    Err(format!(
        "no configuration file found; pass -c/--config or create {}",
        DEFAULT_CONFIG_PATHS[0]
    )
    .into())
}

fn build_request(
    org: String,
    user: String,
    feature: Feature,
    classification: Option<DataClassification>,
    prefer: Option<ProviderId>,
    system: Option<String>,
) -> RouterRequest {
    let mut request = RouterRequest::new(org, user, feature);
    request.classification = classification;
    request.preferred_provider = prefer;
    request.system_prompt = system;
    request
}

async fn serve(config: RouterConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bind: SocketAddr = config.server.bind.parse()?;
    let router = LlmRouter::from_config(&config)?;

    let enabled = router.registry().enabled_providers();
    if enabled.is_empty() {
        return Err("no providers are enabled; check API key variables and base URLs".into());
    }
    info!(providers = ?enabled, "Router ready");

    let probes =
        router.spawn_health_probes(Duration::from_secs(config.server.probe_interval_secs));

    let result = StatusServer::new(router, bind).run(shutdown_signal()).await;
    probes.abort();

    info!("Shutdown complete");
    Ok(result?)
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Received SIGINT, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

fn handle_config_command(config: &RouterConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", serde_json::to_string_pretty(config)?);
    }

    let registry = ProviderRegistry::from_config(config)?;
    for provider in registry.all_configs() {
        info!(
            provider = %provider.id,
            enabled = provider.enabled,
            model = %provider.default_model,
            "Provider"
        );
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn route(
    config: RouterConfig,
    request: RouterRequest,
    text: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let router = LlmRouter::from_config(&config)?;
    let selection = router.select_provider(&request, text).await?;
    println!("{}", serde_json::to_string_pretty(&selection)?);
    Ok(())
}

async fn chat(
    config: RouterConfig,
    request: RouterRequest,
    message: String,
    options: ChatOptions,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let router = LlmRouter::from_config(&config)?;
    let messages = vec![Message::user(message)];

    if !stream {
        let response = router.chat(&request, messages, options).await?;
        println!("{}", response.content);
        eprintln!(
            "[{} {} run={} tokens={}/{}{}]",
            response.provider,
            response.model,
            response.run_id,
            response.input_tokens,
            response.output_tokens,
            if response.tokens_estimated { " estimated" } else { "" }
        );
        return Ok(());
    }

    let mut chunks = router.stream_chat(request, messages, options);
    let mut stdout = std::io::stdout();
    while let Some(chunk) = chunks.next().await {
        match chunk {
            StreamChunk::Content { content } => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            StreamChunk::ToolCall {
                tool_name,
                tool_input,
            } => {
                eprintln!("\n[tool call {tool_name}: {tool_input}]");
            }
            StreamChunk::Done { run_id, usage } => {
                println!();
                eprintln!(
                    "[run={} tokens={}/{}{}]",
                    run_id,
                    usage.input_tokens,
                    usage.output_tokens,
                    if usage.estimated { " estimated" } else { "" }
                );
            }
            StreamChunk::Error { error } => return Err(error.into()),
        }
    }
    Ok(())
}
