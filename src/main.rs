use clap::Parser;
use heron::agent::{AgentExecutor, ConversationState, ToolLoopExecutor};
use heron::bridge::{StdioTransport, ToolInventory, discover};
use heron::cli::{Cli, RunMode};
use heron::config::AppConfig;
use heron::model::OllamaClient;
use heron::stream::{collect_buffered, finalize_response};
use heron::{server, terminal};
use serde_json::json;
use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    init_tracing();
    info!("Starting heron MCP bridge");
    let cli = Cli::parse();
    debug!(?cli.mode, config = ?cli.config, system = ?cli.system, "CLI arguments parsed");

    let config_path = cli.config.as_deref().map(Path::new);
    let config = AppConfig::load(config_path)?;
    info!(
        servers = config.server_specs().len(),
        model = %config.model,
        "Configuration loaded"
    );

    let transport = Arc::new(StdioTransport::new());
    let inventory = Arc::new(discover(config.server_specs(), transport, config.discovery).await?);
    for failure in inventory.failures() {
        warn!(
            server = %failure.server,
            tool = failure.tool.as_deref().unwrap_or("-"),
            reason = %failure.reason,
            "Discovery failure"
        );
    }
    info!(tool_count = inventory.len(), "Tool inventory ready");

    let base_url = cli
        .model_url
        .clone()
        .unwrap_or_else(|| config.provider.base_url.clone());
    let provider = OllamaClient::with_request_timeout(
        base_url,
        Duration::from_secs(config.provider.request_timeout_secs),
    );
    let system_prompt = cli.system.clone().or_else(|| config.system_prompt.clone());
    let executor: Arc<dyn AgentExecutor> = Arc::new(
        ToolLoopExecutor::new(provider, config.model.clone(), Arc::clone(&inventory))
            .with_system_prompt(system_prompt),
    );

    info!(mode = ?cli.mode, "Running bridge in selected mode");
    match cli.mode {
        RunMode::Cli => {
            let prompt = load_prompt(&cli)?;
            info!("Dispatching single prompt via CLI mode");
            let chunks = executor
                .stream(ConversationState::from_prompt(prompt))
                .await?;
            let answer = collect_buffered(chunks).await;
            let output = json!({ "content": finalize_response(&answer) });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        RunMode::Chat => {
            info!("Entering interactive chat mode");
            terminal::run(executor, inventory).await?;
        }
        RunMode::Rest => {
            info!(addr = %cli.rest_addr, "Starting REST server");
            server::serve(executor, inventory, cli.rest_addr).await?;
        }
        RunMode::Tools => {
            print_tools(&inventory);
        }
    }
    info!("Bridge execution finished");
    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}

fn print_tools(inventory: &ToolInventory) {
    for tool in inventory.tools() {
        match tool.description() {
            "" => println!("{}", tool.name()),
            description => println!("{}: {}", tool.name(), description),
        }
    }
    for failure in inventory.failures() {
        eprintln!("(unavailable) {}: {}", failure.server, failure.reason);
    }
}

fn load_prompt(cli: &Cli) -> Result<String, Box<dyn Error>> {
    if let Some(path) = &cli.prompt_file {
        info!(path = %path, "Loading prompt from file");
        let content = fs::read_to_string(path)?;
        return Ok(normalize_prompt(content));
    }

    if !cli.prompt.is_empty() {
        info!("Using prompt provided through CLI arguments");
        let joined = cli.prompt.join(" ");
        return Ok(normalize_prompt(joined));
    }

    if !atty::is(atty::Stream::Stdin) {
        info!("Reading prompt from standard input");
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        return Ok(normalize_prompt(buffer));
    }

    warn!("Prompt not provided via arguments, file, or stdin");
    Err("prompt required via arguments, file, or stdin".into())
}

fn normalize_prompt(prompt: String) -> String {
    prompt.trim().to_string()
}
