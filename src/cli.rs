use std::net::SocketAddr;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "heron",
    version,
    about = "Bridge MCP tool servers to a streaming chat agent"
)]
pub struct Cli {
    /// Base URL of the model provider.
    #[arg(long)]
    pub model_url: Option<String>,
    /// Path to the bridge configuration file.
    #[arg(long)]
    pub config: Option<String>,
    /// System prompt override.
    #[arg(long)]
    pub system: Option<String>,
    /// Read the prompt from a file instead of the arguments.
    #[arg(long)]
    pub prompt_file: Option<String>,
    #[arg(long, value_enum, default_value_t = RunMode::Cli)]
    pub mode: RunMode,
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub rest_addr: SocketAddr,
    #[arg()]
    pub prompt: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RunMode {
    /// Answer one prompt and exit.
    Cli,
    /// Interactive terminal chat.
    Chat,
    /// Serve the REST API.
    Rest,
    /// Print the discovered tools and exit.
    Tools,
}
