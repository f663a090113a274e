use crate::application::agent::{AgentExecutor, ConversationState};
use crate::application::bridge::ToolInventory;
use crate::application::stream::{AgentEvent, classify, extract_text};
use crate::types::{ChatMessage, MessageRole};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("stdin/stdout I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interactive command loop on stdin/stdout. Chat mode keeps the running
/// conversation and prints fragments as the agent emits them.
pub async fn run(
    executor: Arc<dyn AgentExecutor>,
    inventory: Arc<ToolInventory>,
) -> Result<(), TerminalError> {
    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    write_line(
        &mut stdout,
        "Welcome to the interactive MCP bridge.\nType 'help' for available commands, 'chat' to start chatting, or 'quit' to exit.",
    )
    .await?;

    loop {
        write_prompt(&mut stdout, ">>> ").await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        debug!(command, "Terminal command received");

        match command {
            "list-tools" => {
                write_line(&mut stdout, "\nAvailable tools:").await?;
                for tool in inventory.tools() {
                    let description = match tool.description() {
                        "" => String::new(),
                        text => format!(" - {text}"),
                    };
                    write_line(&mut stdout, &format!("  {}{}", tool.name(), description)).await?;
                }
                for failure in inventory.failures() {
                    write_line(
                        &mut stdout,
                        &format!("  (unavailable) {}: {}", failure.server, failure.reason),
                    )
                    .await?;
                }
            }
            "chat" => {
                write_line(&mut stdout, "\nEntering chat mode. Type 'exit' to leave.").await?;
                chat_mode(&executor, &mut lines, &mut stdout).await?;
            }
            "clear" => {
                stdout.write_all(b"\x1b[2J\x1b[H").await?;
                stdout.flush().await?;
            }
            "help" => {
                write_line(
                    &mut stdout,
                    "\nAvailable commands:\n  list-tools    - Display available tools\n  chat          - Enter chat mode\n  clear         - Clear the screen\n  help          - Show this help message\n  quit/exit     - Exit the program",
                )
                .await?;
            }
            "quit" | "exit" => {
                write_line(&mut stdout, "\nGoodbye!").await?;
                break;
            }
            other => {
                write_line(
                    &mut stdout,
                    &format!("\nUnknown command: {other}\nType 'help' for available commands"),
                )
                .await?;
            }
        }
    }

    stdout.flush().await?;
    Ok(())
}

async fn chat_mode(
    executor: &Arc<dyn AgentExecutor>,
    lines: &mut io::Lines<BufReader<io::Stdin>>,
    stdout: &mut io::Stdout,
) -> Result<(), TerminalError> {
    let mut history: Vec<ChatMessage> = Vec::new();

    loop {
        write_prompt(stdout, "\nYou: ").await?;
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if matches!(message.to_lowercase().as_str(), "exit" | "quit") {
            write_line(stdout, "Leaving chat mode.").await?;
            return Ok(());
        }

        history.push(ChatMessage::new(MessageRole::User, message));
        let conversation = ConversationState::with_history(history.clone());

        let chunks = match executor.stream(conversation).await {
            Ok(chunks) => chunks,
            Err(err) => {
                error!(error = %err, "Agent loop failed to start");
                write_line(stdout, &format!("Error: {}", err.user_message())).await?;
                history.pop();
                continue;
            }
        };

        let mut answer = String::new();
        let mut chunks = chunks;
        while let Some(chunk) = chunks.next().await {
            match classify(&chunk) {
                AgentEvent::Token(text) => {
                    let fragment = extract_text(&Value::String(text));
                    stdout.write_all(fragment.as_bytes()).await?;
                    stdout.flush().await?;
                    answer.push_str(&fragment);
                }
                AgentEvent::ToolCall { name, .. } => {
                    write_line(stdout, &format!("\n-- running tool: {name} --")).await?;
                }
                AgentEvent::Snapshot(_) | AgentEvent::Terminal(_) | AgentEvent::Unrecognized(_) => {}
            }
        }
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;

        history.push(ChatMessage::new(MessageRole::Assistant, answer));
    }
}

async fn write_line(stdout: &mut io::Stdout, text: &str) -> Result<(), TerminalError> {
    stdout.write_all(text.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

async fn write_prompt(stdout: &mut io::Stdout, prompt: &str) -> Result<(), TerminalError> {
    stdout.write_all(prompt.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
