//! arbor - command-line client for branching conversations

mod commands;
mod config;
mod ui;

use anyhow::Context;
use arbor_chat::{Chat, ChatConfig, ChatEvent, HttpBackend, tree::parent_key};
use clap::Parser;
use commands::CommandResult;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

/// arbor - branching conversation client
#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the conversation backend
    #[arg(short, long)]
    base_url: Option<String>,

    /// Model requested for new turns
    #[arg(short, long)]
    model: Option<String>,

    /// Conversation to open
    #[arg(short, long)]
    conversation: Option<String>,

    /// Hide reasoning steps and tool calls
    #[arg(long)]
    hide_reasoning: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("arbor=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = config::Config::load();
    let base_url = args
        .base_url
        .or(config.base_url.clone())
        .or_else(|| std::env::var(arbor_wire::client::BASE_URL_ENV).ok())
        .with_context(|| {
            format!(
                "no backend URL: pass --base-url, set {}, or add base_url to {}",
                arbor_wire::client::BASE_URL_ENV,
                config::Config::config_path().display()
            )
        })?;
    let show_reasoning = !args.hide_reasoning && config.show_reasoning();
    tracing::debug!("Using backend {}", base_url);

    let chat = Chat::new(
        Arc::new(HttpBackend::with_base_url(base_url)),
        ChatConfig {
            model: args.model.or(config.model.clone()),
            ..ChatConfig::default()
        },
    );

    let printer = tokio::spawn(print_events(chat.subscribe(), show_reasoning));

    if let Some(conversation) = args.conversation.or(config.conversation.clone()) {
        chat.switch_conversation(conversation).finished().await;
        print!("{}", chat.with_session(|s| ui::render_transcript(s, show_reasoning)));
    } else {
        eprintln!("No conversation open. Use /switch <id> to open one.");
    }

    run_interactive(&chat, show_reasoning).await?;

    chat.cancel_in_flight_operation();
    printer.abort();
    Ok(())
}

async fn run_interactive(chat: &Chat, show_reasoning: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            // EOF
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let Some(result) = commands::execute_command(input) else {
            if let Err(e) = chat.send_message(input) {
                eprintln!("Error: {}", e);
            }
            continue;
        };

        match result {
            CommandResult::Exit => break,
            CommandResult::Message(text) => println!("{}", text),
            CommandResult::Unknown(command) => {
                println!("Unknown command: /{}. Type /help for commands.", command)
            }
            CommandResult::Show => {
                print!("{}", chat.with_session(|s| ui::render_transcript(s, show_reasoning)))
            }
            CommandResult::Cancel => {
                if !chat.cancel_in_flight_operation() {
                    println!("Nothing in flight.");
                }
            }
            CommandResult::Acknowledge => match chat.acknowledge_failure() {
                Some(_) => {
                    if let Some(draft) = chat.take_draft() {
                        println!("Unsent text: {}", draft);
                    }
                }
                None => println!("No failure to acknowledge."),
            },
            CommandResult::Switch(conversation) => {
                chat.switch_conversation(conversation).finished().await;
                print!("{}", chat.with_session(|s| ui::render_transcript(s, show_reasoning)));
            }
            CommandResult::Edit { position, text } => {
                let target = visible_id(chat, position);
                let outcome = match target {
                    Some(message_id) => chat.edit_message(&message_id, &text).map(drop),
                    None => Err(no_message(position)),
                };
                if let Err(e) = outcome {
                    eprintln!("Error: {}", e);
                }
            }
            CommandResult::Regenerate {
                position,
                directive,
            } => {
                if let Err(e) = chat.regenerate_message(position, directive.as_deref()) {
                    eprintln!("Error: {}", e);
                }
            }
            CommandResult::Branch { position, target } => {
                let branch = chat.with_session(|session| {
                    let tree = session.tree();
                    let message = tree.visible_messages(&session.messages).get(position).copied()?;
                    let parent = parent_key(message).to_string();
                    let count = tree.branch_count(&parent);
                    let current = session.selection.selected_index(&parent, count);
                    Some((parent, target.resolve(current, count)))
                });
                match branch {
                    Some((parent, index)) => {
                        chat.navigate_branch(parent, index);
                        print!("{}", chat.with_session(|s| ui::render_transcript(s, show_reasoning)));
                    }
                    None => eprintln!("Error: {}", no_message(position)),
                }
            }
        }
    }

    Ok(())
}

/// Message id at a visible position
fn visible_id(chat: &Chat, position: usize) -> Option<String> {
    chat.visible_messages()
        .get(position)
        .map(|m| m.message_id.clone())
}

fn no_message(position: usize) -> arbor_chat::Error {
    arbor_chat::Error::MessageNotFound(format!("#{}", position + 1))
}

fn prompt() -> std::io::Result<()> {
    print!("> ");
    std::io::stdout().flush()
}

/// Print live events as they arrive
async fn print_events(mut receiver: broadcast::Receiver<ChatEvent>, show_reasoning: bool) {
    loop {
        match receiver.recv().await {
            Ok(event) => {
                if let Some(text) = ui::describe_event(&event, show_reasoning) {
                    print!("{}", text);
                    let _ = std::io::stdout().flush();
                }
                if event.is_terminal() {
                    let _ = prompt();
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Display fell behind, {} events skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
