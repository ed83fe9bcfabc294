//! Command-line entry point for herald
//!
//! `herald run` starts the background processor. The other commands work on
//! the queue file directly and are meant for operators:
//! - Inspect the queue (stats, list, show)
//! - Add a message from a JSON payload file
//! - Revive, remove or purge messages
//! - Deliver everything that is due right now (flush)
//!
//! Commands that change the queue take its lock and fail while `herald run`
//! holds it. Inspection only reads the snapshot.

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use herald::Herald;
use herald_queue::{MessageId, MessageStatus, Payload, QueuedMessage};

/// Durable outbound notification delivery
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $HERALD_CONFIG, ./herald.config.ron,
    /// then /etc/herald/herald.config.ron)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format for inspection commands
    #[arg(long, value_enum, default_value_t = Format::Text, global = true)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the delivery processor until interrupted
    Run,
    /// Attempt every eligible message once, then exit
    Flush,
    /// Show message counts by status
    Stats,
    /// List messages in the queue
    List {
        /// Only show messages with this status
        #[arg(long)]
        status: Option<MessageStatus>,
    },
    /// Show a single message
    Show {
        id: MessageId,
    },
    /// Queue the payload described by a JSON file
    Enqueue {
        payload: PathBuf,

        /// Attempts before the message is dead-lettered
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Give a dead message a fresh set of attempts
    Retry {
        id: MessageId,
    },
    /// Remove a message regardless of its status
    Remove {
        id: MessageId,
    },
    /// Remove every message, or every message with the given status
    Clear {
        #[arg(long)]
        status: Option<MessageStatus>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let herald = Herald::load(&herald::find_config_file(cli.config)?)?;

    match cli.command {
        Commands::Run => herald.run().await,
        Commands::Flush => {
            herald_common::logging::init(&herald.logging);
            let summary = herald.flush().await?;
            match cli.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                Format::Text => println!("Sent: {}, failed: {}", summary.sent, summary.failed),
            }
            Ok(())
        }
        Commands::Stats => cmd_stats(&herald, cli.format),
        Commands::List { status } => cmd_list(&herald, status, cli.format),
        Commands::Show { id } => cmd_show(&herald, &id, cli.format),
        Commands::Enqueue {
            payload,
            max_attempts,
        } => cmd_enqueue(&herald, &payload, max_attempts),
        Commands::Retry { id } => {
            if !herald.open_queue()?.lock().retry(&id)? {
                anyhow::bail!("Message {id} is not in the dead letter queue");
            }
            println!("Message {id} will be retried");
            Ok(())
        }
        Commands::Remove { id } => {
            if !herald.open_queue()?.lock().remove(&id)? {
                anyhow::bail!("Message {id} not found");
            }
            println!("Removed {id}");
            Ok(())
        }
        Commands::Clear { status } => {
            let removed = herald.open_queue()?.lock().clear(status)?;
            println!("Removed {removed} message(s)");
            Ok(())
        }
    }
}

fn cmd_stats(herald: &Herald, format: Format) -> anyhow::Result<()> {
    let stats = herald.inspect_queue()?.stats();

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        Format::Text => {
            println!("{:<12} {:>8}", "STATUS", "COUNT");
            println!("{}", "-".repeat(21));
            for status in MessageStatus::ALL {
                let name = status.to_string();
                println!("{name:<12} {:>8}", stats.with_status(status));
            }
            println!("{}", "-".repeat(21));
            println!("{:<12} {:>8}", "total", stats.total);
        }
    }

    Ok(())
}

fn cmd_list(herald: &Herald, status: Option<MessageStatus>, format: Format) -> anyhow::Result<()> {
    let messages = herald.inspect_queue()?.get_all(status);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&messages)?),
        Format::Text => {
            println!(
                "{:<28} {:<6} {:<11} {:<9} {:<10} TARGET",
                "MESSAGE ID", "KIND", "STATUS", "ATTEMPTS", "AGE"
            );
            println!("{}", "-".repeat(90));

            let now = Utc::now();
            for message in &messages {
                let id = message.id.to_string();
                let kind = message.kind().to_string();
                let status = message.status.to_string();
                let attempts = format!("{}/{}", message.attempts, message.max_attempts);
                let age = format_age(message.created_at, now);

                println!(
                    "{id:<28} {kind:<6} {status:<11} {attempts:<9} {age:<10} {}",
                    target(&message.payload)
                );
            }

            println!("\nTotal: {} message(s)", messages.len());
        }
    }

    Ok(())
}

fn cmd_show(herald: &Herald, id: &MessageId, format: Format) -> anyhow::Result<()> {
    let Some(message) = herald.inspect_queue()?.get(id).cloned() else {
        anyhow::bail!("Message {id} not found");
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&message)?),
        Format::Text => print_message(&message),
    }

    Ok(())
}

fn print_message(message: &QueuedMessage) {
    let now = Utc::now();

    println!("Message ID: {}", message.id);
    println!("Kind: {}", message.kind());
    println!("Target: {}", target(&message.payload));
    println!("Status: {}", message.status);
    println!("Attempts: {}/{}", message.attempts, message.max_attempts);
    println!(
        "Created: {} ({} ago)",
        message.created_at.to_rfc3339(),
        format_age(message.created_at, now)
    );

    if let Some(at) = message.last_attempt_at {
        println!("Last attempt: {}", at.to_rfc3339());
    }
    if let Some(at) = message.next_retry_at {
        println!("Next retry: {}", at.to_rfc3339());
    }
    if let Some(at) = message.completed_at {
        println!("Completed: {}", at.to_rfc3339());
    }
    if let Some(error) = &message.error {
        println!("Last error: {error}");
    }
}

fn cmd_enqueue(herald: &Herald, path: &Path, max_attempts: Option<u32>) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read payload from {}: {e}", path.display()))?;
    let payload: Payload = serde_json::from_str(&content)?;

    let id = herald.open_queue()?.lock().add(payload, max_attempts)?;
    println!("{id}");

    Ok(())
}

/// Who a payload is addressed to, without any credentials.
fn target(payload: &Payload) -> String {
    match payload {
        Payload::Chat(chat) => format!("chat {}", chat.chat_id),
        Payload::Email(email) => format!("{} via {}:{}", email.to, email.host, email.port),
    }
}

fn format_age(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - since).num_seconds().max(0);

    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86400 {
        format!("{}h", seconds / 3600)
    } else {
        format!("{}d", seconds / 86400)
    }
}
