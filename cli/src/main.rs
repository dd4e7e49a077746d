use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use envelopes::{ClientCommand, ServerEvent};
use partner_chat::{
    Attachment, ChatClient, ChatConfig, ChatError, CommandSink, ConversationKey, RestClient, SendOutcome, Session,
    UserRole,
};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[cfg(test)]
#[path = "main_test.rs"]
mod main_test;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("failed to read attachment {path}: {source}")]
    Attachment {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("some attachments failed to upload: {0}")]
    PartialUpload(String),
    #[error("invalid JSON output: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "partner-chat", about = "Partner chat REST and websocket CLI")]
struct Cli {
    #[arg(long, env = "CHAT_TOKEN")]
    token: String,

    #[arg(long, env = "CHAT_USER_ID")]
    user_id: String,

    #[arg(long, env = "CHAT_USER_ROLE", default_value = "partner")]
    role: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List conversations, most recent activity first.
    Roster {
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Show direct, support and total unread counts.
    Unread,
    /// Print the history of a conversation (`<user_id>` or `support:<chat_id>`).
    History { conversation: ConversationKey },
    Send(SendArgs),
    Edit {
        conversation: ConversationKey,
        message_id: String,
        text: String,
    },
    Delete {
        conversation: ConversationKey,
        message_id: String,
    },
    Block {
        user_id: String,
        #[arg(long, default_value_t = false)]
        unblock: bool,
    },
    /// Stay connected and print live events until interrupted.
    Watch {
        #[arg(long)]
        conversation: Option<ConversationKey>,
    },
}

#[derive(Args, Debug)]
struct SendArgs {
    conversation: ConversationKey,

    #[arg(default_value = "")]
    text: String,

    #[arg(long = "attach", help = "File to upload with the message; repeatable")]
    attachments: Vec<PathBuf>,
}

/// Socket stand-in for one-shot commands, which always go through REST.
struct RestOnly;

impl CommandSink for RestOnly {
    fn is_open(&self) -> bool {
        false
    }

    fn send(&self, _command: &ClientCommand) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session = Session::new(cli.token, cli.user_id, cli.role.parse::<UserRole>()?)?;
    let config = ChatConfig::from_env()?;

    match cli.command {
        Command::Watch { conversation } => run_watch(session, config, conversation).await,
        command => {
            let client = rest_client(session, config)?;
            let result = run_once(&client, command).await;
            client.shutdown().await;
            result
        }
    }
}

fn rest_client(session: Session, config: ChatConfig) -> Result<ChatClient, CliError> {
    let api = Arc::new(RestClient::new(&config, &session)?);
    // No socket, so nothing ever arrives on this channel.
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    Ok(ChatClient::with_parts(session, config, api, Arc::new(RestOnly), events_rx))
}

async fn run_once(client: &ChatClient, command: Command) -> Result<(), CliError> {
    match command {
        Command::Roster { search } => {
            client.set_search(&search).await?;
            if search.trim().is_empty() {
                client.refresh_roster().await?;
            }
            print_json(&serde_json::to_value(client.roster())?)
        }
        Command::Unread => {
            client.refresh_unread().await?;
            print_json(&json!({
                "direct": client.unread_direct(),
                "support": client.unread_support(),
                "total": client.badge_total(),
            }))
        }
        Command::History { conversation } => {
            client.select_conversation(conversation).await?;
            print_json(&serde_json::to_value(client.messages())?)
        }
        Command::Send(args) => run_send(client, args).await,
        Command::Edit { conversation, message_id, text } => {
            client.select_conversation(conversation).await?;
            client.edit(&message_id, &text).await?;
            eprintln!("edited {message_id}");
            Ok(())
        }
        Command::Delete { conversation, message_id } => {
            client.select_conversation(conversation).await?;
            client.delete(&message_id).await?;
            eprintln!("deleted {message_id}");
            Ok(())
        }
        Command::Block { user_id, unblock } => {
            client.set_blocked(&user_id, !unblock).await?;
            eprintln!("{} {user_id}", if unblock { "unblocked" } else { "blocked" });
            Ok(())
        }
        // Dispatched to `run_watch` before a REST-only client is built.
        Command::Watch { .. } => Ok(()),
    }
}

async fn run_send(client: &ChatClient, args: SendArgs) -> Result<(), CliError> {
    let attachments = args
        .attachments
        .iter()
        .map(|path| load_attachment(path))
        .collect::<Result<Vec<_>, _>>()?;

    client.select_conversation(args.conversation).await?;
    match client.send(&args.text, attachments).await? {
        SendOutcome::WithAttachments { message, failed } => {
            print_json(&serde_json::to_value(&message)?)?;
            if !failed.is_empty() {
                return Err(CliError::PartialUpload(failed.join(", ")));
            }
            Ok(())
        }
        SendOutcome::Rest(message) => print_json(&serde_json::to_value(&message)?),
        SendOutcome::Socket | SendOutcome::Edited => Ok(()),
    }
}

async fn run_watch(
    session: Session,
    config: ChatConfig,
    conversation: Option<ConversationKey>,
) -> Result<(), CliError> {
    let client = ChatClient::connect(session, config)?;
    let mut updates = client.subscribe();
    client.open_panel();
    if let Some(conversation) = conversation {
        if let Err(error) = client.select_conversation(conversation).await {
            tracing::warn!(%error, "initial history load failed");
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(event) => println!("{}", describe(&event)),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "watch output fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.logout().await;
    Ok(())
}

fn load_attachment(path: &Path) -> Result<Attachment, CliError> {
    let bytes = std::fs::read(path).map_err(|source| CliError::Attachment { path: path.display().to_string(), source })?;
    let file_name = path
        .file_name()
        .map_or_else(|| "attachment".to_owned(), |name| name.to_string_lossy().into_owned());
    Ok(Attachment { file_name, mime: None, bytes })
}

/// One JSON line per event for `watch`.
fn describe(event: &ServerEvent) -> Value {
    let detail = match event {
        ServerEvent::Message(message) | ServerEvent::SupportNewMessage(message) => {
            serde_json::to_value(message).unwrap_or(Value::Null)
        }
        ServerEvent::MessageUpdate(patch) | ServerEvent::SupportMessageUpdate(patch) => {
            json!({ "id": patch.id, "content": patch.content })
        }
        ServerEvent::MessageDelete(deleted) => json!({ "id": deleted.id }),
        ServerEvent::Read(receipt) => json!({ "message_ids": receipt.message_ids, "reader_id": receipt.reader_id }),
        ServerEvent::SupportMessagesRead(read) => json!({ "chat_id": read.chat_id }),
        ServerEvent::Presence(presence) => json!({ "user_id": presence.user_id, "online": presence.online() }),
        ServerEvent::Unknown(_) => Value::Null,
    };
    json!({ "type": event.kind(), "data": detail })
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
