use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use parley_client::{ChatFeed, FeedConfig, FeedState, HttpClient, Socket, SocketConfig};
use parley_proto::{Message, Scope};
use time::{macros::format_description, OffsetDateTime};
use tracing_subscriber::EnvFilter;
use url::Url;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Base URL of the parley server.
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    server: Url,
    /// Bearer token (see `parley-server --issue-token`).
    #[arg(long)]
    token: String,
    /// Refetch interval while the live channel is down.
    #[arg(long, default_value_t = 1000)]
    poll_ms: u64,
    /// Delay between reconnect attempts.
    #[arg(long, default_value_t = 1000)]
    reconnect_ms: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a channel or conversation and follow new messages.
    Tail(Target),
    /// Post a message.
    Send {
        #[command(flatten)]
        target: Target,
        content: String,
        #[arg(long)]
        file_url: Option<String>,
    },
}

#[derive(Args, Debug)]
struct Target {
    #[arg(long)]
    channel: Option<Uuid>,
    #[arg(long)]
    conversation: Option<Uuid>,
}

impl Target {
    fn resolve(&self) -> Result<(Scope, Uuid)> {
        match (self.channel, self.conversation) {
            (Some(id), None) => Ok((Scope::Channel, id)),
            (None, Some(id)) => Ok((Scope::Conversation, id)),
            _ => bail!("pass exactly one of --channel or --conversation"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();
    let http = HttpClient::new(cli.server.clone(), cli.token.clone());

    match &cli.command {
        Command::Send {
            target,
            content,
            file_url,
        } => {
            let (scope, id) = target.resolve()?;
            let message = http.create(scope, id, content, file_url.as_deref()).await?;
            println!("{}", message.id);
        }
        Command::Tail(target) => {
            let (scope, id) = target.resolve()?;
            tail(&cli, http, scope, id).await?;
        }
    }
    Ok(())
}

async fn tail(cli: &Cli, http: HttpClient, scope: Scope, id: Uuid) -> Result<()> {
    let mut socket_cfg = SocketConfig::new(http.ws_url()?, cli.token.clone());
    socket_cfg.reconnect_delay = Duration::from_millis(cli.reconnect_ms);
    let socket = Socket::connect(socket_cfg);
    let feed = ChatFeed::open(
        socket.clone(),
        Arc::new(http),
        scope,
        id,
        FeedConfig {
            poll_interval: Duration::from_millis(cli.poll_ms),
        },
    );
    let mut revision = feed.watch_revision();
    let mut state = feed.watch_state();
    // message id -> updated_at of the version last printed
    let mut printed: HashMap<Uuid, i64> = HashMap::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = revision.changed() => {
                if changed.is_err() {
                    break;
                }
                let mut messages = feed.messages();
                messages.reverse();
                for message in &messages {
                    match printed.insert(message.id, message.updated_at) {
                        None => println!("{}", render(message)),
                        Some(seen) if seen != message.updated_at => println!("* {}", render(message)),
                        Some(_) => {}
                    }
                }
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = *state.borrow();
                match now {
                    FeedState::Live => eprintln!("-- live"),
                    FeedState::Polling => eprintln!("-- connection lost, polling"),
                    FeedState::Disconnected => {}
                }
            }
        }
    }
    feed.close();
    socket.shutdown();
    Ok(())
}

fn render(message: &Message) -> String {
    let format = format_description!("[hour]:[minute]:[second]");
    let stamp = OffsetDateTime::from_unix_timestamp_nanos(message.created_at as i128 * 1_000_000)
        .ok()
        .and_then(|t| t.format(&format).ok())
        .unwrap_or_default();
    let mut line = format!("[{stamp}] {}: {}", message.member.profile.name, message.content);
    if message.is_edited() {
        line.push_str(" (edited)");
    }
    if let Some(url) = &message.file_url {
        line.push_str(&format!(" <{url}>"));
    }
    line
}
