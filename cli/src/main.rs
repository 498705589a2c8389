use std::time::Duration;

use chatlink::config::{DEFAULT_AUTH_URL, DEFAULT_HEARTBEAT_SECS, DEFAULT_WS_URL};
use chatlink::{
    AuthError, AuthToken, ChatClient, ClientConfig, ClientError, ClientEvent, ConnectionState,
    Credentials, ErrorKind,
};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("stdin read failed: {0}")]
    Stdin(#[from] std::io::Error),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("could not start connection: {0}")]
    ConnectFailed(String),
    #[error("missing websocket address (set --ws-url or CHATLINK_WS_URL)")]
    MissingWsUrl,
    #[error("missing auth token (set --token or CHATLINK_TOKEN)")]
    MissingToken,
    #[error("server is unhealthy: status={status} redis={redis}")]
    Unhealthy { status: String, redis: String },
}

#[derive(Parser, Debug)]
#[command(name = "chatlink", about = "Authenticated WebSocket chat client")]
struct Cli {
    #[arg(long, env = "CHATLINK_AUTH_URL", default_value = DEFAULT_AUTH_URL)]
    auth_url: String,

    #[arg(long, env = "CHATLINK_WS_URL", default_value = DEFAULT_WS_URL)]
    ws_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and chat: stdin lines are sent, inbound messages are printed.
    Chat(ChatArgs),
    /// Print a fresh auth token.
    Login(CredentialArgs),
    /// Create an account.
    Register(RegisterArgs),
    /// Invalidate an auth token.
    Logout(TokenArgs),
    /// Print the username that owns an auth token.
    Whoami(TokenArgs),
    /// Query the server health endpoint.
    Health(HealthArgs),
}

#[derive(Args, Debug)]
struct CredentialArgs {
    #[arg(long, env = "CHATLINK_USERNAME")]
    username: String,

    #[arg(long, env = "CHATLINK_PASSWORD", hide_env_values = true)]
    password: String,
}

impl From<CredentialArgs> for Credentials {
    fn from(args: CredentialArgs) -> Self {
        Credentials::new(args.username, args.password)
    }
}

#[derive(Args, Debug)]
struct ChatArgs {
    #[command(flatten)]
    credentials: CredentialArgs,

    #[arg(long, env = "CHATLINK_HEARTBEAT_SECS", default_value_t = DEFAULT_HEARTBEAT_SECS)]
    heartbeat_secs: u64,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[command(flatten)]
    credentials: CredentialArgs,

    #[arg(long, help = "Defaults to the `register` sibling of --auth-url")]
    register_url: Option<String>,
}

#[derive(Args, Debug)]
struct TokenArgs {
    #[arg(long, env = "CHATLINK_TOKEN", hide_env_values = true)]
    token: String,

    #[arg(long, help = "Defaults to the matching sibling of --auth-url")]
    url: Option<String>,
}

impl TokenArgs {
    fn token(&self) -> Result<AuthToken, CliError> {
        AuthToken::new(self.token.trim()).ok_or(CliError::MissingToken)
    }
}

#[derive(Args, Debug)]
struct HealthArgs {
    #[arg(long, help = "Defaults to the `health` sibling of --auth-url")]
    health_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => run_chat(&cli.auth_url, &cli.ws_url, args).await,
        Command::Login(args) => run_login(&cli.auth_url, args).await,
        Command::Register(args) => run_register(&cli.auth_url, args).await,
        Command::Logout(args) => run_logout(&cli.auth_url, args).await,
        Command::Whoami(args) => run_whoami(&cli.auth_url, args).await,
        Command::Health(args) => run_health(&cli.auth_url, args).await,
    }
}

async fn run_chat(auth_url: &str, ws_url: &str, args: ChatArgs) -> Result<(), CliError> {
    if ws_url.trim().is_empty() {
        return Err(CliError::MissingWsUrl);
    }

    let config = ClientConfig::new(auth_url, ws_url)
        .with_heartbeat_interval(Duration::from_secs(args.heartbeat_secs));
    let (client, mut events) = ChatClient::spawn(config);
    client.connect(args.credentials.into())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut attempted = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ClientEvent::StateChanged(state) => {
                        attempted |= state == ConnectionState::Connecting;
                        eprintln!("-- {state}");
                        if state == ConnectionState::Closed {
                            break;
                        }
                    }
                    ClientEvent::Message(envelope) => println!("< {}", envelope.message()),
                    ClientEvent::Error { kind, detail } => {
                        if let Some(error) = startup_failure(kind, attempted, detail.clone()) {
                            return Err(error);
                        }
                        eprintln!("!! {kind}: {detail}");
                    }
                }
            }
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    info!("chat: stdin closed; disconnecting");
                    stdin_open = false;
                    if hang_up(&client)? {
                        break;
                    }
                    continue;
                };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if text == "/quit" {
                    info!("chat: quit requested; disconnecting");
                    stdin_open = false;
                    if hang_up(&client)? {
                        break;
                    }
                    continue;
                }
                match client.send(text) {
                    Ok(()) => println!("> {text}"),
                    Err(ClientError::NotConnected) => {
                        warn!(state = %client.state(), "chat: not connected; message dropped");
                    }
                    Err(error) => return Err(error.into()),
                }
            }
        }
    }

    Ok(())
}

/// Errors that end the chat before any connection was attempted. Later
/// errors are printed and the loop keeps waiting for `Closed`.
fn startup_failure(kind: ErrorKind, attempted: bool, detail: String) -> Option<CliError> {
    match kind {
        ErrorKind::Authentication => Some(CliError::AuthenticationFailed(detail)),
        ErrorKind::Transport if !attempted => Some(CliError::ConnectFailed(detail)),
        _ => None,
    }
}

/// Request a disconnect; returns `true` when there is nothing left to wait for.
fn hang_up(client: &ChatClient) -> Result<bool, CliError> {
    client.disconnect()?;
    Ok(matches!(
        client.state(),
        ConnectionState::Idle | ConnectionState::Closed
    ))
}

async fn run_login(auth_url: &str, args: CredentialArgs) -> Result<(), CliError> {
    let http = reqwest::Client::new();
    let token = chatlink::auth::acquire_token(&http, auth_url, &args.into()).await?;
    println!("{}", token.as_str());
    Ok(())
}

async fn run_register(auth_url: &str, args: RegisterArgs) -> Result<(), CliError> {
    let url = args
        .register_url
        .unwrap_or_else(|| sibling_endpoint(auth_url, "register"));
    let http = reqwest::Client::new();
    let username = chatlink::auth::register(&http, &url, &args.credentials.into()).await?;
    println!("registered {username}");
    Ok(())
}

async fn run_logout(auth_url: &str, args: TokenArgs) -> Result<(), CliError> {
    let token = args.token()?;
    let url = args
        .url
        .unwrap_or_else(|| sibling_endpoint(auth_url, "logout"));
    chatlink::auth::logout(&reqwest::Client::new(), &url, &token).await?;
    println!("logged out");
    Ok(())
}

async fn run_whoami(auth_url: &str, args: TokenArgs) -> Result<(), CliError> {
    let token = args.token()?;
    let url = args.url.unwrap_or_else(|| sibling_endpoint(auth_url, "user"));
    let username = chatlink::auth::user_info(&reqwest::Client::new(), &url, &token).await?;
    println!("{username}");
    Ok(())
}

async fn run_health(auth_url: &str, args: HealthArgs) -> Result<(), CliError> {
    let url = args
        .health_url
        .unwrap_or_else(|| sibling_endpoint(auth_url, "health"));
    let http = reqwest::Client::new();
    let report = chatlink::auth::check_health(&http, &url).await?;

    let redis = report.redis.unwrap_or_else(|| "unknown".to_owned());
    if !report.healthy {
        return Err(CliError::Unhealthy {
            status: report.status,
            redis,
        });
    }
    println!("ok status={} redis={redis}", report.status);
    Ok(())
}

/// Replace the last path segment of `endpoint` with `name`.
fn sibling_endpoint(endpoint: &str, name: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((base, _)) if !base.ends_with('/') => format!("{base}/{name}"),
        _ => format!("{trimmed}/{name}"),
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
