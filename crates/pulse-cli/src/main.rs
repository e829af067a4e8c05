use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pulse_client::{
    submit_and_await, AgentRegistration, ApiClient, PollConfig, ProbeScheduler, Session,
    DEFAULT_PANEL_TARGETS,
};
use pulse_core::normalize::{self, DisplayStatus};
use pulse_core::{CheckOutcome, CheckRequest, CheckType};
use pulse_presence::{PresenceChannel, PresenceConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::Settings;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(about = "CheckPulse network diagnostics client", long_about = None)]
struct Cli {
    /// Backend API root (env: PULSE_API_URL)
    #[arg(long)]
    api_url: Option<String>,
    /// Presence push-channel URL (env: PULSE_WS_URL)
    #[arg(long)]
    ws_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single diagnostic check against a target
    Check {
        target: String,
        /// ping, dns, http, traceroute, tcp or full
        #[arg(long, short = 'k', default_value = "ping")]
        kind: CheckType,
        /// Required for tcp checks
        #[arg(long)]
        port: Option<u16>,
        /// Poll attempts before giving up
        #[arg(long, default_value_t = 15)]
        attempts: u32,
        /// Seconds between poll attempts
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    /// Probe the built-in target panel
    Panel {
        /// Keep sweeping on the fixed interval instead of once
        #[arg(long)]
        watch: bool,
    },
    /// One-shot online-agent count over HTTP
    Count,
    /// Stream the live agent count over the push channel
    Watch,
    /// Sign in and store the bearer token
    Login { username: String, password: String },
    /// Drop the stored bearer token
    Logout,
    /// Agent directory (requires a valid session)
    Agents {
        #[command(subcommand)]
        action: Option<AgentAction>,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// List registered agents
    List,
    /// Register a new monitoring agent
    Register {
        name: String,
        email: String,
        desc: String,
    },
    /// Delete an agent by id
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let settings = Settings::resolve(cli.api_url, cli.ws_url)?;

    let session = Session::new();
    let client = ApiClient::new(settings.api_url.clone(), session.clone());
    restore_session(&client, &settings).await?;

    match cli.command {
        Commands::Check {
            target,
            kind,
            port,
            attempts,
            interval,
        } => {
            let request = CheckRequest::new(target, kind, port);
            let poll = PollConfig {
                max_attempts: attempts,
                interval: Duration::from_secs(interval),
            };
            let outcome = match submit_and_await(&client, &request, &poll).await {
                Ok(outcome) => outcome,
                Err(err) => bail!("{err}"),
            };
            print_outcome(&request, &outcome);
        }
        Commands::Panel { watch } => {
            let targets = DEFAULT_PANEL_TARGETS
                .iter()
                .map(|target| target.to_string())
                .collect();
            let (scheduler, mut rx) = ProbeScheduler::new(
                Arc::new(client),
                targets,
                PollConfig::default(),
                pulse_client::probes::DEFAULT_SWEEP_INTERVAL,
            );
            if watch {
                tokio::spawn(scheduler.run());
                loop {
                    tokio::select! {
                        changed = rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            print_panel(rx.borrow().as_slice());
                        }
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
            } else {
                print_panel(&scheduler.sweep().await);
            }
        }
        Commands::Count => {
            let count = client.agent_count().await.context("agent count failed")?;
            println!("{count}");
        }
        Commands::Watch => {
            let channel = PresenceChannel::connect(
                PresenceConfig::new(settings.ws_url.clone()),
                client.clone(),
            );
            let mut counts = channel.counts();
            println!("online agents: {}", *counts.borrow());
            loop {
                tokio::select! {
                    changed = counts.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        println!("online agents: {}", *counts.borrow());
                    }
                    _ = tokio::signal::ctrl_c() => {
                        channel.teardown().await;
                        break;
                    }
                }
            }
        }
        Commands::Login { username, password } => {
            client
                .login(&username, &password)
                .await
                .context("login failed")?;
            let token = session.bearer().context("login did not store a token")?;
            config::save_token(&settings.token_path, &token)?;
            println!("signed in as {username}");
        }
        Commands::Logout => {
            session.logout();
            config::clear_token(&settings.token_path)?;
            println!("signed out");
        }
        Commands::Agents { action } => match action.unwrap_or(AgentAction::List) {
            AgentAction::List => {
                let agents = match client.list_agents().await {
                    Ok(agents) => agents,
                    Err(err) if err.is_authorization() => {
                        config::clear_token(&settings.token_path)?;
                        bail!("authorization required, run `pulse login`");
                    }
                    Err(err) => return Err(err).context("agent listing failed"),
                };
                if agents.is_empty() {
                    println!("no agents registered");
                }
                for agent in agents {
                    println!(
                        "{}  {}  [{}]  {}",
                        agent.id, agent.name, agent.status, agent.desc
                    );
                }
            }
            AgentAction::Register { name, email, desc } => {
                let registration = AgentRegistration { name, email, desc };
                client
                    .register_agent(&registration)
                    .await
                    .context("agent registration failed")?;
                println!("agent registered; the API key is sent by mail");
            }
            AgentAction::Delete { id } => {
                match client.delete_agent(&id).await {
                    Ok(()) => println!("agent {id} deleted"),
                    Err(err) if err.is_authorization() => {
                        config::clear_token(&settings.token_path)?;
                        bail!("authorization required, run `pulse login`");
                    }
                    Err(err) => return Err(err).context("agent deletion failed"),
                }
            }
        },
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Trust a stored token only after the backend accepts it; an invalid one
/// is dropped from disk so the next start does not retry it.
async fn restore_session(client: &ApiClient, settings: &Settings) -> Result<()> {
    let Some(token) = config::load_token(&settings.token_path) else {
        return Ok(());
    };
    client.session().login(token);
    if client.validate_session().await {
        info!("stored token accepted");
    } else {
        warn!("stored token rejected, signing out");
        client.session().logout();
        config::clear_token(&settings.token_path)?;
    }
    Ok(())
}

fn print_outcome(request: &CheckRequest, outcome: &CheckOutcome) {
    let normalized = normalize::normalize(outcome, request.check_type);
    let verdict = match normalized.display_status {
        DisplayStatus::Ok => "OK",
        DisplayStatus::Bad => "BAD",
        DisplayStatus::Pending => "PENDING",
    };
    println!("target: {}", request.target);
    println!("check:  {}", request.check_type);
    if let Some(port) = request.port {
        println!("port:   {port}");
    }
    println!("status: {} ({verdict})", outcome.status);
    println!("time:   {}", normalized.display_time);
    if let Some(seconds) = outcome.response_time {
        println!("server: {seconds:.3} s");
    }
    if let Some(seconds) = outcome.client_response_time {
        println!("client: {seconds:.3} s");
    }
    if let Some(error) = &outcome.error {
        println!("error:  {error}");
    }
    if let Some(id) = &outcome.id {
        println!("id:     {id}");
    }
    if let Some(created) = &outcome.created_at {
        println!("created: {created}");
    }
    if let Some(updated) = &outcome.updated_at {
        println!("updated: {updated}");
    }
    if let Some(data) = &outcome.data {
        println!("--- data ---");
        println!("{}", normalize::flatten_payload(data));
    }
    println!(
        "checked at {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
}

fn print_panel(entries: &[pulse_client::PanelEntry]) {
    for entry in entries {
        let verdict = match entry.status {
            DisplayStatus::Ok => "OK",
            DisplayStatus::Bad => "BAD",
            DisplayStatus::Pending => "...",
        };
        println!("{:<20} {:>10}  {verdict}", entry.target, entry.time);
    }
}
