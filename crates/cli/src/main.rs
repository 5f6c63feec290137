use {
    clap::{Parser, Subcommand},
    rand::Rng,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    beacon_dispatch::handshake::sign_handshake,
    beacon_gateway::{GatewayServices, memory::HmacTokenService, start_gateway},
    beacon_protocol::now_ms,
};

#[derive(Parser)]
#[command(name = "beacon", about = "Beacon — session hub and agent gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Chat token management.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Agent-side helpers.
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a signed chat credential for a user.
    Issue {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        username: String,
        /// Override the configured token lifetime, in seconds.
        #[arg(long)]
        ttl: Option<u64>,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Produce a handshake signature for the configured agent secret.
    Sign {
        #[arg(long)]
        agent_id: String,
        #[arg(long)]
        platform: String,
        /// Unix epoch milliseconds; defaults to now.
        #[arg(long)]
        timestamp: Option<i64>,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Secrets must never silently default to empty; generate an ephemeral one
/// and say so, the way a first run without configuration behaves.
fn ensure_secret(secret: &mut String, name: &str) {
    if secret.is_empty() {
        let fresh: String = rand::rng()
            .sample_iter(rand::distr::Alphanumeric)
            .take(48)
            .map(char::from)
            .collect();
        tracing::warn!("no {name} configured, generated an ephemeral one");
        *secret = fresh;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let mut config = beacon_config::discover_and_load();

    match cli.command {
        Commands::Gateway { bind, port } => {
            if let Some(bind) = bind {
                config.gateway.bind = bind;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            ensure_secret(&mut config.auth.agent_secret, "agent secret");
            ensure_secret(&mut config.auth.token_secret, "token secret");

            info!(version = env!("CARGO_PKG_VERSION"), "beacon starting");
            let token_ttl_ms = (config.auth.token_ttl_secs * 1_000) as i64;
            let services = GatewayServices::in_memory(&config.auth.token_secret, token_ttl_ms);
            start_gateway(&config, services).await
        }
        Commands::Token {
            action: TokenAction::Issue {
                user_id,
                username,
                ttl,
            },
        } => {
            anyhow::ensure!(
                !config.auth.token_secret.is_empty(),
                "auth.token_secret is not configured"
            );
            let ttl_ms = (ttl.unwrap_or(config.auth.token_ttl_secs) * 1_000) as i64;
            let tokens = HmacTokenService::new(&config.auth.token_secret, ttl_ms);
            println!("{}", tokens.issue(&user_id, &username, now_ms()));
            Ok(())
        }
        Commands::Agent {
            action: AgentAction::Sign {
                agent_id,
                platform,
                timestamp,
            },
        } => {
            anyhow::ensure!(
                !config.auth.agent_secret.is_empty(),
                "auth.agent_secret is not configured"
            );
            let timestamp = timestamp.unwrap_or_else(now_ms);
            let signature =
                sign_handshake(&config.auth.agent_secret, &agent_id, &platform, timestamp);
            println!(
                "{}",
                serde_json::json!({
                    "agentId": agent_id,
                    "platform": platform,
                    "timestamp": timestamp,
                    "signature": signature,
                })
            );
            Ok(())
        }
    }
}
