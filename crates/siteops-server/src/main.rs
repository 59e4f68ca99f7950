//! SiteOps control server entry point.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use siteops_server::config::ServerConfig;
use siteops_server::Server;

#[derive(Parser)]
#[command(
    name = "siteops-server",
    about = "SiteOps control server: JSON-RPC 2.0 over TCP or stdio",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Limit overrides shared by the serving subcommands.
#[derive(Args, Clone, Default)]
struct LimitArgs {
    /// Largest message held in the buffer without a delimiter, in bytes.
    #[arg(long)]
    max_message_bytes: Option<usize>,

    /// Per-request handler timeout in seconds.
    #[arg(long)]
    request_timeout_secs: Option<u64>,

    /// Async operation timeout in seconds.
    #[arg(long)]
    operation_timeout_secs: Option<u64>,

    /// How long finished operations stay queryable, in seconds.
    #[arg(long)]
    operation_retention_secs: Option<u64>,

    /// Maximum concurrent connections.
    #[arg(long)]
    max_connections: Option<usize>,

    /// Advertised provider (repeatable). Replaces SITEOPS_PROVIDERS.
    #[arg(long = "provider")]
    providers: Vec<String>,

    /// Advertised feature flag (repeatable). Replaces SITEOPS_FEATURES.
    #[arg(long = "feature")]
    features: Vec<String>,
}

impl LimitArgs {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(bytes) = self.max_message_bytes {
            config.max_message_bytes = bytes;
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.operation_timeout_secs {
            config.operation_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.operation_retention_secs {
            config.operation_retention = Duration::from_secs(secs);
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if !self.providers.is_empty() {
            config.providers = self.providers;
        }
        if !self.features.is_empty() {
            config.features = self.features;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve over TCP (default).
    Serve {
        /// Listen address (host:port). Also reads SITEOPS_BIND.
        #[arg(long)]
        bind: Option<SocketAddr>,

        #[command(flatten)]
        limits: LimitArgs,
    },

    /// Serve a single connection over stdin/stdout.
    #[cfg(feature = "stdio")]
    Stdio {
        #[command(flatten)]
        limits: LimitArgs,
    },

    /// Print server capabilities and registered methods as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   siteops-server completions bash > ~/.local/share/bash-completion/completions/siteops-server
    ///   siteops-server completions zsh > ~/.zfunc/_siteops-server
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Serve {
        bind: None,
        limits: LimitArgs::default(),
    }) {
        Commands::Serve { bind, limits } => {
            let mut config = ServerConfig::from_env()?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            limits.apply(&mut config);

            let server = Server::builder(config).build()?;
            tracing::info!(
                bind = %server.config().bind,
                methods = server.methods().len(),
                "SiteOps server starting"
            );

            let shutdown = server.shutdown_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Ctrl-C received, shutting down");
                    shutdown.cancel();
                }
            });

            server.serve_tcp().await?;
        }

        #[cfg(feature = "stdio")]
        Commands::Stdio { limits } => {
            let mut config = ServerConfig::from_env()?;
            limits.apply(&mut config);
            let server = Server::builder(config).build()?;
            server.serve_stdio().await?;
        }

        Commands::Info => {
            let server = Server::builder(ServerConfig::from_env()?).build()?;
            let init = server.initialize_result();
            let methods = server.methods();
            let info = serde_json::json!({
                "server": init.server_info,
                "protocol_version": init.protocol_version,
                "capabilities": init.capabilities,
                "methods": methods,
                "method_count": methods.len(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "siteops-server", &mut std::io::stdout());
        }
    }

    Ok(())
}
