//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// Bearer-token authorization gateway for MCP servers
#[derive(Parser, Debug)]
#[command(name = "mcp-auth-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_AUTH_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MCP_AUTH_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MCP_AUTH_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MCP_AUTH_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_AUTH_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Require a bearer token on every non-public path
    #[arg(long, global = true)]
    pub require_auth: bool,

    /// Expected token audience (defaults to "mcp-server")
    #[arg(long, global = true)]
    pub audience: Option<String>,

    /// OIDC issuer URL
    #[arg(long, global = true)]
    pub issuer_url: Option<String>,

    /// Public URL of this server, advertised in challenges
    #[arg(long, global = true)]
    pub server_url: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref host) = self.host {
            config.server.host.clone_from(host);
        }
        if self.require_auth {
            config.auth.require_auth = true;
        }
        if let Some(ref audience) = self.audience {
            config.auth.audience.clone_from(audience);
        }
        if let Some(ref issuer_url) = self.issuer_url {
            config.auth.issuer_url = Some(issuer_url.clone());
        }
        if let Some(ref server_url) = self.server_url {
            config.auth.server_url = Some(server_url.clone());
        }
    }
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Load and validate configuration, then exit
    CheckConfig,
}
