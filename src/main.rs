//! MCP Auth Gateway - bearer-token authorization in front of an MCP server

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mcp_auth_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            cli.apply_overrides(&mut config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::CheckConfig) => check_config(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Validate configuration without serving
fn check_config(config: &Config) -> ExitCode {
    match config.validate() {
        Ok(()) => {
            println!("Configuration OK");
            println!("  listen:       {}:{}", config.server.host, config.server.port);
            println!("  require_auth: {}", config.auth.require_auth);
            println!("  audience:     {}", config.auth.effective_audience());
            println!(
                "  issuer:       {}",
                config.auth.issuer_url.as_deref().unwrap_or("-")
            );
            println!(
                "  exchange:     {}",
                if config.auth.token_exchange.is_complete() { "enabled" } else { "disabled" }
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        require_auth = config.auth.require_auth,
        "Starting MCP Auth Gateway"
    );

    // Create and run gateway
    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
