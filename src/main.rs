// ABOUTME: Main entry point for gridconn, a client for the multiplexed grid API connector
//
// Binary: gridconn
// Usage: gridconn [--config FILE] [--log-json] <COMMAND>
// - request: dial an endpoint and issue one request
// - config: print the effective configuration

#![allow(missing_docs)]

use anyhow::Result;
use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    setup_logging(args.log_json);
    setup_panic_handler();

    let config = cli::load_config(args.config.as_deref())?;

    match args.command {
        cli::Commands::Request(request_args) => cli::request::execute(request_args, config).await,
        cli::Commands::Config => cli::config::execute(&config),
    }
}

fn setup_logging(json: bool) {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gridconn=info".into());

    // Stdout carries command output, so logs go to stderr
    let layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
}

fn setup_panic_handler() {
    use tracing::error;

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!("Application panicked: {}", panic_info);
        default_hook(panic_info);
    }));
}
