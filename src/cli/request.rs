// ABOUTME: CLI request command issuing one request through a fresh pool
//
// Dials the endpoint, opens an interface, sends the request and prints the
// JSON response. A missing response is an error so the exit code is non-zero.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::info;

use super::RequestArgs;
use gridconn::{ConnectionPool, ConnectorConfig};

pub async fn execute(args: RequestArgs, config: ConnectorConfig) -> Result<()> {
    let payload: Value = serde_json::from_str(&args.payload).context("--payload is not valid JSON")?;
    let timeout = args
        .timeout_ms
        .map_or(config.request_timeout, Duration::from_millis);

    let pool = ConnectionPool::new(config);
    let result = send(&pool, &args, &payload, timeout).await;
    pool.shutdown().await;

    match result? {
        Some(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        None => bail!(
            "No response to {} from {} within {}ms",
            args.request_type,
            args.endpoint,
            timeout.as_millis()
        ),
    }
}

async fn send(pool: &ConnectionPool, args: &RequestArgs, payload: &Value, timeout: Duration) -> Result<Option<Value>> {
    let connection = pool
        .connect(&args.endpoint)
        .await
        .with_context(|| format!("Failed to connect to {}", args.endpoint))?;
    let interface = connection.create_interface()?;

    info!(
        "Sending {} on interface {} of connection {}",
        args.request_type,
        interface.id(),
        connection.id()
    );
    let response = interface
        .request_with_timeout(&args.request_type, payload, timeout)
        .await
        .with_context(|| format!("{} request failed", args.request_type))?;
    interface.close();
    Ok(response)
}
