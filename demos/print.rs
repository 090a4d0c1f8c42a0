//! Print Reader - logs every message it receives.
//!
//! This example demonstrates:
//! - Building a consumer with the builder pattern
//! - A handler that succeeds on every message
//! - Stopping cleanly on Ctrl-C so in-flight messages are acknowledged
//!
//! # Running against a local broker
//!
//! ```text
//! RUST_LOG=qreader=debug cargo run --example print -- 127.0.0.1:4150 events print
//! ```

use std::time::Duration;

use qreader::handler::FnHandler;
use qreader::{Consumer, Message};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "127.0.0.1:4150".to_string());
    let topic = args.next().unwrap_or_else(|| "events".to_string());
    let channel = args.next().unwrap_or_else(|| "print#ephemeral".to_string());

    let consumer = Consumer::builder(address, topic, channel)
        .max_in_flight(10)
        .heartbeat_timeout(Duration::from_secs(60))
        .build(FnHandler::new(|message: Message| async move {
            println!(
                "{} (attempt {}): {}",
                message.id(),
                message.attempts(),
                String::from_utf8_lossy(message.body())
            );
            Ok(())
        }))?;
    tracing::info!("{} starting", consumer);

    // Stop on Ctrl-C; run() returns once in-flight messages are drained
    let handle = consumer.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop().await;
        }
    });

    consumer.run().await?;
    Ok(())
}
