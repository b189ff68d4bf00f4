//! toolgate-runner - runs one plugin call under OS resource limits.
//!
//! Stdout carries exactly one JSON envelope line; logs go to stderr.

use clap::Parser;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolgate::domain::Envelope;
use toolgate::sandbox::runner::{self, RunnerArgs};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let envelope = match RunnerArgs::try_parse() {
        Ok(args) => runner::run(args).await,
        Err(e) => Envelope::failure(
            format!("Invalid runner arguments: {}", e.to_string().trim()),
            json!({}),
        ),
    };

    runner::emit(&envelope);
    std::process::exit(if envelope.ok { 0 } else { 1 });
}
