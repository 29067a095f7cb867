//! pulsebus CLI entry point

use anyhow::{bail, Context, Result};
use clap::Parser;
use pulsebus::cli::{Cli, Commands};
use pulsebus::output::format_event;
use pulsebus_client::{ConnectionState, Envelope, Expect, PrivateChannel, PulseClient};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing; stdout is reserved for events
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let client = PulseClient::builder(cli.config())
        .cookies(cli.cookie_jar())
        .build();
    let pretty = cli.pretty;

    match cli.command {
        Commands::Watch { channels } => watch(client, channels, pretty).await,
        Commands::Call {
            tag,
            payload,
            expect,
            key,
        } => call(client, tag, payload, expect, key, pretty).await,
        Commands::Private {
            stream,
            params,
            event,
        } => private(client, stream, params, event, pretty).await,
    }
}

async fn watch(client: PulseClient, channels: Vec<String>, pretty: bool) -> Result<()> {
    for channel in &channels {
        client.listen(channel, move |event| println!("{}", format_event(event, pretty)));
    }
    client.subscribe(&channels).context("Failed to subscribe")?;

    client
        .ready()
        .await
        .with_context(|| format!("Handshake with {} failed", client.config().url))?;
    info!(channels = ?channels, "Watching");

    run_until_interrupted(&client).await
}

async fn call(
    client: PulseClient,
    tag: String,
    payload: Option<Value>,
    expect: String,
    key: Option<(String, Value)>,
    pretty: bool,
) -> Result<()> {
    let request = Envelope::from_value(tag.clone(), payload.unwrap_or(Value::Null));

    let mut expectation = Expect::event(expect).or_error();
    if let Some((field, value)) = key {
        expectation = expectation.keyed(field, value);
    }

    let response = client
        .call(request, expectation)
        .await
        .with_context(|| format!("{} failed", tag))?;
    println!("{}", format_event(&response, pretty));

    client.close();
    Ok(())
}

async fn private(
    client: PulseClient,
    stream: String,
    params: Option<Value>,
    event: String,
    pretty: bool,
) -> Result<()> {
    let params = params.unwrap_or(Value::Null);
    let channel = PrivateChannel::open(&client, &stream, &params, &event, move |e| {
        println!("{}", format_event(e, pretty))
    })
    .with_context(|| format!("Failed to open private stream {}", stream))?;

    client
        .ready()
        .await
        .with_context(|| format!("Handshake with {} failed", client.config().url))?;
    info!(stream = %stream, event = %event, "Tailing private stream");

    let result = run_until_interrupted(&client).await;
    channel.close();
    result
}

/// Block until Ctrl-C or until the connection goes away
async fn run_until_interrupted(client: &PulseClient) -> Result<()> {
    let mut state = client.state_receiver();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                debug!("Interrupted");
                client.close();
                return Ok(());
            }
            changed = state.changed() => {
                changed.context("Client dropped")?;
                let now = *state.borrow_and_update();
                if matches!(now, ConnectionState::Disconnected | ConnectionState::Closed) {
                    bail!("Connection lost");
                }
            }
        }
    }
}
