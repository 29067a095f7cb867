//! CLI command definitions

use clap::{Parser, Subcommand};
use pulsebus_client::{CookieJar, PulseConfig, WireFormat, DEFAULT_COOKIE_NAME};
use serde_json::Value;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "pulsebus")]
#[command(about = "Watch channels and issue requests on a pulsebus server", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Server URL (ws://, wss://, http:// or https://)
    #[arg(long, env = "PULSEBUS_URL", global = true, default_value = "ws://localhost:9123/websocket")]
    pub url: String,

    /// Bearer token sent in the handshake
    #[arg(long, env = "PULSEBUS_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Cookie header to load, e.g. "User-Token=abc; theme=dark"
    #[arg(long, env = "PULSEBUS_COOKIE", global = true, hide_env_values = true)]
    pub cookie: Option<String>,

    /// Cookie the token is read from
    #[arg(long, global = true, default_value = DEFAULT_COOKIE_NAME)]
    pub cookie_name: String,

    /// Wire format: cbor or json
    #[arg(long, env = "PULSEBUS_FORMAT", global = true, default_value = "cbor", value_parser = parse_wire_format)]
    pub format: WireFormat,

    /// Seconds to wait for the handshake and for call responses
    #[arg(long, global = true, default_value_t = 10)]
    pub timeout: u64,

    /// Pretty-print events
    #[arg(long, global = true)]
    pub pretty: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Subscribe to channels and print every event until interrupted
    ///
    /// Examples:
    ///   pulsebus watch Throughput WorstRTT
    Watch {
        /// Channel names
        #[arg(required = true)]
        channels: Vec<String>,
    },

    /// Send one request and print the response
    ///
    /// The request races the generic Error event; an error exits non-zero.
    ///
    /// Examples:
    ///   pulsebus call GetConfig --expect GetConfigResult
    ///   pulsebus call GetHistory --payload '{"seconds":300}' --expect History --key seconds=300
    Call {
        /// Request tag
        tag: String,

        /// Request payload (JSON)
        #[arg(long, value_parser = parse_json)]
        payload: Option<Value>,

        /// Response event to wait for
        #[arg(long, required = true)]
        expect: String,

        /// Only accept a response whose FIELD equals VALUE
        #[arg(long, value_parser = parse_key)]
        key: Option<(String, Value)>,
    },

    /// Open a private stream and print its events until interrupted
    ///
    /// Examples:
    ///   pulsebus private CircuitFeed --params '{"circuit":7}' --event CircuitSample
    Private {
        /// Stream name
        stream: String,

        /// Stream parameters (JSON)
        #[arg(long, value_parser = parse_json)]
        params: Option<Value>,

        /// Event the stream answers on
        #[arg(long, required = true)]
        event: String,
    },
}

impl Cli {
    /// Client configuration from the global flags
    pub fn config(&self) -> PulseConfig {
        PulseConfig::new(self.url.clone())
            .cookie_name(self.cookie_name.clone())
            .operation_timeout(Duration::from_secs(self.timeout))
            .wire_format(self.format)
    }

    /// Cookie jar from `--cookie`, with `--token` taking precedence
    pub fn cookie_jar(&self) -> CookieJar {
        let jar = match &self.cookie {
            Some(header) => CookieJar::from_header(header),
            None => CookieJar::new(),
        };
        if let Some(token) = &self.token {
            jar.set(self.cookie_name.clone(), token.clone());
        }
        jar
    }
}

pub fn parse_wire_format(s: &str) -> Result<WireFormat, String> {
    s.parse().map_err(|e: pulsebus_client::PulseError| e.to_string())
}

/// Parse a JSON argument
pub fn parse_json(s: &str) -> Result<Value, String> {
    serde_json::from_str(s).map_err(|e| format!("Invalid JSON: {}", e))
}

/// Parse `FIELD=VALUE`. The value is taken as JSON when it parses, so
/// `seconds=300` matches the number 300; otherwise it is a string.
pub fn parse_key(s: &str) -> Result<(String, Value), String> {
    let (field, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid key: {}. Expected FIELD=VALUE", s))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("Invalid key: {}. Field name is empty", s));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((field.to_string(), value))
}
