//! Command-line interface

mod commands;

pub use commands::{parse_json, parse_key, parse_wire_format, Cli, Commands};
