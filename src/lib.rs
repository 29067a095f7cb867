//! pulsebus - command-line tool for the pulsebus realtime pub/sub protocol
//!
//! Watches channels, issues one-shot requests and tails private streams
//! using `pulsebus-client`.

pub mod cli;
pub mod output;
