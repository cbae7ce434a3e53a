//! CLI surface: role, ports, remote host, and local-adapter choice.
//! Parsed with `clap`'s derive API — the original Go program
//! (`original_source/main.go`) hand-rolls this with the standard `flag`
//! package.

use clap::{Parser, ValueEnum};
use log::LevelFilter;

/// The crate version, extracted from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug, Clone)]
#[command(
    name = "bitunnel",
    version = VERSION,
    about = "Bidirectional persistent tunnel multiplexer"
)]
pub struct Cli {
    /// Role selection: accept a tunnel connection, or initiate one.
    #[arg(long = "mode", value_enum, default_value_t = Mode::Server)]
    pub mode: Mode,

    /// Tunnel port: bind in server mode, connect in client mode.
    #[arg(long = "p")]
    pub port: u16,

    /// Control-plane port.
    #[arg(long = "apiport")]
    pub apiport: u16,

    /// Remote host to dial (client mode only).
    #[arg(long = "s", default_value = "localhost")]
    pub server: String,

    /// Local adapter implementation driving each tunnel.
    #[arg(long = "handler", value_enum, default_value_t = Handler::Api)]
    pub handler: Handler,

    /// Local endpoint the tunnel-side forwarding adapter dials into when a
    /// peer sends a new exchange. The upstream Go program hardcodes
    /// `localhost:8080` for this (`original_source/socket/httpforwarder.go`);
    /// exposing it as a flag is the natural generalization.
    #[arg(long = "target", default_value = "127.0.0.1:8080")]
    pub target: String,

    /// Leveled logging verbosity (ambient; not part of the original flags).
    #[arg(long = "log-level", default_value_t = LevelFilter::Info)]
    pub log_level: LevelFilter,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Server,
    Client,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Api,
    Echo,
}

pub fn parse() -> Cli {
    Cli::parse()
}
