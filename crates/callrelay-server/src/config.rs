//! Runtime configuration, read once at startup from the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Server configuration sourced from environment variables. There is no
/// config file: the whole surface is two env vars, so there is nothing
/// to parse beyond them.
pub struct Config {
    pub bind_addr: SocketAddr,
}

impl Config {
    /// `PORT` selects the listening port (default 8080); the server
    /// always binds `0.0.0.0`. `RUST_LOG` controls log verbosity via
    /// `tracing_subscriber::EnvFilter` and is read directly by `main`,
    /// not here.
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        }
    }
}
