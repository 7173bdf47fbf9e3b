//! Configuration module
//!
//! CLI argument parsing with environment variable support. The proxy takes
//! the upstream server as positional arguments, matching how players point
//! their client at a server address.

use clap::Parser;
use std::time::Duration;

use crate::error::{ProxyError, Result};

fn config_error(msg: impl Into<String>) -> ProxyError {
    ProxyError::Config(msg.into())
}

/// Parse duration string (e.g. "10s", "2m") or plain seconds
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
        format!(
            "Invalid duration '{}'. Use formats like '10s', '2m' or plain seconds",
            s
        )
    })
}

/// CLI arguments
///
/// Supports environment variables with MC_PROXY_ prefix
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Minecraft 1.9.4 MITM proxy with Entity Velocity interception"
)]
pub struct CliArgs {
    /// Upstream Minecraft server host (IP or hostname)
    #[arg(env = "MC_PROXY_UPSTREAM_HOST")]
    pub upstream_host: String,

    /// Upstream server port
    #[arg(env = "MC_PROXY_UPSTREAM_PORT", default_value_t = 25565)]
    pub upstream_port: u16,

    /// Bearer token from minecraft.net for online-mode servers (optional)
    #[arg(long, env = "MC_PROXY_TOKEN")]
    pub token: Option<String>,

    /// Local port the proxy listens on
    #[arg(long, env = "MC_PROXY_LISTEN_PORT", default_value_t = 25566)]
    pub listen_port: u16,

    /// Log mode: trace, debug, info, warn, error
    #[arg(long, env = "MC_PROXY_LOG_MODE", default_value = "info")]
    pub log_mode: String,

    // ==================== Performance Tuning ====================
    /// TCP connect timeout to the upstream server (default: 10s)
    #[arg(long, env = "MC_PROXY_CONNECT_TIMEOUT", default_value = "10s", value_parser = parse_duration, help_heading = "Performance")]
    pub connect_timeout: Duration,

    /// Socket buffer size in bytes for both ends (default: 64KB)
    #[arg(long, env = "MC_PROXY_BUFFER_SIZE", default_value_t = 64 * 1024, help_heading = "Performance")]
    pub buffer_size: usize,

    /// TCP listen backlog for pending connections (default: 1024)
    #[arg(
        long,
        env = "MC_PROXY_TCP_BACKLOG",
        default_value_t = 1024,
        help_heading = "Performance"
    )]
    pub tcp_backlog: i32,

    /// Enable TCP_NODELAY for lower latency (default: true)
    #[arg(
        long,
        env = "MC_PROXY_TCP_NODELAY",
        default_value_t = true,
        help_heading = "Performance"
    )]
    pub tcp_nodelay: bool,
}

impl CliArgs {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the CLI arguments
    pub fn validate(&self) -> Result<()> {
        if self.upstream_host.is_empty() {
            return Err(config_error("Upstream host is required"));
        }
        if self.upstream_port == 0 {
            return Err(config_error("Upstream port must be a positive integer"));
        }
        if self.listen_port == 0 {
            return Err(config_error("Listen port must be a positive integer"));
        }
        if self.connect_timeout.is_zero() {
            return Err(config_error("connect_timeout must be greater than 0"));
        }
        if self.buffer_size < 1024 {
            return Err(config_error("buffer_size must be at least 1024 bytes"));
        }
        match self.log_mode.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(config_error(format!("Invalid log mode: {}", other))),
        }
        Ok(())
    }
}

/// Connection performance configuration shared with every session
#[derive(Debug, Clone, Copy)]
pub struct ConnConfig {
    /// TCP connect timeout to the upstream server
    pub connect_timeout: Duration,
    /// Socket buffer size for data transfer
    pub buffer_size: usize,
    /// TCP listen backlog
    pub tcp_backlog: i32,
    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
}

impl ConnConfig {
    /// Create from CLI args
    pub fn from_cli(cli: &CliArgs) -> Self {
        Self {
            connect_timeout: cli.connect_timeout,
            buffer_size: cli.buffer_size,
            tcp_backlog: cli.tcp_backlog,
            tcp_nodelay: cli.tcp_nodelay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_cli_args() -> CliArgs {
        CliArgs {
            upstream_host: "play.example.net".to_string(),
            upstream_port: 25565,
            token: None,
            listen_port: 25566,
            log_mode: "info".to_string(),
            connect_timeout: Duration::from_secs(10),
            buffer_size: 64 * 1024,
            tcp_backlog: 1024,
            tcp_nodelay: true,
        }
    }

    #[test]
    fn test_validate_success() {
        assert!(create_test_cli_args().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_host() {
        let mut cli = create_test_cli_args();
        cli.upstream_host = "".to_string();
        let err = cli.validate().unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn test_validate_zero_ports() {
        let mut cli = create_test_cli_args();
        cli.upstream_port = 0;
        assert!(cli.validate().is_err());

        let mut cli = create_test_cli_args();
        cli.listen_port = 0;
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut cli = create_test_cli_args();
        cli.connect_timeout = Duration::ZERO;
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validate_tiny_buffer() {
        let mut cli = create_test_cli_args();
        cli.buffer_size = 512;
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validate_log_mode() {
        let mut cli = create_test_cli_args();
        cli.log_mode = "verbose".to_string();
        assert!(cli.validate().is_err());
        cli.log_mode = "debug".to_string();
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_conn_config_from_cli() {
        let cli = create_test_cli_args();
        let conn = ConnConfig::from_cli(&cli);
        assert_eq!(conn.connect_timeout, Duration::from_secs(10));
        assert_eq!(conn.buffer_size, 64 * 1024);
        assert_eq!(conn.tcp_backlog, 1024);
        assert!(conn.tcp_nodelay);
    }

    #[test]
    fn test_cli_parse_positional_upstream() {
        let cli = CliArgs::try_parse_from(["kbproxy", "mc.server.com", "25570"]).unwrap();
        assert_eq!(cli.upstream_host, "mc.server.com");
        assert_eq!(cli.upstream_port, 25570);
        assert_eq!(cli.listen_port, 25566);
        assert!(cli.token.is_none());
    }

    #[test]
    fn test_cli_parse_defaults_upstream_port() {
        let cli = CliArgs::try_parse_from(["kbproxy", "mc.server.com"]).unwrap();
        assert_eq!(cli.upstream_port, 25565);
    }
}
