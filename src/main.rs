//! FlashMux Probe - Backend Health Checker
//!
//! This is the entry point for the `flashmux-probe` tool.
//! It opens one backend session the way the proxy would, optionally selects
//! a database, then runs periodic `PING` health checks against it.

use anyhow::{bail, Context};
use flashmux::connection::{BackendConfig, BackendConnection, BackendStats, Counter, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Probe configuration
struct Config {
    /// Backend host (TCP only)
    host: String,
    /// Backend port (TCP only)
    port: u16,
    /// Unix socket path, replaces host and port when set
    unix: Option<String>,
    user: Option<String>,
    password: Option<String>,
    /// Database to select after connecting
    db: Option<usize>,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    /// Pause between health checks
    interval: Duration,
    /// Number of health checks to run, 0 for unlimited
    count: u64,
}

impl Default for Config {
    fn default() -> Self {
        let backend = BackendConfig::default();
        Self {
            host: flashmux::DEFAULT_HOST.to_string(),
            port: flashmux::DEFAULT_PORT,
            unix: None,
            user: None,
            password: None,
            db: None,
            connect_timeout: backend.connect_timeout,
            read_timeout: backend.read_timeout,
            write_timeout: backend.write_timeout,
            interval: Duration::from_secs(1),
            count: 1,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("flashmux-probe version {}", flashmux::VERSION);
                    std::process::exit(0);
                }
                _ => {}
            }

            let value = match args.get(i + 1) {
                Some(value) => value.as_str(),
                None if is_known_flag(flag) => {
                    eprintln!("Error: {} requires a value", flag);
                    std::process::exit(1);
                }
                None => unknown_argument(flag),
            };

            match flag {
                "--host" | "-h" => config.host = value.to_string(),
                "--port" | "-p" => config.port = parse_or_exit(flag, value),
                "--unix" | "-s" => config.unix = Some(value.to_string()),
                "--user" => config.user = Some(value.to_string()),
                "--password" | "-a" => config.password = Some(value.to_string()),
                "--db" | "-n" => config.db = Some(parse_or_exit(flag, value)),
                "--connect-timeout-ms" => config.connect_timeout = millis_or_exit(flag, value),
                "--read-timeout-ms" => config.read_timeout = millis_or_exit(flag, value),
                "--write-timeout-ms" => config.write_timeout = millis_or_exit(flag, value),
                "--interval-ms" => config.interval = interval_or_exit(flag, value),
                "--count" | "-c" => config.count = parse_or_exit(flag, value),
                _ => unknown_argument(flag),
            }
            i += 2;
        }

        config
    }

    /// Builds the backend session configuration
    fn backend(&self) -> BackendConfig {
        let mut backend = match &self.unix {
            Some(path) => BackendConfig::unix(path.clone()),
            None => BackendConfig::tcp(format!("{}:{}", self.host, self.port)),
        }
        .with_timeouts(self.connect_timeout, self.read_timeout, self.write_timeout);
        backend.auth_user = self.user.clone();
        backend.auth_password = self.password.clone();
        backend
    }
}

fn is_known_flag(flag: &str) -> bool {
    matches!(
        flag,
        "--host"
            | "-h"
            | "--port"
            | "-p"
            | "--unix"
            | "-s"
            | "--user"
            | "--password"
            | "-a"
            | "--db"
            | "-n"
            | "--connect-timeout-ms"
            | "--read-timeout-ms"
            | "--write-timeout-ms"
            | "--interval-ms"
            | "--count"
            | "-c"
    )
}

fn unknown_argument(flag: &str) -> ! {
    eprintln!("Unknown argument: {}", flag);
    print_help();
    std::process::exit(1);
}

fn parse_or_exit<T: std::str::FromStr>(flag: &str, value: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value for {}: {}", flag, value);
        std::process::exit(1);
    })
}

fn millis_or_exit(flag: &str, value: &str) -> Duration {
    Duration::from_millis(parse_or_exit(flag, value))
}

/// Parses a check interval in milliseconds. Zero is rejected: the ticker
/// needs a non-zero period.
fn parse_interval(value: &str) -> Option<Duration> {
    match value.parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(millis) => Some(Duration::from_millis(millis)),
    }
}

fn interval_or_exit(flag: &str, value: &str) -> Duration {
    parse_interval(value).unwrap_or_else(|| {
        eprintln!("Error: {} must be a positive number of milliseconds", flag);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
flashmux-probe - Backend health checker for FlashMux

USAGE:
    flashmux-probe [OPTIONS]

OPTIONS:
    -h, --host <HOST>               Backend host (default: 127.0.0.1)
    -p, --port <PORT>               Backend port (default: 6379)
    -s, --unix <PATH>               Connect over a unix socket instead of TCP
        --user <USER>               User for AUTH
    -a, --password <PASSWORD>       Password for AUTH
    -n, --db <INDEX>                Database to select after connecting
        --connect-timeout-ms <MS>   Dial timeout (default: 50, 0 disables)
        --read-timeout-ms <MS>      Per-read timeout (default: 1000, 0 disables)
        --write-timeout-ms <MS>     Per-write timeout (default: 1000, 0 disables)
        --interval-ms <MS>          Pause between checks, at least 1 (default: 1000)
    -c, --count <N>                 Number of checks, 0 runs until Ctrl+C (default: 1)
    -v, --version                   Print version information
        --help                      Print this help message

ENVIRONMENT:
    RUST_LOG                        Log filter (default: info)

EXAMPLES:
    flashmux-probe                             # One PING against 127.0.0.1:6379
    flashmux-probe -p 6380 -n 2 -c 0           # Check db 2 on port 6380 forever
    flashmux-probe -s /tmp/redis.sock -a pass  # Authenticate over a unix socket

EXIT STATUS:
    0 when the last check succeeded, 1 otherwise.
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let backend_config = config.backend();
    info!(
        "flashmux-probe v{} checking {} backend {}",
        flashmux::VERSION,
        backend_config.transport,
        backend_config.endpoint
    );
    if backend_config.transport == Transport::Unix && cfg!(not(unix)) {
        bail!("unix sockets are not supported on this platform");
    }

    let stats = Arc::new(BackendStats::new());
    let mut backend = BackendConnection::with_metrics(backend_config, stats.clone());

    connect(&mut backend, config.db)
        .await
        .with_context(|| format!("could not open a session with {}", backend.endpoint()))?;

    let finished = tokio::select! {
        healthy = check_loop(&mut backend, &config) => Some(healthy),
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping probe...");
            None
        }
    };
    let healthy = match finished {
        Some(healthy) => healthy,
        None => backend.is_connected().await,
    };

    info!(
        "Probe finished: {} connects, {} disconnects, {} failed pings",
        stats.get(Counter::Connect),
        stats.get(Counter::Disconnect),
        stats.get(Counter::PingFailure)
    );
    backend.disconnect();

    if !healthy {
        bail!("backend {} failed its last health check", backend.endpoint());
    }
    Ok(())
}

/// Opens the session and selects the requested database
async fn connect(backend: &mut BackendConnection, db: Option<usize>) -> anyhow::Result<()> {
    backend.reconnect_if_necessary().await?;
    if let Some(db) = db {
        backend.select_database(db).await?;
        info!("Selected database {}", db);
    }
    Ok(())
}

/// Runs the configured number of health checks and reports the last outcome
async fn check_loop(backend: &mut BackendConnection, config: &Config) -> bool {
    let mut ticker = tokio::time::interval(config.interval);
    let mut healthy = false;
    let mut round = 0u64;

    while config.count == 0 || round < config.count {
        ticker.tick().await;
        round += 1;

        // A failed check drops the session; bring it back first.
        if !backend.is_connected().await {
            if let Err(e) = connect(backend, config.db).await {
                warn!("Check {}: reconnect failed: {}", round, e);
                healthy = false;
                continue;
            }
        }

        healthy = backend.check_connection().await;
        if healthy {
            info!("Check {}: PONG (db {})", round, backend.database_id());
        } else {
            warn!("Check {}: backend did not answer PING", round);
        }
    }

    healthy
}
