//! Server configuration and CLI argument parsing
//!
//! This module handles all server configuration through a layered system that supports:
//! - Command-line arguments
//! - Environment variables (with THROTTR_ prefix)
//! - A configuration file (TOML, YAML or JSON, picked by extension)
//!
//! # Configuration Priority
//!
//! The configuration system follows this precedence order:
//! 1. CLI arguments (highest priority)
//! 2. Environment variables
//! 3. Configuration file given with `--config`
//! 4. Default values (lowest priority)
//!
//! # Example Usage
//!
//! ```bash
//! # Using CLI arguments
//! throttr --native-port 9100 --max-keys 50000
//!
//! # Using environment variables
//! export THROTTR_HTTP=true
//! export THROTTR_TTL_UNIT=seconds
//! throttr
//!
//! # File for the bulk, env and CLI for overrides
//! throttr --config /etc/throttr.toml --log-level debug
//! ```

use anyhow::{Context, Result, anyhow, bail};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use throttr::TtlUnit;
use throttr::protocol::MAX_WIRE_KEY_LENGTH;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Main configuration structure for the server
///
/// Built from CLI arguments, environment variables and an optional file,
/// and contains all settings needed to run the server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener configuration
    pub transports: TransportConfig,
    /// Key store and engine configuration
    pub store: StoreConfig,
    /// Close connections that send nothing for this long; `None` disables
    pub idle_connection_timeout: Option<Duration>,
    /// Upper bound on the graceful shutdown drain
    pub shutdown_timeout: Duration,
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
}

/// Listener configuration
///
/// The native protocol listener always runs; the HTTP listener serving
/// health and metrics is optional.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub native: ListenerConfig,
    pub http: Option<ListenerConfig>,
}

/// Address of one listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,
    /// Port number to listen on; 0 picks a free port
    pub port: u16,
}

impl ListenerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Key store and engine configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of lock shards
    pub shards: usize,
    /// Keys pre-allocated at startup
    pub capacity: usize,
    /// Hard cap on stored keys
    pub max_keys: usize,
    /// Longest accepted key in bytes
    pub max_key_length: usize,
    /// Period of the background expiry sweep
    pub sweep_interval: Duration,
    /// Unit of TTL values on the wire
    pub ttl_unit: TtlUnit,
}

/// Command-line arguments for the server
///
/// All arguments can also be set via environment variables with the
/// THROTTR_ prefix. CLI arguments take precedence over environment variables.
///
/// # Examples
///
/// Native protocol on all interfaces:
/// ```bash
/// throttr --native-host 0.0.0.0
/// ```
///
/// Second-granularity TTLs with the metrics endpoint enabled:
/// ```bash
/// throttr --ttl-unit seconds --http --http-port 9101
/// ```
#[derive(Parser, Debug)]
#[command(
    name = "throttr",
    about = "In-memory quota server",
    long_about = "An in-memory quota server speaking the Throttr binary protocol.\n\nEnvironment variables with THROTTR_ prefix are supported. CLI arguments take precedence over environment variables, which take precedence over the --config file."
)]
pub struct Args {
    // Native Transport
    #[arg(
        long,
        value_name = "HOST",
        help = "Native protocol host",
        default_value = "127.0.0.1",
        env = "THROTTR_NATIVE_HOST"
    )]
    pub native_host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "Native protocol port",
        default_value_t = 9000,
        env = "THROTTR_NATIVE_PORT"
    )]
    pub native_port: u16,

    // HTTP Transport
    #[arg(
        long,
        help = "Enable the HTTP health and metrics listener",
        env = "THROTTR_HTTP"
    )]
    pub http: bool,
    #[arg(
        long,
        value_name = "HOST",
        help = "HTTP host",
        default_value = "127.0.0.1",
        env = "THROTTR_HTTP_HOST"
    )]
    pub http_host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "HTTP port",
        default_value_t = 9001,
        env = "THROTTR_HTTP_PORT"
    )]
    pub http_port: u16,

    // Store Configuration
    #[arg(
        long,
        value_name = "N",
        help = "Number of store shards (rounded up to a power of two)",
        default_value_t = 64,
        env = "THROTTR_STORE_SHARDS"
    )]
    pub store_shards: usize,
    #[arg(
        long,
        value_name = "SIZE",
        help = "Initial store capacity",
        default_value_t = 100_000,
        env = "THROTTR_STORE_CAPACITY"
    )]
    pub store_capacity: usize,
    #[arg(
        long,
        value_name = "N",
        help = "Maximum number of stored keys",
        default_value_t = 1_000_000,
        env = "THROTTR_MAX_KEYS"
    )]
    pub max_keys: usize,
    #[arg(
        long,
        value_name = "BYTES",
        help = "Maximum key length in bytes (1-255)",
        default_value_t = MAX_WIRE_KEY_LENGTH,
        env = "THROTTR_MAX_KEY_LENGTH"
    )]
    pub max_key_length: usize,
    #[arg(
        long,
        value_name = "MS",
        help = "Interval between expiry sweeps (milliseconds)",
        default_value_t = 1_000,
        env = "THROTTR_SWEEP_INTERVAL"
    )]
    pub sweep_interval: u64,
    #[arg(
        long,
        value_name = "UNIT",
        help = "Unit of TTL values: seconds, milliseconds",
        default_value = "milliseconds",
        env = "THROTTR_TTL_UNIT"
    )]
    pub ttl_unit: TtlUnit,

    // Connection options
    #[arg(
        long,
        value_name = "SECS",
        help = "Close connections idle for this long (seconds, 0 disables)",
        default_value_t = 300,
        env = "THROTTR_IDLE_CONNECTION_TIMEOUT"
    )]
    pub idle_connection_timeout: u64,
    #[arg(
        long,
        value_name = "SECS",
        help = "Maximum time to drain connections on shutdown (seconds)",
        default_value_t = 30,
        env = "THROTTR_SHUTDOWN_TIMEOUT"
    )]
    pub shutdown_timeout: u64,

    // General options
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "THROTTR_LOG_LEVEL"
    )]
    pub log_level: String,
    #[arg(
        long,
        value_name = "FILE",
        help = "Configuration file (toml, yaml or json)",
        env = "THROTTR_CONFIG"
    )]
    pub config: Option<PathBuf>,

    // Utility options
    #[arg(
        long,
        help = "List all environment variables and exit",
        action = clap::ArgAction::SetTrue
    )]
    pub list_env_vars: bool,
}

/// Settings read from the `--config` file
///
/// Keys mirror the long CLI flags in snake_case. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    native_host: Option<String>,
    native_port: Option<u16>,
    http: Option<bool>,
    http_host: Option<String>,
    http_port: Option<u16>,
    store_shards: Option<usize>,
    store_capacity: Option<usize>,
    max_keys: Option<usize>,
    max_key_length: Option<usize>,
    sweep_interval: Option<u64>,
    ttl_unit: Option<String>,
    idle_connection_timeout: Option<u64>,
    shutdown_timeout: Option<u64>,
    log_level: Option<String>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }
}

/// Pick the file value for an argument clap filled from its default
fn layered<T>(matches: &ArgMatches, id: &str, arg: T, file: Option<T>) -> T {
    match (matches.value_source(id), file) {
        (None | Some(ValueSource::DefaultValue), Some(value)) => value,
        _ => arg,
    }
}

impl Config {
    /// Build configuration from the process arguments and environment
    ///
    /// Exits the process after printing when `--list-env-vars` is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or the resulting
    /// configuration is invalid.
    pub fn from_env_and_args() -> Result<Self> {
        let matches = Args::command().get_matches();

        if matches.get_flag("list_env_vars") {
            Self::print_env_vars();
            std::process::exit(0);
        }

        Self::from_matches(&matches)
    }

    /// Build configuration from an explicit argument list
    ///
    /// The first item is the program name, as with `std::env::args_os`.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Args::command().try_get_matches_from(args)?;
        Self::from_matches(&matches)
    }

    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let args = Args::from_arg_matches(matches)?;
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let file_ttl_unit = file
            .ttl_unit
            .as_deref()
            .map(str::parse::<TtlUnit>)
            .transpose()
            .context("Invalid ttl_unit in config file")?;

        let native = ListenerConfig {
            host: layered(matches, "native_host", args.native_host, file.native_host),
            port: layered(matches, "native_port", args.native_port, file.native_port),
        };
        let http = layered(matches, "http", args.http, file.http).then(|| ListenerConfig {
            host: layered(matches, "http_host", args.http_host, file.http_host),
            port: layered(matches, "http_port", args.http_port, file.http_port),
        });

        let store = StoreConfig {
            shards: layered(matches, "store_shards", args.store_shards, file.store_shards),
            capacity: layered(
                matches,
                "store_capacity",
                args.store_capacity,
                file.store_capacity,
            ),
            max_keys: layered(matches, "max_keys", args.max_keys, file.max_keys),
            max_key_length: layered(
                matches,
                "max_key_length",
                args.max_key_length,
                file.max_key_length,
            ),
            sweep_interval: Duration::from_millis(layered(
                matches,
                "sweep_interval",
                args.sweep_interval,
                file.sweep_interval,
            )),
            ttl_unit: layered(matches, "ttl_unit", args.ttl_unit, file_ttl_unit),
        };

        let idle_secs = layered(
            matches,
            "idle_connection_timeout",
            args.idle_connection_timeout,
            file.idle_connection_timeout,
        );

        let config = Config {
            transports: TransportConfig { native, http },
            store,
            idle_connection_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            shutdown_timeout: Duration::from_secs(layered(
                matches,
                "shutdown_timeout",
                args.shutdown_timeout,
                file.shutdown_timeout,
            )),
            log_level: layered(matches, "log_level", args.log_level, file.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let store = &self.store;

        if store.max_key_length == 0 || store.max_key_length > MAX_WIRE_KEY_LENGTH {
            bail!(
                "max-key-length must be between 1 and {MAX_WIRE_KEY_LENGTH}, got {}",
                store.max_key_length
            );
        }
        if store.max_keys == 0 {
            bail!("max-keys must be greater than 0");
        }
        if store.shards == 0 {
            bail!("store-shards must be greater than 0");
        }
        if store.sweep_interval.is_zero() {
            bail!("sweep-interval must be greater than 0");
        }
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(anyhow!(
                "Invalid log level: {}. Valid options are: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        if let Some(http) = &self.transports.http {
            let native = &self.transports.native;
            if http.port != 0 && http == native {
                bail!(
                    "HTTP and native listeners cannot share the address {}",
                    http.addr()
                );
            }
        }

        Ok(())
    }

    /// Print all available environment variables and their descriptions
    ///
    /// This is called when the --list-env-vars flag is used.
    fn print_env_vars() {
        println!("Throttr Environment Variables");
        println!("=============================");
        println!();
        println!("All environment variables use the THROTTR_ prefix.");
        println!("CLI arguments take precedence over environment variables,");
        println!("which take precedence over the --config file.");
        println!();

        println!("Transport Configuration:");
        println!("  THROTTR_NATIVE_HOST=<host>              Native host [default: 127.0.0.1]");
        println!("  THROTTR_NATIVE_PORT=<port>              Native port [default: 9000]");
        println!();
        println!("  THROTTR_HTTP=true|false                 Enable health and metrics listener");
        println!("  THROTTR_HTTP_HOST=<host>                HTTP host [default: 127.0.0.1]");
        println!("  THROTTR_HTTP_PORT=<port>                HTTP port [default: 9001]");
        println!();

        println!("Store Configuration:");
        println!("  THROTTR_STORE_SHARDS=<n>                Number of shards [default: 64]");
        println!(
            "  THROTTR_STORE_CAPACITY=<size>           Initial store capacity [default: 100000]"
        );
        println!("  THROTTR_MAX_KEYS=<n>                    Maximum stored keys [default: 1000000]");
        println!("  THROTTR_MAX_KEY_LENGTH=<bytes>          Maximum key length [default: 255]");
        println!(
            "  THROTTR_SWEEP_INTERVAL=<ms>             Expiry sweep interval [default: 1000]"
        );
        println!(
            "  THROTTR_TTL_UNIT=<unit>                 seconds, milliseconds [default: milliseconds]"
        );
        println!();

        println!("Connection Configuration:");
        println!(
            "  THROTTR_IDLE_CONNECTION_TIMEOUT=<secs>  Idle timeout, 0 disables [default: 300]"
        );
        println!("  THROTTR_SHUTDOWN_TIMEOUT=<secs>         Shutdown drain limit [default: 30]");
        println!();

        println!("General Configuration:");
        println!(
            "  THROTTR_LOG_LEVEL=<level>               Log level: error, warn, info, debug, trace [default: info]"
        );
        println!("  THROTTR_CONFIG=<file>                   Configuration file");
        println!();

        println!("Examples:");
        println!("  # Second-granularity TTLs and a smaller key space");
        println!("  export THROTTR_TTL_UNIT=seconds");
        println!("  export THROTTR_MAX_KEYS=100000");
        println!();
        println!("  # Run server (CLI args override env vars)");
        println!("  throttr --max-keys 5000  # Will use 5000, not 100000");
    }
}
