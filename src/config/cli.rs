use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

const DEFAULT_SIMULATED_CUSTOMERS: usize = 50;
const DEFAULT_SIMULATED_READS: usize = 2_000;

/// Command-line arguments for the Opsdesk binary.
#[derive(Debug, Parser)]
#[command(name = "opsdesk", version, about = "Opsdesk portal cache runtime")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "OPSDESK_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a synthetic read/update workload and print cache and bus statistics.
    Simulate(SimulateArgs),
    /// Print the resolved settings as JSON.
    #[command(name = "show-config")]
    ShowConfig,
}

impl Default for Command {
    fn default() -> Self {
        Self::Simulate(SimulateArgs::default())
    }
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Number of customers seeded into the in-memory repository.
    #[arg(long, default_value_t = DEFAULT_SIMULATED_CUSTOMERS)]
    pub customers: usize,

    /// Number of customer reads issued by the workload.
    #[arg(long, default_value_t = DEFAULT_SIMULATED_READS)]
    pub reads: usize,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self {
            customers: DEFAULT_SIMULATED_CUSTOMERS,
            reads: DEFAULT_SIMULATED_READS,
        }
    }
}

/// Settings overrides accepted before or after any subcommand.
#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the cache capacity.
    #[arg(long = "cache-max-size", value_name = "COUNT", global = true)]
    pub cache_max_size: Option<u64>,

    /// Override the default cache TTL; 0 disables default expiry.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS", global = true)]
    pub cache_default_ttl_seconds: Option<u64>,

    /// Override how many recent events the bus keeps.
    #[arg(long = "events-max-history", value_name = "COUNT", global = true)]
    pub events_max_history: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}
