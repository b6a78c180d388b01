pub mod toml_config;

pub use toml_config::{AppConfig, AuthStrategyKind};

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "slot-acquirer")]
#[command(about = "Watches the electronic queue for free exam slots and books one")]
pub struct CliConfig {
    #[arg(long, default_value = "slot-acquirer.toml", help = "Path to the TOML configuration file")]
    pub config: String,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, help = "Start one search immediately and exit when it ends")]
    pub once: bool,
}
