pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use config::AppConfig;
pub use core::orchestrator::{Acquisition, Orchestrator, RunHandle, RunOutcome, StartOutcome};
pub use utils::error::{AcquireError, Result};
