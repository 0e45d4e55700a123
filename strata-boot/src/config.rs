use std::path::PathBuf;

use clap::Parser;
use strata_core::config::ENV_TTL;
use strata_core::{HalConfig, HalResult};

#[derive(Parser, Debug)]
#[command(author, version, about = "Bring up the strata platform and report what it found")]
pub struct Args {
    /// Preset: default, embedded, development, desktop, server.
    #[arg(short, long, default_value = "default")]
    pub use_case: String,

    /// Capability TTL in seconds, or `never` to disable expiry.
    #[arg(long, value_name = "SECS|never")]
    pub ttl: Option<String>,

    /// Persist detected capabilities here across restarts.
    #[arg(long)]
    pub cache: Option<PathBuf>,

    #[arg(long)]
    pub benchmarks: bool,

    #[arg(long)]
    pub no_deadlock_check: bool,

    /// Predict capabilities for described hardware instead of booting,
    /// e.g. `vendor=sega,model=dreamcast`.
    #[arg(long)]
    pub predict: Option<String>,

    /// Exit after printing diagnostics instead of waiting for Ctrl-C.
    #[arg(long)]
    pub once: bool,
}

impl Args {
    /// Command-line flags win over the preset and the environment.
    ///
    /// `--ttl` goes through the same parser as `STRATA_CAPABILITY_TTL_SECS`.
    pub fn apply(&self, config: HalConfig) -> HalResult<HalConfig> {
        let mut config = config.with_overrides(|key| match key {
            ENV_TTL => self.ttl.clone(),
            _ => None,
        })?;
        if let Some(path) = &self.cache {
            config.capability_cache_path = Some(path.clone());
        }
        if self.benchmarks {
            config.benchmarks = true;
        }
        if self.no_deadlock_check {
            config.deadlock_detection = false;
        }
        Ok(config)
    }
}
