use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::info;
use strata_core::capability::predict;
use strata_core::{HalConfig, InterfaceId, Platform};

mod config;
mod drivers;

use config::Args;
use drivers::{HeapMemory, MonotonicClock, OsThreads};

/// Bookkeeping budget for the software heap.
const SOFTWARE_HEAP_BYTES: u64 = 64 * 1024 * 1024;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if let Some(spec) = &args.predict {
        return print_prediction(spec);
    }

    let preset = HalConfig::for_use_case(&args.use_case)
        .with_context(|| format!("Unknown use case '{}'", args.use_case))?;
    let config = args
        .apply(preset.from_env().context("Invalid STRATA_* environment")?)
        .context("Invalid command-line options")?;

    info!("Starting strata ({} preset)...", args.use_case);
    let platform = Platform::builder()
        .config(config)
        .register_driver(InterfaceId::MEMORY, Arc::new(HeapMemory::new(SOFTWARE_HEAP_BYTES)))
        .register_driver(InterfaceId::TIME, Arc::new(MonotonicClock::new()))
        .register_driver(InterfaceId::THREAD, Arc::new(OsThreads::new()))
        .mandatory(InterfaceId::MEMORY)
        .mandatory(InterfaceId::TIME)
        .build()
        .context("Failed to assemble platform")?;

    if let Err(e) = platform.initialize() {
        platform.shutdown().context("Cleanup after failed start")?;
        return Err(e).context("Platform failed to start");
    }

    let clock = platform.get::<MonotonicClock>(InterfaceId::TIME)?;
    let caps = platform.capabilities()?;
    let names: Vec<&str> = caps.capabilities.capabilities().map(|c| c.name()).collect();
    info!("Capabilities: {}", names.join(", "));
    println!("{}", serde_json::to_string_pretty(&platform.get_performance_stats())?);

    if !args.once {
        let (tx, rx) = mpsc::channel();
        ctrlc::set_handler(move || {
            let _ = tx.send(());
        })
        .context("Error setting Ctrl-C handler")?;
        info!("Platform running. Ctrl-C to stop.");
        let _ = rx.recv();
    }

    info!("Shutting down after {:?}", clock.uptime());
    platform.shutdown()?;
    Ok(())
}

fn print_prediction(spec: &str) -> Result<()> {
    let hardware: HashMap<String, String> = spec
        .split(',')
        .filter(|kv| !kv.trim().is_empty())
        .map(|kv| {
            kv.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| anyhow!("Expected key=value, got '{}'", kv))
        })
        .collect::<Result<_>>()?;

    let mask = predict(&hardware).context("Prediction failed")?;
    let names: Vec<&str> = mask.capabilities().map(|c| c.name()).collect();
    println!("{}", serde_json::to_string_pretty(&names)?);
    Ok(())
}
