//! CLI command implementations.

pub mod controller;
pub mod queues;

use anyhow::{Context, Result};
use runqueue_config::ControllerConfig;
use std::path::Path;

const DEFAULT_CONFIG: &str = "runqueue.kdl";

/// Load the controller configuration. An explicit path must exist.
pub fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    let (path, required) = match path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG), false),
    };
    runqueue_config::load(path, required)
        .with_context(|| format!("Failed to load config file: {}", path.display()))
}

pub fn validate(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    match runqueue_config::parse_controller_config(&content) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  state label: {}", config.state_label);
            println!(
                "  repositories: {}/{} {}",
                config.repositories.group, config.repositories.version, config.repositories.kind
            );
            println!(
                "  pipeline runs: {}/{} {}",
                config.pipeline_runs.group, config.pipeline_runs.version, config.pipeline_runs.kind
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
