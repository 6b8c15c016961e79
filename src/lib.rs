//! Common functionality for fleetsim.
#![warn(missing_docs)]
use dirs::config_dir;
use std::path::PathBuf;

pub mod cli;
pub mod id;
pub mod input;
pub mod log;
pub mod manufacturer;
pub mod market;
pub mod market_class;
pub mod model;
pub mod output;
pub mod settings;
pub mod simulation;
pub mod standards;
pub mod units;
pub mod vehicle;

#[cfg(test)]
mod fixture;

/// Get config dir for program.
///
/// This is where the `settings.toml` file lives.
pub fn get_fleetsim_config_dir() -> PathBuf {
    let Some(mut config_dir) = config_dir() else {
        panic!("Failed to retrieve config directory");
    };
    config_dir.push("fleetsim");
    config_dir
}
