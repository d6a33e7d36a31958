//! Config validation CLI tool
//!
//! Validates a cargad configuration file and reports any errors.

use carga_config::{ConfigError, SamplerConfig};
use carga_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let config_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a cargad configuration file.");
            eprintln!("Default location: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match carga_config::load_config(&config_path) {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", carga_config::CURRENT_CONFIG_VERSION);
            match &settings.sampler {
                SamplerConfig::Gpsd { address } => println!("  Sampler: gpsd ({})", address),
                SamplerConfig::None => println!("  Sampler: none (tracking disabled)"),
            }
            println!(
                "  One-shot timeout: {}",
                format_duration(settings.tracking.one_shot_timeout)
            );
            println!(
                "  Watch timeout: {} (max age {})",
                format_duration(settings.tracking.watch_timeout),
                format_duration(settings.tracking.watch_maximum_age)
            );
            println!("  Event buffer: {}", settings.service.event_buffer);
            println!("  Max chat message: {} chars", settings.chat.max_message_length);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        carga_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
