//! Config validation CLI tool
//!
//! Validates an attendd configuration file and reports any errors.

use attend_util::{default_config_path, format_minutes};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates an attendd configuration file.");
            eprintln!("Default location: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match attend_config::load_config(&config_path) {
        Ok(policy) => {
            let w = &policy.windows;
            println!("✓ Configuration is valid");
            println!();
            println!("Config version: {}", attend_config::CURRENT_CONFIG_VERSION);
            println!("Socket:         {}", policy.service.socket_path.display());
            println!("Data dir:       {}", policy.service.data_dir.display());
            println!();
            println!("Windows:");
            println!(
                "  QR:     usable {} before start, lasts {}",
                format_minutes(w.qr_lead.num_minutes()),
                format_minutes(w.qr_duration.num_minutes())
            );
            match w.manual_duration {
                Some(d) => println!(
                    "  Manual: usable {} before start, lasts {}",
                    format_minutes(w.manual_lead.num_minutes()),
                    format_minutes(d.num_minutes())
                ),
                None => println!(
                    "  Manual: usable {} before start, until session end",
                    format_minutes(w.manual_lead.num_minutes())
                ),
            }
            println!("  Grace after end: {}", format_minutes(w.grace_after_end.num_minutes()));
            println!();
            println!(
                "Feed: page size {}, source timeout {:?}, {} remote source(s)",
                policy.feed.page_size,
                policy.feed.source_timeout,
                policy.feed.sources.len()
            );
            for source in &policy.feed.sources {
                println!("  - {} {}", source.kind.as_str(), source.url);
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                attend_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                attend_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                attend_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                attend_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        attend_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
