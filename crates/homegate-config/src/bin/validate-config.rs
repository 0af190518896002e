//! Config validation CLI tool
//!
//! Validates a homegated configuration file and reports any errors.

use homegate_api::AtHomeMode;
use homegate_util::default_config_path;
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
            eprintln!("Validates a homegated configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match homegate_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", homegate_config::CURRENT_CONFIG_VERSION);
            println!("  Daily limit: {} minutes", policy.daily_limit_minutes);
            println!(
                "  At-home mode: {}",
                match policy.at_home_mode {
                    AtHomeMode::AlwaysBlock => "always block",
                    AtHomeMode::WithinQuota => "allow within quota",
                }
            );
            println!(
                "  Quota warnings: {:?} minutes remaining",
                policy.quota_warnings_minutes
            );
            match &policy.home {
                Some(home) if home.wifi_ssid.is_empty() => {
                    println!("  Home: {:.5}, {:.5}", home.latitude, home.longitude);
                }
                Some(home) => {
                    println!(
                        "  Home: {:.5}, {:.5} (Wi-Fi \"{}\")",
                        home.latitude, home.longitude, home.wifi_ssid
                    );
                }
                None => println!("  Home: not set (configure at runtime)"),
            }
            println!("  Socket: {}", policy.service.socket_path.display());
            println!("  Data dir: {}", policy.service.data_dir.display());

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                homegate_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                homegate_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                homegate_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                homegate_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        homegate_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
