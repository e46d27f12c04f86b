//! Config validation CLI tool
//!
//! Validates a termgated configuration file and reports any errors.

use std::path::PathBuf;
use std::process::ExitCode;
use termgate_util::default_config_path;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a termgated configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match termgate_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", termgate_config::CURRENT_CONFIG_VERSION);
            println!("  Listen:         {}", config.server.socket_addr());
            if config.auth.is_open() {
                println!("  Auth:           NONE (open mode)");
            } else {
                println!("  Auth:           token required");
            }
            println!("  Auth timeout:   {:?}", config.auth.timeout);
            println!(
                "  Ban policy:     {} failures -> {:?}",
                config.auth.max_failures, config.auth.ban_duration
            );
            println!(
                "  Shell:          {} ({}x{})",
                config.shell.program, config.shell.cols, config.shell.rows
            );
            if config.audit.enabled {
                println!("  Audit:          {:?}", config.audit.backend);
            } else {
                println!("  Audit:          disabled");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration is invalid");
            eprintln!();
            match &e {
                termgate_config::ConfigError::ValidationFailed { errors } => {
                    for error in errors {
                        eprintln!("  - {}", error);
                    }
                }
                other => eprintln!("  {}", other),
            }
            ExitCode::from(1)
        }
    }
}
