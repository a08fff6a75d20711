//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{PipelineConfig, PutterKind, SinkType};

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    destination_count: usize,
    putter_count: usize,
    commit_pool_count: usize,
    log_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            let count = |ty: SinkType| {
                config
                    .destinations
                    .iter()
                    .filter(|d| d.sink_type == ty)
                    .count()
            };

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", config.version),
                    destination_count: config.destinations.len(),
                    putter_count: count(SinkType::Putter),
                    commit_pool_count: count(SinkType::CommitPool),
                    log_count: count(SinkType::Log),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &PipelineConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.intake.default_destination.is_none() {
        warnings.push(
            "intake.default_destination is not set - records without a routing key will be rejected"
                .to_string(),
        );
    }

    for dest in &config.destinations {
        let uses_firehose = dest
            .putter
            .as_ref()
            .is_some_and(|p| p.kind == PutterKind::Firehose);
        if uses_firehose && !cfg!(feature = "firehose") {
            warnings.push(format!(
                "Destination '{}' uses the firehose putter but this build lacks the 'firehose' feature",
                dest.name
            ));
        }
        if dest.sink_type == SinkType::CommitPool && !cfg!(feature = "postgres") {
            warnings.push(format!(
                "Destination '{}' is a commit pool but this build lacks the 'postgres' feature",
                dest.name
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Destinations: {}", summary.destination_count);
            println!("    putter: {}", summary.putter_count);
            println!("    commit_pool: {}", summary.commit_pool_count);
            println!("    log: {}", summary.log_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
