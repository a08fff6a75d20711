//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{DestinationConfig, PipelineConfig, SinkType};

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    intake: IntakeInfo,
    destinations: Vec<DestinationInfo>,
}

#[derive(Serialize)]
struct IntakeInfo {
    channel_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    route_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template_destination: Option<String>,
}

#[derive(Serialize)]
struct DestinationInfo {
    name: String,
    sink_type: SinkType,
    flush_count: usize,
    flush_size_bytes: usize,
    flush_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&config, args.destinations);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config, args.destinations);
    }

    Ok(())
}

/// Where a destination's batches end up, e.g. `file:events` or `public.events`
fn describe_target(dest: &DestinationConfig) -> Option<String> {
    match dest.sink_type {
        SinkType::Putter => dest
            .putter
            .as_ref()
            .map(|p| format!("{}:{}", format!("{:?}", p.kind).to_lowercase(), p.stream)),
        SinkType::CommitPool => dest
            .commit_pool
            .as_ref()
            .map(|c| format!("{}.{} ({} workers)", c.schema, c.table, c.worker_pool_size)),
        SinkType::Log => None,
    }
}

fn build_config_info(config: &PipelineConfig, detailed: bool) -> ConfigInfo {
    let destinations = config
        .destinations
        .iter()
        .map(|d| DestinationInfo {
            name: d.name.clone(),
            sink_type: d.sink_type,
            flush_count: d.flush_count,
            flush_size_bytes: d.flush_size_bytes,
            flush_interval_ms: d.flush_interval_ms,
            target: if detailed { describe_target(d) } else { None },
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", config.version),
        intake: IntakeInfo {
            channel_capacity: config.intake.channel_capacity,
            route_field: config.intake.route_field.clone(),
            default_destination: config.intake.default_destination.clone(),
            template_destination: config.intake.template_destination.clone(),
        },
        destinations,
    }
}

fn print_config_info(config: &PipelineConfig, detailed: bool) {
    println!("=== Batchline Configuration ===\n");

    let intake = &config.intake;
    println!("Intake");
    println!("   ├─ Version: {:?}", config.version);
    println!("   ├─ Channel capacity: {}", intake.channel_capacity);
    println!(
        "   ├─ Route field: {}",
        intake.route_field.as_deref().unwrap_or("(none)")
    );
    println!(
        "   ├─ Default destination: {}",
        intake.default_destination.as_deref().unwrap_or("(none)")
    );
    println!(
        "   └─ Template destination: {}",
        intake.template_destination.as_deref().unwrap_or("(none)")
    );

    println!("\nDestinations ({})", config.destinations.len());
    for (i, dest) in config.destinations.iter().enumerate() {
        let is_last = i == config.destinations.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!("   {} {} ({:?})", prefix, dest.name, dest.sink_type);
        println!(
            "   {}  flush: count={} bytes={} interval={}ms",
            child_prefix, dest.flush_count, dest.flush_size_bytes, dest.flush_interval_ms
        );
        if detailed {
            if let Some(target) = describe_target(dest) {
                println!("   {}  target: {}", child_prefix, target);
            }
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};

    const CONFIG: &str = r#"
[intake]
default_destination = "events"

[[destinations]]
name = "events"
sink_type = "putter"
[destinations.putter]
kind = "udp"
stream = "events"
params = { addr = "127.0.0.1:9999" }

[[destinations]]
name = "rows"
sink_type = "commit_pool"
[destinations.commit_pool]
table = "events"
columns = ["id"]
fields = ["id"]
"#;

    #[test]
    fn test_targets_only_when_detailed() {
        let config = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();

        let brief = build_config_info(&config, false);
        assert!(brief.destinations.iter().all(|d| d.target.is_none()));

        let detailed = build_config_info(&config, true);
        assert_eq!(detailed.destinations[0].target.as_deref(), Some("udp:events"));
        assert_eq!(
            detailed.destinations[1].target.as_deref(),
            Some("public.events (5 workers)")
        );
    }
}
