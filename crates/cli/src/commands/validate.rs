//! `validate` command implementation.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use contracts::FabricBlueprint;
use router::{FilterRegistry, RoutingTable};
use serde::Serialize;
use sinks::{SinkFactory, NOTIFY_TYPES};
use tracing::info;

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
    listen: String,
    sink_count: usize,
    notify_count: usize,
    topic_count: usize,
    route_count: usize,
    client: bool,
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
        return invalid(config_path, format!("File not found: {}", args.config.display()));
    }

    let blueprint = match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => blueprint,
        Err(e) => return invalid(config_path, e.to_string()),
    };

    // Schema checks pass; now check the types the runtime would build
    if let Err(e) = check_types(&blueprint) {
        return invalid(config_path, e);
    }

    let warnings = collect_warnings(&blueprint);
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
            version: format!("{:?}", blueprint.version),
            listen: blueprint.server.listen.clone(),
            sink_count: blueprint.sinks.len(),
            notify_count: blueprint.notify.len(),
            topic_count: blueprint.routes.len(),
            route_count: blueprint.routes.values().map(|r| r.routes.len()).sum(),
            client: blueprint.client.is_some(),
        }),
    }
}

fn invalid(config_path: String, error: String) -> ValidationResult {
    ValidationResult {
        valid: false,
        config_path,
        error: Some(error),
        warnings: None,
        summary: None,
    }
}

/// Sink, notify, filter and converter types must all be known
fn check_types(blueprint: &FabricBlueprint) -> Result<(), String> {
    let factory = SinkFactory::with_defaults();
    for (name, sink) in &blueprint.sinks {
        if !factory.contains(&sink.sink_type) {
            return Err(format!(
                "sinks.{}: unknown sink type '{}', available: [{}]",
                name,
                sink.sink_type,
                factory.available_types().join(", ")
            ));
        }
    }

    for (name, channel) in &blueprint.notify {
        if !NOTIFY_TYPES.contains(&channel.notify_type.as_str()) {
            return Err(format!(
                "notify.{}: unknown notify type '{}', available: [{}]",
                name,
                channel.notify_type,
                NOTIFY_TYPES.join(", ")
            ));
        }
    }

    RoutingTable::compile(&blueprint.routes, &FilterRegistry::with_defaults())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &FabricBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sinks.is_empty() {
        warnings.push("No sinks configured".to_string());
    }

    if blueprint.routes.is_empty() {
        warnings.push("No routes configured - every message will be unrouted".to_string());
    }

    let referenced: BTreeSet<&str> = blueprint
        .routes
        .values()
        .flat_map(|info| info.routes.iter().map(|r| r.sink.as_str()))
        .collect();

    for (topic, info) in &blueprint.routes {
        if info.routes.is_empty() {
            warnings.push(format!("Topic '{}' has no routes", topic));
        }
    }

    for name in blueprint.sinks.keys() {
        if !referenced.contains(name.as_str()) {
            warnings.push(format!("Sink '{}' is not referenced by any route", name));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Listen: {}", summary.listen);
            println!("  Sinks: {}", summary.sink_count);
            println!("  Notify channels: {}", summary.notify_count);
            println!(
                "  Routes: {} ({} topics)",
                summary.route_count, summary.topic_count
            );
            println!("  Client: {}", if summary.client { "yes" } else { "no" });
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn validate(content: &str) -> ValidationResult {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fabric.toml");
        std::fs::write(&path, content).unwrap();
        validate_config(&ValidateArgs {
            config: path,
            json: false,
        })
    }

    #[test]
    fn test_valid_with_unused_sink_warning() {
        let result = validate(
            r#"
[sinks.default]
type = "null"

[sinks.spare]
type = "log"

[[routes.topic1.where]]
sink = "default"
"#,
        );
        assert!(result.valid, "{:?}", result.error);
        let summary = result.summary.unwrap();
        assert_eq!(summary.sink_count, 2);
        assert_eq!(summary.route_count, 1);
        let warnings = result.warnings.unwrap();
        assert_eq!(warnings, vec!["Sink 'spare' is not referenced by any route"]);
    }

    #[test]
    fn test_unknown_sink_type() {
        let result = validate(
            r#"
[sinks.default]
type = "kafka"
"#,
        );
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("unknown sink type 'kafka'"));
    }

    #[test]
    fn test_bad_regex_is_invalid() {
        let result = validate(
            r#"
[sinks.default]
type = "null"

[[routes.topic1.where]]
sink = "default"
filter = { type = "regex", pattern = "(" }
"#,
        );
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("invalid regex"));
    }

    #[test]
    fn test_missing_file() {
        let result = validate_config(&ValidateArgs {
            config: PathBuf::from("/nonexistent/fabric.toml"),
            json: true,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().starts_with("File not found"));
    }
}
