//! Collection Fixture CLI
//!
//! Runs the demo collection against a configuration file and reports how the
//! shared database evolved across test classes.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use collection_fixture_lib::{demo, HarnessConfig, RunMode};

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Collection Fixture CLI - run a collection sharing one database fixture
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration document the collection container is built from
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Harness settings file (JSON); command-line flags override it
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Scheduling of classes and tests (sequential or parallel)
    #[arg(short, long)]
    mode: Option<RunMode>,

    /// Log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Report format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Merge settings file and flags into a validated harness configuration
    fn harness_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.settings {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings {}", path.display()))?;
                HarnessConfig::from_json(&json)?
            }
            None => HarnessConfig::default(),
        };

        if let Some(path) = &self.config {
            config.config_path = path.clone();
        }
        if let Some(mode) = self.mode {
            config.run_mode = mode;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.harness_config()?;

    init_tracing(&config.log_level, cli.json_logs);

    let report = demo::collection().run(&config.config_source(), config.run_mode);

    match cli.format {
        OutputFormat::Text => println!("{}", report),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }

    if !report.is_success() {
        bail!("Collection '{}' failed: {}", report.collection, report.summary());
    }

    tracing::info!("Collection '{}' passed", report.collection);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["collection-fixture"]);
        let config = cli.harness_config().unwrap();

        assert_eq!(config, HarnessConfig::default());
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(!cli.json_logs);
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "collection-fixture",
            "--config",
            "settings/test.yaml",
            "--mode",
            "parallel",
            "--log-level",
            "debug",
            "--format",
            "json",
        ]);
        let config = cli.harness_config().unwrap();

        assert_eq!(config.config_path, PathBuf::from("settings/test.yaml"));
        assert_eq!(config.run_mode, RunMode::Parallel);
        assert_eq!(config.log_level, "debug");
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let result = Cli::try_parse_from(["collection-fixture", "--mode", "random"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let cli = Cli::parse_from(["collection-fixture", "--log-level", "loud"]);
        let err = cli.harness_config().unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_settings_file_with_flag_override() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("harness.json");
        std::fs::write(
            &settings,
            r#"{"log_level": "warn", "run_mode": "parallel", "config_path": "from-settings.json"}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "collection-fixture",
            "--settings",
            settings.to_str().unwrap(),
            "--mode",
            "sequential",
        ]);
        let config = cli.harness_config().unwrap();

        assert_eq!(config.log_level, "warn");
        assert_eq!(config.run_mode, RunMode::Sequential);
        assert_eq!(config.config_path, PathBuf::from("from-settings.json"));
    }

    #[test]
    fn test_missing_settings_file() {
        let cli = Cli::parse_from([
            "collection-fixture",
            "--settings",
            "/nonexistent/harness.json",
        ]);
        let err = cli.harness_config().unwrap_err();
        assert!(err.to_string().contains("Failed to read settings"));
    }

    #[test]
    fn test_demo_run_against_repository_settings() {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../appsettings.json");
        let cli = Cli::parse_from([
            "collection-fixture",
            "--config",
            config_path.to_str().unwrap(),
        ]);
        let config = cli.harness_config().unwrap();

        let report = demo::collection().run(&config.config_source(), config.run_mode);
        assert!(report.is_success(), "{}", report);
    }
}
