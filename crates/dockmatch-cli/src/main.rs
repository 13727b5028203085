//! dockmatch CLI
//!
//! Scores how likely a container image was built from a given Dockerfile.
//!
//! ## Commands
//!
//! - `match`: score one Dockerfile against one image descriptor
//! - `batch`: score every pair listed in a manifest on a worker pool
//! - `parse`: show the parsed build spec
//! - `normalize`: canonicalize a command, path or image reference
//! - `config`: validate or print the effective configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dockmatch_core::{
    normalize_command, normalize_image_ref, normalize_path, ImageDescriptor, MatchConfig,
    MatchEngine, MatchResult,
};
use dockmatch_service::{
    write_report, BatchManifest, FsDescriptorSource, MatchPool, MatchReport, MatchRequest,
    PoolConfig, SingleFlightCache, METRICS,
};
use serde::Serialize;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "dockmatch")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dockerfile-to-image provenance matching", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Match configuration (TOML); falls back to $DOCKMATCH_CONFIG, then defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one Dockerfile against one image descriptor
    Match {
        /// Dockerfile to match
        #[arg(short, long)]
        dockerfile: PathBuf,

        /// Image descriptor (JSON) produced by introspection tooling
        #[arg(short, long)]
        image: PathBuf,

        /// Build argument, KEY=VALUE (repeatable)
        #[arg(long = "build-arg", value_parser = parse_build_arg)]
        build_args: Vec<(String, String)>,

        /// Write the result JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also persist a digest-verified report under this directory
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// Score every Dockerfile/image pair listed in a manifest
    Batch {
        /// Manifest JSON: {"entries": [{"name", "dockerfile", "image", "build_args"}]}
        #[arg(short, long)]
        manifest: PathBuf,

        /// Matches in flight at once (default: available CPUs)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Per-match time limit in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,

        /// Persist one report per successful match under this directory
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// Parse a Dockerfile and print instructions, stages and context entries
    Parse {
        dockerfile: PathBuf,

        /// Build argument, KEY=VALUE (repeatable)
        #[arg(long = "build-arg", value_parser = parse_build_arg)]
        build_args: Vec<(String, String)>,
    },

    /// Canonicalize a value the way the engine compares it
    Normalize {
        #[command(subcommand)]
        target: NormalizeTarget,
    },

    /// Inspect the match configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum NormalizeTarget {
    /// A layer `created_by` command or instruction text
    Command { value: String },
    /// A filesystem path
    Path { value: String },
    /// An image reference
    ImageRef { value: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file (default: --config / $DOCKMATCH_CONFIG)
    Check { file: Option<PathBuf> },
    /// Print the effective configuration as TOML
    Show,
}

fn parse_build_arg(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    dockmatch_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Match {
            dockerfile,
            image,
            build_args,
            output,
            report_dir,
        } => {
            let engine = load_engine(cli.config.as_deref())?;
            cmd_match(
                engine,
                &dockerfile,
                &image,
                build_args.into_iter().collect(),
                output.as_deref(),
                report_dir.as_deref(),
            )
            .await
        }
        Commands::Batch {
            manifest,
            workers,
            timeout_secs,
            report_dir,
        } => {
            let engine = load_engine(cli.config.as_deref())?;
            cmd_batch(engine, &manifest, workers, timeout_secs, report_dir.as_deref()).await
        }
        Commands::Parse {
            dockerfile,
            build_args,
        } => {
            let engine = load_engine(cli.config.as_deref())?;
            cmd_parse(&engine, &dockerfile, &build_args.into_iter().collect())
        }
        Commands::Normalize { target } => cmd_normalize(target),
        Commands::Config { action } => match action {
            ConfigAction::Check { file } => cmd_config_check(file.as_deref().or(cli.config.as_deref())),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        },
    }
}

fn load_engine(config: Option<&Path>) -> Result<Arc<MatchEngine>> {
    let config = MatchConfig::load(config).context("Failed to load match config")?;
    Ok(Arc::new(MatchEngine::new(config)?))
}

fn print_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, &json).context(format!("Failed to write to {:?}", path))?;
            println!("Wrote {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn print_summary(label: &str, result: &MatchResult) {
    println!("{label}: {:.3} ({})", result.overall_score, result.bucket);
    for reason in result.mismatch_reasons() {
        println!("  - {reason}");
    }
}

async fn cmd_match(
    engine: Arc<MatchEngine>,
    dockerfile: &Path,
    image: &Path,
    build_args: BTreeMap<String, String>,
    output: Option<&Path>,
    report_dir: Option<&Path>,
) -> Result<()> {
    let text = tokio::fs::read_to_string(dockerfile)
        .await
        .context(format!("Failed to read Dockerfile {:?}", dockerfile))?;
    let bytes = tokio::fs::read(image)
        .await
        .context(format!("Failed to read image descriptor {:?}", image))?;
    let descriptor: ImageDescriptor =
        serde_json::from_slice(&bytes).context("Invalid image descriptor JSON")?;

    let pool = MatchPool::new(engine, PoolConfig::default())?;
    let outcome = pool
        .run(MatchRequest::new(text, descriptor).with_build_args(build_args))
        .await;
    let result = outcome.result?;

    print_json(&result, output)?;
    if let Some(dir) = report_dir {
        let report = MatchReport::new(
            outcome.request_id,
            outcome.image_fingerprint,
            outcome.build_spec_fingerprint,
            pool.config_fingerprint(),
            result,
        )?;
        let path = write_report(&report, dir)?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}

async fn cmd_batch(
    engine: Arc<MatchEngine>,
    manifest_path: &Path,
    workers: Option<usize>,
    timeout_secs: u64,
    report_dir: Option<&Path>,
) -> Result<()> {
    let manifest = BatchManifest::load(manifest_path)
        .await
        .context(format!("Failed to load manifest {:?}", manifest_path))?;
    let root = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let source = FsDescriptorSource::new(root);
    let requests = manifest.into_requests(&source).await?;

    let mut config = PoolConfig {
        timeout: Duration::from_secs(timeout_secs),
        ..PoolConfig::default()
    };
    if let Some(workers) = workers {
        config.workers = workers;
    }
    let pool = MatchPool::new(engine, config)?.with_cache(Arc::new(SingleFlightCache::default()));

    let outcomes = pool.run_batch(requests).await;
    let mut failed = 0;
    for outcome in outcomes {
        let label = outcome
            .name
            .clone()
            .unwrap_or_else(|| outcome.request_id.to_string());
        match outcome.result {
            Ok(result) => {
                print_summary(&label, &result);
                if let Some(dir) = report_dir {
                    let report = MatchReport::new(
                        outcome.request_id,
                        outcome.image_fingerprint,
                        outcome.build_spec_fingerprint,
                        pool.config_fingerprint(),
                        result,
                    )?;
                    write_report(&report, dir)?;
                }
            }
            Err(err) => {
                failed += 1;
                println!("{label}: error: {err}");
            }
        }
    }
    METRICS.flush();

    if failed > 0 {
        bail!("{failed} match(es) failed");
    }
    Ok(())
}

fn cmd_parse(
    engine: &MatchEngine,
    dockerfile: &Path,
    build_args: &BTreeMap<String, String>,
) -> Result<()> {
    let text = std::fs::read_to_string(dockerfile)
        .context(format!("Failed to read Dockerfile {:?}", dockerfile))?;
    let spec = engine.parse(&text, build_args)?;
    print_json(&spec, None)
}

fn cmd_normalize(target: NormalizeTarget) -> Result<()> {
    match target {
        NormalizeTarget::Command { value } => {
            let normalized = normalize_command(&value);
            println!("{}", normalized);
        }
        NormalizeTarget::Path { value } => println!("{}", normalize_path(&value)),
        NormalizeTarget::ImageRef { value } => println!("{}", normalize_image_ref(&value)?),
    }
    Ok(())
}

fn cmd_config_check(path: Option<&Path>) -> Result<()> {
    let config = MatchConfig::load(path)?;
    println!("config OK (fingerprint {})", config.fingerprint()?);
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = MatchConfig::load(path)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_arg_parsing() {
        assert_eq!(
            parse_build_arg("NODE_VERSION=18"),
            Ok(("NODE_VERSION".to_string(), "18".to_string()))
        );
        assert_eq!(parse_build_arg("EMPTY="), Ok(("EMPTY".to_string(), String::new())));
        assert!(parse_build_arg("=x").is_err());
        assert!(parse_build_arg("NOVALUE").is_err());
    }

    #[test]
    fn test_match_arguments() {
        let cli = Cli::try_parse_from([
            "dockmatch",
            "--json",
            "match",
            "--dockerfile",
            "Dockerfile",
            "--image",
            "image.json",
            "--build-arg",
            "A=1",
            "--build-arg",
            "B=2",
        ])
        .expect("parse");
        assert!(cli.json);
        match cli.command {
            Commands::Match { build_args, .. } => assert_eq!(build_args.len(), 2),
            _ => panic!("expected match command"),
        }
    }

    #[test]
    fn test_config_show_roundtrips() {
        let text = toml::to_string_pretty(&MatchConfig::default()).expect("toml");
        let parsed = MatchConfig::from_toml_str(&text).expect("parse");
        assert_eq!(parsed, MatchConfig::default());
    }

    #[tokio::test]
    async fn test_match_command_writes_output_and_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dockerfile = dir.path().join("Dockerfile");
        let image = dir.path().join("image.json");
        std::fs::write(&dockerfile, "FROM alpine:3.19\nRUN apk add curl\n").expect("write");
        std::fs::write(
            &image,
            r#"{"base_ref":"alpine:3.19","layers":[{"digest":"sha256:a","size_bytes":1,"created_by":"/bin/sh -c apk add curl","order_index":0}]}"#,
        )
        .expect("write");
        let output = dir.path().join("result.json");
        let reports = dir.path().join("reports");

        cmd_match(
            Arc::new(MatchEngine::default()),
            &dockerfile,
            &image,
            BTreeMap::new(),
            Some(&output),
            Some(&reports),
        )
        .await
        .expect("match");

        let result: MatchResult =
            serde_json::from_slice(&std::fs::read(&output).expect("read")).expect("json");
        assert_eq!(result.overall_score, 1.0);
        assert_eq!(std::fs::read_dir(&reports).expect("reports").count(), 1);
    }
}
