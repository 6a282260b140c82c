use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use steward::config::Config;
use steward::policy::{self, CompiledPolicy};
use steward::provider::{Credentials, SessionFactory};
use steward::resource::{PolicyContext, Record};
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use uuid::Uuid;

/// Policy engine for cloud resources
#[derive(Parser, Debug)]
#[command(name = "steward", version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "warn")]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a policy file against the provider
    Run {
        /// Policy file (YAML)
        policies: PathBuf,

        /// Region to target
        #[arg(short, long)]
        region: Option<String>,

        /// Provider endpoint override (all services)
        #[arg(long)]
        endpoint: Option<String>,

        /// Cap action fan-out, overriding per-action defaults
        #[arg(long)]
        max_workers: Option<usize>,

        /// Directory to write matched-resource dumps into
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load and compile a policy file without executing it
    Validate {
        /// Policy file (YAML)
        policies: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .expect("Failed to open log file");

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.and(std::io::stderr))
        .with_ansi(false)
        .with_target(true)
        .init();

    tracing::debug!("steward started with log level: {:?}", level);
    tracing::debug!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("steward").join("steward.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".steward").join("steward.log");
    }
    PathBuf::from("steward.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    match args.command {
        Command::Run {
            policies,
            region,
            endpoint,
            max_workers,
            output,
        } => run(&policies, region, endpoint, max_workers, output).await,
        Command::Validate { policies } => validate(&policies),
    }
}

/// Compile every policy block, collecting all errors instead of stopping
/// at the first bad one.
fn compile_all(path: &Path) -> Result<Vec<CompiledPolicy>> {
    let file = policy::load_policy_file(path)?;
    let mut compiled = Vec::new();
    let mut failed = 0usize;
    for def in &file.policies {
        match policy::compile_policy(def) {
            Ok(p) => compiled.push(p),
            Err(err) => {
                failed += 1;
                eprintln!("policy '{}': {err}", def.name);
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} policies failed to compile", file.policies.len());
    }
    Ok(compiled)
}

fn validate(path: &Path) -> Result<()> {
    let compiled = compile_all(path)?;
    for p in &compiled {
        println!("policy '{}' ({}): ok", p.name, p.resource_type);
    }
    println!("{} policies valid", compiled.len());
    Ok(())
}

async fn run(
    path: &Path,
    region: Option<String>,
    endpoint: Option<String>,
    max_workers: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config = Config::load();
    let region = region.unwrap_or_else(|| config.effective_region());
    let endpoint = endpoint.or_else(|| config.endpoint.clone());

    let credentials = Credentials::from_env()
        .context("STEWARD_API_TOKEN is not set; export a provider API token first")?;

    let mut session = SessionFactory::new(&region, credentials);
    if let Some(endpoint) = &endpoint {
        session = session.with_endpoint(endpoint);
    }
    let ctx = PolicyContext::new(Arc::new(session));

    let compiled = compile_all(path)?;

    let run_id = Uuid::new_v4();
    tracing::info!("run {}: {} policies in {}", run_id, compiled.len(), region);

    let mut degraded = false;
    for p in &compiled {
        let (report, matched) = policy::run_policy(&ctx, p, max_workers).await?;

        print!("{}: {} matched", report.policy, report.matched);
        for action in &report.actions {
            print!(
                ", {} ({}/{} ok)",
                action.action,
                action.processed - action.failed,
                action.processed
            );
        }
        println!();

        if report.degraded() {
            degraded = true;
            eprintln!(
                "policy '{}' completed degraded; see the log for per-unit failures",
                report.policy
            );
        }

        if let Some(dir) = &output {
            write_resources(dir, &report.policy, &matched)?;
        }
    }

    config.set_region(&region)?;
    config.set_last_policy_file(&path.display().to_string())?;

    if degraded {
        std::process::exit(2);
    }
    Ok(())
}

/// Dump matched resources under `<output>/<policy-name>/resources.json`.
fn write_resources(dir: &Path, policy_name: &str, matched: &[Record]) -> Result<()> {
    let policy_dir = dir.join(policy_name);
    std::fs::create_dir_all(&policy_dir)?;
    let path = policy_dir.join("resources.json");
    let content = serde_json::to_string_pretty(matched)?;
    std::fs::write(&path, content)?;
    tracing::info!("wrote {} resources to {:?}", matched.len(), path);
    Ok(())
}
