//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use entropy_audit::core::config::{Config, DEFAULT_CONFIG_FILE};
use entropy_audit::core::errors::EntropyError;
use entropy_audit::core::paths::display_relative;
use entropy_audit::coverage::runner::PythonCoverage;
use entropy_audit::decision::safety::CliffCheck;
use entropy_audit::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use entropy_audit::logger::jsonl::JsonlConfig;
use entropy_audit::pipeline::signals::SignalHandler;
use entropy_audit::pipeline::{Pipeline, RunOptions, RunOutcome, RunSummary, report, scan_files};
use entropy_audit::remediation::executor::{ActionOutcome, RemediationRecord};
use entropy_audit::scanner::churn::GitChurn;
use entropy_audit::scanner::discovery::{DiscoveryConfig, discover_test_files, explicit_test_files};
use entropy_audit::scanner::health::HealthScan;

/// Entropy: test-suite liability analyzer.
#[derive(Debug, Parser)]
#[command(
    name = "entropy",
    author,
    version,
    about = "Entropy - test suite liability analyzer",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the full audit: coverage, scan, verdicts, safety gate, remediation.
    Run(RunArgs),
    /// Run the static health scanner only.
    Scan(ScanArgs),
    /// Full analysis in report-only mode. Never modifies files.
    Verdict(VerdictArgs),
    /// View configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct RootArgs {
    /// Project root (defaults to the current directory).
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,
    /// Write the Markdown report here instead of `reportFile`.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    #[command(flatten)]
    target: RootArgs,
    /// Force REPORT_ONLY regardless of `executionMode`.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args)]
struct VerdictArgs {
    #[command(flatten)]
    target: RootArgs,
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    /// Test files to scan. Without arguments the tests directory is walked.
    #[arg(value_name = "FILES")]
    files: Vec<PathBuf>,
    /// Project root (defaults to the current directory).
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration.
    Show {
        /// Project root used to locate the default config file.
        #[arg(long, value_name = "PATH")]
        root: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// Top-level CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// The audit finished but stopped short of a clean outcome.
    #[error("{message}")]
    Outcome {
        outcome: RunOutcome,
        message: String,
    },
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) | Self::Runtime(_) | Self::Json(_) | Self::Io(_) => 1,
            Self::Outcome { outcome, .. } => outcome.exit_code(),
        }
    }
}

impl From<EntropyError> for CliError {
    fn from(err: EntropyError) -> Self {
        match err {
            EntropyError::InvalidConfig { .. }
            | EntropyError::MissingConfig { .. }
            | EntropyError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_audit(cli, &args.target, args.dry_run),
        Command::Verdict(args) => run_audit(cli, &args.target, true),
        Command::Scan(args) => run_scan(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            generate(args.shell, &mut command, "entropy", &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── run / verdict ────────────────────

fn run_audit(cli: &Cli, target: &RootArgs, dry_run: bool) -> Result<(), CliError> {
    let root = resolve_root(target.root.as_deref())?;
    let (config, config_warning) = load_config(cli, &root);
    let (logger, join) = start_logger(&root, &config)?;
    if let Some(err) = &config_warning {
        logger.send(ActivityEvent::warning(None, err));
        if !cli.quiet {
            eprintln!("{} {err}; using defaults", "warning:".yellow().bold());
        }
    }

    let report_path = target
        .report
        .clone()
        .unwrap_or_else(|| Config::resolve(&root, &config.report_file));
    let options = RunOptions {
        dry_run,
        files: Vec::new(),
        report_path: Some(report_path.clone()),
        skip_report_file: false,
    };

    let signals = SignalHandler::new();
    let cancel = signals.flag();
    let coverage = PythonCoverage::new(&root, &config);
    let churn = GitChurn::new(&root, &config);

    let result = Pipeline::new(&config, &root, &coverage, &churn, logger.clone())
        .run(&options, &cancel);
    stop_logger(&logger, join);
    let summary = result?;

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_summary(&summary, &report_path, cli.verbose)?;
            }
        }
        OutputMode::Json => write_json_line(&summary_json(&summary, &report_path))?,
    }

    match summary.outcome {
        RunOutcome::Ok => Ok(()),
        outcome => Err(CliError::Outcome {
            outcome,
            message: outcome_message(&summary),
        }),
    }
}

fn outcome_message(summary: &RunSummary) -> String {
    match summary.outcome {
        RunOutcome::Ok => "ok".to_string(),
        RunOutcome::VibeCheckAborted => format!(
            "vibe check failed: {} files flagged for DELETE/QUARANTINE (cap {}); nothing was changed",
            summary.vibe_check.flagged, summary.vibe_check.cap
        ),
        RunOutcome::CoverageCliff => match summary.cliff {
            CliffCheck::Tripped {
                baseline,
                post: Some(post),
                ..
            } => format!("coverage cliff: aggregate coverage dropped from {baseline:.2}% to {post:.2}%"),
            _ => "coverage cliff: post-remediation coverage could not be measured".to_string(),
        },
        RunOutcome::Cancelled => "cancelled".to_string(),
    }
}

fn print_summary(summary: &RunSummary, report_path: &Path, verbose: bool) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    writeln!(
        stdout,
        "{} mode {}",
        "Entropy".bold(),
        summary.effective_mode().to_string().cyan()
    )?;

    if verbose {
        for health in &summary.files {
            writeln!(
                stdout,
                "  {:<48} loc={:<5} tokens={:<6} mock={:.2} churn={:<3} unique={:<4}{}{}",
                display_relative(&summary.root, &health.path),
                health.loc,
                health.token_cost,
                health.mock_density,
                health.churn_rate,
                health.unique_coverage,
                if health.tautology_detected { " tautology" } else { "" },
                if health.is_critical { " critical" } else { "" },
            )?;
        }
    }

    for record in &summary.remediation.records {
        writeln!(
            stdout,
            "  {:<48} {:<24} {}",
            display_relative(&summary.root, &record.verdict.path),
            colored_label(record),
            record.verdict.rationale.dimmed()
        )?;
    }

    writeln!(stdout, "{}", report::summary_line(summary))?;
    if summary.vibe_check.aborted() {
        writeln!(
            stdout,
            "{} {} files flagged (cap {}); no changes applied",
            "Vibe check failed:".red().bold(),
            summary.vibe_check.flagged,
            summary.vibe_check.cap
        )?;
    }
    if summary.cliff.tripped() {
        writeln!(stdout, "{} {}", "Coverage cliff:".red().bold(), outcome_message(summary))?;
    }
    writeln!(stdout, "Report: {}", report_path.display())?;
    Ok(())
}

fn colored_label(record: &RemediationRecord) -> String {
    let label = record.outcome.label(record.verdict.action);
    match &record.outcome {
        ActionOutcome::Deleted | ActionOutcome::AlreadyAbsent => label.red().to_string(),
        ActionOutcome::Quarantined { .. } => label.yellow().to_string(),
        ActionOutcome::Refactored { .. } => label.cyan().to_string(),
        ActionOutcome::Failed { .. } => label.red().bold().to_string(),
        ActionOutcome::NothingToCompact
        | ActionOutcome::Suggested
        | ActionOutcome::Blocked
        | ActionOutcome::Cancelled => {
            label.dimmed().to_string()
        }
    }
}

fn summary_json(summary: &RunSummary, report_path: &Path) -> Value {
    let actions: Vec<Value> = summary
        .remediation
        .records
        .iter()
        .map(|record| {
            let mut action = json!({
                "path": display_relative(&summary.root, &record.verdict.path),
                "action": record.verdict.action,
                "tags": record.verdict.tags,
                "score": record.verdict.score,
                "result": record.outcome.label(record.verdict.action),
                "rationale": record.verdict.rationale,
            });
            match &record.outcome {
                ActionOutcome::Quarantined { destination } => {
                    action["destination"] = json!(destination.display().to_string());
                }
                ActionOutcome::Refactored { sidecars } => {
                    action["sidecars"] = json!(
                        sidecars
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect::<Vec<_>>()
                    );
                }
                ActionOutcome::Failed { code, message } => {
                    action["error"] = json!({ "code": code, "message": message });
                }
                _ => {}
            }
            action
        })
        .collect();

    json!({
        "command": "run",
        "mode": summary.effective_mode().to_string(),
        "outcome": summary.outcome.as_str(),
        "scanned": summary.files.len(),
        "files": summary.files,
        "actions": actions,
        "vibe_check": {
            "flagged": summary.vibe_check.flagged,
            "cap": summary.vibe_check.cap,
            "aborted": summary.vibe_check.aborted(),
        },
        "coverage_cliff": cliff_json(&summary.cliff),
        "report": report_path.display().to_string(),
        "duration_ms": u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
    })
}

fn cliff_json(cliff: &CliffCheck) -> Value {
    match cliff {
        CliffCheck::NotRequired => json!({ "status": "not_required" }),
        CliffCheck::Skipped => json!({ "status": "skipped" }),
        CliffCheck::Passed { baseline, post } => {
            json!({ "status": "passed", "baseline": baseline, "post": post })
        }
        CliffCheck::Tripped {
            baseline,
            post,
            allowed_delta,
        } => json!({
            "status": "tripped",
            "baseline": baseline,
            "post": post,
            "allowed_delta": allowed_delta,
        }),
    }
}

// ──────────────────── scan ────────────────────

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let root = resolve_root(args.root.as_deref())?;
    let (config, config_warning) = load_config(cli, &root);
    if let Some(err) = &config_warning
        && !cli.quiet
    {
        eprintln!("{} {err}; using defaults", "warning:".yellow().bold());
    }

    let files = if args.files.is_empty() {
        let mut discovery = DiscoveryConfig::new(Config::resolve(&root, &config.tests_dir));
        discovery
            .excluded_dirs
            .push(Config::resolve(&root, &config.quarantine_dir));
        discover_test_files(&discovery)?
    } else {
        let resolved: Vec<PathBuf> = args
            .files
            .iter()
            .map(|file| Config::resolve(&root, file))
            .collect();
        explicit_test_files(&resolved)
    };
    if files.is_empty() && !args.files.is_empty() {
        return Err(CliError::User(
            "none of the given paths is a Python test file".to_string(),
        ));
    }

    let results = scan_files(&config, &files)?;
    match output_mode(cli) {
        OutputMode::Json => {
            let entries: Vec<Value> = results
                .iter()
                .map(|(path, result)| scan_entry_json(&root, path, result))
                .collect();
            write_json_line(&json!({ "command": "scan", "files": entries }))?;
        }
        OutputMode::Human => {
            let mut stdout = io::stdout().lock();
            for (path, result) in &results {
                let name = display_relative(&root, path);
                match result {
                    Ok(scan) => writeln!(stdout, "{}", scan_line(&name, scan, cli.verbose))?,
                    Err(err) => {
                        writeln!(stdout, "{name:<48} {}", err.to_string().red())?;
                    }
                }
            }
            if !cli.quiet {
                writeln!(stdout, "Scanned {} files.", results.len())?;
            }
        }
    }
    Ok(())
}

fn scan_entry_json(
    root: &Path,
    path: &Path,
    result: &Result<HealthScan, EntropyError>,
) -> Value {
    let name = display_relative(root, path);
    match result {
        Ok(scan) => json!({ "path": name, "health": scan }),
        Err(err) => json!({
            "path": name,
            "error": { "code": err.code(), "message": err.to_string() },
        }),
    }
}

fn scan_line(name: &str, scan: &HealthScan, verbose: bool) -> String {
    let mut line = format!(
        "{name:<48} loc={:<5} tokens={:<6} mock={:.2} literals={}",
        scan.loc, scan.token_cost, scan.mock_density, scan.literal_count
    );
    if scan.tautology_detected {
        line.push_str(&format!(" {}", "tautology".yellow()));
    }
    if let Some(err) = &scan.syntax_error {
        line.push_str(&format!(" {}", "syntax-error".red()));
        if verbose {
            line.push_str(&format!(" ({err})"));
        }
    }
    line
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        ConfigCommand::Show { root } => {
            let root = resolve_root(root.as_deref())?;
            let (config, config_warning) = load_config(cli, &root);
            if let Some(err) = &config_warning
                && !cli.quiet
            {
                eprintln!("{} {err}; using defaults", "warning:".yellow().bold());
            }
            match output_mode(cli) {
                OutputMode::Human => {
                    let rendered = toml::to_string_pretty(&config).map_err(|e| {
                        CliError::Runtime(format!("failed to render config as TOML: {e}"))
                    })?;
                    print!("{rendered}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    write_json_line(&json!({ "command": "config show", "config": value }))?;
                }
            }
            Ok(())
        }
    }
}

// ──────────────────── shared ────────────────────

fn resolve_root(root: Option<&Path>) -> Result<PathBuf, CliError> {
    let cwd = std::env::current_dir()
        .map_err(|e| CliError::Runtime(format!("cannot determine current directory: {e}")))?;
    let root = root.map_or_else(|| cwd.clone(), |r| cwd.join(r));
    if !root.is_dir() {
        return Err(CliError::User(format!(
            "project root {} is not a directory",
            root.display()
        )));
    }
    Ok(root)
}

/// Explicit `--config` wins; otherwise `<root>/entropy.toml` when present.
fn load_config(cli: &Cli, root: &Path) -> (Config, Option<EntropyError>) {
    let path = cli.config.clone().or_else(|| {
        let candidate = root.join(DEFAULT_CONFIG_FILE);
        candidate.is_file().then_some(candidate)
    });
    Config::load_or_default(path.as_deref())
}

fn start_logger(
    root: &Path,
    config: &Config,
) -> Result<(ActivityLoggerHandle, std::thread::JoinHandle<()>), CliError> {
    let mut jsonl = JsonlConfig {
        path: config
            .logging
            .jsonl_path
            .as_deref()
            .map(|p| Config::resolve(root, p)),
        ..JsonlConfig::default()
    };
    if let Some(max) = config.logging.max_size_bytes {
        jsonl.max_size_bytes = max;
    }
    Ok(spawn_logger(ActivityLoggerConfig {
        jsonl_config: jsonl,
        ..ActivityLoggerConfig::default()
    })?)
}

fn stop_logger(logger: &ActivityLoggerHandle, join: std::thread::JoinHandle<()>) {
    logger.shutdown();
    if join.join().is_err() {
        eprintln!("entropy: logger thread panicked");
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("ENTROPY_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
