//! Polysandbox CLI
//!
//! Command-line interface for running code in the sandbox, checking code
//! against a security tier and inspecting the deployment.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use console::style;
use polysandbox::config::{self, validate_config, Config};
use polysandbox::sandbox::{
    ExecutionMethod, ExecutionMode, ExecutionRequest, ExecutionResult, LanguageRegistry,
    ResourceLimits, SandboxService, SecurityLevel, SecurityPolicyEngine,
};
use polysandbox::VERSION;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "polysandbox",
    author = "Polysandbox Contributors",
    version = VERSION,
    about = "Polysandbox - sandboxed multi-language code execution",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "POLYSANDBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code in the sandbox
    Run {
        /// Programming language (python, javascript, bash, java, go)
        language: String,
        #[command(flatten)]
        source: SourceArgs,
        /// Workspace owner
        #[arg(long, short, default_value = "cli")]
        user: String,
        /// Security tier (low, medium, high, maximum)
        #[arg(long, short)]
        security_level: Option<SecurityLevel>,
        /// Execution mode (auto, local, docker)
        #[arg(long, short)]
        mode: Option<ExecutionMode>,
        /// Memory limit in MiB
        #[arg(long)]
        memory_mb: Option<u64>,
        /// CPU limit in percent of one core
        #[arg(long)]
        cpu_percent: Option<f64>,
        /// Wall-clock timeout in seconds
        #[arg(long, short)]
        timeout: Option<u64>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check code against a security tier without running it
    Check {
        /// Programming language
        language: String,
        #[command(flatten)]
        source: SourceArgs,
        /// Security tier (low, medium, high, maximum)
        #[arg(long, short)]
        security_level: Option<SecurityLevel>,
    },

    /// List known languages and whether they can run here
    Languages {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show service statistics and backend availability
    Stats,

    /// Write a configuration file with the default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

/// Where the code comes from: the positional argument, a file, or stdin
#[derive(Args)]
struct SourceArgs {
    /// Code to execute; read from stdin when neither this nor --file is given
    code: Option<String>,
    /// Read the code from a file
    #[arg(long, short, conflicts_with = "code")]
    file: Option<PathBuf>,
}

impl SourceArgs {
    fn read(self) -> anyhow::Result<String> {
        if let Some(code) = self.code {
            return Ok(code);
        }
        if let Some(path) = self.file {
            return std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()));
        }
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("Failed to read code from stdin")?;
        Ok(code)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config_from_path(path).map(|mut c| {
            config::apply_env_overrides(&mut c);
            c
        }),
        None => Config::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            init_logging(&Config::default(), cli.log_json);
            return Err(e).context("Failed to load configuration");
        }
    };
    init_logging(&config, cli.log_json);

    let report = validate_config(&config);
    for issue in &report.warnings {
        warn!("{}", issue);
    }
    if !report.valid {
        for issue in &report.errors {
            eprintln!("{} {}", style("✗").red(), issue);
        }
        bail!("Invalid configuration");
    }

    match cli.command {
        Commands::Run {
            language,
            source,
            user,
            security_level,
            mode,
            memory_mb,
            cpu_percent,
            timeout,
            json,
        } => {
            let code = source.read()?;
            let service = SandboxService::new(config.sandbox).await;
            let mut request = service.request(code, language).with_user(user);
            if let Some(level) = security_level {
                request = request.with_security_level(level);
            }
            if let Some(mode) = mode {
                request = request.with_mode(mode);
            }
            if memory_mb.is_some() || cpu_percent.is_some() || timeout.is_some() {
                let level = request.security_level;
                request = request.with_limits(override_limits(
                    level,
                    memory_mb,
                    cpu_percent,
                    timeout,
                ));
            }
            run_code(&service, request, json).await
        }
        Commands::Check {
            language,
            source,
            security_level,
        } => {
            let code = source.read()?;
            check_code(
                &config,
                &code,
                &language,
                security_level.unwrap_or(config.sandbox.default_security_level),
            )
        }
        Commands::Languages { json } => list_languages(&config, json),
        Commands::Stats => show_stats(config).await,
        Commands::InitConfig { force } => init_config(cli.config, force),
    }
}

/// Initialize tracing; `RUST_LOG` wins over the configured filter
fn init_logging(config: &Config, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Tier defaults with the flags given on the command line applied
fn override_limits(
    level: SecurityLevel,
    memory_mb: Option<u64>,
    cpu_percent: Option<f64>,
    timeout: Option<u64>,
) -> ResourceLimits {
    let base = SecurityPolicyEngine::new().policy(level).limits;
    ResourceLimits {
        memory_mb: memory_mb.unwrap_or(base.memory_mb),
        cpu_percent: cpu_percent.unwrap_or(base.cpu_percent),
        timeout_seconds: timeout.unwrap_or(base.timeout_seconds),
        ..base
    }
}

/// Execute code and print the result
async fn run_code(
    service: &SandboxService,
    request: ExecutionRequest,
    json: bool,
) -> anyhow::Result<ExitCode> {
    if !json {
        eprintln!(
            "{}",
            style(format!(
                "Executing {} code ({} mode, {} security)...",
                request.language, request.execution_mode, request.security_level
            ))
            .dim()
        );
    }

    let result = service.execute(request).await;
    debug!("Execution metadata: {:?}", result.metadata);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_result(result: &ExecutionResult) {
    if !result.output.is_empty() {
        print!("{}", result.output);
        if !result.output.ends_with('\n') {
            println!();
        }
    }

    let status = if result.success {
        style("✓ Success".to_string()).green()
    } else {
        match result.method {
            ExecutionMethod::Timeout => style("✗ Timed out".to_string()).red(),
            ExecutionMethod::SecurityFailed => style("✗ Blocked".to_string()).red(),
            ExecutionMethod::ValidationFailed => style("✗ Rejected".to_string()).red(),
            _ => match result.exit_code {
                Some(code) => style(format!("✗ Failed (exit {})", code)).red(),
                None => style("✗ Failed".to_string()).red(),
            },
        }
    };

    if !result.error.is_empty() {
        eprintln!("{}", style(result.error.trim_end()).yellow());
    }
    eprintln!(
        "{}  {}  {:.3}s  {:.1} MiB  {:.0}% CPU",
        status,
        style(result.method).cyan(),
        result.execution_time_seconds,
        result.memory_usage_mb,
        result.cpu_usage_percent
    );
    if let Some(from) = result.metadata.get("fallback_from").and_then(|v| v.as_str()) {
        eprintln!("{}", style(format!("  └─ fell back from {}", from)).dim());
    }
}

/// Check code against a tier
fn check_code(
    config: &Config,
    code: &str,
    language: &str,
    level: SecurityLevel,
) -> anyhow::Result<ExitCode> {
    let registry = LanguageRegistry::new(&config.sandbox.languages, &config.sandbox.container.images);
    let Some(spec) = registry.resolve(language) else {
        bail!("Unsupported language: {}", language);
    };

    match SecurityPolicyEngine::new().validate(code, spec.language, level) {
        Ok(()) => {
            println!(
                "{} Allowed for {} at security level {}",
                style("✓").green(),
                spec.language,
                style(level).cyan()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(violation) => {
            println!("{} Blocked: {}", style("✗").red(), violation);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// List the language table
fn list_languages(config: &Config, json: bool) -> anyhow::Result<ExitCode> {
    let registry = LanguageRegistry::new(&config.sandbox.languages, &config.sandbox.container.images);
    let languages = registry.describe();

    if json {
        println!("{}", serde_json::to_string_pretty(&languages)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", style("Languages").bold());
    for (name, info) in &languages {
        let enabled = if info.supported {
            style("✓").green()
        } else {
            style("✗").red()
        };
        let runtime = if info.local_runtime_available {
            style("local runtime found").green()
        } else {
            style("no local runtime").dim()
        };
        println!(
            "   {} {:<12} {:<6} {:<24} {}",
            enabled,
            name,
            info.extension,
            info.image,
            runtime
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Print service statistics
async fn show_stats(config: Config) -> anyhow::Result<ExitCode> {
    let workspace_root = config.sandbox.workspace_root.clone();
    let service = SandboxService::new(config.sandbox).await;
    let stats = service.stats().await;

    println!("{}", style("Polysandbox status").bold());
    println!("   Version: {}", style(VERSION).cyan());
    println!("   Workspace: {}", style(workspace_root.display()).cyan());
    println!(
        "   Docker: {}",
        if stats.docker_available {
            style("✓ available").green()
        } else {
            style("✗ unavailable").red()
        }
    );
    println!("   Supported languages: {}", stats.supported_languages);
    println!(
        "   Executions: {} ({} succeeded, {} failed)",
        stats.total_executions, stats.successful_executions, stats.failed_executions
    );
    println!("   Active users: {}", stats.active_users);
    Ok(ExitCode::SUCCESS)
}

/// Write the default configuration
fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<ExitCode> {
    let path = path.unwrap_or_else(config::config_path);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    config::save_config(&Config::default(), &path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} Wrote {}", style("✓").green(), path.display());
    Ok(ExitCode::SUCCESS)
}
