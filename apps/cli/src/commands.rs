//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use kbmirror_core::{ExportResult, ProgressReporter};
use kbmirror_shared::{
    AppConfig, ExportConfig, ExportOverrides, init_config, load_config, load_config_from,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kbmirror — mirror ServiceNow knowledge bases as Markdown.
#[derive(Parser)]
#[command(
    name = "kbmirror",
    version,
    about = "Export ServiceNow knowledge-base articles to a Markdown directory tree.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Export every selected article to the output directory.
    Export(ExportArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `kbmirror export`. Anything left out falls back to the
/// environment, then the config file.
#[derive(Args, Debug)]
pub(crate) struct ExportArgs {
    /// Instance host, URL, or bare name (e.g. `acme`).
    #[arg(long)]
    pub instance: Option<String>,

    /// Username for basic auth. The password is read from the environment.
    #[arg(long)]
    pub username: Option<String>,

    /// Knowledge base to export, by display name (repeatable).
    #[arg(long = "kb", value_name = "NAME")]
    pub knowledge_bases: Vec<String>,

    /// Output directory for the article tree.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Rows per Table API request (1-10000).
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Config file to use instead of ~/.kbmirror/kbmirror.toml.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show {
        /// Config file to read instead of ~/.kbmirror/kbmirror.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. `RUST_LOG` wins when set.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "kbmirror=info",
        1 => "kbmirror=debug",
        _ => "kbmirror=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Export(args) => cmd_export(args).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show { config } => cmd_config_show(config.as_deref()),
        },
    }
}

fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// export
// ---------------------------------------------------------------------------

async fn cmd_export(args: ExportArgs) -> Result<ExitCode> {
    let app = load_app_config(args.config.as_deref())?;

    let overrides = ExportOverrides {
        instance: args.instance,
        username: args.username,
        knowledge_bases: args.knowledge_bases,
        output_dir: args.out,
        page_size: args.page_size,
    };
    let config = ExportConfig::resolve(&app, overrides, |key| std::env::var(key).ok())?;

    info!(
        instance = %config.instance_url,
        output = %config.output_dir.display(),
        knowledge_bases = ?config.allow_list.names().collect::<Vec<_>>(),
        "exporting knowledge bases"
    );

    let reporter = CliProgress::new();
    let result = kbmirror_core::run_export(&config, &reporter)
        .await
        .wrap_err_with(|| format!("export from {} failed", config.instance_url))?;
    drop(reporter);

    print_summary(&config, &result);

    if result.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_summary(config: &ExportConfig, result: &ExportResult) {
    let report = &result.report;

    println!();
    match report.empty_reason {
        Some(reason) => println!("  Nothing exported: {reason}."),
        None => println!("  Export complete!"),
    }
    println!("  Instance:  {}", config.instance_url);
    println!("  Output:    {}", result.output_dir.display());
    println!("  Processed: {}", result.written);
    println!(
        "  Skipped:   {} (unresolved {}, filtered {}, unassigned {})",
        result.skipped(),
        report.articles_unresolved,
        report.articles_filtered,
        report.articles_unassigned
    );
    println!("  Rejected:  {}", result.rejected());
    println!("  Degraded:  {}", result.degraded);
    println!("  Failed:    {}", result.failed.len());
    if report.collisions_resolved > 0 {
        println!("  Renamed:   {} (path collisions)", report.collisions_resolved);
    }
    if !report.unmatched_allow_list.is_empty() {
        println!(
            "  Unmatched knowledge bases: {}",
            report.unmatched_allow_list.join(", ")
        );
    }
    for failed in &result.failed {
        println!("    ✗ {}: {}", failed.path.display(), failed.error);
    }
    if let Some(manifest) = &result.manifest_path {
        println!("  Manifest:  {}", manifest.display());
    }
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid progress template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn article_written(&self, path: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Writing [{current}/{total}] {path}"));
    }

    fn done(&self, _result: &ExportResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<ExitCode> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_show(path: Option<&Path>) -> Result<ExitCode> {
    let config = load_app_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn export_flags_parse() {
        let cli = Cli::parse_from([
            "kbmirror", "-v", "export", "--instance", "acme", "--kb", "IT", "--kb", "HR",
            "--out", "mirror", "--page-size", "50",
        ]);

        assert_eq!(cli.verbose, 1);
        let Command::Export(args) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(args.instance.as_deref(), Some("acme"));
        assert_eq!(args.knowledge_bases, vec!["IT", "HR"]);
        assert_eq!(args.out, Some(PathBuf::from("mirror")));
        assert_eq!(args.page_size, Some(50));
        assert!(args.config.is_none());
    }

    #[test]
    fn log_format_is_global() {
        let cli = Cli::parse_from(["kbmirror", "config", "show", "--log-format", "json"]);
        assert!(matches!(cli.log_format, LogFormat::Json));
    }
}
