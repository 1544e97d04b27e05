//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use fixturesmith_core::pipeline::{
    BatchResult, DocumentOutcome, GenerateConfig, ProgressReporter, load_settings, plan_document,
};
use fixturesmith_core::JsonBundleWriter;
use fixturesmith_shared::{ConfigLoader, DocumentPlan, Section, document_schema};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// fixturesmith: generate structurally valid e-book fixtures.
#[derive(Parser)]
#[command(
    name = "fixturesmith",
    version,
    about = "Generate reproducible e-book test documents from a declarative config.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Defaults file layered under every config.
    #[arg(long, env = "FIXTURESMITH_DEFAULTS", global = true)]
    pub defaults: Option<PathBuf>,

    /// Ignore the defaults file entirely. Wins over `--defaults`.
    #[arg(long, global = true)]
    pub no_defaults: bool,

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
    /// Generate one or more documents.
    Generate {
        /// Config file layered over the defaults.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON schema to validate against (defaults to the built-in schema).
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Output directory; each document gets its own subdirectory.
        #[arg(short, long, default_value = "out")]
        out: PathBuf,

        /// Seed of the first document (random when omitted).
        #[arg(short, long)]
        seed: Option<u64>,

        /// Number of documents to generate.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },

    /// Print the plan a seed would produce, without writing anything.
    Plan {
        /// Config file layered over the defaults.
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long, default_value_t = 0)]
        seed: u64,

        /// Print the full plan as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write the built-in defaults to the defaults file.
    Init,
    /// Show the merged configuration.
    Show {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate the merged configuration against a schema.
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON schema (defaults to the built-in schema).
        #[arg(long)]
        schema: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "fixturesmith=info",
        1 => "fixturesmith=debug",
        _ => "fixturesmith=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so `plan --json` stays pipeable.
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
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let loader = config_loader(&cli);
    match cli.command {
        Command::Generate {
            config,
            schema,
            out,
            seed,
            count,
        } => cmd_generate(loader, config, schema.as_deref(), out, seed, count).await,
        Command::Plan { config, seed, json } => cmd_plan(&loader, config.as_deref(), seed, json),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(&loader),
            ConfigAction::Show { config } => cmd_config_show(&loader, config.as_deref()),
            ConfigAction::Validate { config, schema } => {
                cmd_config_validate(&loader, config.as_deref(), schema.as_deref())
            }
        },
    }
}

fn config_loader(cli: &Cli) -> ConfigLoader {
    if cli.no_defaults {
        ConfigLoader::without_defaults()
    } else if let Some(path) = &cli.defaults {
        ConfigLoader::with_defaults_path(path)
    } else {
        ConfigLoader::new()
    }
}

/// Read a JSON schema file, or fall back to the built-in one.
fn load_schema(path: Option<&Path>) -> Result<Value> {
    let Some(path) = path else {
        return Ok(document_schema());
    };
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read schema {}", path.display()))?;
    serde_json::from_str(&text).wrap_err_with(|| format!("invalid schema {}", path.display()))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_generate(
    loader: ConfigLoader,
    config: Option<PathBuf>,
    schema: Option<&Path>,
    out: PathBuf,
    seed: Option<u64>,
    count: usize,
) -> Result<()> {
    if count == 0 {
        return Err(eyre!("--count must be at least 1"));
    }

    let seed = seed.unwrap_or_else(rand::random::<u64>);
    let generate = GenerateConfig {
        config_path: config,
        loader,
        schema: Some(load_schema(schema)?),
        output_root: out,
        seed,
        count,
    };

    info!(seed, count, out = %generate.output_root.display(), "generating documents");

    let reporter = CliProgress::new();
    let result = fixturesmith_core::pipeline::generate_batch(
        &generate,
        Arc::new(JsonBundleWriter),
        &reporter,
    )
    .await?;

    println!();
    for outcome in &result.outcomes {
        match &outcome.result {
            Ok(doc) => println!(
                "  seed {:<6} {}  {} chapters, {} resources, {} warnings",
                outcome.seed,
                doc.path.display(),
                doc.chapters,
                doc.resources,
                doc.warnings.len()
            ),
            Err(e) => println!("  seed {:<6} FAILED: {e}", outcome.seed),
        }
    }
    println!();
    println!(
        "  Generated {}/{} documents in {:.1}s (seed {seed})",
        result.succeeded(),
        result.outcomes.len(),
        result.elapsed.as_secs_f64()
    );
    println!();

    if result.failed() > 0 {
        return Err(eyre!(
            "{} of {} documents failed",
            result.failed(),
            result.outcomes.len()
        ));
    }
    Ok(())
}

fn cmd_plan(loader: &ConfigLoader, config: Option<&Path>, seed: u64, json: bool) -> Result<()> {
    let loaded = load_settings(config, loader, Some(&document_schema()))?;
    let (plan, warnings) = plan_document(&loaded, seed);

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    print_plan(&plan);
    for warning in &warnings {
        println!("  warning: {warning}");
    }
    Ok(())
}

fn print_plan(plan: &DocumentPlan) {
    println!("{} ({}) [{}]", plan.title, plan.language, plan.id);
    for chapter in &plan.chapters {
        println!(
            "  {:>3}. {}  notes={} citations={} images={}",
            chapter.index,
            chapter.file_name,
            chapter.notes.len(),
            chapter.citations.len(),
            chapter.images.len()
        );
        print_sections(&chapter.sections, 2);
    }
}

fn print_sections(sections: &[Section], indent: usize) {
    for section in sections {
        println!("{:width$}- {} #{}", "", section.title, section.anchor, width = indent * 3);
        print_sections(&section.children, indent + 1);
    }
}

fn cmd_config_init(loader: &ConfigLoader) -> Result<()> {
    let path = loader.init_defaults()?;
    println!("Defaults written to: {}", path.display());
    Ok(())
}

fn cmd_config_show(loader: &ConfigLoader, config: Option<&Path>) -> Result<()> {
    let merged = loader.load_and_validate(config, None)?;
    println!("{}", layers_header(loader, config));
    let toml_str = toml::to_string_pretty(&merged)?;
    println!("{toml_str}");
    Ok(())
}

/// TOML comment naming the layers `config show` merged.
fn layers_header(loader: &ConfigLoader, config: Option<&Path>) -> String {
    let defaults = match loader.defaults_path() {
        Some(path) if path.exists() => path.display().to_string(),
        Some(path) => format!("{} (not found)", path.display()),
        None => "none".to_string(),
    };
    let mut header = format!("# defaults: {defaults}");
    if let Some(path) = config {
        header.push_str(&format!("\n# config:   {}", path.display()));
    }
    header
}

fn cmd_config_validate(
    loader: &ConfigLoader,
    config: Option<&Path>,
    schema: Option<&Path>,
) -> Result<()> {
    let schema = load_schema(schema)?;
    load_settings(config, loader, Some(&schema))?;
    println!("Configuration is valid.");
    Ok(())
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
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn document_done(&self, outcome: &DocumentOutcome, current: usize, total: usize) {
        let status = if outcome.result.is_ok() { "done" } else { "failed" };
        self.spinner.set_message(format!(
            "Generating [{current}/{total}] seed {} {status}",
            outcome.seed
        ));
    }

    fn done(&self, _result: &BatchResult) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_header_names_both_sources() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let defaults = tmp.path().join("defaults.toml");
        std::fs::write(&defaults, "[document]\n").expect("write");
        let user = tmp.path().join("user.toml");

        let header = layers_header(&ConfigLoader::with_defaults_path(&defaults), Some(&user));
        assert_eq!(
            header,
            format!("# defaults: {}\n# config:   {}", defaults.display(), user.display())
        );
    }

    #[test]
    fn layers_header_reports_missing_or_disabled_defaults() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let absent = tmp.path().join("absent.toml");

        let header = layers_header(&ConfigLoader::with_defaults_path(&absent), None);
        assert!(header.ends_with("(not found)"));
        assert_eq!(layers_header(&ConfigLoader::without_defaults(), None), "# defaults: none");
    }
}
