//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, bail, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use productenrich_core::{EnrichProgress, EnrichmentOrchestrator, Stage, build_orchestrator};
use productenrich_shared::{
    AppConfig, EnrichmentMode, EnrichmentRequest, EnrichmentResult, init_config, load_config,
    load_config_from,
};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// productenrich: turn sparse product identifiers into structured product data.
#[derive(Parser)]
#[command(
    name = "productenrich",
    version,
    about = "Enrich product names into structured product data using web search and an LLM.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.productenrich/productenrich.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

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
    /// Enrich a single product and print the result as JSON.
    Enrich {
        /// Product name, e.g. "iPhone 15 Pro".
        product_name: String,

        /// Brand or manufacturer.
        #[arg(long)]
        brand: Option<String>,

        /// Product model number.
        #[arg(long)]
        model: Option<String>,

        /// Product category.
        #[arg(long)]
        category: Option<String>,

        /// Free-text context passed to the model.
        #[arg(long)]
        context: Option<String>,

        /// Pretty-print the JSON result.
        #[arg(long)]
        pretty: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Enrich every request in a JSON-lines file, one result line each.
    Batch {
        /// File with one JSON `EnrichmentRequest` per line.
        file: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
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
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Per-invocation overrides of config file values.
#[derive(Args, Debug, Default)]
pub(crate) struct Overrides {
    /// Search provider: none or duckduckgo.
    #[arg(long, env = "SEARCH_PROVIDER")]
    pub search_provider: Option<String>,

    /// Maximum candidate pages extracted per request.
    #[arg(long)]
    pub max_candidates: Option<usize>,

    /// LLM model name.
    #[arg(long, env = "OPENAI_MODEL_NAME")]
    pub llm_model: Option<String>,

    /// OpenAI-compatible API base URL.
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub base_url: Option<String>,
}

impl Overrides {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(provider) = &self.search_provider {
            config.search.provider = provider.clone();
        }
        if let Some(max) = self.max_candidates {
            config.search.max_candidates = max;
        }
        if let Some(model) = &self.llm_model {
            config.llm.model = model.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.llm.base_url = base_url.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout is
/// reserved for results.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "productenrich=info",
        1 => "productenrich=debug",
        _ => "productenrich=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
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
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Enrich {
            product_name,
            brand,
            model,
            category,
            context,
            pretty,
            overrides,
        } => {
            let request = EnrichmentRequest {
                product_name,
                brand,
                model,
                category,
                additional_context: context,
            };
            cmd_enrich(config_path, &overrides, &request, pretty).await
        }
        Command::Batch { file, overrides } => cmd_batch(config_path, &overrides, &file).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>, overrides: &Overrides) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    overrides.apply(&mut config);
    Ok(config)
}

// ---------------------------------------------------------------------------
// Progress display
// ---------------------------------------------------------------------------

/// Spinner on stderr that follows the pipeline stages.
struct CliProgress {
    spinner: ProgressBar,
    prefix: String,
}

impl CliProgress {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self {
            spinner,
            prefix: String::new(),
        }
    }

    fn set_prefix(&mut self, prefix: String) {
        self.prefix = prefix;
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl EnrichProgress for CliProgress {
    fn stage(&self, stage: Stage) {
        self.spinner.set_message(format!("{}{stage}", self.prefix));
    }
}

// ---------------------------------------------------------------------------
// Enrichment commands
// ---------------------------------------------------------------------------

/// Run one request under the outer deadline. `None` means Ctrl-C.
///
/// Dropping the enrichment future on either path abandons its in-flight
/// calls.
async fn enrich_with_deadline(
    orchestrator: &EnrichmentOrchestrator,
    request: &EnrichmentRequest,
    deadline: Duration,
    progress: &CliProgress,
) -> Option<EnrichmentResult> {
    let start = Instant::now();
    let enrich = orchestrator.enrich_with_progress(request, progress);

    tokio::select! {
        outcome = tokio::time::timeout(deadline, enrich) => Some(outcome.unwrap_or_else(|_| {
            warn!(product = %request.product_name, ?deadline, "request deadline exceeded");
            EnrichmentResult::failed(
                &request.product_name,
                EnrichmentMode::Generative,
                0,
                start.elapsed(),
                format!("request timed out after {}s", deadline.as_secs()),
            )
        })),
        _ = tokio::signal::ctrl_c() => None,
    }
}

fn to_json(result: &EnrichmentResult, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    Ok(json)
}

async fn cmd_enrich(
    config_path: Option<&Path>,
    overrides: &Overrides,
    request: &EnrichmentRequest,
    pretty: bool,
) -> Result<()> {
    let config = resolve_config(config_path, overrides)?;
    let deadline = Duration::from_secs(config.pipeline.request_timeout_secs);
    let orchestrator = build_orchestrator(&config)?;

    let progress = CliProgress::new();
    let outcome = enrich_with_deadline(&orchestrator, request, deadline, &progress).await;
    progress.finish();

    let Some(result) = outcome else {
        bail!("interrupted");
    };

    println!("{}", to_json(&result, pretty)?);

    if !result.success {
        let reason = result.error.as_deref().unwrap_or("unknown error");
        return Err(eyre!("enrichment failed: {reason}"));
    }
    Ok(())
}

async fn cmd_batch(config_path: Option<&Path>, overrides: &Overrides, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("failed to read {}", file.display()))?;

    let config = resolve_config(config_path, overrides)?;
    let deadline = Duration::from_secs(config.pipeline.request_timeout_secs);
    let orchestrator = build_orchestrator(&config)?;

    let lines: Vec<(usize, &str)> = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| (i + 1, line))
        .collect();
    let total = lines.len();

    let mut progress = CliProgress::new();
    let mut failed = 0usize;

    for (done, (line_no, line)) in lines.into_iter().enumerate() {
        progress.set_prefix(format!("[{}/{total}] ", done + 1));

        let result = match serde_json::from_str::<EnrichmentRequest>(line) {
            Ok(request) => {
                match enrich_with_deadline(&orchestrator, &request, deadline, &progress).await {
                    Some(result) => result,
                    None => {
                        progress.finish();
                        bail!("interrupted after {done} of {total} requests");
                    }
                }
            }
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping unparsable request");
                EnrichmentResult::failed(
                    "",
                    EnrichmentMode::Generative,
                    0,
                    Duration::ZERO,
                    format!("line {line_no}: invalid request: {e}"),
                )
            }
        };

        if !result.success {
            failed += 1;
        }
        progress.spinner.suspend(|| -> Result<()> {
            println!("{}", to_json(&result, false)?);
            Ok(())
        })?;
    }

    progress.finish();
    info!(total, failed, "batch complete");

    if failed > 0 {
        return Err(eyre!("{failed} of {total} requests failed"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path, &Overrides::default())?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
