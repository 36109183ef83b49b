//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use heritix_agents::{AgentRegistry, OpenAiCompatibleClient, WhisperClient};
use heritix_core::{
    KnowledgeService, LocalAudioStore, PipelineJob, RunOutcome, StatusReport, UploadRequest,
    status,
};
use heritix_shared::{
    AppConfig, KnowledgeId, SearchFilters, expand_home, init_config, load_config,
    load_config_from, validate_api_key,
};
use heritix_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Heritix: preserve spoken cultural knowledge.
#[derive(Parser)]
#[command(
    name = "heritix",
    version,
    about = "Transcribe, structure and archive cultural-knowledge recordings.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.heritix/heritix.toml).
    #[arg(long, global = true, env = "HERITIX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
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

/// Recording details shared by `upload` and `ingest`.
#[derive(clap::Args)]
pub(crate) struct UploadArgs {
    /// Audio file to archive.
    file: PathBuf,

    /// Confirm the speaker consented to processing.
    #[arg(long)]
    consent: bool,

    /// Contributor name (defaults to "Anonymous").
    #[arg(short, long, default_value = "")]
    contributor: String,

    /// Title (defaults to "Recording <date> <time>").
    #[arg(short, long)]
    title: Option<String>,

    /// MIME type (inferred from the file extension when omitted).
    #[arg(long)]
    content_type: Option<String>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Store a recording without processing it.
    Upload(UploadArgs),

    /// Run the knowledge pipeline for an uploaded recording.
    Process {
        /// Record ID returned by `upload`.
        id: String,
    },

    /// Upload a recording and process it in one step.
    Ingest(UploadArgs),

    /// Show the status of a record.
    Status {
        /// Record ID.
        id: String,

        /// Print the full status report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search the archive.
    Search {
        /// Category filter ("All" for every category).
        #[arg(short, long)]
        category: Option<String>,

        /// Detected language code.
        #[arg(short, long)]
        language: Option<String>,

        /// Text to match in titles and transcripts.
        #[arg(short = 'q', long = "query")]
        text: Option<String>,

        /// Print hits as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run every knowledge agent over a piece of text without storing anything.
    Analyze {
        /// Text to analyze. Read from --file when omitted.
        text: Option<String>,

        /// Read the text from a file.
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
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

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "heritix=info",
        1 => "heritix=debug",
        _ => "heritix=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        };
    }

    let config = match cli.config.as_deref() {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Upload(args) => cmd_upload(&config, args).await,
        Command::Process { id } => cmd_process(&config, &id).await,
        Command::Ingest(args) => cmd_ingest(&config, args).await,
        Command::Status { id, json } => cmd_status(&config, &id, json).await,
        Command::Search {
            category,
            language,
            text,
            json,
        } => {
            let filters = SearchFilters {
                category,
                language,
                text,
            };
            cmd_search(&config, &filters, json).await
        }
        Command::Analyze { text, file } => cmd_analyze(&config, text, file).await,
        Command::Config { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Service wiring
// ---------------------------------------------------------------------------

/// Build the full service. Needs the API key.
async fn build_service(config: &AppConfig) -> Result<KnowledgeService> {
    let api_key = validate_api_key(config)?;

    let db_path = expand_home(&config.storage.database_path)?;
    let storage = Arc::new(Storage::open(&db_path).await?);
    let audio = Arc::new(LocalAudioStore::new(expand_home(&config.storage.audio_dir)?)?);

    let llm = Arc::new(OpenAiCompatibleClient::from_config(&config.llm, api_key.clone())?);
    let agents = Arc::new(AgentRegistry::standard(llm, &config.pipeline.target_language));
    let stt = Arc::new(WhisperClient::from_config(&config.llm, api_key)?);

    info!(db = %db_path.display(), model = %config.llm.model, "service ready");
    Ok(KnowledgeService::new(storage, agents, stt, audio, config))
}

/// Open the archive for read-only commands.
async fn open_archive(config: &AppConfig) -> Result<Storage> {
    let db_path = expand_home(&config.storage.database_path)?;
    Ok(Storage::open_readonly(&db_path).await?)
}

fn parse_id(id: &str) -> Result<KnowledgeId> {
    id.trim()
        .parse()
        .map_err(|e| eyre!("invalid record ID '{id}': {e}"))
}

/// MIME type for an audio file extension.
fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mp3" | "mpeg" => Some("audio/mpeg"),
        "wav" => Some("audio/wav"),
        "m4a" | "mp4" => Some("audio/mp4"),
        "webm" => Some("audio/webm"),
        "ogg" | "oga" | "opus" => Some("audio/ogg"),
        _ => None,
    }
}

async fn read_upload(args: UploadArgs) -> Result<UploadRequest> {
    let content_type = match args.content_type {
        Some(ct) => ct,
        None => content_type_for(&args.file)
            .ok_or_else(|| {
                eyre!(
                    "cannot infer audio type of '{}'; pass --content-type",
                    args.file.display()
                )
            })?
            .to_string(),
    };
    let audio = tokio::fs::read(&args.file)
        .await
        .map_err(|e| eyre!("cannot read '{}': {e}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(UploadRequest {
        audio,
        content_type,
        file_name,
        contributor: args.contributor,
        consent: args.consent,
        title: args.title,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_upload(config: &AppConfig, args: UploadArgs) -> Result<()> {
    let service = build_service(config).await?;
    let request = read_upload(args).await?;
    let id = service.upload(request).await?;

    println!("Uploaded: {id}");
    println!("Run `heritix process {id}` to start processing.");
    Ok(())
}

async fn cmd_process(config: &AppConfig, id: &str) -> Result<()> {
    let service = build_service(config).await?;
    let id = parse_id(id)?;
    let job = service.start_processing(&id).await?;
    finish(&service, job).await
}

async fn cmd_ingest(config: &AppConfig, args: UploadArgs) -> Result<()> {
    let service = build_service(config).await?;
    let request = read_upload(args).await?;
    let id = service.upload(request).await?;
    println!("Uploaded: {id}");

    let job = service.start_processing(&id).await?;
    finish(&service, job).await
}

/// Follow a run to the end, then print its status.
async fn finish(service: &KnowledgeService, job: PipelineJob) -> Result<()> {
    let id = job.record_id.clone();
    let outcome = follow(service, job).await?;

    let report = service.get_status(&id).await?;
    print_report(&report);

    match outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Failed { stage, message } => {
            Err(eyre!("processing failed at {stage}: {message}"))
        }
    }
}

/// Show a spinner with the latest stage until the run ends. Ctrl-C cancels the run.
async fn follow(service: &KnowledgeService, job: PipelineJob) -> Result<RunOutcome> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message("queued");

    let id = job.record_id.clone();
    let wait = job.wait();
    tokio::pin!(wait);
    let mut poll = tokio::time::interval(Duration::from_millis(500));
    let mut cancelled = false;

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            _ = poll.tick() => {
                if let Ok(report) = service.get_status(&id).await {
                    if let Some(entry) = report.latest() {
                        spinner.set_message(format!("{} {}", entry.stage, entry.outcome));
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                cancelled = service.cancel(&id);
                spinner.set_message("cancelling after the current stage");
            }
        }
    };

    spinner.finish_and_clear();
    Ok(outcome?)
}

async fn cmd_status(config: &AppConfig, id: &str, json: bool) -> Result<()> {
    let storage = open_archive(config).await?;
    let id = parse_id(id)?;
    let report = status::aggregate(&storage, &id, config.pipeline.status_log_limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &StatusReport) {
    let meta = &report.metadata;
    let preview = &report.content_preview;

    println!();
    println!("  ID:          {}", report.record_id);
    println!("  Status:      {}", report.status);
    println!("  Title:       {}", meta.title);
    println!("  Contributor: {}", meta.contributor);
    println!("  Language:    {}", meta.language.as_deref().unwrap_or("-"));
    println!("  Category:    {}", meta.category.as_deref().unwrap_or("-"));
    if !meta.transcript_preview.is_empty() {
        println!("  Transcript:  {}", meta.transcript_preview);
    }
    println!(
        "  Content:     extraction={} categorization={} context={} education={}",
        preview.has_extraction,
        preview.has_categorization,
        preview.has_context,
        preview.has_education
    );
    if !preview.translations.is_empty() {
        println!("  Translated:  {}", preview.translations.join(", "));
    }
    if !preview.degraded.is_empty() {
        println!("  Unparsed:    {}", preview.degraded.join(", "));
    }
    println!();
    for entry in report.logs.iter().rev() {
        let note = entry.error_message.as_deref().unwrap_or("");
        println!(
            "  {}  {:<15} {:<10} {note}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.stage.as_str(),
            entry.outcome.as_str()
        );
    }
    println!();
}

async fn cmd_search(config: &AppConfig, filters: &SearchFilters, json: bool) -> Result<()> {
    let storage = open_archive(config).await?;
    let hits = storage.search(filters, config.pipeline.search_limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No matching recordings.");
        return Ok(());
    }
    for hit in &hits {
        println!(
            "{}  {:<10} {:<20} {:<4} {}",
            hit.id,
            hit.processing_status.as_str(),
            hit.category.as_deref().unwrap_or("-"),
            hit.detected_language.as_deref().unwrap_or("-"),
            hit.title
        );
        if let Some(summary) = &hit.summary {
            println!("    {summary}");
        }
    }
    println!("{} result(s)", hits.len());
    Ok(())
}

async fn cmd_analyze(config: &AppConfig, text: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let text = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| eyre!("cannot read '{}': {e}", path.display()))?,
        (None, None) => return Err(eyre!("provide text or --file")),
    };

    let service = build_service(config).await?;
    let analysis = service.analyze_text(&text).await?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config: AppConfig = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for(Path::new("a/story.MP3")), Some("audio/mpeg"));
        assert_eq!(content_type_for(Path::new("song.m4a")), Some("audio/mp4"));
        assert_eq!(content_type_for(Path::new("notes.txt")), None);
        assert_eq!(content_type_for(Path::new("noext")), None);
    }

    #[test]
    fn cli_parses_ingest() {
        let cli = Cli::try_parse_from([
            "heritix", "ingest", "story.wav", "--consent", "-c", "Amina", "-v",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 1);
        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert!(args.consent);
        assert_eq!(args.contributor, "Amina");
        assert_eq!(args.file, PathBuf::from("story.wav"));
    }

    #[test]
    fn cli_parses_search_filters() {
        let cli = Cli::try_parse_from(["heritix", "search", "-q", "turmeric", "--category", "All"])
            .expect("parse");
        let Command::Search { category, text, json, .. } = cli.command else {
            panic!("expected search");
        };
        assert_eq!(category.as_deref(), Some("All"));
        assert_eq!(text.as_deref(), Some("turmeric"));
        assert!(!json);
    }

    #[test]
    fn analyze_rejects_text_with_file() {
        assert!(Cli::try_parse_from(["heritix", "analyze", "hello", "--file", "x.txt"]).is_err());
    }

    #[test]
    fn record_ids_are_validated() {
        assert!(parse_id("not-a-uuid").is_err());
        let id = KnowledgeId::new();
        assert_eq!(parse_id(&format!(" {id} ")).unwrap(), id);
    }
}
