use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clipfit_core::{
    load_clipfit_config, open_backend, AcquisitionCoordinator, AcquisitionRequest, ActivityError,
    ActivitySink, ArtifactCache, ClipfitConfig, Collaborators, CommandLanguageDetector,
    CompositeKey, CoordinatorSettings, FfmpegTranscoder, LanguageDetector, MediaArtifact,
    OutboxChannel, SourceIdentifier, TargetLanguage, TracingEvents, Translator, VotCliTranslator,
    YtDlpCatalog,
};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] clipfit_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] clipfit_core::StoreError),
    #[error("catalog error: {0}")]
    Catalog(#[from] clipfit_core::CatalogError),
    #[error("invalid source: {0}")]
    Source(#[from] clipfit_core::media::SourceError),
    #[error(transparent)]
    Acquisition(#[from] clipfit_core::AcquisitionError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("health check failed: {0}")]
    Unhealthy(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Fetch size-bounded video artifacts", long_about = None)]
pub struct Cli {
    /// Path to clipfit.toml
    #[arg(long, default_value = "configs/clipfit.toml")]
    pub config: PathBuf,
    /// Overrides paths.base_dir
    #[arg(long)]
    pub base_dir: Option<PathBuf>,
    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Produces (or reuses) the artifact for a URL and delivers it to the outbox
    Fetch(FetchArgs),
    /// Inspects or drops cached artifacts
    #[command(subcommand)]
    Cache(CacheCommands),
    /// Checks configured paths and the cache backend
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    pub url: String,
    /// Target audio language: original, ru, en or kk
    #[arg(long, default_value = "original")]
    pub lang: TargetLanguage,
    /// Outbox folder the parts are delivered to
    #[arg(long, default_value = "default")]
    pub destination: String,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    pub url: String,
    #[arg(long, default_value = "original")]
    pub lang: TargetLanguage,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Prints the cached artifact for a URL and language
    Show(KeyArgs),
    /// Removes the cached artifact so the next fetch produces it again
    Invalidate(KeyArgs),
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    Check,
}

/// Installs the fmt subscriber on stderr. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match &cli.command {
        Commands::Fetch(args) => {
            let report = runtime.block_on(context.fetch(args))?;
            render(&report, cli.format)?;
        }
        Commands::Cache(CacheCommands::Show(args)) => {
            let entry = runtime.block_on(context.cache_show(args))?;
            render(&entry, cli.format)?;
        }
        Commands::Cache(CacheCommands::Invalidate(args)) => {
            let result = runtime.block_on(context.cache_invalidate(args))?;
            render(&result, cli.format)?;
        }
        Commands::Health(HealthCommands::Check) => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::Unhealthy(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

/// Keeps the operator informed while a long production run is underway.
struct LogActivity;

#[async_trait]
impl ActivitySink for LogActivity {
    async fn signal(&self, destination: &str) -> std::result::Result<(), ActivityError> {
        info!(destination, "still producing");
        Ok(())
    }
}

#[derive(Debug)]
struct AppContext {
    config: ClipfitConfig,
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let mut config = load_clipfit_config(&config_path)?;
        if let Some(base_dir) = &cli.base_dir {
            config.paths.base_dir = base_dir.display().to_string();
        }
        Ok(Self {
            config,
            config_path,
        })
    }

    fn key(&self, args: &KeyArgs) -> Result<CompositeKey> {
        let source = SourceIdentifier::from_url(&args.url)?;
        Ok(CompositeKey::new(source, args.lang))
    }

    fn cache(&self) -> Result<ArtifactCache> {
        let backend = open_backend(&self.config)?;
        Ok(ArtifactCache::new(backend, self.config.lock.poll_interval()))
    }

    fn coordinator(&self) -> Result<AcquisitionCoordinator> {
        let config = &self.config;
        let detector: Option<Arc<dyn LanguageDetector>> = if config.detection.enabled {
            Some(Arc::new(CommandLanguageDetector::new(&config.detection)))
        } else {
            None
        };
        let translator: Option<Arc<dyn Translator>> = if config.translation.enabled {
            Some(Arc::new(VotCliTranslator::new(&config.translation)))
        } else {
            None
        };

        let collaborators = Collaborators {
            catalog: Arc::new(YtDlpCatalog::new(&config.catalog)?),
            transcoder: Arc::new(FfmpegTranscoder::new(
                &config.transcoder,
                config.limits.max_concurrent_transcodes,
            )),
            detector,
            translator,
            backend: open_backend(config)?,
            delivery: Arc::new(OutboxChannel::new(
                config.resolve_path(&config.paths.outbox_dir),
            )),
            events: Arc::new(TracingEvents),
            activity: Arc::new(LogActivity),
        };
        Ok(AcquisitionCoordinator::new(
            collaborators,
            CoordinatorSettings::from_config(config),
        ))
    }

    async fn fetch(&self, args: &FetchArgs) -> Result<FetchReport> {
        let coordinator = self.coordinator()?;
        let outcome = coordinator
            .acquire(&AcquisitionRequest {
                url: args.url.clone(),
                target: args.lang,
                destination: args.destination.clone(),
            })
            .await?;
        Ok(FetchReport {
            key: outcome.key.to_string(),
            fresh: outcome.fresh,
            entry: CacheEntry::from_artifact(&outcome.artifact),
        })
    }

    async fn cache_show(&self, args: &KeyArgs) -> Result<CacheLookup> {
        let key = self.key(args)?;
        let artifact = self.cache()?.load(&key).await?;
        Ok(CacheLookup {
            key: key.to_string(),
            entry: artifact.as_ref().map(CacheEntry::from_artifact),
        })
    }

    async fn cache_invalidate(&self, args: &KeyArgs) -> Result<InvalidateResult> {
        let key = self.key(args)?;
        self.cache()?.invalidate(&key).await?;
        Ok(InvalidateResult {
            key: key.to_string(),
            status: "invalidated".to_string(),
        })
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let config = &self.config;
        let mut results = vec![
            check_path("clipfit.toml", &self.config_path),
            check_directory("base_dir", Path::new(&config.paths.base_dir)),
            check_directory("work_dir", &config.resolve_path(&config.paths.work_dir)),
            check_directory("outbox_dir", &config.resolve_path(&config.paths.outbox_dir)),
        ];
        results.push(match open_backend(config) {
            Ok(_) => HealthEntry::ok("store", format!("{:?}", config.store.backend)),
            Err(err) => HealthEntry::error("store", err.to_string()),
        });
        results
    }
}

fn check_path(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, format!("{}", path.display()))
    } else {
        HealthEntry::error(name, format!("{} missing", path.display()))
    }
}

/// Working directories are created on demand, so a missing one only warns.
fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::error(name, format!("{} is not a directory", path.display())),
        Err(_) => HealthEntry::warn(name, format!("{} will be created", path.display())),
    }
}

#[derive(Debug, Serialize)]
struct CacheEntry {
    title: Option<String>,
    url: String,
    parts: Vec<String>,
    resolution: String,
    audio: String,
    detection: String,
    produced_at: String,
}

impl CacheEntry {
    fn from_artifact(artifact: &MediaArtifact) -> Self {
        Self {
            title: artifact.title.clone(),
            url: artifact.url.clone(),
            parts: artifact.parts.iter().map(|part| part.to_string()).collect(),
            resolution: format!("{}x{}", artifact.width, artifact.height),
            audio: artifact.audio_label(),
            detection: artifact.detection.label().to_string(),
            produced_at: artifact.produced_at.to_rfc3339(),
        }
    }

    fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("title: {}", self.title.as_deref().unwrap_or("-")),
            format!("url: {}", self.url),
            format!("resolution: {}", self.resolution),
            format!("audio: {} (detection: {})", self.audio, self.detection),
            format!("produced_at: {}", self.produced_at),
            format!("parts ({}):", self.parts.len()),
        ];
        lines.extend(self.parts.iter().map(|part| format!("  - {part}")));
        lines
    }
}

#[derive(Debug, Serialize)]
struct FetchReport {
    key: String,
    fresh: bool,
    #[serde(flatten)]
    entry: CacheEntry,
}

impl DisplayFallback for FetchReport {
    fn display(&self) -> String {
        let origin = if self.fresh { "produced" } else { "cached" };
        let mut lines = vec![format!("{} ({origin})", self.key)];
        lines.extend(self.entry.lines());
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct CacheLookup {
    key: String,
    entry: Option<CacheEntry>,
}

impl DisplayFallback for CacheLookup {
    fn display(&self) -> String {
        match &self.entry {
            Some(entry) => {
                let mut lines = vec![self.key.clone()];
                lines.extend(entry.lines());
                lines.join("\n")
            }
            None => format!("{}: not cached", self.key),
        }
    }
}

#[derive(Debug, Serialize)]
struct InvalidateResult {
    key: String,
    status: String,
}

impl DisplayFallback for InvalidateResult {
    fn display(&self) -> String {
        format!("{}: {}", self.key, self.status)
    }
}

#[derive(Debug, Serialize)]
struct HealthEntry {
    name: String,
    status: CheckStatus,
    detail: String,
}

#[derive(Debug, Serialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warn,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
