use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP listener and access control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the API binds to.
    pub listen: String,
    /// Primary credential expected in the `x-api-token` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// When true and no token is configured, one is generated at startup.
    pub require_api_token: bool,
    /// Origins allowed for cross-origin requests (empty = CORS disabled).
    pub cors_origins: Vec<String>,
    /// Lifetime of stream/file access tickets.
    pub ticket_ttl_ms: u64,
    /// Requests one client address may make per minute (0 = unlimited).
    pub rate_limit_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3536".to_string(),
            api_token: None,
            require_api_token: true,
            cors_origins: Vec::new(),
            ticket_ttl_ms: 120_000,
            rate_limit_per_minute: 120,
        }
    }
}

impl ServerConfig {
    /// Token the API expects, or `None` when the API is open. A token is
    /// generated when one is required but not configured; the flag reports that.
    pub fn effective_api_token(&self) -> Option<(String, bool)> {
        let configured = self
            .api_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        match configured {
            Some(token) => Some((token.to_string(), false)),
            None => self
                .require_api_token
                .then(|| (uuid::Uuid::new_v4().simple().to_string(), true)),
        }
    }
}

/// Filesystem locations. Unset entries fall back to XDG / working-directory defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    /// Netscape cookie file handed to the extractor when it exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_file: Option<PathBuf>,
}

/// Queue admission and registry retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of extractor processes running at once.
    pub max_concurrent: usize,
    /// Delay before re-evaluating the queue when the unit budget is exhausted.
    pub queue_retry_ms: u64,
    /// How long a finished job stays in the live registry.
    pub job_retention_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            queue_retry_ms: 2_500,
            job_retention_ms: 6 * 60 * 60 * 1000,
        }
    }
}

/// Inputs of the dynamic resource-unit budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Memory that must stay free regardless of load.
    pub min_free_mem_mb: u64,
    /// Memory cost of one resource unit.
    pub mem_per_unit_mb: u64,
    /// Fraction of CPU cores the service may keep busy.
    pub cpu_utilization_target: f64,
    /// Absolute unit ceiling; defaults to `max(2, cores * 2)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_resource_units: Option<u32>,
    /// Upper bound on ffmpeg threads per job; defaults to `min(4, cores)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ffmpeg_threads: Option<u32>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            min_free_mem_mb: 384,
            mem_per_unit_mb: 320,
            cpu_utilization_target: 0.75,
            max_resource_units: None,
            max_ffmpeg_threads: None,
        }
    }
}

/// Retry policy parameters for failed extractor runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of runs per job (including the first).
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
        }
    }
}

/// How the external extractor is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub program: String,
    /// Arguments placed before the generated ones (e.g. `["-m", "yt_dlp"]` for python).
    pub leading_args: Vec<String>,
    /// Pass `--no-warnings`.
    pub silent: bool,
    pub default_format: String,
    pub output_template: String,
    pub chapter_template: String,
    pub analyze_timeout_ms: u64,
    pub analyze_concurrency: usize,
    /// Time between SIGTERM and SIGKILL when stopping a process.
    pub kill_grace_ms: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            leading_args: Vec::new(),
            silent: true,
            default_format: "bestvideo*+bestaudio/best".to_string(),
            output_template: "%(title)s.%(ext)s".to_string(),
            chapter_template:
                "%(title)s - %(section_number)02d - %(section_title)s.%(ext)s".to_string(),
            analyze_timeout_ms: 30_000,
            analyze_concurrency: 4,
            kill_grace_ms: 1_500,
        }
    }
}

/// Origin safety guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub dns_cache_ttl_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            dns_cache_ttl_ms: 5 * 60 * 1000,
        }
    }
}

/// Persistent history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub max_records: usize,
    pub max_log_lines: usize,
    pub flush_debounce_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_records: 500,
            max_log_lines: 500,
            flush_debounce_ms: 3_000,
        }
    }
}

/// Global configuration loaded from `~/.config/astrobox/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub scheduler: SchedulerConfig,
    pub resources: ResourceConfig,
    pub retry: RetryConfig,
    pub extractor: ExtractorConfig,
    pub guard: GuardConfig,
    pub store: StoreConfig,
}

/// Concrete directories after defaults were applied and created on disk.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    /// Canonical download root; every served file must live below it.
    pub download_dir: PathBuf,
    pub state_dir: PathBuf,
    pub history_file: PathBuf,
    pub cookie_file: PathBuf,
}

impl AppConfig {
    /// Clamp every numeric setting into its accepted range.
    pub fn normalized(mut self) -> Self {
        let cores = num_cpus::get().max(1) as u32;

        self.server.ticket_ttl_ms = self.server.ticket_ttl_ms.clamp(15_000, 30 * 60 * 1000);
        self.server.rate_limit_per_minute = self.server.rate_limit_per_minute.min(100_000);

        let s = &mut self.scheduler;
        s.max_concurrent = s.max_concurrent.clamp(1, 12);
        s.queue_retry_ms = s.queue_retry_ms.clamp(500, 60_000);
        s.job_retention_ms = s.job_retention_ms.clamp(60_000, 24 * 60 * 60 * 1000);

        let r = &mut self.resources;
        r.min_free_mem_mb = r.min_free_mem_mb.clamp(64, 64 * 1024);
        r.mem_per_unit_mb = r.mem_per_unit_mb.clamp(64, 16 * 1024);
        if !r.cpu_utilization_target.is_finite() {
            r.cpu_utilization_target = ResourceConfig::default().cpu_utilization_target;
        }
        r.cpu_utilization_target = r.cpu_utilization_target.clamp(0.3, 1.0);
        r.max_resource_units = Some(
            r.max_resource_units
                .unwrap_or_else(|| (cores * 2).max(2))
                .clamp(1, 64),
        );
        r.max_ffmpeg_threads = Some(
            r.max_ffmpeg_threads
                .unwrap_or_else(|| cores.min(4))
                .clamp(1, 16),
        );

        self.retry.max_attempts = self.retry.max_attempts.clamp(1, 10);
        self.retry.max_delay_ms = self.retry.max_delay_ms.max(self.retry.base_delay_ms);

        let e = &mut self.extractor;
        e.analyze_timeout_ms = e.analyze_timeout_ms.clamp(5_000, 120_000);
        e.analyze_concurrency = e.analyze_concurrency.clamp(1, 10);

        self.guard.dns_cache_ttl_ms = self
            .guard
            .dns_cache_ttl_ms
            .clamp(15_000, 24 * 60 * 60 * 1000);

        self.store.max_records = self.store.max_records.max(1);
        self.store.max_log_lines = self.store.max_log_lines.max(1);
        self
    }

    /// Apply `ASTROBOX_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(token) = env_non_empty("ASTROBOX_API_TOKEN") {
            self.server.api_token = Some(token);
        }
        if let Some(listen) = env_non_empty("ASTROBOX_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(dir) = env_non_empty("ASTROBOX_DOWNLOAD_DIR") {
            self.paths.download_dir = Some(PathBuf::from(dir));
        }
    }

    /// Configured state dir, or `~/.local/state/astrobox`. Nothing is created.
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.paths.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(xdg::BaseDirectories::with_prefix("astrobox")?
                .get_state_home()
                .join("astrobox")),
        }
    }

    /// Resolve unset paths, create directories, and canonicalize the download root.
    pub fn resolve_paths(&self) -> Result<ResolvedPaths> {
        let state_dir = self.state_dir()?;
        let download_dir = match &self.paths.download_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?.join("downloads"),
        };
        fs::create_dir_all(&state_dir)
            .with_context(|| format!("create state dir: {}", state_dir.display()))?;
        fs::create_dir_all(&download_dir)
            .with_context(|| format!("create download dir: {}", download_dir.display()))?;
        let download_dir = download_dir
            .canonicalize()
            .with_context(|| format!("resolve download dir: {}", download_dir.display()))?;
        let cookie_file = self
            .paths
            .cookie_file
            .clone()
            .unwrap_or_else(|| state_dir.join("cookies.txt"));

        Ok(ResolvedPaths {
            history_file: state_dir.join("history.json"),
            download_dir,
            state_dir,
            cookie_file,
        })
    }

    pub fn queue_retry(&self) -> Duration {
        Duration::from_millis(self.scheduler.queue_retry_ms)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_millis(self.scheduler.job_retention_ms)
    }

    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_millis(self.server.ticket_ttl_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.extractor.kill_grace_ms)
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("astrobox")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<AppConfig> {
    let path = config_path()?;
    load_or_init_at(&path)
}

/// Same as [`load_or_init`] for an explicit path (used by `--config`).
pub fn load_or_init_at(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let default_cfg = AppConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}
