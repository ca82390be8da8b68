use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::workflows::retry::RetryConfig;

/// Main configuration structure for forest-exec
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ForestExecConfig {
    /// Transaction retry settings
    pub engine: EngineConfig,
    /// Area computation settings
    pub geometry: GeometryConfig,
    /// Progress accounting settings
    pub progress: ProgressConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retries after the first attempt before a conflict is surfaced
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Reject degenerate and self-intersecting rings
    pub strict: bool,
    /// Cached polygon areas; 0 disables caching
    pub area_cache_capacity: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Percentage points below 100 still treated as complete
    pub completion_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level directive used when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON log lines instead of compact text
    pub json_logs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_base_delay_ms: 5,
            retry_max_delay_ms: 200,
            retry_jitter: true,
        }
    }
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            strict: false,
            area_cache_capacity: 10_000,
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            completion_tolerance: 1e-6,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl Default for ForestExecConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            geometry: GeometryConfig::default(),
            progress: ProgressConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: self.retry_jitter,
        }
    }
}

impl ForestExecConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (forest-exec.toml, .forest-exec-rc)
    /// 3. Environment variables (prefixed with FOREST_EXEC__)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`ForestExecConfig::load`], looking for files in `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&ForestExecConfig::default())?);

        let toml_file = dir.join("forest-exec.toml");
        if toml_file.exists() {
            builder = builder.add_source(File::from(toml_file).format(FileFormat::Toml));
        }

        let rc_file = dir.join(".forest-exec-rc");
        if rc_file.exists() {
            builder = builder.add_source(File::from(rc_file).format(FileFormat::Toml));
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("FOREST_EXEC")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<ForestExecConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = ForestExecConfig::load_env_file();
        ForestExecConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static ForestExecConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
