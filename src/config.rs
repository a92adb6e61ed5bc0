// Configuration for the classification engine
//
// Configuration is loaded in order of precedence:
// 1. Environment variables (highest priority)
// 2. Config file (~/.config/segmentry/config.toml)
// 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::path::PathBuf;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Also write JSON-formatted logs to a rotated daily file
    pub file_enabled: bool,

    /// Directory for log files
    pub file_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false,
            file_dir: PathBuf::from("./logs"),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite engine database
    pub db_path: PathBuf,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
struct FileLogging {
    level: Option<String>,
    file_enabled: Option<bool>,
    file_dir: Option<String>,
}

/// Config file structure (subset of Config that makes sense to persist)
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    db_path: Option<String>,

    /// Optional [logging] section
    logging: Option<FileLogging>,
}

impl Config {
    /// Get the config file path: ~/.config/segmentry/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("segmentry").join("config.toml"))
    }

    /// Create config template if it doesn't exist
    /// Called during startup to help users discover configuration options
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        // Don't overwrite existing config
        if path.exists() {
            return;
        }

        // Create parent directory
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // Silently fail - config is optional
            }
        }

        let template = r#"# segmentry configuration
# Uncomment and modify options as needed

# Path to the SQLite engine database (default: ./data/segmentry.db)
# db_path = "./data/segmentry.db"

# Logging configuration
# [logging]
# level = "info"        # trace, debug, info, warn, error (RUST_LOG env var overrides this)
# file_enabled = false  # Also write JSON logs to a rotated daily file
# file_dir = "./logs"   # Directory for log files
"#;

        // Write template (ignore errors - config is optional)
        let _ = std::fs::write(&path, template);
    }

    /// Load file config if it exists
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                FileConfig::default()
            }),
            Err(_) => FileConfig::default(), // File doesn't exist, use defaults
        }
    }

    /// Serialize config to TOML string (single source of truth for format)
    pub fn to_toml(&self) -> String {
        format!(
            r#"# segmentry configuration

# Path to the SQLite engine database
db_path = "{db_path}"

# Logging configuration (RUST_LOG env var overrides)
[logging]
level = "{log_level}"
file_enabled = {file_enabled}
file_dir = "{file_dir}"
"#,
            db_path = self.db_path.display(),
            log_level = self.logging.level,
            file_enabled = self.logging.file_enabled,
            file_dir = self.logging.file_dir.display(),
        )
    }

    /// Save current configuration to file
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = Self::config_path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config path",
            ));
        };

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&path, self.to_toml())
    }

    /// Load configuration: env vars -> file -> defaults
    pub fn from_env() -> Self {
        let file = Self::load_file_config();

        // Database path: env > file > default
        let db_path = std::env::var("SEGMENTRY_DB")
            .ok()
            .or(file.db_path)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/segmentry.db"));

        // Logging settings: env > file > defaults (RUST_LOG handled in main.rs)
        let file_logging = file.logging.unwrap_or_default();
        let logging = LoggingConfig {
            level: std::env::var("SEGMENTRY_LOG_LEVEL")
                .ok()
                .or(file_logging.level)
                .unwrap_or_else(|| "info".to_string()),
            file_enabled: std::env::var("SEGMENTRY_LOG_FILE")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .ok()
                .or(file_logging.file_enabled)
                .unwrap_or(false),
            file_dir: std::env::var("SEGMENTRY_LOG_DIR")
                .ok()
                .or(file_logging.file_dir)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs")),
        };

        Self { db_path, logging }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/segmentry.db"),
            logging: LoggingConfig::default(),
        }
    }
}
