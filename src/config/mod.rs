//! Configuration for the gateway
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/crosswire/config.toml)
//! 3. Built-in defaults (lowest priority)
//!
//! The result is an immutable `Config` built once at startup; the rest
//! of the process only ever sees it behind an `Arc`.

use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

mod tiers;

pub use tiers::{
    clamp_reasoning_budget, EffortLevel, FileTierConfig, ReasoningMode, ReasoningPolicy, Tier,
    TierConfig, Verbosity, MAX_REASONING_BUDGET, MIN_REASONING_BUDGET,
};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ─────────────────────────────────────────────────────────────────────────────
// Log Rotation
// ─────────────────────────────────────────────────────────────────────────────

/// Log file rotation strategy
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LogRotation {
    /// Rotate log files hourly
    Hourly,
    /// Rotate log files daily (default)
    #[default]
    Daily,
    /// Never rotate - single log file
    Never,
}

impl LogRotation {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "hourly" => Self::Hourly,
            "never" => Self::Never,
            _ => Self::Daily,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Enable file logging (in addition to stderr)
    pub file_enabled: bool,
    /// Directory for log files
    pub file_dir: PathBuf,
    /// Log file rotation strategy
    pub file_rotation: LogRotation,
    /// Prefix for log file names
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false, // Opt-in feature
            file_dir: PathBuf::from("./logs"),
            file_rotation: LogRotation::Daily,
            file_prefix: "crosswire".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileLogging {
    pub level: Option<String>,
    pub file_enabled: Option<bool>,
    pub file_dir: Option<String>,
    pub file_rotation: Option<String>,
    pub file_prefix: Option<String>,
}

impl LoggingConfig {
    fn from_file(file: Option<FileLogging>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            level: std::env::var("CROSSWIRE_LOG")
                .ok()
                .or(file.level)
                .unwrap_or(defaults.level),
            file_enabled: file.file_enabled.unwrap_or(defaults.file_enabled),
            file_dir: file
                .file_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.file_dir),
            file_rotation: file
                .file_rotation
                .map(|s| LogRotation::parse(&s))
                .unwrap_or(defaults.file_rotation),
            file_prefix: file.file_prefix.unwrap_or(defaults.file_prefix),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the gateway to
    pub bind_addr: SocketAddr,

    /// Global backend base URL (OpenAI-compatible, includes /v1)
    pub provider_base_url: String,

    /// Global backend credential
    pub provider_api_key: Option<String>,

    /// When set, clients must present this key (x-api-key or Bearer)
    pub proxy_auth_key: Option<String>,

    /// Per-tier routing targets (big, middle, small)
    pub tiers: Vec<TierConfig>,

    /// Global reasoning policy; tiers and request `thinking` override it
    pub reasoning: ReasoningPolicy,

    /// Unary backend call timeout
    pub request_timeout_seconds: u64,

    /// Per-chunk idle timeout for streaming backend calls
    pub stream_idle_timeout_seconds: u64,

    /// Drain window before in-flight requests are force-closed
    pub shutdown_timeout_seconds: u64,

    /// Clamp bounds for client-supplied max_tokens
    pub max_tokens_limit: u32,
    pub min_tokens_limit: u32,

    /// Enables the usage meter
    pub track_usage: bool,

    /// SQLite file for usage rows
    pub usage_db_path: PathBuf,

    /// Extra headers added verbatim to every backend call
    pub custom_headers: HashMap<String, String>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    pub fn tier(&self, tier: Tier) -> &TierConfig {
        // The three tiers are always constructed in from_env/default.
        self.tiers
            .iter()
            .find(|t| t.tier == tier)
            .unwrap_or_else(|| &self.tiers[0])
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8082".parse().unwrap(),
            provider_base_url: "https://api.openai.com/v1".to_string(),
            provider_api_key: None,
            proxy_auth_key: None,
            tiers: vec![
                TierConfig {
                    tier: Tier::Big,
                    endpoint: None,
                    api_key: None,
                    model: "gpt-5".to_string(),
                    reasoning: None,
                },
                TierConfig {
                    tier: Tier::Middle,
                    endpoint: None,
                    api_key: None,
                    model: "gpt-5".to_string(),
                    reasoning: None,
                },
                TierConfig {
                    tier: Tier::Small,
                    endpoint: None,
                    api_key: None,
                    model: "gpt-5-mini".to_string(),
                    reasoning: None,
                },
            ],
            reasoning: ReasoningPolicy::off(),
            request_timeout_seconds: 120,
            stream_idle_timeout_seconds: 60,
            shutdown_timeout_seconds: 30,
            max_tokens_limit: 512_000,
            min_tokens_limit: 1,
            track_usage: true,
            usage_db_path: PathBuf::from("./data/usage.db"),
            custom_headers: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure (subset of Config that makes sense to persist)
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub provider_base_url: Option<String>,
    pub provider_api_key: Option<String>,
    pub proxy_auth_key: Option<String>,
    pub reasoning_effort: Option<String>,
    pub reasoning_max_tokens: Option<u32>,
    pub reasoning_exclude: Option<bool>,
    pub verbosity: Option<String>,
    pub request_timeout_seconds: Option<u64>,
    pub stream_idle_timeout_seconds: Option<u64>,
    pub shutdown_timeout_seconds: Option<u64>,
    pub max_tokens_limit: Option<u32>,
    pub min_tokens_limit: Option<u32>,
    pub track_usage: Option<bool>,
    pub usage_db_path: Option<String>,

    /// Optional [tiers.big] / [tiers.middle] / [tiers.small] sections
    #[serde(default)]
    pub tiers: HashMap<String, FileTierConfig>,

    /// Optional [custom_headers] table
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,
}

/// Commented template written on first run so the option surface is
/// discoverable without reading the docs.
const CONFIG_TEMPLATE: &str = r#"# crosswire configuration
# Every value may be overridden by the environment variable of the same
# name in SCREAMING_SNAKE_CASE (e.g. PROVIDER_BASE_URL, BIG_MODEL).

# host = "127.0.0.1"
# port = 8082

# provider_base_url = "https://api.openai.com/v1"
# provider_api_key = ""

# Require clients to present this key; empty disables auth.
# proxy_auth_key = ""

# Global reasoning defaults: effort (low/medium/high) or a token budget.
# reasoning_effort = ""
# reasoning_max_tokens = 0
# reasoning_exclude = false
# verbosity = ""

# request_timeout_seconds = 120
# max_tokens_limit = 512000
# min_tokens_limit = 1

# track_usage = true
# usage_db_path = "./data/usage.db"

# [tiers.big]
# model = "gpt-5:high"          # optional reasoning suffix: :low/:medium/:high or :8k
# enable_endpoint = false
# endpoint = "https://openrouter.ai/api/v1"
# api_key = ""

# [tiers.middle]
# model = "gpt-5"

# [tiers.small]
# model = "gpt-5-mini"

# [custom_headers]
# "HTTP-Referer" = "https://example.invalid"

# [logging]
# level = "info"
# file_enabled = false
# file_dir = "./logs"
# file_rotation = "daily"     # hourly / daily / never
# file_prefix = "crosswire"
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/crosswire/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("crosswire").join("config.toml"))
    }

    /// Create config file with the commented template if it doesn't exist
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        if path.exists() {
            return;
        }

        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // Silently fail - config is optional
            }
        }

        let _ = std::fs::write(&path, CONFIG_TEMPLATE);
    }

    /// Load file config if it exists
    ///
    /// A config file that exists but cannot be parsed is a fatal error:
    /// failing fast with a clear message beats silently running on
    /// defaults while the user debugs the wrong thing.
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("\nCONFIG ERROR - failed to parse {}\n", path.display());
                    eprintln!("  {}\n", e);
                    eprintln!("  Check for missing quotes, invalid booleans, or typos");
                    eprintln!("  in section names. To reset, delete the file and restart.\n");
                    std::process::exit(1);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(e) => {
                eprintln!("\nCONFIG ERROR - cannot read {}: {}\n", path.display(), e);
                std::process::exit(1);
            }
        }
    }

    /// Load configuration: env vars -> file -> defaults
    pub fn from_env() -> Self {
        let file = Self::load_file_config();
        let defaults = Self::default();

        let reasoning = Self::load_reasoning_policy(&file);

        let host = env_str("HOST").or(file.host).unwrap_or_else(|| "127.0.0.1".to_string());
        let port = env_parse::<u16>("PORT")
            .or(file.port)
            .unwrap_or(defaults.bind_addr.port());
        let bind_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .expect("Invalid host/port combination");

        let provider_base_url = env_str("PROVIDER_BASE_URL")
            .or_else(|| env_str("OPENAI_BASE_URL"))
            .or(file.provider_base_url)
            .unwrap_or(defaults.provider_base_url);

        let provider_api_key = env_str("PROVIDER_API_KEY")
            .or_else(|| env_str("OPENAI_API_KEY"))
            .or(file.provider_api_key.filter(|k| !k.is_empty()));

        let proxy_auth_key = env_str("PROXY_AUTH_KEY")
            .or(file.proxy_auth_key)
            .filter(|k| !k.is_empty());

        let tiers = vec![
            TierConfig::from_flat(Tier::Big, file.tiers.get("big").cloned(), "gpt-5"),
            TierConfig::from_flat(Tier::Middle, file.tiers.get("middle").cloned(), "gpt-5"),
            TierConfig::from_flat(Tier::Small, file.tiers.get("small").cloned(), "gpt-5-mini"),
        ];

        let logging = LoggingConfig::from_file(file.logging);

        Self {
            bind_addr,
            provider_base_url,
            provider_api_key,
            proxy_auth_key,
            tiers,
            reasoning,
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .or(file.request_timeout_seconds)
                .unwrap_or(defaults.request_timeout_seconds),
            stream_idle_timeout_seconds: env_parse("STREAM_IDLE_TIMEOUT_SECONDS")
                .or(file.stream_idle_timeout_seconds)
                .unwrap_or(defaults.stream_idle_timeout_seconds),
            shutdown_timeout_seconds: env_parse("SHUTDOWN_TIMEOUT_SECONDS")
                .or(file.shutdown_timeout_seconds)
                .unwrap_or(defaults.shutdown_timeout_seconds),
            max_tokens_limit: env_parse("MAX_TOKENS_LIMIT")
                .or(file.max_tokens_limit)
                .unwrap_or(defaults.max_tokens_limit),
            min_tokens_limit: env_parse("MIN_TOKENS_LIMIT")
                .or(file.min_tokens_limit)
                .unwrap_or(defaults.min_tokens_limit),
            track_usage: std::env::var("TRACK_USAGE")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(file.track_usage)
                .unwrap_or(defaults.track_usage),
            usage_db_path: env_str("USAGE_DB_PATH")
                .map(PathBuf::from)
                .or(file.usage_db_path.map(PathBuf::from))
                .unwrap_or(defaults.usage_db_path),
            custom_headers: file.custom_headers,
            logging,
        }
    }

    /// Global reasoning policy from the flat keys. A configured budget
    /// wins over a configured effort.
    fn load_reasoning_policy(file: &FileConfig) -> ReasoningPolicy {
        let effort = env_str("REASONING_EFFORT")
            .or_else(|| file.reasoning_effort.clone())
            .filter(|v| !v.is_empty())
            .and_then(|v| EffortLevel::parse(&v));

        let budget = env_parse::<u32>("REASONING_MAX_TOKENS")
            .or(file.reasoning_max_tokens)
            .filter(|v| *v > 0);

        let exclude = std::env::var("REASONING_EXCLUDE")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .or(file.reasoning_exclude)
            .unwrap_or(false);

        let verbosity = env_str("VERBOSITY")
            .or_else(|| file.verbosity.clone())
            .filter(|v| !v.is_empty())
            .and_then(|v| Verbosity::parse(&v));

        let mode = match (budget, effort) {
            (Some(tokens), _) => ReasoningMode::Budget(clamp_reasoning_budget(tokens)),
            (None, Some(level)) => ReasoningMode::Effort(level),
            (None, None) => ReasoningMode::Off,
        };

        ReasoningPolicy {
            mode,
            exclude,
            verbosity,
        }
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tiers_present() {
        let config = Config::default();
        assert_eq!(config.tiers.len(), 3);
        assert_eq!(config.tier(Tier::Small).model, "gpt-5-mini");
        assert_eq!(config.tier(Tier::Big).tier, Tier::Big);
    }

    #[test]
    fn test_file_config_parses_tiers_table() {
        let file: FileConfig = toml::from_str(
            r#"
            provider_base_url = "https://openrouter.ai/api/v1"
            proxy_auth_key = "secret"

            [tiers.big]
            model = "openai/gpt-5:8k"
            enable_endpoint = true
            endpoint = "https://example.com/v1"
            api_key = "sk-big"

            [custom_headers]
            "X-Title" = "crosswire"
            "#,
        )
        .unwrap();

        assert_eq!(
            file.provider_base_url.as_deref(),
            Some("https://openrouter.ai/api/v1")
        );
        let big = file.tiers.get("big").unwrap();
        assert_eq!(big.model.as_deref(), Some("openai/gpt-5:8k"));
        assert_eq!(big.enable_endpoint, Some(true));
        assert_eq!(file.custom_headers.get("X-Title").unwrap(), "crosswire");
    }

    #[test]
    fn test_reasoning_budget_beats_effort() {
        let file = FileConfig {
            reasoning_effort: Some("high".to_string()),
            reasoning_max_tokens: Some(4096),
            ..Default::default()
        };
        let policy = Config::load_reasoning_policy(&file);
        assert_eq!(policy.mode, ReasoningMode::Budget(4096));
    }

    #[test]
    fn test_reasoning_defaults_off() {
        let policy = Config::load_reasoning_policy(&FileConfig::default());
        assert!(policy.is_off());
        assert!(!policy.exclude);
    }
}
