//! Tier routing configuration
//!
//! Requests are bucketed into three tiers by the requested model name
//! (opus/sonnet/haiku). Each tier maps to a backend model and may carry
//! its own endpoint and credential; explicit absence means "inherit the
//! global provider settings".
//!
//! The flat `BIG_MODEL`/`ENABLE_BIG_ENDPOINT`/`BIG_API_KEY` form that
//! operators configure is adapted into this structure at load time.

use serde::Deserialize;

/// Model size tier, selected from the client-supplied model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Big,
    Middle,
    Small,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Big => "big",
            Self::Middle => "middle",
            Self::Small => "small",
        }
    }

    pub const ALL: [Tier; 3] = [Tier::Big, Tier::Middle, Tier::Small];
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reasoning Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Budget bounds accepted by reasoning-capable backends.
pub const MIN_REASONING_BUDGET: u32 = 1024;
pub const MAX_REASONING_BUDGET: u32 = 32768;

/// Clamp a requested thinking budget into the accepted range.
pub fn clamp_reasoning_budget(tokens: u32) -> u32 {
    tokens.clamp(MIN_REASONING_BUDGET, MAX_REASONING_BUDGET)
}

/// How much thinking the backend is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningMode {
    /// No reasoning fields are sent at all.
    Off,
    /// Provider-defined effort level.
    Effort(EffortLevel),
    /// Explicit token budget, clamped to [1024, 32768].
    Budget(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffortLevel {
    Low,
    Medium,
    High,
}

impl EffortLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Low,
    Default,
    High,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Default => "default",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "default" => Some(Self::Default),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Effective reasoning configuration for a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReasoningPolicy {
    pub mode: ReasoningMode,
    /// Hide thinking blocks from the client even when the backend
    /// produces them.
    pub exclude: bool,
    pub verbosity: Option<Verbosity>,
}

impl ReasoningPolicy {
    pub const fn off() -> Self {
        Self {
            mode: ReasoningMode::Off,
            exclude: false,
            verbosity: None,
        }
    }

    pub fn is_off(&self) -> bool {
        self.mode == ReasoningMode::Off
    }

    /// The same policy with its mode silenced; exclude/verbosity are
    /// kept so a later override still honors them.
    pub fn silenced(mut self) -> Self {
        self.mode = ReasoningMode::Off;
        self
    }

    /// Short human-readable form for the startup summary.
    pub fn describe(&self) -> String {
        match self.mode {
            ReasoningMode::Off => "off".to_string(),
            ReasoningMode::Effort(level) => format!("effort={}", level.as_str()),
            ReasoningMode::Budget(tokens) => format!("budget={}", tokens),
        }
    }
}

impl Default for ReasoningPolicy {
    fn default() -> Self {
        Self::off()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tier Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Per-tier routing target.
#[derive(Debug, Clone)]
pub struct TierConfig {
    pub tier: Tier,
    /// Backend base URL; None inherits the global provider URL.
    pub endpoint: Option<String>,
    /// Credential; None inherits the global provider key.
    pub api_key: Option<String>,
    /// Backend model id, possibly carrying a reasoning suffix
    /// (`:low`/`:medium`/`:high`, `:<N>`, `:<N>k`).
    pub model: String,
    /// Explicit policy override; None inherits the global policy.
    pub reasoning: Option<ReasoningPolicy>,
}

/// TOML shape for a `[tiers.big]`-style section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileTierConfig {
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Flat-form compatibility: endpoint/api_key only apply when true.
    pub enable_endpoint: Option<bool>,
}

impl TierConfig {
    /// Build a tier from the flat lattice:
    /// env (`BIG_MODEL`, `ENABLE_BIG_ENDPOINT`, `BIG_ENDPOINT`,
    /// `BIG_API_KEY`) > file (`[tiers.big]`) > default model.
    pub fn from_flat(tier: Tier, file: Option<FileTierConfig>, default_model: &str) -> Self {
        let file = file.unwrap_or_default();
        let prefix = tier.as_str().to_uppercase();

        let model = std::env::var(format!("{prefix}_MODEL"))
            .ok()
            .filter(|v| !v.is_empty())
            .or(file.model)
            .unwrap_or_else(|| default_model.to_string());

        let enabled = std::env::var(format!("ENABLE_{prefix}_ENDPOINT"))
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .or(file.enable_endpoint)
            .unwrap_or(false);

        let (endpoint, api_key) = if enabled {
            let endpoint = std::env::var(format!("{prefix}_ENDPOINT"))
                .ok()
                .filter(|v| !v.is_empty())
                .or(file.endpoint);
            let api_key = std::env::var(format!("{prefix}_API_KEY"))
                .ok()
                .filter(|v| !v.is_empty())
                .or(file.api_key);
            (endpoint, api_key)
        } else {
            (None, None)
        };

        Self {
            tier,
            endpoint,
            api_key,
            model,
            reasoning: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_clamping() {
        assert_eq!(clamp_reasoning_budget(100), 1024);
        assert_eq!(clamp_reasoning_budget(8192), 8192);
        assert_eq!(clamp_reasoning_budget(1_000_000), 32768);
    }

    #[test]
    fn test_effort_parsing() {
        assert_eq!(EffortLevel::parse("high"), Some(EffortLevel::High));
        assert_eq!(EffortLevel::parse("extreme"), None);
    }

    #[test]
    fn test_silenced_keeps_exclude() {
        let policy = ReasoningPolicy {
            mode: ReasoningMode::Effort(EffortLevel::High),
            exclude: true,
            verbosity: Some(Verbosity::Low),
        };
        let silenced = policy.silenced();
        assert!(silenced.is_off());
        assert!(silenced.exclude);
        assert_eq!(silenced.verbosity, Some(Verbosity::Low));
    }

    #[test]
    fn test_flat_form_disabled_endpoint_ignores_overrides() {
        let file = FileTierConfig {
            model: Some("openai/gpt-5".to_string()),
            endpoint: Some("https://example.com/v1".to_string()),
            api_key: Some("sk-tier".to_string()),
            enable_endpoint: Some(false),
        };
        let tier = TierConfig::from_flat(Tier::Big, Some(file), "fallback");
        assert_eq!(tier.model, "openai/gpt-5");
        assert!(tier.endpoint.is_none());
        assert!(tier.api_key.is_none());
    }

    #[test]
    fn test_flat_form_enabled_endpoint() {
        let file = FileTierConfig {
            model: Some("local-model".to_string()),
            endpoint: Some("http://localhost:11434/v1".to_string()),
            api_key: None,
            enable_endpoint: Some(true),
        };
        let tier = TierConfig::from_flat(Tier::Small, Some(file), "fallback");
        assert_eq!(tier.endpoint.as_deref(), Some("http://localhost:11434/v1"));
        assert!(tier.api_key.is_none());
    }
}
