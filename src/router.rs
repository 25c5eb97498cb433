//! Model routing: Anthropic model name → concrete backend route
//!
//! The requested model name only selects a size tier (`opus` → big,
//! `sonnet` → middle, `haiku` → small); everything else about the route
//! comes from configuration. Names matching no keyword pass through
//! unchanged on the middle tier's global endpoint, so pointing Claude
//! Code at an arbitrary backend model id still works.
//!
//! Tier model ids may carry a reasoning suffix (`:high`, `:8k`) which
//! overrides the tier's reasoning policy and is stripped before the id
//! goes on the wire.

use crate::config::{
    clamp_reasoning_budget, Config, EffortLevel, ReasoningMode, ReasoningPolicy, Tier,
};
use regex::Regex;
use std::sync::OnceLock;

/// A fully resolved routing decision, immutable once computed.
#[derive(Debug, Clone)]
pub struct TierRoute {
    pub tier: Tier,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model_id: String,
    pub reasoning: ReasoningPolicy,
    /// Whether `model_id` passes the reasoning capability gate. Kept on
    /// the route so the transformer can gate request-level `thinking`
    /// overrides without re-deriving it.
    pub supports_reasoning: bool,
}

#[derive(Debug)]
pub enum RouterError {
    /// The resolved route has neither a tier credential nor a global
    /// one, and the endpoint is not a local loopback server.
    MissingCredential { tier: Tier, endpoint: String },
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCredential { tier, endpoint } => write!(
                f,
                "no API key configured for tier '{}' (endpoint {}); \
                 set {}_API_KEY or PROVIDER_API_KEY",
                tier,
                endpoint,
                tier.as_str().to_uppercase()
            ),
        }
    }
}

impl std::error::Error for RouterError {}

/// Resolves Anthropic model names to backend routes. Built once from
/// config; holds no mutable state.
pub struct ModelRouter {
    routes: Vec<TierRoute>,
    global_endpoint: String,
    global_api_key: Option<String>,
}

impl ModelRouter {
    pub fn from_config(config: &Config) -> Self {
        let routes = Tier::ALL
            .iter()
            .map(|&tier| Self::build_route(config, tier))
            .collect();

        Self {
            routes,
            global_endpoint: config.provider_base_url.clone(),
            global_api_key: config.provider_api_key.clone(),
        }
    }

    fn build_route(config: &Config, tier: Tier) -> TierRoute {
        let tier_config = config.tier(tier);

        let endpoint = tier_config
            .endpoint
            .clone()
            .unwrap_or_else(|| config.provider_base_url.clone());
        let api_key = tier_config
            .api_key
            .clone()
            .or_else(|| config.provider_api_key.clone());

        let (model_id, suffix_mode) = parse_reasoning_suffix(&tier_config.model);

        let base_policy = tier_config.reasoning.unwrap_or(config.reasoning);
        let mut reasoning = match suffix_mode {
            Some(mode) => ReasoningPolicy {
                mode,
                ..base_policy
            },
            None => base_policy,
        };

        let supports_reasoning = model_supports_reasoning(&model_id);
        if !supports_reasoning {
            reasoning = reasoning.silenced();
        }

        TierRoute {
            tier,
            endpoint,
            api_key,
            model_id,
            reasoning,
            supports_reasoning,
        }
    }

    /// Resolve a requested model name to its route.
    ///
    /// Keyword matches never leak the client-supplied name to the
    /// backend; non-matching names pass through verbatim on the global
    /// endpoint at middle tier.
    pub fn resolve(&self, model: &str) -> Result<TierRoute, RouterError> {
        let model_lower = model.to_lowercase();

        let route = if model_lower.contains("opus") {
            self.tier_route(Tier::Big).clone()
        } else if model_lower.contains("sonnet") {
            self.tier_route(Tier::Middle).clone()
        } else if model_lower.contains("haiku") {
            self.tier_route(Tier::Small).clone()
        } else {
            // Passthrough: unknown names go to the global endpoint as-is.
            let (model_id, suffix_mode) = parse_reasoning_suffix(model);
            let supports_reasoning = model_supports_reasoning(&model_id);
            let mut reasoning = match suffix_mode {
                Some(mode) => ReasoningPolicy {
                    mode,
                    ..self.tier_route(Tier::Middle).reasoning
                },
                None => self.tier_route(Tier::Middle).reasoning,
            };
            if !supports_reasoning {
                reasoning = reasoning.silenced();
            }
            TierRoute {
                tier: Tier::Middle,
                endpoint: self.global_endpoint.clone(),
                api_key: self.global_api_key.clone(),
                model_id,
                reasoning,
                supports_reasoning,
            }
        };

        if route.api_key.is_none() && !is_local_endpoint(&route.endpoint) {
            return Err(RouterError::MissingCredential {
                tier: route.tier,
                endpoint: route.endpoint,
            });
        }

        Ok(route)
    }

    /// The precomputed route for a tier (before credential checking).
    pub fn tier_route(&self, tier: Tier) -> &TierRoute {
        // Routes are built from Tier::ALL in order, so the lookup
        // cannot miss.
        self.routes
            .iter()
            .find(|r| r.tier == tier)
            .unwrap_or(&self.routes[0])
    }
}

/// Split a reasoning suffix off a configured model id.
///
/// `:low`/`:medium`/`:high` select an effort level; `:<N>` and `:<N>k`
/// select a token budget (k multiplies by 1024; clamped to the accepted
/// range). Anything else after a colon is part of the model id
/// (`qwen3:14b`, `deepseek/deepseek-r1:free`, `...:thinking`).
fn parse_reasoning_suffix(model: &str) -> (String, Option<ReasoningMode>) {
    let Some((base, suffix)) = model.rsplit_once(':') else {
        return (model.to_string(), None);
    };

    if let Some(level) = EffortLevel::parse(suffix) {
        return (base.to_string(), Some(ReasoningMode::Effort(level)));
    }

    let (digits, multiplier) = match suffix.strip_suffix('k') {
        Some(digits) => (digits, 1024u32),
        None => (suffix, 1u32),
    };
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        if let Some(tokens) = digits
            .parse::<u32>()
            .ok()
            .and_then(|n| n.checked_mul(multiplier))
        {
            return (
                base.to_string(),
                Some(ReasoningMode::Budget(clamp_reasoning_budget(tokens))),
            );
        }
    }

    (model.to_string(), None)
}

/// Substrings identifying model families that accept reasoning options.
const REASONING_FAMILIES: &[&str] = &[
    "gpt-5",
    "o1",
    "o3",
    "o4",
    "claude-3-7",
    "claude-4",
    "claude-opus-4",
    "claude-sonnet-4",
    "claude-haiku-4",
    "qwen3",
    "qwen-2.5-thinking",
    "deepseek-v3",
    "deepseek-r1",
    "kimi-k2-thinking",
    "minimax-m2",
];

fn grok_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"grok[-_.]?(\d+)").expect("valid regex"))
}

/// Whether a backend model id accepts reasoning options at all.
/// Sending reasoning fields to a model that does not understand them is
/// a hard 400 on several providers, so unknown ids default to false.
pub fn model_supports_reasoning(model_id: &str) -> bool {
    let id = model_id.to_lowercase();

    if id.ends_with(":thinking") {
        return true;
    }

    if REASONING_FAMILIES.iter().any(|family| id.contains(family)) {
        return true;
    }

    // grok followed by a version digit >= 3
    if let Some(caps) = grok_pattern().captures(&id) {
        if let Ok(version) = caps[1].parse::<u64>() {
            return version >= 3;
        }
    }

    false
}

/// Loopback backends (Ollama on 11434, LM Studio on 1234, and anything
/// else bound locally) run without credentials.
fn is_local_endpoint(endpoint: &str) -> bool {
    let rest = endpoint
        .strip_prefix("http://")
        .or_else(|| endpoint.strip_prefix("https://"))
        .unwrap_or(endpoint);
    let host = rest
        .split('/')
        .next()
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("");

    matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0" | "[::1]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tier;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.provider_api_key = Some("sk-global".to_string());
        config
    }

    #[test]
    fn test_tier_keyword_resolution() {
        let config = test_config();
        let router = ModelRouter::from_config(&config);

        let big = router.resolve("claude-opus-4-20250514").unwrap();
        assert_eq!(big.tier, Tier::Big);
        assert_eq!(big.model_id, "gpt-5");

        let middle = router.resolve("claude-3-5-sonnet-20241022").unwrap();
        assert_eq!(middle.tier, Tier::Middle);

        let small = router.resolve("claude-haiku-4-5-20251001").unwrap();
        assert_eq!(small.tier, Tier::Small);
        assert_eq!(small.model_id, "gpt-5-mini");
    }

    #[test]
    fn test_keyword_never_leaks_client_name() {
        let config = test_config();
        let router = ModelRouter::from_config(&config);

        for name in [
            "claude-opus-4",
            "claude-sonnet-4",
            "claude-haiku-4-5-20251001",
        ] {
            let route = router.resolve(name).unwrap();
            assert_ne!(route.model_id, name);
        }
    }

    #[test]
    fn test_passthrough_uses_global_route() {
        let config = test_config();
        let router = ModelRouter::from_config(&config);

        let route = router.resolve("mistral-large-latest").unwrap();
        assert_eq!(route.tier, Tier::Middle);
        assert_eq!(route.model_id, "mistral-large-latest");
        assert_eq!(route.endpoint, config.provider_base_url);
    }

    #[test]
    fn test_tier_endpoint_override_with_key_fallback() {
        let mut config = test_config();
        config.tiers[0].endpoint = Some("https://openrouter.ai/api/v1".to_string());
        // no tier key: must fall back to the global credential
        let router = ModelRouter::from_config(&config);

        let route = router.resolve("claude-opus-4").unwrap();
        assert_eq!(route.endpoint, "https://openrouter.ai/api/v1");
        assert_eq!(route.api_key.as_deref(), Some("sk-global"));
    }

    #[test]
    fn test_suffix_effort() {
        let (model, mode) = parse_reasoning_suffix("openai/gpt-5:high");
        assert_eq!(model, "openai/gpt-5");
        assert_eq!(mode, Some(ReasoningMode::Effort(EffortLevel::High)));
    }

    #[test]
    fn test_suffix_budget_k() {
        let (model, mode) = parse_reasoning_suffix("openai/gpt-5:8k");
        assert_eq!(model, "openai/gpt-5");
        assert_eq!(mode, Some(ReasoningMode::Budget(8192)));
    }

    #[test]
    fn test_suffix_budget_clamped() {
        let (_, mode) = parse_reasoning_suffix("openai/gpt-5:100");
        assert_eq!(mode, Some(ReasoningMode::Budget(1024)));

        let (_, mode) = parse_reasoning_suffix("openai/gpt-5:64k");
        assert_eq!(mode, Some(ReasoningMode::Budget(32768)));
    }

    #[test]
    fn test_suffix_leaves_model_tags_alone() {
        for name in ["qwen3:14b", "deepseek/deepseek-r1:free", "qwen3:thinking"] {
            let (model, mode) = parse_reasoning_suffix(name);
            assert_eq!(model, name);
            assert!(mode.is_none());
        }
    }

    #[test]
    fn test_suffix_policy_applied_to_route() {
        let mut config = test_config();
        config.tiers[0].model = "openai/gpt-5:8k".to_string();
        let router = ModelRouter::from_config(&config);

        let route = router.resolve("claude-opus-4").unwrap();
        assert_eq!(route.model_id, "openai/gpt-5");
        assert_eq!(route.reasoning.mode, ReasoningMode::Budget(8192));
    }

    #[test]
    fn test_capability_gate() {
        assert!(model_supports_reasoning("openai/gpt-5"));
        assert!(model_supports_reasoning("deepseek/deepseek-r1"));
        assert!(model_supports_reasoning("grok-4"));
        assert!(model_supports_reasoning("x-ai/grok-3-beta"));
        assert!(model_supports_reasoning("qwen3:thinking"));
        assert!(model_supports_reasoning("kimi-k2-thinking"));

        assert!(!model_supports_reasoning("grok-2"));
        assert!(!model_supports_reasoning("gpt-4o"));
        assert!(!model_supports_reasoning("llama-3.3-70b"));
    }

    #[test]
    fn test_gate_silences_policy() {
        let mut config = test_config();
        config.reasoning = ReasoningPolicy {
            mode: ReasoningMode::Effort(EffortLevel::High),
            exclude: false,
            verbosity: None,
        };
        config.tiers[2].model = "llama-3.3-70b".to_string();
        let router = ModelRouter::from_config(&config);

        let route = router.resolve("claude-haiku-4").unwrap();
        assert!(route.reasoning.is_off());
        assert!(!route.supports_reasoning);
    }

    #[test]
    fn test_missing_credential_rejected() {
        let mut config = Config::default();
        config.provider_api_key = None;
        let router = ModelRouter::from_config(&config);

        let err = router.resolve("claude-opus-4").unwrap_err();
        assert!(matches!(err, RouterError::MissingCredential { .. }));
    }

    #[test]
    fn test_local_endpoint_needs_no_credential() {
        let mut config = Config::default();
        config.provider_api_key = None;
        config.provider_base_url = "http://localhost:11434/v1".to_string();
        let router = ModelRouter::from_config(&config);

        assert!(router.resolve("claude-opus-4").is_ok());
        assert!(router.resolve("qwen3:14b").is_ok());
    }
}
