// Pricing estimates for routed backend models
//
// Cost estimation is analytics-only: the usage meter records an
// estimated USD cost per request based on the routed model id. Prices
// are compiled-in constants per million tokens; the first substring
// match wins, and unmatched models cost 0 (better to under-report than
// to invent numbers for unknown backends).
//
// Last updated: 2025-12-18

/// Pricing information for a routed model, USD per million tokens
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Substring → price table. Order matters: more specific ids first.
const PRICE_TABLE: &[(&str, ModelPricing)] = &[
    (
        "gpt-5-mini",
        ModelPricing {
            input_per_million: 0.25,
            output_per_million: 2.00,
        },
    ),
    (
        "gpt-5-nano",
        ModelPricing {
            input_per_million: 0.05,
            output_per_million: 0.40,
        },
    ),
    (
        "gpt-5",
        ModelPricing {
            input_per_million: 1.25,
            output_per_million: 10.00,
        },
    ),
    (
        "gpt-4o-mini",
        ModelPricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        },
    ),
    (
        "gpt-4o",
        ModelPricing {
            input_per_million: 2.50,
            output_per_million: 10.00,
        },
    ),
    (
        "o3",
        ModelPricing {
            input_per_million: 2.00,
            output_per_million: 8.00,
        },
    ),
    (
        "o4-mini",
        ModelPricing {
            input_per_million: 1.10,
            output_per_million: 4.40,
        },
    ),
    (
        "claude-opus-4",
        ModelPricing {
            input_per_million: 15.00,
            output_per_million: 75.00,
        },
    ),
    (
        "claude-sonnet-4",
        ModelPricing {
            input_per_million: 3.00,
            output_per_million: 15.00,
        },
    ),
    (
        "claude-haiku-4",
        ModelPricing {
            input_per_million: 1.00,
            output_per_million: 5.00,
        },
    ),
    (
        "gemini-2.5-pro",
        ModelPricing {
            input_per_million: 1.25,
            output_per_million: 10.00,
        },
    ),
    (
        "gemini-2.5-flash",
        ModelPricing {
            input_per_million: 0.30,
            output_per_million: 2.50,
        },
    ),
    (
        "deepseek-r1",
        ModelPricing {
            input_per_million: 0.55,
            output_per_million: 2.19,
        },
    ),
    (
        "deepseek",
        ModelPricing {
            input_per_million: 0.27,
            output_per_million: 1.10,
        },
    ),
    (
        "grok-4",
        ModelPricing {
            input_per_million: 3.00,
            output_per_million: 15.00,
        },
    ),
    (
        "grok-3",
        ModelPricing {
            input_per_million: 3.00,
            output_per_million: 15.00,
        },
    ),
    (
        "kimi-k2",
        ModelPricing {
            input_per_million: 0.60,
            output_per_million: 2.50,
        },
    ),
    (
        "qwen3",
        ModelPricing {
            input_per_million: 0.20,
            output_per_million: 0.80,
        },
    ),
];

/// Look up pricing for a routed model id.
///
/// Returns `None` for unknown models (cost reported as 0).
pub fn get_pricing(model: &str) -> Option<ModelPricing> {
    let model_lower = model.to_lowercase();
    PRICE_TABLE
        .iter()
        .find(|(pattern, _)| model_lower.contains(pattern))
        .map(|(_, pricing)| *pricing)
}

/// Calculate estimated cost in USD for the given token usage.
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let Some(pricing) = get_pricing(model) else {
        return 0.0;
    };

    let input_cost = (input_tokens as f64 / 1_000_000.0) * pricing.input_per_million;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * pricing.output_per_million;

    input_cost + output_cost
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_substring_match_wins() {
        // "gpt-5-mini" must not fall through to the "gpt-5" entry
        let pricing = get_pricing("openai/gpt-5-mini").unwrap();
        assert_eq!(pricing.input_per_million, 0.25);

        let pricing = get_pricing("openai/gpt-5").unwrap();
        assert_eq!(pricing.input_per_million, 1.25);
    }

    #[test]
    fn test_unknown_model_costs_zero() {
        assert!(get_pricing("mystery-llm-9000").is_none());
        assert_eq!(calculate_cost("mystery-llm-9000", 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn test_calculate_cost() {
        // 1M input + 1M output on gpt-5: $1.25 + $10.00
        let cost = calculate_cost("openai/gpt-5", 1_000_000, 1_000_000);
        assert!((cost - 11.25).abs() < 1e-9);
    }

    #[test]
    fn test_case_insensitive_match() {
        assert!(get_pricing("OpenAI/GPT-5").is_some());
    }
}
