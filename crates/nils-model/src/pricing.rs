// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Built-in per-model pricing used by the token accountant.
//!
//! Rates are USD per million tokens.  Lookup is by model-id prefix so that
//! dated releases ("gpt-4o-2024-11-20") match their family row; unknown
//! models fall back to a conservative default rate.

/// USD per million input/output tokens for one model family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

/// Fallback applied to models not present in the table.
pub const DEFAULT_RATE: Rate = Rate {
    input_per_mtok: 3.0,
    output_per_mtok: 15.0,
};

// Longest-prefix entries first where families overlap ("gpt-4o-mini" before
// "gpt-4o"); lookup scans in order and takes the first prefix hit.
const RATES: &[(&str, Rate)] = &[
    ("gpt-4o-mini", Rate { input_per_mtok: 0.15, output_per_mtok: 0.6 }),
    ("gpt-4o", Rate { input_per_mtok: 2.5, output_per_mtok: 10.0 }),
    ("gpt-4.1-mini", Rate { input_per_mtok: 0.4, output_per_mtok: 1.6 }),
    ("gpt-4.1", Rate { input_per_mtok: 2.0, output_per_mtok: 8.0 }),
    ("o3-mini", Rate { input_per_mtok: 1.1, output_per_mtok: 4.4 }),
    ("o3", Rate { input_per_mtok: 2.0, output_per_mtok: 8.0 }),
    ("claude-3-5-haiku", Rate { input_per_mtok: 0.8, output_per_mtok: 4.0 }),
    ("claude-sonnet", Rate { input_per_mtok: 3.0, output_per_mtok: 15.0 }),
    ("claude-opus", Rate { input_per_mtok: 15.0, output_per_mtok: 75.0 }),
    ("gemini-2.0-flash", Rate { input_per_mtok: 0.1, output_per_mtok: 0.4 }),
    ("gemini-1.5-pro", Rate { input_per_mtok: 1.25, output_per_mtok: 5.0 }),
    ("deepseek-chat", Rate { input_per_mtok: 0.27, output_per_mtok: 1.1 }),
    ("mock", Rate { input_per_mtok: 0.0, output_per_mtok: 0.0 }),
    ("scripted-mock", Rate { input_per_mtok: 0.0, output_per_mtok: 0.0 }),
];

/// Rate for a model id, by longest prefix match with a default fallback.
pub fn rate_for(model: &str) -> Rate {
    RATES
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, rate)| *rate)
        .unwrap_or(DEFAULT_RATE)
}

/// Dollar cost of one completion for the given model.
pub fn cost_usd(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let rate = rate_for(model);
    (input_tokens as f64 / 1_000_000.0) * rate.input_per_mtok
        + (output_tokens as f64 / 1_000_000.0) * rate.output_per_mtok
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_family_is_matched() {
        assert_eq!(rate_for("gpt-4o").input_per_mtok, 2.5);
    }

    #[test]
    fn dated_release_matches_family_prefix() {
        assert_eq!(rate_for("gpt-4o-2024-11-20").input_per_mtok, 2.5);
    }

    #[test]
    fn mini_variant_wins_over_family() {
        assert_eq!(rate_for("gpt-4o-mini-2024-07-18").input_per_mtok, 0.15);
    }

    #[test]
    fn unknown_model_uses_default() {
        assert_eq!(rate_for("some-local-gguf"), DEFAULT_RATE);
    }

    #[test]
    fn mock_models_are_free() {
        assert_eq!(cost_usd("mock-model", 1_000_000, 1_000_000), 0.0);
        assert_eq!(cost_usd("scripted-mock-model", 500, 500), 0.0);
    }

    #[test]
    fn cost_scales_with_tokens() {
        let one = cost_usd("gpt-4o", 1_000_000, 0);
        assert!((one - 2.5).abs() < 1e-9);
        let both = cost_usd("gpt-4o", 1_000_000, 1_000_000);
        assert!((both - 12.5).abs() < 1e-9);
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        assert_eq!(cost_usd("gpt-4o", 0, 0), 0.0);
    }
}
