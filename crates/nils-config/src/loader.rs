// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use anyhow::Context;
use tracing::{debug, warn};

use crate::schema::RuntimeConfig;

/// Load the runtime configuration.
///
/// Reads `config` from the runtime directory (or from `extra` when an
/// explicit path is given, e.g. a `--config` CLI flag).  A missing file
/// yields the built-in defaults; a present file is parsed as `KEY=VALUE`
/// lines layered over the defaults.
pub fn load(extra: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let path = match extra {
        Some(p) => {
            // An explicitly requested file must exist.
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("reading {}", p.display()))?;
            debug!(path = %p.display(), "loading explicit config");
            return Ok(parse(&text));
        }
        None => crate::paths::runtime_dir().join("config"),
    };

    if !path.is_file() {
        return Ok(RuntimeConfig::default());
    }
    debug!(path = %path.display(), "loading config");
    let text =
        std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse(&text))
}

/// Parse `KEY=VALUE` config text over the defaults.
///
/// Blank lines and `#` comments are skipped.  Unknown keys and malformed
/// values are tolerated: each one logs a warning and the default stands, so
/// an old binary can read a newer config file.
pub fn parse(text: &str) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = lineno + 1, "config line has no '=', skipping");
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        macro_rules! set {
            ($field:ident) => {
                match value.parse() {
                    Ok(v) => config.$field = v,
                    Err(_) => warn!(key, value, "invalid config value, keeping default"),
                }
            };
        }

        match key {
            "MAX_ITERATIONS" => set!(max_iterations),
            "TOOL_TIMEOUT" => set!(tool_timeout_secs),
            "RALPH_LOOP_MAX_ITERATIONS" => set!(ralph_loop_max_iterations),
            "MEMORY_ENABLED" => set!(memory_enabled),
            "MEMORY_COMPRESSION_THRESHOLD" => set!(memory_compression_threshold),
            "MEMORY_SHORT_TERM_SIZE" => set!(memory_short_term_size),
            "MEMORY_SHORT_TERM_MIN_SIZE" => set!(memory_short_term_min_size),
            "MEMORY_COMPRESSION_RATIO" => set!(memory_compression_ratio),
            "COMPRESSION_STRATEGY" => set!(compression_strategy),
            "RETRY_MAX_ATTEMPTS" => set!(retry_max_attempts),
            "RETRY_INITIAL_DELAY" => set!(retry_initial_delay_secs),
            "RETRY_MAX_DELAY" => set!(retry_max_delay_secs),
            "MODEL" => config.model = value.to_string(),
            "BASE_URL" => config.base_url = value.to_string(),
            "API_KEY_ENV" => config.api_key_env = value.to_string(),
            "SUBAGENT_MAX_CONCURRENT" => set!(subagent_max_concurrent),
            "SUBAGENT_MAX_LIVE" => set!(subagent_max_live),
            other => warn!(key = other, "unknown config key, ignoring"),
        }
    }

    config
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CompressionStrategy;

    #[test]
    fn empty_text_yields_defaults() {
        let c = parse("");
        assert_eq!(c.max_iterations, RuntimeConfig::default().max_iterations);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let c = parse("# a comment\n\n   \nMAX_ITERATIONS=5\n");
        assert_eq!(c.max_iterations, 5);
    }

    #[test]
    fn known_keys_override_defaults() {
        let c = parse(
            "MAX_ITERATIONS=42\nTOOL_TIMEOUT=10\nRALPH_LOOP_MAX_ITERATIONS=2\n\
             MEMORY_ENABLED=false\nMEMORY_COMPRESSION_THRESHOLD=1000\n\
             MEMORY_SHORT_TERM_SIZE=4\nMEMORY_SHORT_TERM_MIN_SIZE=2\n\
             MEMORY_COMPRESSION_RATIO=0.5\nRETRY_MAX_ATTEMPTS=1\n",
        );
        assert_eq!(c.max_iterations, 42);
        assert_eq!(c.tool_timeout_secs, 10);
        assert_eq!(c.ralph_loop_max_iterations, 2);
        assert!(!c.memory_enabled);
        assert_eq!(c.memory_compression_threshold, 1000);
        assert_eq!(c.memory_short_term_size, 4);
        assert_eq!(c.memory_short_term_min_size, 2);
        assert!((c.memory_compression_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(c.retry_max_attempts, 1);
    }

    #[test]
    fn values_are_trimmed() {
        let c = parse("MAX_ITERATIONS =  7 \n");
        assert_eq!(c.max_iterations, 7);
    }

    #[test]
    fn unknown_key_is_ignored() {
        let c = parse("SOME_FUTURE_KEY=yes\nMAX_ITERATIONS=3\n");
        assert_eq!(c.max_iterations, 3);
    }

    #[test]
    fn malformed_value_keeps_default() {
        let c = parse("MAX_ITERATIONS=not-a-number\n");
        assert_eq!(c.max_iterations, RuntimeConfig::default().max_iterations);
    }

    #[test]
    fn line_without_equals_is_skipped() {
        let c = parse("JUST A LINE\nMAX_ITERATIONS=9\n");
        assert_eq!(c.max_iterations, 9);
    }

    #[test]
    fn strategy_key_parses() {
        let c = parse("COMPRESSION_STRATEGY=selective\n");
        assert_eq!(c.compression_strategy, CompressionStrategy::Selective);
    }

    #[test]
    fn model_and_endpoint_keys() {
        let c = parse("MODEL=test-model\nBASE_URL=http://localhost:8080/v1\nAPI_KEY_ENV=MY_KEY\n");
        assert_eq!(c.model, "test-model");
        assert_eq!(c.base_url, "http://localhost:8080/v1");
        assert_eq!(c.api_key_env, "MY_KEY");
    }

    #[test]
    fn load_returns_error_when_explicit_path_missing() {
        let result = load(Some(Path::new("/tmp/nils_nonexistent_config_xyz")));
        assert!(result.is_err());
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "MAX_ITERATIONS=17").unwrap();
        let c = load(Some(f.path())).unwrap();
        assert_eq!(c.max_iterations, 17);
    }
}
