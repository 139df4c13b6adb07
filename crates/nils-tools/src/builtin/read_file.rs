// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::{enforce_output_ceiling, SideEffect, Tool};

const OUTPUT_CEILING_TOKENS: usize = 8_000;

/// Reads a UTF-8 text file, optionally a line window of it.
///
/// Files larger than the output ceiling must be read in windows; the tool
/// tells the model so rather than truncating silently.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file and return its contents. Use offset (1-based first \
         line) and limit (line count) to read a window of a large file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line number to start from (optional)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (optional)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::ReadOnly
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> anyhow::Result<String> {
        let path = args["path"].as_str().unwrap_or("");
        let offset = args["offset"].as_u64().map(|v| v as usize).unwrap_or(1);
        let limit = args["limit"].as_u64().map(|v| v as usize);

        let text = match tokio::fs::read_to_string(path).await {
            Ok(t) => t,
            Err(e) => return Ok(format!("Error: cannot read '{path}': {e}")),
        };

        let start = offset.saturating_sub(1);
        let window: Vec<&str> = match limit {
            Some(n) => text.lines().skip(start).take(n).collect(),
            None => text.lines().skip(start).collect(),
        };
        if window.is_empty() && start > 0 {
            return Ok(format!(
                "Error: offset {offset} is past the end of the file ({} lines)",
                text.lines().count()
            ));
        }

        Ok(enforce_output_ceiling(
            window.join("\n"),
            OUTPUT_CEILING_TOKENS,
            "Re-read with offset/limit to page through the file.",
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    async fn run(args: Value) -> String {
        ReadFileTool
            .execute(args, CancellationToken::new())
            .await
            .unwrap()
    }

    fn file_with(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{content}").unwrap();
        f
    }

    #[tokio::test]
    async fn reads_whole_file() {
        let f = file_with("alpha\nbeta\ngamma");
        let out = run(json!({"path": f.path()})).await;
        assert_eq!(out, "alpha\nbeta\ngamma");
    }

    #[tokio::test]
    async fn offset_and_limit_select_a_window() {
        let f = file_with("one\ntwo\nthree\nfour");
        let out = run(json!({"path": f.path(), "offset": 2, "limit": 2})).await;
        assert_eq!(out, "two\nthree");
    }

    #[tokio::test]
    async fn missing_file_is_error_text() {
        let out = run(json!({"path": "/nonexistent/nils/file.txt"})).await;
        assert!(out.starts_with("Error:"));
    }

    #[tokio::test]
    async fn offset_past_eof_is_error_text() {
        let f = file_with("only\ntwo");
        let out = run(json!({"path": f.path(), "offset": 10})).await;
        assert!(out.starts_with("Error:"));
        assert!(out.contains("past the end"));
    }

    #[tokio::test]
    async fn oversized_file_suggests_paging() {
        let big: String = (0..20_000).map(|i| format!("line {i}\n")).collect();
        let f = file_with(&big);
        let out = run(json!({"path": f.path()})).await;
        assert!(out.starts_with("Error:"));
        assert!(out.contains("offset/limit"));
    }

    #[tokio::test]
    async fn window_of_oversized_file_is_fine() {
        let big: String = (0..20_000).map(|i| format!("line {i}\n")).collect();
        let f = file_with(&big);
        let out = run(json!({"path": f.path(), "offset": 100, "limit": 5})).await;
        assert_eq!(out, "line 99\nline 100\nline 101\nline 102\nline 103");
    }
}
