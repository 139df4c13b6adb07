// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{SideEffect, Tool};

/// A tool schema as advertised to the model.  Mirrors
/// `nils_model::ToolSchema` but keeps this crate independent from the model
/// crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools.
///
/// Populated at startup and immutable thereafter: every accessor takes
/// `&self`, and the filtered views handed to sub-agents are new registries
/// sharing the same `Arc`'d implementations.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas for all registered tools, sorted by name for a stable prompt.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of tools declared read-only.
    pub fn read_only_names(&self) -> HashSet<String> {
        self.tools
            .values()
            .filter(|t| t.side_effect() == SideEffect::ReadOnly)
            .map(|t| t.name().to_string())
            .collect()
    }

    /// New registry restricted to `keep`; names absent from this registry
    /// are silently dropped.
    pub fn filtered(&self, keep: &HashSet<String>) -> ToolRegistry {
        let tools = self
            .tools
            .iter()
            .filter(|(name, _)| keep.contains(*name))
            .map(|(name, tool)| (name.clone(), tool.clone()))
            .collect();
        ToolRegistry { tools }
    }

    /// New registry with one tool removed.
    pub fn without(&self, name: &str) -> ToolRegistry {
        let tools = self
            .tools
            .iter()
            .filter(|(n, _)| n.as_str() != name)
            .map(|(n, tool)| (n.clone(), tool.clone()))
            .collect();
        ToolRegistry { tools }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{SideEffect, Tool};

    struct EchoTool {
        name: &'static str,
        effect: SideEffect,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn side_effect(&self) -> SideEffect {
            self.effect
        }
        async fn execute(&self, args: Value, _cancel: CancellationToken) -> anyhow::Result<String> {
            Ok(format!("echo:{args}"))
        }
    }

    fn reg() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(EchoTool {
            name: "reader",
            effect: SideEffect::ReadOnly,
        });
        r.register(EchoTool {
            name: "writer",
            effect: SideEffect::ReadWrite,
        });
        r.register(EchoTool {
            name: "fetcher",
            effect: SideEffect::Network,
        });
        r
    }

    #[test]
    fn register_and_get() {
        let r = reg();
        assert!(r.get("reader").is_some());
        assert!(r.get("nope").is_none());
    }

    #[test]
    fn names_are_sorted() {
        assert_eq!(reg().names(), vec!["fetcher", "reader", "writer"]);
    }

    #[test]
    fn schemas_are_sorted_and_complete() {
        let schemas = reg().schemas();
        assert_eq!(schemas.len(), 3);
        assert_eq!(schemas[0].name, "fetcher");
        assert_eq!(schemas[1].description, "echoes its input");
    }

    #[test]
    fn read_only_names_filters_by_side_effect() {
        let ro = reg().read_only_names();
        assert!(ro.contains("reader"));
        assert!(!ro.contains("writer"));
        assert!(!ro.contains("fetcher"));
    }

    #[test]
    fn filtered_keeps_only_requested() {
        let keep: HashSet<String> = ["reader".to_string()].into();
        let sub = reg().filtered(&keep);
        assert_eq!(sub.names(), vec!["reader"]);
    }

    #[test]
    fn filtered_ignores_unknown_names() {
        let keep: HashSet<String> = ["reader".to_string(), "ghost".to_string()].into();
        let sub = reg().filtered(&keep);
        assert_eq!(sub.len(), 1);
    }

    #[test]
    fn without_removes_one_tool() {
        let sub = reg().without("writer");
        assert!(!sub.contains("writer"));
        assert_eq!(sub.len(), 2);
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut r = ToolRegistry::new();
        r.register(EchoTool {
            name: "t",
            effect: SideEffect::ReadOnly,
        });
        r.register(EchoTool {
            name: "t",
            effect: SideEffect::ReadWrite,
        });
        assert_eq!(r.len(), 1);
    }
}
