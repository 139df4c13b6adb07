// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Prompt builders for the agent, its sub-agents, and the verifier.

/// Default system prompt for the root agent loop.
pub fn system_prompt() -> String {
    "You are Nils, an autonomous assistant that accomplishes tasks by \
     thinking step by step and calling tools.\n\n\
     ## Working style\n\
     - Use tools to gather facts instead of guessing; observe each result \
       before deciding the next action.\n\
     - When a tool returns an `Error:` text, read it carefully and recover \
       (fix the arguments, pick another tool, or narrow the request).\n\
     - When the task is done, reply with the final answer as plain text and \
       no tool calls.\n\
     - Keep final answers direct; do not narrate the tool calls you made."
        .to_string()
}

/// System prompt for a delegated sub-agent.
///
/// `role_hint` focuses the child on its slice of the work; `read_only`
/// tells it not to plan mutations it cannot perform.
pub fn sub_agent_prompt(role_hint: Option<&str>, read_only: bool) -> String {
    let mut prompt = String::from(
        "You are a sub-agent working on one delegated task. Complete it \
         independently and reply with a compact result: the facts found or \
         the outcome achieved, without commentary.",
    );
    if read_only {
        prompt.push_str(
            "\nYou only have read-only tools; report findings rather than \
             attempting changes.",
        );
    }
    if let Some(role) = role_hint {
        prompt.push_str("\nRole: ");
        prompt.push_str(role);
    }
    prompt
}

/// System prompt for the completion verifier.
pub fn verifier_system_prompt() -> String {
    "You judge whether an agent's result satisfies the user's task. \
     Judge strictly but do not re-do the work. \
     Reply with exactly one JSON object: \
     {\"complete\": true|false, \"reason\": \"one short sentence\"}. \
     Mark complete=false only when something the task asked for is missing \
     or wrong, and say what it is."
        .to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_mentions_tools_and_final_answer() {
        let p = system_prompt();
        assert!(p.contains("tools"));
        assert!(p.contains("final answer"));
    }

    #[test]
    fn sub_agent_prompt_includes_role_hint() {
        let p = sub_agent_prompt(Some("security reviewer"), false);
        assert!(p.contains("security reviewer"));
    }

    #[test]
    fn sub_agent_prompt_flags_read_only() {
        assert!(sub_agent_prompt(None, true).contains("read-only"));
        assert!(!sub_agent_prompt(None, false).contains("read-only"));
    }

    #[test]
    fn verifier_prompt_demands_json_verdict() {
        let p = verifier_system_prompt();
        assert!(p.contains("\"complete\""));
        assert!(p.contains("\"reason\""));
    }
}
