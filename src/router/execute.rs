//! Turn execution for a selected agent.
//!
//! Builds the completion prompt from the agent definition and recent
//! dialogue, then calls the guarded inference surface. Failures (breaker
//! open, timeout, upstream) propagate to the engine, which degrades the turn
//! instead of failing it.

use anyhow::Result;

use crate::catalog::{AgentCategory, AgentDefinition};
use crate::flow::ConversationContext;
use crate::inference::GuardedInference;

/// Recent turns included in the prompt.
const PROMPT_HISTORY_TURNS: usize = 6;

pub struct AgentExecutor;

impl AgentExecutor {
    /// Produce the assistant response for this turn.
    pub async fn respond(
        inference: &GuardedInference,
        agent: &AgentDefinition,
        input: &str,
        ctx: &ConversationContext,
    ) -> Result<String> {
        let prompt = build_prompt(agent, input, ctx);
        inference.complete(&prompt).await
    }
}

fn build_prompt(agent: &AgentDefinition, input: &str, ctx: &ConversationContext) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are {}, {}.\n",
        agent.display_name, agent.description
    ));
    match agent.category {
        AgentCategory::Specialized | AgentCategory::Workflow => {
            prompt.push_str("Stay within your domain; be concrete and brief.\n");
        }
        AgentCategory::GeneralFallback => {
            prompt.push_str(
                "Answer conversationally; if the request needs a specialist, say so.\n",
            );
        }
        AgentCategory::Guardrails => {
            prompt.push_str("Respond with the appropriate policy-safe refusal or redirect.\n");
        }
    }
    if ctx.greeting_hint {
        prompt.push_str("The user just greeted you; greet them back warmly.\n");
    }
    if let Some(topic) = &ctx.current_topic {
        prompt.push_str(&format!("Current topic: {topic}\n"));
    }

    let recent = ctx
        .history
        .iter()
        .rev()
        .take(PROMPT_HISTORY_TURNS)
        .collect::<Vec<_>>();
    if !recent.is_empty() {
        prompt.push_str("Recent conversation:\n");
        for turn in recent.into_iter().rev() {
            prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
        }
    }

    prompt.push_str(&format!("user: {input}\nassistant:"));
    prompt
}
