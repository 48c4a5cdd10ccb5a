pub mod analysts;
pub mod curator;
pub mod extractor;
pub mod merger;

use crate::model::AgentTrace;
use chrono::Utc;
use std::time::Instant;

/// Builds an [`AgentTrace`] the way every agent in this module does:
/// summaries truncated to 500 chars so a giant article body never blows
/// up the trace log.
pub(crate) fn build_trace(
    agent_name: &str,
    input_summary: &str,
    output_summary: &str,
    started: Instant,
    prompt_tokens: u32,
    completion_tokens: u32,
    error: Option<String>,
) -> AgentTrace {
    AgentTrace {
        agent_name: agent_name.to_string(),
        timestamp: Utc::now(),
        input_summary: truncate(input_summary, 500),
        output_summary: truncate(output_summary, 500),
        duration_seconds: started.elapsed().as_secs_f64(),
        prompt_tokens,
        completion_tokens,
        error,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
