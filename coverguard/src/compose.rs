//! Verdict composition and the grounding check.
//!
//! The composer receives only the chunks the probes selected, numbered as
//! citations, and is instructed to reference them as `[n]`. After the
//! stream finishes, the composed text is checked against the supplied
//! citations: a marker that points at nothing is a grounding failure, and
//! the verdict is downgraded to UNKNOWN rather than shipped with an
//! unsupported claim.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::Semaphore;

use cg_core::providers::retry::RetryPolicy;
use cg_core::providers::{ComposeRequest, LlmProvider};

use crate::error::AgentError;
use futures_util::StreamExt;

static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("static citation marker regex"));

/// Citation markers in `text` that reference nothing in the supplied set.
#[must_use]
pub fn grounding_violations(text: &str, citation_count: usize) -> Vec<u32> {
    CITATION_MARKER
        .captures_iter(text)
        .filter_map(|captures| captures[1].parse::<u32>().ok())
        .filter(|&marker| marker == 0 || marker as usize > citation_count)
        .collect()
}

/// Run the composer under the global compose gate, forwarding tokens to
/// `sink` when streaming is enabled, and return the full composed text.
///
/// The compose *call* is retried under the provider retry policy; once any
/// token has been yielded the stream is never retried; a mid-stream
/// failure escalates to a turn failure.
pub async fn run_compose(
    llm: &Arc<dyn LlmProvider>,
    gate: &Semaphore,
    retry: &RetryPolicy,
    stream_tokens: bool,
    request: &ComposeRequest,
    sink: Option<&flume::Sender<String>>,
) -> Result<String, AgentError> {
    let _permit = gate.acquire().await.expect("compose gate never closes");

    let mut stream = retry.run("compose", || llm.compose(request)).await?;

    let mut composed = String::new();
    while let Some(token) = stream.next().await {
        let token = token.map_err(AgentError::Provider)?;
        if stream_tokens {
            if let Some(sink) = sink {
                // A dropped receiver just means nobody is watching the
                // stream anymore; composition still completes.
                let _ = sink.send(token.clone());
            }
        }
        composed.push_str(&token);
    }
    Ok(composed)
}
