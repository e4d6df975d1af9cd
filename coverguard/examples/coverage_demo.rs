//! End-to-end demo: ingest a small policy, then ask coverage questions.
//!
//! Runs entirely on the deterministic mock providers and the in-memory
//! store, so it needs no API keys.
//!
//! ```bash
//! cargo run --example coverage_demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::FmtSubscriber;

use cg_core::providers::mock::{MockEmbeddingProvider, MockLlm};
use cg_core::CoverageConfig;
use cg_ingest::{Classifier, IngestionPipeline, MemoryChunkStore, TextExtractor};
use coverguard::{ChatOrchestrator, CoverageAgent, TurnEvent};

const DIM: usize = 64;

const POLICY: &str = "POLICY OVERVIEW\n\nThis mechanical breakdown agreement protects the \
vehicle named in the schedule.\u{c}\
COVERAGE\n\nEngine coverage includes turbo components, pistons, and cylinder heads.\u{c}\
LIMITATIONS\n\nDeductible: 400 per visit; cap 15000.\u{c}\
EXCLUSIONS\n\nWe do not insure damage you intentionally cause. Turbo is excluded from all \
coverage.";

#[tokio::main]
async fn main() -> miette::Result<()> {
    init_tracing();

    let config = CoverageConfig::default();
    let store = Arc::new(MemoryChunkStore::new(DIM));

    let pipeline = IngestionPipeline::new(
        TextExtractor::new(),
        Classifier::heuristic(),
        Arc::new(MockEmbeddingProvider::new(DIM)),
        store.clone(),
        &config,
    )
    .map_err(|err| miette::miette!("{err}"))?;

    let report = pipeline
        .ingest("pol-demo", POLICY.as_bytes(), "text/plain")
        .await
        .map_err(|err| miette::miette!("{err}"))?;
    println!(
        "ingested policy {}: {} chunks over {} pages",
        report.policy_id, report.chunk_count, report.pages
    );

    let agent = Arc::new(CoverageAgent::new(
        store,
        Arc::new(MockEmbeddingProvider::new(DIM)),
        Arc::new(MockLlm::new()),
        config,
    ));
    let orchestrator = ChatOrchestrator::new(agent);
    let session = orchestrator.open_session("pol-demo");

    for question in [
        "Is turbo covered?",
        "Are pistons covered?",
        "Is flood damage covered?",
        "What are the exclusions?",
    ] {
        println!("\n> {question}");
        let stream = orchestrator
            .submit_turn(&session, "pol-demo", question, Duration::from_secs(10))
            .await
            .map_err(|err| miette::miette!("{err}"))?;

        while let Some(event) = stream.next().await {
            match event {
                TurnEvent::Token { text } => print!("{text}"),
                TurnEvent::Trailer { verdict } => {
                    println!(
                        "\n  verdict: {} (confidence {:.2}, {} citations)",
                        verdict.status,
                        verdict.confidence,
                        verdict.citations.len()
                    );
                }
                TurnEvent::Failure { code, message } => {
                    println!("\n  turn failed [{code}]: {message}");
                }
                TurnEvent::Aborted { reason } => {
                    println!("\n  turn aborted: {reason}");
                }
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder().with_env_filter("info").finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
