//! Chat orchestration: sessions, turn streams, deadlines, backpressure.
//!
//! A session binds a `policy_id` once; every turn runs the guardrail with
//! that policy fixed, and a caller claiming any other policy is rejected
//! outright. Turn output is a stream of [`TurnEvent`]s: tokens in
//! emission order, then exactly one terminal event (trailer, failure, or
//! abort). Interleaving of streams from different sessions is arbitrary;
//! within one stream the order is guaranteed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::time::{timeout, Instant};
use uuid::Uuid;

use cg_core::CoverageVerdict;

use crate::agent::CoverageAgent;
use crate::error::ChatError;

/// One event on a turn's wire stream. Serializes with a tag for the
/// line-delimited transport; the trailer is the sentinel the caller keys
/// on.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    Token { text: String },
    Trailer { verdict: CoverageVerdict },
    Failure { code: String, message: String },
    Aborted { reason: String },
}

/// Consumer handle for one turn's events.
///
/// Events arrive in emission order and the stream ends after the terminal
/// event. Dropping the handle cancels nothing; the turn runs to
/// completion server-side, it just stops watching.
#[derive(Debug)]
pub struct TurnStream {
    rx: flume::Receiver<TurnEvent>,
}

impl TurnStream {
    /// Next event, or `None` once the stream is finished.
    pub async fn next(&self) -> Option<TurnEvent> {
        self.rx.recv_async().await.ok()
    }

    /// Drain the whole stream into a vector (test helper and batch mode).
    pub async fn collect(self) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

/// A transcript line, kept for replay only.
#[derive(Clone, Debug, Serialize)]
pub struct TurnRecord {
    pub role: String,
    pub content: String,
}

struct SessionState {
    policy_id: String,
    /// Free-form account context handed to the composer as informational
    /// material. Never consulted by the guardrail's decisions.
    advisory: Option<String>,
    /// Held for the duration of a turn; a second turn for the same session
    /// waits here until the first finishes streaming.
    turn_gate: tokio::sync::Mutex<()>,
    history: Mutex<Vec<TurnRecord>>,
}

/// Binds sessions to the guardrail agent and streams turns.
pub struct ChatOrchestrator {
    agent: Arc<CoverageAgent>,
    sessions: Mutex<FxHashMap<String, Arc<SessionState>>>,
}

impl ChatOrchestrator {
    #[must_use]
    pub fn new(agent: Arc<CoverageAgent>) -> Self {
        Self {
            agent,
            sessions: Mutex::new(FxHashMap::default()),
        }
    }

    /// Open a session bound to `policy_id` and return its id.
    pub fn open_session(&self, policy_id: &str) -> String {
        self.open_session_with_advisory(policy_id, None)
    }

    /// Open a session carrying a non-authoritative advisory (e.g. account
    /// constraints) the composer may mention but never decides with.
    pub fn open_session_with_advisory(
        &self,
        policy_id: &str,
        advisory: Option<String>,
    ) -> String {
        let session_id = Uuid::new_v4().to_string();
        let state = Arc::new(SessionState {
            policy_id: policy_id.to_string(),
            advisory,
            turn_gate: tokio::sync::Mutex::new(()),
            history: Mutex::new(Vec::new()),
        });
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .insert(session_id.clone(), state);
        tracing::info!(session_id = %session_id, policy_id, "session opened");
        session_id
    }

    /// Transcript so far, for replay. The reasoning core never reads this.
    pub fn history(&self, session_id: &str) -> Option<Vec<TurnRecord>> {
        let sessions = self.sessions.lock().expect("session registry poisoned");
        sessions
            .get(session_id)
            .map(|state| state.history.lock().expect("history poisoned").clone())
    }

    /// Submit one turn and stream its events.
    ///
    /// `claimed_policy_id` must match the session's binding; cross-policy
    /// answering is refused before any retrieval happens. A zero deadline
    /// cancels immediately; a deadline expiring mid-turn aborts in-flight
    /// provider calls and closes the stream after an `Aborted` event
    /// (partial tokens may already have streamed; no verdict is produced).
    pub async fn submit_turn(
        &self,
        session_id: &str,
        claimed_policy_id: &str,
        utterance: &str,
        deadline: Duration,
    ) -> Result<TurnStream, ChatError> {
        let session = {
            let sessions = self.sessions.lock().expect("session registry poisoned");
            sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| ChatError::UnknownSession {
                    session_id: session_id.to_string(),
                })?
        };
        if session.policy_id != claimed_policy_id {
            return Err(ChatError::PolicyMismatch {
                session_id: session_id.to_string(),
                bound: session.policy_id.clone(),
                claimed: claimed_policy_id.to_string(),
            });
        }
        if deadline.is_zero() {
            return Err(ChatError::Deadline);
        }

        let (event_tx, event_rx) = flume::bounded::<TurnEvent>(256);
        let agent = self.agent.clone();
        let utterance = utterance.to_string();
        let started = Instant::now();

        tokio::spawn(async move {
            let _turn = session.turn_gate.lock().await;

            let (token_tx, token_rx) = flume::unbounded::<String>();
            let forwarder = {
                let event_tx = event_tx.clone();
                tokio::spawn(async move {
                    while let Ok(text) = token_rx.recv_async().await {
                        if event_tx.send_async(TurnEvent::Token { text }).await.is_err() {
                            break;
                        }
                    }
                })
            };

            let policy_id = session.policy_id.clone();
            let advisory = session.advisory.clone();
            let outcome = timeout(
                deadline.saturating_sub(started.elapsed()),
                agent.run_turn(&policy_id, &utterance, advisory, Some(&token_tx)),
            )
            .await;

            // Closing the token channel lets the forwarder drain before the
            // terminal event goes out, preserving token-before-trailer order.
            drop(token_tx);
            let _ = forwarder.await;

            let terminal = match outcome {
                Err(_elapsed) => {
                    tracing::warn!(policy_id = %policy_id, "turn cancelled by deadline");
                    TurnEvent::Aborted {
                        reason: "cancelled_by_deadline".to_string(),
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(policy_id = %policy_id, code = err.code(), error = %err, "turn failed");
                    TurnEvent::Failure {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    }
                }
                Ok(Ok(outcome)) => {
                    let mut history = session.history.lock().expect("history poisoned");
                    history.push(TurnRecord {
                        role: "user".to_string(),
                        content: utterance.clone(),
                    });
                    history.push(TurnRecord {
                        role: "assistant".to_string(),
                        content: outcome.composed.clone(),
                    });
                    TurnEvent::Trailer {
                        verdict: outcome.verdict,
                    }
                }
            };
            let _ = event_tx.send_async(terminal).await;
        });

        Ok(TurnStream { rx: event_rx })
    }
}
