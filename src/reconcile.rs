//! Entry-state reconciliation.
//!
//! The backend is the source of truth for the homework step across page
//! loads. Before any recording surface is shown, the authoritative step is
//! resolved into a route, so a refresh-interrupted recording is recovered
//! instead of racing a stale local view against the server.

use anyhow::{Context, Result};
use tracing::info;

use crate::api::{HomeworkApi, Step};

/// Where the client should land, resolved from the authoritative step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRoute {
    /// A scored report exists; go straight to it regardless of local state.
    Report,
    /// No session in progress; start from the landing step.
    Landing,
    /// A prior attempt was interrupted (refresh mid-recording or
    /// mid-processing). The old attempt is never resumed; its session id is
    /// superseded only once a fresh start succeeds.
    Interrupted { session_id: String },
}

/// Resolve the entry route from the status endpoint.
pub async fn reconcile(api: &dyn HomeworkApi) -> Result<EntryRoute> {
    let status = api.status().await.context("failed to load homework status")?;

    let route = match status.step {
        Step::Report => EntryRoute::Report,
        Step::Landing => EntryRoute::Landing,
        Step::Recording | Step::Processing => match status.session_id {
            Some(session_id) => EntryRoute::Interrupted { session_id },
            // Backend says a session exists but gave no id; treat as landing.
            None => EntryRoute::Landing,
        },
    };

    info!("Reconciled entry route: {:?}", route);
    Ok(route)
}

/// Create or resume a session, returning the session id to record against.
pub async fn ensure_session(
    api: &dyn HomeworkApi,
    recommended_exercise_id: Option<&str>,
) -> Result<String> {
    let started = api
        .start(recommended_exercise_id)
        .await
        .context("failed to start homework session")?;
    info!("Homework session ready: {}", started.session_id);
    Ok(started.session_id)
}
