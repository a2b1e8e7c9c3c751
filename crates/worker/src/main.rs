//! Headless generation run.
//!
//! Imports a session document, broadcasts the configured style, runs
//! "generate all" against the backend, and writes the updated session
//! back to the same file.

use std::sync::Arc;

use anyhow::Context;
use madsea_backend::api::HttpBackend;
use madsea_events::{EventBus, NotificationLevel, SessionEvent, SessionEventKind};
use madsea_session::{ConfigError, SessionConfig, SessionOrchestrator};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_STYLE_STRENGTH: f64 = 0.8;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let json_logs = std::env::var("MADSEA_LOG_FORMAT").is_ok_and(|v| v == "json");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "madsea_worker=info,madsea_session=info".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    let config = SessionConfig::from_env()?;
    let session_file = std::env::var("MADSEA_SESSION_FILE")
        .map_err(|_| ConfigError::Missing("MADSEA_SESSION_FILE"))?;
    let style = std::env::var("MADSEA_STYLE").map_err(|_| ConfigError::Missing("MADSEA_STYLE"))?;
    let strength = match std::env::var("MADSEA_STYLE_STRENGTH") {
        Ok(v) => v
            .parse::<f64>()
            .with_context(|| format!("MADSEA_STYLE_STRENGTH must be a number, got {v:?}"))?,
        Err(_) => DEFAULT_STYLE_STRENGTH,
    };

    tracing::info!(api_url = %config.api_url, session_file = %session_file, "Worker starting");

    let backend = Arc::new(
        HttpBackend::with_timeout(config.api_url.clone(), config.request_timeout)
            .context("Failed to build HTTP client")?,
    );
    let events = Arc::new(EventBus::default());
    let logger = spawn_event_logger(&events);

    let mut session =
        SessionOrchestrator::new(backend.clone(), backend, Arc::clone(&events), &config);
    if let Ok(episode_id) = std::env::var("MADSEA_EPISODE_ID") {
        session = session.with_episode_id(episode_id);
    }
    let session = Arc::new(session);

    let document = tokio::fs::read_to_string(&session_file)
        .await
        .with_context(|| format!("Failed to read {session_file}"))?;
    let scene_count = session.import_session(&document).await?;
    tracing::info!(scene_count, "Session loaded");

    session.load_catalogs().await;
    if !session.styles().await.iter().any(|s| s.id == style) {
        tracing::warn!(style = %style, "Style is not in the backend catalog");
    }
    session.apply_global_style(&style, strength).await;

    let mut run = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.generate_all().await })
    };
    let result = tokio::select! {
        joined = &mut run => joined?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling generation");
            session.cancel().await;
            run.await?
        }
    };

    let progress = result?;
    tracing::info!(
        completed_scenes = progress.completed_scenes,
        total_scenes = progress.total_scenes,
        "Generation finished",
    );

    let missing = session.scenes_missing_output().await;
    if !missing.is_empty() {
        tracing::warn!(?missing, "Some scenes have no output");
    }

    let exported = session.export_session().await.to_json()?;
    tokio::fs::write(&session_file, exported)
        .await
        .with_context(|| format!("Failed to write {session_file}"))?;
    tracing::info!(session_file = %session_file, "Session saved");

    logger.abort();
    Ok(())
}

/// Mirror session events into the log.
fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &SessionEvent) {
    match &event.kind {
        SessionEventKind::StateChanged { from, to } => {
            tracing::debug!(%from, %to, "State changed");
        }
        SessionEventKind::Progress(p) => {
            tracing::info!(
                completed = p.completed_scenes,
                total = p.total_scenes,
                percent = p.progress_percent,
                "Progress",
            );
        }
        SessionEventKind::SceneProgress { scene_id, percent } => {
            tracing::info!(scene_id = %scene_id, percent, "Scene progress");
        }
        SessionEventKind::SceneGenerated { scene_id, image } => {
            tracing::info!(scene_id = %scene_id, image = ?image, "Scene generated");
        }
        SessionEventKind::Notification(n) => match n.level {
            NotificationLevel::Error => tracing::error!(text = %n.message, "Notification"),
            NotificationLevel::Warning => tracing::warn!(text = %n.message, "Notification"),
            NotificationLevel::Info | NotificationLevel::Success => {
                tracing::info!(text = %n.message, "Notification")
            }
        },
    }
}
