//! Operations exposed to the presentation layer. Errors are flattened to strings.

use std::path::Path;

use crate::{
    frames::{Frame, FramePreview},
    health::{check_backend, check_camera, ComponentHealth, BACKEND_CHECK_BUDGET},
    inference::QARequest,
    metrics::MetricsSnapshot,
    monitor::AlertState,
    prompts::RiskPrompt,
    qa::QaTarget,
    AppState,
};

pub async fn get_alert_state(state: &AppState) -> Result<AlertState, String> {
    Ok(state.alerts.snapshot())
}

/// Returns false when there was no risk to acknowledge.
pub async fn acknowledge(state: &AppState) -> Result<bool, String> {
    Ok(state.alerts.acknowledge())
}

pub async fn get_current_prompt(state: &AppState) -> Result<RiskPrompt, String> {
    Ok(state.prompts.current())
}

pub async fn update_prompt(
    state: &AppState,
    text: String,
    author: Option<String>,
) -> Result<RiskPrompt, String> {
    let prompts = state.prompts.clone();
    tokio::task::spawn_blocking(move || prompts.update(&text, author.as_deref()))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())
}

pub async fn get_prompt_history(state: &AppState, limit: usize) -> Result<Vec<RiskPrompt>, String> {
    Ok(state.prompts.history(limit))
}

/// Ask about the latest analyzed frame, a retained frame by id, or an image file.
pub async fn ask_question(
    state: &AppState,
    question: String,
    frame_id: Option<String>,
    image_path: Option<String>,
) -> Result<QARequest, String> {
    let target = match (frame_id, image_path) {
        (_, Some(path)) => {
            let bytes = tokio::fs::read(Path::new(&path))
                .await
                .map_err(|e| format!("failed to read {path}: {e}"))?;
            QaTarget::Image(bytes)
        }
        (Some(id), None) => QaTarget::Frame(id),
        (None, None) => QaTarget::LatestFrame,
    };

    state
        .qa
        .ask(&question, target)
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_recent_frames(state: &AppState) -> Result<Vec<Frame>, String> {
    Ok(state.recent.snapshot())
}

/// Preview JPEG of a retained frame, or of the latest one when no id is given.
pub async fn get_frame_preview(
    state: &AppState,
    frame_id: Option<String>,
) -> Result<FramePreview, String> {
    let frame = match frame_id {
        Some(id) => state
            .recent
            .find(&id)
            .ok_or_else(|| format!("frame {id} is no longer retained"))?,
        None => state
            .recent
            .latest()
            .ok_or_else(|| "no frame has been analyzed yet".to_string())?,
    };
    Ok(frame.preview_payload())
}

pub async fn run_health_checks(state: &AppState) -> Result<Vec<ComponentHealth>, String> {
    let camera = check_camera(&state.camera_health, &state.camera_label);
    let backend = check_backend(&state.client, BACKEND_CHECK_BUDGET).await;
    Ok(vec![camera, backend])
}

pub async fn get_metrics(state: &AppState) -> Result<MetricsSnapshot, String> {
    Ok(state.metrics.get_snapshot().await)
}
