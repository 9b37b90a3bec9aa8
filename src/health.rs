//! Readiness checks for the camera and the inference backend.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;

use crate::frames::SourceHealth;
use crate::inference::InferenceClient;

pub const BACKEND_CHECK_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub component: String,
    pub ok: bool,
    pub message: String,
}

/// Verifies the configured model is installed. Success also closes an open breaker.
pub async fn check_backend(client: &InferenceClient, budget: Duration) -> ComponentHealth {
    match client.check_model(budget).await {
        Ok(info) => ComponentHealth {
            component: "backend".into(),
            ok: true,
            message: match info.digest {
                Some(digest) => format!("{} ready ({digest})", info.name),
                None => format!("{} ready", info.name),
            },
        },
        Err(err) => ComponentHealth {
            component: "backend".into(),
            ok: false,
            message: err.to_string(),
        },
    }
}

/// Reports the frame source's last published health. Degraded still counts as usable.
pub fn check_camera(health: &watch::Receiver<SourceHealth>, description: &str) -> ComponentHealth {
    let current = *health.borrow();
    let (ok, message) = match current {
        SourceHealth::Ok => (true, format!("{description} streaming")),
        SourceHealth::Degraded => (true, format!("{description} dropping frames")),
        SourceHealth::Offline => (false, format!("{description} offline")),
    };
    ComponentHealth {
        component: "camera".into(),
        ok,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::scripted::ScriptedBackend;
    use crate::inference::InferenceSettings;
    use std::sync::Arc;

    #[tokio::test]
    async fn backend_check_reports_model_and_failure() {
        let backend = Arc::new(ScriptedBackend::new([]));
        let client = InferenceClient::new(
            backend.clone(),
            InferenceSettings::default(),
        );

        let healthy = check_backend(&client, Duration::from_secs(1)).await;
        assert!(healthy.ok);
        assert!(healthy.message.contains("scripted-vision"));

        backend.set_healthy(false);
        let unhealthy = check_backend(&client, Duration::from_secs(1)).await;
        assert!(!unhealthy.ok);
        assert!(unhealthy.message.contains("unhealthy"));
    }

    #[test]
    fn camera_check_follows_source_health() {
        let (tx, rx) = watch::channel(SourceHealth::Ok);
        assert!(check_camera(&rx, "mock-camera").ok);
        tx.send(SourceHealth::Degraded).unwrap();
        assert!(check_camera(&rx, "mock-camera").ok);
        tx.send(SourceHealth::Offline).unwrap();
        let offline = check_camera(&rx, "mock-camera");
        assert!(!offline.ok);
        assert_eq!(offline.message, "mock-camera offline");
    }
}
