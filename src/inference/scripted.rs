//! In-process stand-in for the vision backend with a fixed reply script.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::backend::{BackendReply, BackendRequest, ModelInfo, VisionBackend};

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
    /// Never answers within any realistic timeout.
    Hang,
}

impl ScriptedReply {
    pub fn safe() -> Self {
        ScriptedReply::Text("NO. Confidence: 0.9. The baby is lying down in the crib.".into())
    }

    pub fn risky(confidence: f64) -> Self {
        ScriptedReply::Text(format!(
            "YES. Confidence: {confidence}. The baby is pulling up over the crib rail."
        ))
    }
}

/// Replays queued replies in order, then repeats `fallback`.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    delay: Duration,
    healthy: AtomicBool,
    calls: AtomicUsize,
    model: String,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            fallback: ScriptedReply::safe(),
            delay: Duration::ZERO,
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            model: "scripted-vision".into(),
        }
    }

    pub fn with_fallback(mut self, fallback: ScriptedReply) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of `generate` calls that reached the backend.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> ScriptedReply {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl VisionBackend for ScriptedBackend {
    async fn generate(&self, _request: BackendRequest) -> anyhow::Result<BackendReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.next_reply();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match reply {
            ScriptedReply::Text(text) => Ok(BackendReply {
                text,
                model: self.model.clone(),
                digest: Some("sha256:scripted".into()),
                latency: self.delay,
            }),
            ScriptedReply::Fail(reason) => Err(anyhow::anyhow!(reason)),
            ScriptedReply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(anyhow::anyhow!("scripted backend hung"))
            }
        }
    }

    async fn ensure_model(&self) -> anyhow::Result<ModelInfo> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(ModelInfo {
                name: self.model.clone(),
                digest: Some("sha256:scripted".into()),
            })
        } else {
            Err(anyhow::anyhow!("scripted backend marked unhealthy"))
        }
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}
