use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error};

#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub image: Option<Arc<Vec<u8>>>,
}

#[derive(Debug, Clone)]
pub struct BackendReply {
    pub text: String,
    pub model: String,
    pub digest: Option<String>,
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    pub digest: Option<String>,
}

/// The local vision-model server.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn generate(&self, request: BackendRequest) -> anyhow::Result<BackendReply>;

    /// Verify the configured model is installed.
    async fn ensure_model(&self) -> anyhow::Result<ModelInfo>;

    fn model_name(&self) -> String;
}

/// Ollama HTTP API: `/api/chat` for generation, `/api/tags` for model presence.
pub struct OllamaBackend {
    base_url: String,
    model: String,
    http: reqwest::Client,
    digest: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ChatMessage>,
    /// Nanoseconds.
    #[serde(default)]
    total_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    digest: Option<String>,
}

impl OllamaBackend {
    /// `http` carries no timeout of its own; the caller owns the budget.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("llm-monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http,
            digest: Mutex::new(None),
        })
    }

    fn cached_digest(&self) -> Option<String> {
        self.digest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl VisionBackend for OllamaBackend {
    async fn generate(&self, request: BackendRequest) -> anyhow::Result<BackendReply> {
        let mut user = json!({ "role": "user", "content": request.user_prompt });
        if let Some(image) = request.image {
            let encoded = tokio::task::spawn_blocking(move || STANDARD.encode(image.as_slice()))
                .await
                .map_err(|err| anyhow::anyhow!("image encoding worker failed: {err}"))?;
            user["images"] = json!([encoded]);
        }

        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                user,
            ],
            "stream": false,
        });

        let url = format!("{}/api/chat", self.base_url);
        let started = Instant::now();
        let response = self.http.post(&url).json(&payload).send().await.map_err(|err| {
            log_error!("Ollama request to {url} failed: {err}");
            anyhow::anyhow!("request to {url} failed: {err}")
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log_error!("Ollama HTTP error {status}: {body}");
            anyhow::bail!("backend returned {status}: {}", body.trim());
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|err| anyhow::anyhow!("unparseable chat response: {err}"))?;
        let elapsed = started.elapsed();

        let latency = data
            .total_duration
            .filter(|ns| *ns > 0)
            .map(Duration::from_nanos)
            .unwrap_or(elapsed);
        let text = data.message.map(|m| m.content).unwrap_or_default();
        log_debug!("Ollama reply in {}ms: {} chars", latency.as_millis(), text.len());

        Ok(BackendReply {
            text,
            model: data.model.unwrap_or_else(|| self.model.clone()),
            digest: self.cached_digest(),
            latency,
        })
    }

    async fn ensure_model(&self) -> anyhow::Result<ModelInfo> {
        let url = format!("{}/api/tags", self.base_url);
        let tags: TagsResponse = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let entry = tags
            .models
            .into_iter()
            .find(|m| m.name == self.model)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Model {} not found. Run `ollama pull {}` before launching.",
                    self.model,
                    self.model
                )
            })?;

        *self.digest.lock().unwrap_or_else(PoisonError::into_inner) = entry.digest.clone();
        Ok(ModelInfo {
            name: entry.name,
            digest: entry.digest,
        })
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}
