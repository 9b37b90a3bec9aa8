use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::error::{BackendFault, MonitorError, MonitorResult};
use crate::frames::Frame;
use crate::prompts::RiskPrompt;
use crate::utils::logging::AUDIT_TARGET;

use super::backend::{BackendReply, BackendRequest, ModelInfo, OllamaBackend, VisionBackend};
use super::breaker::{BreakerState, CircuitBreaker};
use super::types::{InferenceResult, QARequest};
use super::verdict::parse_verdict;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const CLASSIFIER_SYSTEM_PROMPT: &str = "You are a risk assessment engine for a baby monitor. \
Analyze the image against the Risk Criteria. \
Answer ONLY 'YES' if the image matches the risk criteria, or 'NO' if it does not. \
On the next line write 'Confidence: ' followed by a number between 0 and 1. \
Then give one short sentence of explanation.";

const QA_SYSTEM_PROMPT: &str = "You are validating a camera feed for baby safety.";

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub timeout: Duration,
    pub confidence_threshold: f64,
    pub latency_ceiling: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl InferenceSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            timeout: config.inference_timeout(),
            confidence_threshold: config.confidence_threshold,
            latency_ceiling: config.latency_ceiling(),
            breaker_failure_threshold: config.breaker_failure_threshold,
            breaker_cooldown: config.breaker_cooldown(),
        }
    }
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

/// Timeout-bounded, circuit-broken access to the vision backend. Shared by the monitor
/// loop and the QA channel.
pub struct InferenceClient {
    backend: Arc<dyn VisionBackend>,
    breaker: Mutex<CircuitBreaker>,
    settings: InferenceSettings,
}

impl InferenceClient {
    pub fn new(backend: Arc<dyn VisionBackend>, settings: InferenceSettings) -> Self {
        let breaker = CircuitBreaker::new(
            settings.breaker_failure_threshold,
            settings.breaker_cooldown,
        );
        Self {
            backend,
            breaker: Mutex::new(breaker),
            settings,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> anyhow::Result<Self> {
        let backend = OllamaBackend::new(config.backend_url.clone(), config.model.clone())?;
        Ok(Self::new(
            Arc::new(backend),
            InferenceSettings::from_config(config),
        ))
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.lock_breaker().state()
    }

    /// Whether a call issued now would reach the backend.
    pub fn is_available(&self) -> bool {
        self.lock_breaker().is_available(Instant::now())
    }

    /// Time left before an open breaker admits a trial call. Zero when not open.
    pub fn retry_after(&self) -> Duration {
        self.lock_breaker().remaining_cooldown(Instant::now())
    }

    pub async fn classify(
        &self,
        frame: &Frame,
        prompt: &RiskPrompt,
    ) -> MonitorResult<InferenceResult> {
        let request = BackendRequest {
            system_prompt: CLASSIFIER_SYSTEM_PROMPT.into(),
            user_prompt: format!(
                "Risk Criteria: {}\n\nDoes this image match the risk criteria? Start with YES or NO.",
                prompt.text
            ),
            image: Some(Arc::clone(&frame.preview)),
        };

        let started = Instant::now();
        let outcome = self.call(request).await;
        let latency = started.elapsed();

        let reply = match outcome {
            Ok(reply) => reply,
            Err(err) => {
                log::warn!(
                    target: AUDIT_TARGET,
                    "classify at={} frame={} prompt_v={} model={} latency_ms={} error=\"{}\"",
                    Utc::now().to_rfc3339(),
                    frame.id,
                    prompt.version,
                    self.backend.model_name(),
                    latency.as_millis(),
                    err
                );
                return Err(err);
            }
        };

        let verdict = parse_verdict(&reply.text);
        let threshold = self.settings.confidence_threshold;
        let risk = verdict.risk && verdict.confidence >= threshold;
        let degraded = latency > self.settings.latency_ceiling;

        let result = InferenceResult {
            frame_id: frame.id.clone(),
            prompt_version: prompt.version,
            model: reply.model,
            model_digest: reply.digest,
            latency_ms: latency.as_millis() as u64,
            risk,
            confidence: verdict.confidence,
            explanation: verdict.explanation,
            degraded,
            raw_text: Some(reply.text),
            error: None,
            completed_at: Utc::now(),
        };

        log::info!(
            target: AUDIT_TARGET,
            "classify at={} frame={} prompt_v={} model={} digest={} risk={} confidence={:.2} parsed={} latency_ms={} backend_ms={} degraded={}",
            result.completed_at.to_rfc3339(),
            result.frame_id,
            result.prompt_version,
            result.model,
            result.model_digest.as_deref().unwrap_or("-"),
            result.risk,
            result.confidence,
            verdict.confidence_parsed,
            result.latency_ms,
            reply.latency.as_millis(),
            result.degraded
        );
        if verdict.risk && !risk {
            log_info!(
                "frame {} answered YES below threshold ({:.2} < {:.2}); treated as safe",
                result.frame_id,
                result.confidence,
                threshold
            );
        }

        Ok(result)
    }

    /// Free-form question about an image. Backend failures are reported in the returned
    /// record rather than as an error.
    ///
    /// An open breaker is honoured but never claimed or updated here: whether monitoring
    /// fails fast depends on classification outcomes alone.
    pub async fn answer(
        &self,
        question: &str,
        image: Option<Arc<Vec<u8>>>,
        frame_id: Option<String>,
    ) -> QARequest {
        let created_at = Utc::now();
        let request = BackendRequest {
            system_prompt: QA_SYSTEM_PROMPT.into(),
            user_prompt: question.to_string(),
            image,
        };

        let started = Instant::now();
        let outcome = if self.is_available() {
            self.send(request).await
        } else {
            Err(BackendFault::CircuitOpen)
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let qa = match outcome.map_err(MonitorError::BackendUnavailable) {
            Ok(reply) => QARequest {
                id: Uuid::new_v4().to_string(),
                question: question.to_string(),
                frame_id,
                answer: reply.text.trim().to_string(),
                latency_ms,
                model: reply.model,
                error: None,
                created_at,
            },
            Err(err) => QARequest {
                id: Uuid::new_v4().to_string(),
                question: question.to_string(),
                frame_id,
                answer: String::new(),
                latency_ms,
                model: self.backend.model_name(),
                error: Some(err.to_string()),
                created_at,
            },
        };

        log::info!(
            target: AUDIT_TARGET,
            "answer at={} qa={} frame={} model={} latency_ms={} error={}",
            Utc::now().to_rfc3339(),
            qa.id,
            qa.frame_id.as_deref().unwrap_or("external"),
            qa.model,
            qa.latency_ms,
            qa.error.as_deref().unwrap_or("none")
        );
        qa
    }

    /// Model check that bypasses the breaker gate. Success closes the breaker early.
    pub async fn check_model(&self, budget: Duration) -> MonitorResult<ModelInfo> {
        match tokio::time::timeout(budget, self.backend.ensure_model()).await {
            Ok(Ok(info)) => {
                let mut breaker = self.lock_breaker();
                if breaker.state() != BreakerState::Closed {
                    log_info!("Backend model check succeeded; closing circuit breaker");
                }
                breaker.record_success();
                Ok(info)
            }
            Ok(Err(err)) => Err(MonitorError::BackendUnavailable(BackendFault::Failed(
                format!("{err:#}"),
            ))),
            Err(_) => Err(MonitorError::BackendUnavailable(BackendFault::Timeout(budget))),
        }
    }

    /// Classification call: admitted by the breaker and counted toward it.
    async fn call(&self, request: BackendRequest) -> MonitorResult<BackendReply> {
        if !self.lock_breaker().try_acquire(Instant::now()) {
            return Err(MonitorError::BackendUnavailable(BackendFault::CircuitOpen));
        }

        let fault = match self.send(request).await {
            Ok(reply) => {
                self.lock_breaker().record_success();
                return Ok(reply);
            }
            Err(fault) => fault,
        };

        let (opened, failures) = {
            let mut breaker = self.lock_breaker();
            let opened = breaker.record_failure(Instant::now());
            (opened, breaker.consecutive_failures())
        };
        if opened {
            log_warn!(
                "Circuit breaker opened after {} consecutive failures (last: {}); failing fast for {}ms",
                failures,
                fault,
                self.settings.breaker_cooldown.as_millis()
            );
        }
        Err(MonitorError::BackendUnavailable(fault))
    }

    async fn send(&self, request: BackendRequest) -> Result<BackendReply, BackendFault> {
        let budget = self.settings.timeout;
        match tokio::time::timeout(budget, self.backend.generate(request)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => Err(BackendFault::Failed(format!("{err:#}"))),
            Err(_) => Err(BackendFault::Timeout(budget)),
        }
    }

    fn lock_breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{RawFrame, SourceTag};
    use crate::inference::scripted::{ScriptedBackend, ScriptedReply};

    fn frame() -> Frame {
        Frame::new(
            SourceTag::Mock,
            RawFrame {
                bytes: Arc::new(vec![0u8; 8]),
            },
            vec![0xff, 0xd8],
            Utc::now(),
        )
    }

    fn prompt() -> RiskPrompt {
        RiskPrompt {
            version: 3,
            text: "Watch for baby climbing out of crib".into(),
            updated_at: Utc::now(),
            updated_by: None,
            default_flag: false,
        }
    }

    fn settings() -> InferenceSettings {
        InferenceSettings {
            timeout: Duration::from_millis(200),
            confidence_threshold: 0.5,
            latency_ceiling: Duration::from_secs(5),
            breaker_failure_threshold: 3,
            breaker_cooldown: Duration::from_secs(60),
        }
    }

    fn client(backend: Arc<ScriptedBackend>, settings: InferenceSettings) -> InferenceClient {
        InferenceClient::new(backend, settings)
    }

    #[tokio::test]
    async fn risky_answer_above_threshold_is_risk() {
        let backend = Arc::new(ScriptedBackend::new([ScriptedReply::risky(0.8)]));
        let client = client(backend, settings());
        let result = client.classify(&frame(), &prompt()).await.unwrap();
        assert!(result.risk);
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.prompt_version, 3);
        assert_eq!(result.model_digest.as_deref(), Some("sha256:scripted"));
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn risky_answer_below_threshold_is_safe() {
        let backend = Arc::new(ScriptedBackend::new([ScriptedReply::risky(0.3)]));
        let client = client(backend, settings());
        let result = client.classify(&frame(), &prompt()).await.unwrap();
        assert!(!result.risk);
        assert_eq!(result.confidence, 0.3);
    }

    #[tokio::test]
    async fn answer_without_confidence_fails_closed() {
        let backend = Arc::new(ScriptedBackend::new([ScriptedReply::Text(
            "YES, the baby is climbing".into(),
        )]));
        let client = client(backend, settings());
        let result = client.classify(&frame(), &prompt()).await.unwrap();
        assert!(!result.risk);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn slow_success_is_marked_degraded() {
        let backend = Arc::new(ScriptedBackend::new([]).with_delay(Duration::from_millis(30)));
        let client = client(
            backend,
            InferenceSettings {
                latency_ceiling: Duration::from_millis(10),
                ..settings()
            },
        );
        let result = client.classify(&frame(), &prompt()).await.unwrap();
        assert!(result.degraded);
        assert!(!result.risk);
    }

    #[tokio::test]
    async fn timeout_is_reported_as_backend_unavailable() {
        let backend = Arc::new(ScriptedBackend::new([ScriptedReply::Hang]));
        let client = client(backend, settings());
        let err = client.classify(&frame(), &prompt()).await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::BackendUnavailable(BackendFault::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn breaker_opens_and_short_circuits_without_backend_calls() {
        let backend = Arc::new(
            ScriptedBackend::new([]).with_fallback(ScriptedReply::Fail("connection refused".into())),
        );
        let client = client(Arc::clone(&backend), settings());

        for _ in 0..3 {
            let err = client.classify(&frame(), &prompt()).await.unwrap_err();
            assert!(matches!(err, MonitorError::BackendUnavailable(BackendFault::Failed(_))));
        }
        assert_eq!(backend.calls(), 3);
        assert_eq!(client.breaker_state(), BreakerState::Open);
        assert!(!client.is_available());

        let err = client.classify(&frame(), &prompt()).await.unwrap_err();
        assert!(matches!(err, MonitorError::BackendUnavailable(BackendFault::CircuitOpen)));
        let qa = client.answer("Is the baby asleep?", None, None).await;
        assert!(qa.error.as_deref().unwrap().contains("circuit breaker open"));
        assert_eq!(backend.calls(), 3);
        assert!(client.retry_after() > Duration::from_secs(50));
    }

    #[tokio::test]
    async fn failed_answers_leave_the_breaker_closed() {
        let backend = Arc::new(ScriptedBackend::new([
            ScriptedReply::Fail("bad image".into()),
            ScriptedReply::Fail("bad image".into()),
            ScriptedReply::Fail("bad image".into()),
            ScriptedReply::Hang,
            ScriptedReply::safe(),
        ]));
        let client = client(Arc::clone(&backend), settings());

        for _ in 0..4 {
            let qa = client.answer("What is happening?", None, None).await;
            assert!(qa.error.is_some());
        }
        assert_eq!(client.breaker_state(), BreakerState::Closed);
        assert_eq!(client.retry_after(), Duration::ZERO);

        let result = client.classify(&frame(), &prompt()).await.unwrap();
        assert!(!result.risk);
        assert_eq!(backend.calls(), 5);
    }

    #[tokio::test]
    async fn successful_answer_does_not_close_an_open_breaker() {
        let backend = Arc::new(
            ScriptedBackend::new([]).with_fallback(ScriptedReply::Fail("down".into())),
        );
        let client = client(
            Arc::clone(&backend),
            InferenceSettings {
                breaker_cooldown: Duration::ZERO,
                ..settings()
            },
        );
        for _ in 0..3 {
            let _ = client.classify(&frame(), &prompt()).await;
        }
        assert_eq!(client.breaker_state(), BreakerState::Open);

        // Zero cooldown lets the question through without claiming the trial call.
        backend.push(ScriptedReply::Text("Yes.".into()));
        let qa = client.answer("Is the baby asleep?", None, None).await;
        assert!(qa.is_ok());
        assert_eq!(client.breaker_state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn successful_model_check_closes_open_breaker() {
        let backend = Arc::new(
            ScriptedBackend::new([]).with_fallback(ScriptedReply::Fail("down".into())),
        );
        let client = client(Arc::clone(&backend), settings());
        for _ in 0..3 {
            let _ = client.classify(&frame(), &prompt()).await;
        }
        assert_eq!(client.breaker_state(), BreakerState::Open);

        backend.set_healthy(false);
        assert!(client.check_model(Duration::from_secs(1)).await.is_err());
        assert_eq!(client.breaker_state(), BreakerState::Open);

        backend.set_healthy(true);
        client.check_model(Duration::from_secs(1)).await.unwrap();
        assert_eq!(client.breaker_state(), BreakerState::Closed);
        assert!(client.is_available());
    }

    #[tokio::test]
    async fn answer_records_frame_and_text() {
        let backend = Arc::new(ScriptedBackend::new([ScriptedReply::Text(
            "  The baby is asleep.  ".into(),
        )]));
        let client = client(backend, settings());
        let qa = client
            .answer("What is happening?", None, Some("frame-1".into()))
            .await;
        assert!(qa.is_ok());
        assert_eq!(qa.answer, "The baby is asleep.");
        assert_eq!(qa.frame_id.as_deref(), Some("frame-1"));
        assert_eq!(qa.model, "scripted-vision");
    }
}
