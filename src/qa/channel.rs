use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{BackendFault, MonitorError, MonitorResult};
use crate::frames::RecentFrames;
use crate::inference::{InferenceClient, QARequest};

use super::rate_limit::RateLimiter;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

pub const MAX_QUESTION_CHARS: usize = 500;

/// What a question is about.
#[derive(Debug, Clone)]
pub enum QaTarget {
    /// The most recently analyzed frame.
    LatestFrame,
    /// A specific frame still held in the recent-frame ring.
    Frame(String),
    /// An image supplied by the caller.
    Image(Vec<u8>),
}

/// On-demand questions about the camera feed.
///
/// Shares the inference client and recent frames with the monitor loop but holds no handle
/// to the alert state.
pub struct QaChannel {
    client: Arc<InferenceClient>,
    recent: RecentFrames,
    limiter: Mutex<RateLimiter>,
}

impl QaChannel {
    pub fn new(client: Arc<InferenceClient>, recent: RecentFrames, min_interval: Duration) -> Self {
        Self {
            client,
            recent,
            limiter: Mutex::new(RateLimiter::new(min_interval)),
        }
    }

    /// Checked in order: question text, breaker, rate limit, frame. Every rejection
    /// happens before the backend is contacted; only the last two use up the rate slot.
    pub async fn ask(&self, question: &str, target: QaTarget) -> MonitorResult<QARequest> {
        let question = validate_question(question)?;

        if !self.client.is_available() {
            log_info!(
                "QA rejected: circuit breaker open for another {}ms",
                self.client.retry_after().as_millis()
            );
            return Err(MonitorError::BackendUnavailable(BackendFault::CircuitOpen));
        }

        self.limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_acquire(Instant::now())
            .map_err(|retry_after| MonitorError::RateLimited { retry_after })?;

        let (image, frame_id) = match target {
            QaTarget::LatestFrame => {
                let frame = self.recent.latest().ok_or(MonitorError::NoFrameAvailable)?;
                (Arc::clone(&frame.preview), Some(frame.id))
            }
            QaTarget::Frame(id) => {
                let frame = self.recent.find(&id).ok_or(MonitorError::NoFrameAvailable)?;
                (Arc::clone(&frame.preview), Some(frame.id))
            }
            QaTarget::Image(bytes) => (Arc::new(bytes), None),
        };

        let qa = self.client.answer(question, Some(image), frame_id).await;
        if qa.is_ok() {
            log_info!("QA answered in {}ms", qa.latency_ms);
        }
        Ok(qa)
    }
}

fn validate_question(question: &str) -> MonitorResult<&str> {
    let question = question.trim();
    if question.is_empty() {
        return Err(MonitorError::Validation("question must not be empty".into()));
    }
    let chars = question.chars().count();
    if chars > MAX_QUESTION_CHARS {
        return Err(MonitorError::Validation(format!(
            "question is {chars} characters; the limit is {MAX_QUESTION_CHARS}"
        )));
    }
    Ok(question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{Frame, RawFrame, SourceTag};
    use crate::inference::scripted::{ScriptedBackend, ScriptedReply};
    use crate::inference::{BreakerState, InferenceSettings};
    use crate::prompts::RiskPrompt;
    use chrono::Utc;

    fn analyzed_frame() -> Frame {
        let mut frame = Frame::new(
            SourceTag::Mock,
            RawFrame {
                bytes: Arc::new(vec![1, 2, 3]),
            },
            vec![0xff, 0xd8, 0xff],
            Utc::now(),
        );
        frame.mark_analyzed();
        frame
    }

    fn channel(backend: Arc<ScriptedBackend>, recent: RecentFrames) -> QaChannel {
        let client = Arc::new(InferenceClient::new(backend, InferenceSettings::default()));
        QaChannel::new(client, recent, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn uses_latest_analyzed_frame() {
        let backend = Arc::new(ScriptedBackend::new([ScriptedReply::Text(
            "The baby is asleep.".into(),
        )]));
        let recent = RecentFrames::new(5);
        let frame = analyzed_frame();
        recent.push(&frame);

        let qa = channel(backend, recent)
            .ask("Is the baby asleep?", QaTarget::LatestFrame)
            .await
            .unwrap();
        assert_eq!(qa.frame_id.as_deref(), Some(frame.id.as_str()));
        assert_eq!(qa.answer, "The baby is asleep.");
    }

    #[tokio::test]
    async fn no_frame_yet_is_reported() {
        let backend = Arc::new(ScriptedBackend::new([]));
        let qa = channel(Arc::clone(&backend), RecentFrames::new(5));
        let err = qa.ask("Anything?", QaTarget::LatestFrame).await.unwrap_err();
        assert!(matches!(err, MonitorError::NoFrameAvailable));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn external_image_needs_no_frame() {
        let backend = Arc::new(ScriptedBackend::new([]));
        let qa = channel(backend, RecentFrames::new(5))
            .ask("What is in this picture?", QaTarget::Image(vec![0xff, 0xd8]))
            .await
            .unwrap();
        assert!(qa.frame_id.is_none());
        assert!(qa.is_ok());
    }

    #[tokio::test]
    async fn rejects_empty_and_oversized_questions() {
        let backend = Arc::new(ScriptedBackend::new([]));
        let qa = channel(Arc::clone(&backend), RecentFrames::new(5));
        assert!(matches!(
            qa.ask("   ", QaTarget::LatestFrame).await,
            Err(MonitorError::Validation(_))
        ));
        let long = "x".repeat(MAX_QUESTION_CHARS + 1);
        assert!(matches!(
            qa.ask(&long, QaTarget::LatestFrame).await,
            Err(MonitorError::Validation(_))
        ));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn second_request_within_a_second_is_rate_limited() {
        let backend = Arc::new(ScriptedBackend::new([]));
        let qa = channel(Arc::clone(&backend), RecentFrames::new(5));
        let image = || QaTarget::Image(vec![0xff, 0xd8]);

        qa.ask("First?", image()).await.unwrap();
        let err = qa.ask("Second?", image()).await.unwrap_err();
        assert!(matches!(err, MonitorError::RateLimited { .. }));
        assert_eq!(backend.calls(), 1);
    }

    fn prompt() -> RiskPrompt {
        RiskPrompt {
            version: 1,
            text: "Watch for baby climbing out of crib".into(),
            updated_at: Utc::now(),
            updated_by: None,
            default_flag: true,
        }
    }

    /// Client whose breaker opens on the first failed classification.
    async fn tripped_client(backend: Arc<ScriptedBackend>) -> Arc<InferenceClient> {
        let client = Arc::new(InferenceClient::new(
            backend,
            InferenceSettings {
                breaker_failure_threshold: 1,
                ..InferenceSettings::default()
            },
        ));
        let _ = client.classify(&analyzed_frame(), &prompt()).await;
        assert_eq!(client.breaker_state(), BreakerState::Open);
        client
    }

    #[tokio::test]
    async fn failed_answers_do_not_open_the_breaker() {
        let backend = Arc::new(
            ScriptedBackend::new([]).with_fallback(ScriptedReply::Fail("refused".into())),
        );
        let client = Arc::new(InferenceClient::new(
            backend.clone(),
            InferenceSettings {
                breaker_failure_threshold: 1,
                ..InferenceSettings::default()
            },
        ));
        let qa = QaChannel::new(Arc::clone(&client), RecentFrames::new(5), Duration::ZERO);

        for question in ["First?", "Second?", "Third?"] {
            let answered = qa.ask(question, QaTarget::Image(vec![1])).await.unwrap();
            assert!(answered.error.is_some());
        }
        assert_eq!(backend.calls(), 3);
        assert_eq!(client.breaker_state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast() {
        let backend = Arc::new(
            ScriptedBackend::new([]).with_fallback(ScriptedReply::Fail("refused".into())),
        );
        let client = tripped_client(backend.clone()).await;
        let qa = QaChannel::new(client, RecentFrames::new(5), Duration::ZERO);

        let err = qa.ask("Anyone there?", QaTarget::Image(vec![1])).await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::BackendUnavailable(BackendFault::CircuitOpen)
        ));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn breaker_rejection_keeps_the_rate_slot() {
        let backend = Arc::new(
            ScriptedBackend::new([]).with_fallback(ScriptedReply::Fail("refused".into())),
        );
        let client = tripped_client(backend.clone()).await;
        let qa = QaChannel::new(Arc::clone(&client), RecentFrames::new(5), Duration::from_secs(1));

        let err = qa.ask("Anyone there?", QaTarget::Image(vec![1])).await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::BackendUnavailable(BackendFault::CircuitOpen)
        ));

        client.check_model(Duration::from_secs(1)).await.unwrap();
        backend.push(ScriptedReply::Text("The crib is empty.".into()));
        let answered = qa.ask("Anyone there?", QaTarget::Image(vec![1])).await.unwrap();
        assert_eq!(answered.answer, "The crib is empty.");
    }
}
