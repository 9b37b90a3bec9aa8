use chrono::Utc;
use std::sync::Arc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::MonitorError;
use crate::frames::{FrameSource, RecentFrames};
use crate::inference::{InferenceClient, InferenceResult};
use crate::metrics::{MetricsCollector, TickMetrics, TickOutcome};
use crate::prompts::{PromptStore, RiskPrompt};
use crate::utils::snippet;

use super::alert::AlertHandle;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Loop overhead outside inference above which a tick is reported as slow.
const SLOW_TICK_MS: u64 = 250;
const PROMPT_SNIPPET_CHARS: usize = 60;

/// The single cooperative scheduler of a session: acquire, classify, update the alert.
///
/// Suspends only while awaiting `acquire` and `classify`, so at most one classification is
/// in flight at a time.
pub struct MonitorLoop {
    source: FrameSource,
    prompts: Arc<PromptStore>,
    client: Arc<InferenceClient>,
    alerts: AlertHandle,
    recent: RecentFrames,
    metrics: MetricsCollector,
    cadence: Duration,
    last_prompt_version: Option<u64>,
}

impl MonitorLoop {
    pub fn new(
        source: FrameSource,
        prompts: Arc<PromptStore>,
        client: Arc<InferenceClient>,
        alerts: AlertHandle,
        recent: RecentFrames,
        metrics: MetricsCollector,
        cadence: Duration,
    ) -> Self {
        Self {
            source,
            prompts,
            client,
            alerts,
            recent,
            metrics,
            cadence,
            last_prompt_version: None,
        }
    }

    /// Prompt version of the last frame that was successfully analyzed.
    pub fn last_prompt_version(&self) -> Option<u64> {
        self.last_prompt_version
    }

    /// One pass of the loop. Never fails: every fault is folded into the alert state.
    pub async fn tick(&mut self) -> TickOutcome {
        let tick_start = Instant::now();

        let acquired = self.source.acquire().await;
        let acquire_ms = tick_start.elapsed().as_millis() as u64;

        let mut frame = match acquired {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.record(TickOutcome::Skipped, None, None, acquire_ms, None, tick_start)
                    .await;
                return TickOutcome::Skipped;
            }
            Err(err) => {
                self.alerts.source_fault(fault_message(&err));
                self.record(TickOutcome::SourceFault, None, None, acquire_ms, None, tick_start)
                    .await;
                return TickOutcome::SourceFault;
            }
        };

        // In-flight work keeps the version captured here even if the prompt changes.
        let prompt = self.prompts.current();
        frame.attach_prompt_version(prompt.version);
        drop(frame.take_raw());

        let generation = self.alerts.begin_analysis(&frame.id);
        log_debug!(
            "analyzing frame {} (generation {}, prompt v{})",
            frame.id,
            generation,
            prompt.version
        );

        let inference_start = Instant::now();
        let classified = self.client.classify(&frame, &prompt).await;
        let inference_ms = inference_start.elapsed().as_millis() as u64;

        let (outcome, result) = match classified {
            Ok(result) => {
                frame.mark_analyzed();
                self.last_prompt_version = Some(prompt.version);
                self.recent.push(&frame);
                log_debug!("frame {} analyzed; {} retained", frame.id, self.recent.len());

                let outcome = if result.risk {
                    let message = risk_message(&result, &prompt);
                    log_warn!("RISK on frame {}: {}", frame.id, message);
                    self.alerts.resolve_risk(generation, &frame.id, message);
                    TickOutcome::Risk
                } else {
                    self.alerts.resolve_safe(generation, safe_message(&result));
                    TickOutcome::Safe
                };
                (outcome, Some(result))
            }
            Err(err) => {
                frame.mark_error(err.to_string());
                log_warn!("classification failed for frame {}: {}", frame.id, err);
                self.alerts.inference_fault(generation, fault_message(&err));
                (TickOutcome::InferenceFailed, None)
            }
        };

        self.record(
            outcome,
            Some(frame.id.as_str()),
            Some(prompt.version),
            acquire_ms,
            Some((inference_ms, result.as_ref())),
            tick_start,
        )
        .await;
        outcome
    }

    /// Tick at the configured cadence until cancelled. A failed tick never ends the loop.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log_info!(
            "monitor loop started (source={}, cadence={}ms)",
            self.source.describe(),
            self.cadence.as_millis()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = cancel_token.cancelled() => {
                    log_info!("monitor loop shutting down");
                    break;
                }
            }
        }
    }

    async fn record(
        &self,
        outcome: TickOutcome,
        frame_id: Option<&str>,
        prompt_version: Option<u64>,
        acquire_ms: u64,
        inference: Option<(u64, Option<&InferenceResult>)>,
        tick_start: Instant,
    ) {
        let total_ms = tick_start.elapsed().as_millis() as u64;
        let inference_ms = inference.map(|(ms, _)| ms);
        let result = inference.and_then(|(_, result)| result);

        let overhead_ms = total_ms.saturating_sub(inference_ms.unwrap_or(0));
        if overhead_ms > SLOW_TICK_MS {
            log_warn!(
                "slow tick: {}ms outside inference (acquire {}ms, total {}ms)",
                overhead_ms,
                acquire_ms,
                total_ms
            );
        }

        let system = self.metrics.sample_system_metrics().await;
        self.metrics
            .record_tick(TickMetrics {
                timestamp: Utc::now(),
                outcome,
                frame_id: frame_id.map(str::to_string),
                prompt_version,
                acquire_ms,
                inference_ms,
                total_ms,
                confidence: result.map(|r| r.confidence),
                degraded: result.map(|r| r.degraded).unwrap_or(false),
                cpu_percent: system.cpu_percent,
                memory_mb: system.memory_mb,
            })
            .await;
    }
}

fn risk_message(result: &InferenceResult, prompt: &RiskPrompt) -> String {
    let explanation = if result.explanation.is_empty() {
        "Risk detected".to_string()
    } else {
        result.explanation.clone()
    };
    format!(
        "{} (confidence {:.0}%, criteria: \"{}\")",
        explanation,
        result.confidence * 100.0,
        snippet(&prompt.text, PROMPT_SNIPPET_CHARS)
    )
}

fn safe_message(result: &InferenceResult) -> String {
    if result.explanation.is_empty() {
        "No risk detected".to_string()
    } else {
        format!("No risk detected: {}", result.explanation)
    }
}

fn fault_message(err: &MonitorError) -> String {
    match err {
        MonitorError::SourceUnavailable(detail) => format!("Camera unavailable: {detail}"),
        MonitorError::BackendUnavailable(fault) => format!("Inference unavailable: {fault}"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::preview::gradient_frame;
    use crate::frames::{MockStep, MockTransport, SourceSettings};
    use crate::inference::scripted::{ScriptedBackend, ScriptedReply};
    use crate::inference::InferenceSettings;
    use crate::monitor::AlertStatus;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        prompts: Arc<PromptStore>,
        alerts: AlertHandle,
        recent: RecentFrames,
        worker: MonitorLoop,
    }

    fn harness(steps: Vec<MockStep>, backend: Arc<ScriptedBackend>) -> Harness {
        let dir = TempDir::new().unwrap();
        let prompts = Arc::new(PromptStore::open(dir.path().join("prompt.json"), 20).unwrap());
        let settings = SourceSettings {
            min_frame_spacing: Duration::ZERO,
            preview_max_dimension: 64,
            ..SourceSettings::default()
        };
        let source = FrameSource::mock(MockTransport::scripted(steps), settings);
        let client = Arc::new(InferenceClient::new(backend, InferenceSettings::default()));
        let alerts = AlertHandle::new();
        let recent = RecentFrames::new(5);
        let worker = MonitorLoop::new(
            source,
            Arc::clone(&prompts),
            client,
            alerts.clone(),
            recent.clone(),
            MetricsCollector::new(),
            Duration::from_millis(10),
        );
        Harness {
            _dir: dir,
            prompts,
            alerts,
            recent,
            worker,
        }
    }

    fn frames() -> Vec<MockStep> {
        vec![MockStep::Frame(gradient_frame(32, 24, 0).unwrap())]
    }

    #[tokio::test]
    async fn analyzed_frames_carry_the_prompt_version() {
        let backend = Arc::new(ScriptedBackend::new([]));
        let mut h = harness(frames(), backend);
        h.prompts.update("Watch for baby near the window", None).unwrap();

        assert_eq!(h.worker.tick().await, TickOutcome::Safe);
        assert_eq!(h.worker.last_prompt_version(), Some(2));
        let latest = h.recent.latest().unwrap();
        assert_eq!(latest.prompt_version, Some(2));
        assert!(latest.raw().is_none());
        assert_eq!(h.alerts.snapshot().status, AlertStatus::Monitoring);
    }

    #[tokio::test]
    async fn risk_message_names_explanation_and_prompt() {
        let backend = Arc::new(ScriptedBackend::new([ScriptedReply::risky(0.8)]));
        let mut h = harness(frames(), backend);

        assert_eq!(h.worker.tick().await, TickOutcome::Risk);
        let state = h.alerts.snapshot();
        assert_eq!(state.status, AlertStatus::Risk);
        assert!(state.message.contains("crib rail"));
        assert!(state.message.contains("Watch for baby climbing out of crib"));
    }

    #[tokio::test]
    async fn inference_failure_does_not_advance_prompt_tracking() {
        let backend = Arc::new(ScriptedBackend::new([
            ScriptedReply::safe(),
            ScriptedReply::Fail("connection reset".into()),
        ]));
        let mut h = harness(frames(), backend);

        h.worker.tick().await;
        assert_eq!(h.worker.last_prompt_version(), Some(1));
        h.prompts.update("Watch for blankets over the face", None).unwrap();

        assert_eq!(h.worker.tick().await, TickOutcome::InferenceFailed);
        assert_eq!(h.worker.last_prompt_version(), Some(1));
        let state = h.alerts.snapshot();
        assert_eq!(state.status, AlertStatus::Monitoring);
        assert!(state.message.contains("connection reset"));
        assert_eq!(h.recent.len(), 1);
    }

    #[tokio::test]
    async fn offline_source_forces_monitoring_without_classifying() {
        let backend = Arc::new(ScriptedBackend::new([ScriptedReply::risky(0.9)]));
        let fail = || MockStep::Fail("device unplugged".into());
        let mut steps = frames();
        steps.extend([fail(), fail(), fail()]);
        let mut h = harness(steps, Arc::clone(&backend));

        assert_eq!(h.worker.tick().await, TickOutcome::Risk);
        assert_eq!(h.worker.tick().await, TickOutcome::Skipped);
        assert_eq!(h.worker.tick().await, TickOutcome::Skipped);
        assert_eq!(h.worker.tick().await, TickOutcome::SourceFault);

        let state = h.alerts.snapshot();
        assert_eq!(state.status, AlertStatus::Monitoring);
        assert!(state.message.starts_with("Camera unavailable"));
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn run_future_can_be_spawned() {
        fn assert_spawnable<F: std::future::Future + Send + 'static>(_: &F) {}

        let h = harness(frames(), Arc::new(ScriptedBackend::new([])));
        let run = h.worker.run(CancellationToken::new());
        assert_spawnable(&run);
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let backend = Arc::new(ScriptedBackend::new([]));
        let h = harness(frames(), Arc::clone(&backend));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.worker.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        task.await.unwrap();
        assert!(backend.calls() >= 1);
    }
}
