use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::frames::SourceHealth;
use crate::inference::{BreakerState, InferenceClient};
use crate::prompts::PromptStore;

use super::loop_worker::MonitorLoop;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const MODEL_CHECK_BUDGET: Duration = Duration::from_secs(30);

/// Inputs for the background tasks that run beside the monitor loop.
pub struct BackgroundServices {
    pub client: Arc<InferenceClient>,
    pub prompts: Arc<PromptStore>,
    pub camera_health: watch::Receiver<SourceHealth>,
    pub health_poll_interval: Duration,
    pub prompt_reload_interval: Duration,
}

/// Owns the monitor loop task and its pollers for one session.
pub struct MonitorController {
    handle: Option<JoinHandle<()>>,
    pollers: Vec<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl MonitorController {
    pub fn new() -> Self {
        Self {
            handle: None,
            pollers: Vec::new(),
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, worker: MonitorLoop, services: BackgroundServices) -> Result<()> {
        if self.handle.is_some() {
            bail!("monitoring already active");
        }

        let cancel_token = CancellationToken::new();

        self.pollers.push(tokio::spawn(health_poller(
            Arc::clone(&services.client),
            services.camera_health,
            services.health_poll_interval,
            cancel_token.clone(),
        )));
        self.pollers.push(tokio::spawn(prompt_reload_poller(
            services.prompts,
            services.prompt_reload_interval,
            cancel_token.clone(),
        )));
        self.handle = Some(tokio::spawn(worker.run(cancel_token.clone())));
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        for poller in self.pollers.drain(..) {
            if let Err(err) = poller.await {
                log_warn!("background poller failed to join: {err}");
            }
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("monitor loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for MonitorController {
    fn default() -> Self {
        Self::new()
    }
}

/// Re-checks the backend model while the breaker is not closed and logs camera health transitions.
async fn health_poller(
    client: Arc<InferenceClient>,
    mut camera_health: watch::Receiver<SourceHealth>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut camera_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if client.breaker_state() == BreakerState::Closed {
                    continue;
                }
                match client.check_model(MODEL_CHECK_BUDGET).await {
                    Ok(info) => log_info!("backend model check ok: {} ({})", info.name, info.digest.as_deref().unwrap_or("no digest")),
                    Err(err) => log_warn!("backend model check failed: {err}"),
                }
            }
            changed = camera_health.changed(), if camera_open => {
                if changed.is_err() {
                    camera_open = false;
                    continue;
                }
                let health = *camera_health.borrow_and_update();
                match health {
                    SourceHealth::Ok => log_info!("camera health restored"),
                    SourceHealth::Degraded => log_warn!("camera health degraded"),
                    SourceHealth::Offline => log_error!("camera offline"),
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

/// Adopts prompt edits made to the persisted file by other writers.
async fn prompt_reload_poller(
    prompts: Arc<PromptStore>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let store = Arc::clone(&prompts);
                match tokio::task::spawn_blocking(move || store.reload_if_changed()).await {
                    Ok(Ok(true)) => log_info!(
                        "prompt reloaded from {}: v{}",
                        prompts.path().display(),
                        prompts.current().version
                    ),
                    Ok(Ok(false)) => {}
                    Ok(Err(err)) => {
                        log_warn!("prompt reload from {} failed: {err:#}", prompts.path().display())
                    }
                    Err(err) => log_error!("prompt reload worker join failed: {err}"),
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}
