pub mod commands;
pub mod config;
pub mod error;
pub mod frames;
pub mod health;
pub mod inference;
pub mod metrics;
pub mod monitor;
pub mod prompts;
pub mod qa;
pub mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{watch, Mutex};

use config::{is_truthy, MonitorConfig};
use frames::{FrameSource, RecentFrames, SourceHealth};
use inference::InferenceClient;
use metrics::MetricsCollector;
use monitor::{AlertHandle, BackgroundServices, MonitorController, MonitorLoop};
use prompts::PromptStore;
use qa::QaChannel;

/// Everything the presentation layer talks to for one monitoring session.
pub struct AppState {
    pub config: MonitorConfig,
    pub prompts: Arc<PromptStore>,
    pub client: Arc<InferenceClient>,
    pub alerts: AlertHandle,
    pub recent: RecentFrames,
    pub qa: QaChannel,
    pub metrics: MetricsCollector,
    pub camera_health: watch::Receiver<SourceHealth>,
    pub camera_label: String,
    pub controller: Mutex<MonitorController>,
}

impl AppState {
    /// Wire the session together around an already-built source and client.
    pub fn assemble(
        config: MonitorConfig,
        source: FrameSource,
        prompts: Arc<PromptStore>,
        client: Arc<InferenceClient>,
    ) -> (Self, MonitorLoop) {
        let alerts = AlertHandle::new();
        let recent = RecentFrames::new(config.recent_frames);
        let metrics = MetricsCollector::new();
        let camera_health = source.subscribe_health();
        let camera_label = source.describe();

        let worker = MonitorLoop::new(
            source,
            Arc::clone(&prompts),
            Arc::clone(&client),
            alerts.clone(),
            recent.clone(),
            metrics.clone(),
            config.cadence_interval(),
        );
        let qa = QaChannel::new(Arc::clone(&client), recent.clone(), config.qa_min_interval());

        let state = Self {
            config,
            prompts,
            client,
            alerts,
            recent,
            qa,
            metrics,
            camera_health,
            camera_label,
            controller: Mutex::new(MonitorController::new()),
        };
        (state, worker)
    }

    /// Build every component from configuration. A malformed prompt record is fatal here.
    pub fn from_config(config: MonitorConfig) -> Result<(Self, MonitorLoop)> {
        let prompts = Arc::new(
            PromptStore::open(config.prompt_path.clone(), config.prompt_history_limit)
                .context("failed to open prompt store")?,
        );
        let client = Arc::new(InferenceClient::from_config(&config)?);
        let source = FrameSource::from_config(&config)?;
        Ok(Self::assemble(config, source, prompts, client))
    }

    pub async fn start(&self, worker: MonitorLoop) -> Result<()> {
        let services = BackgroundServices {
            client: Arc::clone(&self.client),
            prompts: Arc::clone(&self.prompts),
            camera_health: self.camera_health.clone(),
            health_poll_interval: self.config.health_poll_interval(),
            prompt_reload_interval: self.config.prompt_reload_interval(),
        };
        let mut controller = self.controller.lock().await;
        if !controller.is_running() {
            self.metrics.reset().await;
        }
        controller.start(worker, services)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.controller.lock().await.stop().await
    }
}

/// Process entry point: load config, start monitoring, then serve the operator console on
/// stdin until `quit`, EOF or Ctrl-C.
pub async fn run() -> Result<()> {
    let debug = std::env::var("LLM_MONITOR_DEBUG")
        .map(|value| is_truthy(&value))
        .unwrap_or(false);
    utils::logging::init_logging(debug);

    log::info!("llm-monitor starting up...");

    let config = MonitorConfig::load()?;
    log::info!(
        "backend {} model {}, camera {}{}",
        config.backend_url,
        config.model,
        config.camera,
        if config.use_mock_camera { " (mock)" } else { "" }
    );

    let (state, worker) = AppState::from_config(config)?;

    for check in commands::run_health_checks(&state)
        .await
        .map_err(anyhow::Error::msg)?
    {
        if check.ok {
            log::info!("{} ready: {}", check.component, check.message);
        } else {
            log::warn!("{} not ready: {}", check.component, check.message);
        }
    }

    state.start(worker).await?;
    log::info!("monitoring started; type `help` for console commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read console input")? {
                    Some(line) => {
                        if !handle_console_line(&state, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupt received");
                break;
            }
        }
    }

    state.shutdown().await?;
    log::info!("llm-monitor stopped");
    Ok(())
}

const CONSOLE_HELP: &str = "commands: state | ack | prompt [text] | history [n] | ask <question> | \
ask-image <path> <question> | frames | preview [frame-id] | health | metrics | quit";

/// Returns false when the console should exit.
async fn handle_console_line(state: &AppState, line: &str) -> bool {
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "quit" | "exit" => return false,
        "help" => println!("{CONSOLE_HELP}"),
        "state" => print_result(commands::get_alert_state(state).await),
        "ack" => match commands::acknowledge(state).await {
            Ok(true) => println!("risk acknowledged"),
            Ok(false) => println!("nothing to acknowledge"),
            Err(err) => println!("error: {err}"),
        },
        "prompt" if rest.is_empty() => print_result(commands::get_current_prompt(state).await),
        "prompt" => print_result(
            commands::update_prompt(state, rest.to_string(), Some("console".into())).await,
        ),
        "history" => {
            let limit = rest.parse().unwrap_or(state.config.prompt_history_limit);
            print_result(commands::get_prompt_history(state, limit).await)
        }
        "ask" => print_result(commands::ask_question(state, rest.to_string(), None, None).await),
        "ask-image" => match rest.split_once(char::is_whitespace) {
            Some((path, question)) => print_result(
                commands::ask_question(state, question.to_string(), None, Some(path.into()))
                    .await,
            ),
            None => println!("usage: ask-image <path> <question>"),
        },
        "frames" => print_result(commands::get_recent_frames(state).await),
        "preview" => {
            let frame_id = (!rest.is_empty()).then(|| rest.to_string());
            print_result(commands::get_frame_preview(state, frame_id).await)
        }
        "health" => print_result(commands::run_health_checks(state).await),
        "metrics" => print_result(commands::get_metrics(state).await),
        other => println!("unknown command `{other}`; {CONSOLE_HELP}"),
    }
    true
}

fn print_result<T: Serialize>(result: Result<T, String>) {
    match result.map(|value| serde_json::to_string_pretty(&value)) {
        Ok(Ok(json)) => println!("{json}"),
        Ok(Err(err)) => println!("error: {err}"),
        Err(err) => println!("error: {err}"),
    }
}
