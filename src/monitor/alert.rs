use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AlertStatus {
    Monitoring,
    Analyzing,
    Risk,
}

impl Default for AlertStatus {
    fn default() -> Self {
        AlertStatus::Monitoring
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertState {
    pub status: AlertStatus,
    /// Frame that triggered the current risk, or the frame under analysis.
    pub active_frame_id: Option<String>,
    pub message: String,
    /// Set only while in `Risk`, once the operator acknowledged it.
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Default for AlertState {
    fn default() -> Self {
        Self {
            status: AlertStatus::Monitoring,
            active_frame_id: None,
            message: "Monitoring".into(),
            acknowledged_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// Alert state plus the generation bookkeeping that discards late results.
///
/// Transitions:
/// `monitoring -> analyzing -> {risk, monitoring}`, `risk -> monitoring` only once
/// acknowledged and a later frame is safe, any state -> monitoring on a source fault.
#[derive(Debug, Default)]
pub struct AlertMachine {
    state: AlertState,
    generation: u64,
    pending: Option<u64>,
}

impl AlertMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    /// Start analyzing a frame; returns the generation its result must carry.
    /// A held risk stays visible while the next frame is analyzed.
    pub fn begin_analysis(&mut self, frame_id: &str) -> u64 {
        self.generation += 1;
        self.pending = Some(self.generation);
        if self.state.status != AlertStatus::Risk {
            self.state.status = AlertStatus::Analyzing;
            self.state.active_frame_id = Some(frame_id.to_string());
            self.state.message = "Analyzing frame".into();
            self.touch();
        }
        self.generation
    }

    /// Returns false when the result was stale and ignored.
    pub fn resolve_safe(&mut self, generation: u64, message: impl Into<String>) -> bool {
        if !self.take_pending(generation) {
            return false;
        }
        match self.state.status {
            AlertStatus::Risk if self.state.acknowledged_at.is_none() => {}
            _ => {
                self.state.status = AlertStatus::Monitoring;
                self.state.active_frame_id = None;
                self.state.acknowledged_at = None;
                self.state.message = message.into();
                self.touch();
            }
        }
        true
    }

    pub fn resolve_risk(
        &mut self,
        generation: u64,
        frame_id: &str,
        message: impl Into<String>,
    ) -> bool {
        if !self.take_pending(generation) {
            return false;
        }
        if self.state.status != AlertStatus::Risk {
            self.state.acknowledged_at = None;
        }
        self.state.status = AlertStatus::Risk;
        self.state.active_frame_id = Some(frame_id.to_string());
        self.state.message = message.into();
        self.touch();
        true
    }

    /// Failed classification. A held risk is kept; anything else falls back to monitoring.
    pub fn inference_fault(&mut self, generation: u64, message: impl Into<String>) -> bool {
        if !self.take_pending(generation) {
            return false;
        }
        if self.state.status != AlertStatus::Risk {
            self.state.status = AlertStatus::Monitoring;
            self.state.active_frame_id = None;
            self.state.message = message.into();
            self.touch();
        }
        true
    }

    /// Camera offline: monitoring from any state. Any in-flight result becomes stale.
    pub fn source_fault(&mut self, message: impl Into<String>) {
        self.pending = None;
        self.state.status = AlertStatus::Monitoring;
        self.state.active_frame_id = None;
        self.state.acknowledged_at = None;
        self.state.message = message.into();
        self.touch();
    }

    /// No-op unless in `Risk`. Repeated acknowledgements keep the first timestamp.
    pub fn acknowledge(&mut self, now: DateTime<Utc>) -> bool {
        if self.state.status != AlertStatus::Risk {
            return false;
        }
        if self.state.acknowledged_at.is_none() {
            self.state.acknowledged_at = Some(now);
            self.state.updated_at = now;
        }
        true
    }

    fn take_pending(&mut self, generation: u64) -> bool {
        if self.pending == Some(generation) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    fn touch(&mut self) {
        self.state.updated_at = Utc::now();
    }
}

/// Shared handle to the session's alert state. Only the monitor loop and the operator's
/// acknowledgement mutate it; everyone else reads snapshots or subscribes.
#[derive(Clone)]
pub struct AlertHandle {
    machine: Arc<Mutex<AlertMachine>>,
    tx: Arc<watch::Sender<AlertState>>,
}

impl AlertHandle {
    pub fn new() -> Self {
        let machine = AlertMachine::new();
        let (tx, _) = watch::channel(machine.state().clone());
        Self {
            machine: Arc::new(Mutex::new(machine)),
            tx: Arc::new(tx),
        }
    }

    pub fn snapshot(&self) -> AlertState {
        self.lock().state().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AlertState> {
        self.tx.subscribe()
    }

    /// Operator acknowledgement. Returns false when there was no risk to acknowledge.
    pub fn acknowledge(&self) -> bool {
        self.mutate(|machine| machine.acknowledge(Utc::now()))
    }

    pub(crate) fn begin_analysis(&self, frame_id: &str) -> u64 {
        self.mutate(|machine| machine.begin_analysis(frame_id))
    }

    pub(crate) fn resolve_safe(&self, generation: u64, message: impl Into<String>) -> bool {
        self.mutate(|machine| machine.resolve_safe(generation, message))
    }

    pub(crate) fn resolve_risk(
        &self,
        generation: u64,
        frame_id: &str,
        message: impl Into<String>,
    ) -> bool {
        self.mutate(|machine| machine.resolve_risk(generation, frame_id, message))
    }

    pub(crate) fn inference_fault(&self, generation: u64, message: impl Into<String>) -> bool {
        self.mutate(|machine| machine.inference_fault(generation, message))
    }

    pub(crate) fn source_fault(&self, message: impl Into<String>) {
        self.mutate(|machine| machine.source_fault(message))
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut AlertMachine) -> R) -> R {
        let mut machine = self.lock();
        let result = f(&mut machine);
        let next = machine.state().clone();
        self.tx.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
        result
    }

    fn lock(&self) -> MutexGuard<'_, AlertMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AlertHandle {
    fn default() -> Self {
        Self::new()
    }
}
