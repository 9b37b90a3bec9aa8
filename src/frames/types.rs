use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SourceTag {
    Live,
    Mock,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FrameStatus {
    Pending,
    Analyzed,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SourceHealth {
    Ok,
    Degraded,
    Offline,
}

impl Default for SourceHealth {
    fn default() -> Self {
        SourceHealth::Ok
    }
}

/// Encoded image exactly as the camera transport delivered it.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub bytes: Arc<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: String,
    pub captured_at: DateTime<Utc>,
    pub source: SourceTag,
    /// Bounded-size JPEG used for inference and display.
    #[serde(skip)]
    pub preview: Arc<Vec<u8>>,
    pub prompt_version: Option<u64>,
    pub status: FrameStatus,
    pub error: Option<String>,
    /// Released once the frame leaves the source.
    #[serde(skip)]
    raw: Option<RawFrame>,
}

/// A frame's preview JPEG in a form a display can embed directly.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePreview {
    pub frame_id: String,
    pub captured_at: DateTime<Utc>,
    pub mime_type: &'static str,
    /// Standard base64, no line breaks.
    pub data: String,
}

impl Frame {
    pub(crate) fn new(
        source: SourceTag,
        raw: RawFrame,
        preview: Vec<u8>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            captured_at,
            source,
            preview: Arc::new(preview),
            prompt_version: None,
            status: FrameStatus::Pending,
            error: None,
            raw: Some(raw),
        }
    }

    #[cfg(test)]
    pub fn raw(&self) -> Option<&RawFrame> {
        self.raw.as_ref()
    }

    /// Hand the raw capture to the consumer; later calls return `None`.
    pub fn take_raw(&mut self) -> Option<RawFrame> {
        self.raw.take()
    }

    pub fn attach_prompt_version(&mut self, version: u64) {
        self.prompt_version = Some(version);
    }

    pub fn mark_analyzed(&mut self) {
        self.status = FrameStatus::Analyzed;
        self.error = None;
    }

    pub fn mark_error(&mut self, detail: impl Into<String>) {
        self.status = FrameStatus::Error;
        self.error = Some(detail.into());
    }

    pub fn preview_payload(&self) -> FramePreview {
        FramePreview {
            frame_id: self.id.clone(),
            captured_at: self.captured_at,
            mime_type: "image/jpeg",
            data: STANDARD.encode(self.preview.as_slice()),
        }
    }

    /// Copy kept for QA reuse: preview and metadata only.
    pub fn retained(&self) -> Frame {
        Frame {
            raw: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::new(
            SourceTag::Mock,
            RawFrame {
                bytes: Arc::new(vec![1, 2, 3]),
            },
            vec![9, 9],
            Utc::now(),
        )
    }

    #[test]
    fn new_frame_is_pending_with_raw_handle() {
        let frame = sample();
        assert_eq!(frame.status, FrameStatus::Pending);
        assert!(frame.raw().is_some());
        assert!(frame.prompt_version.is_none());
    }

    #[test]
    fn raw_handle_is_consumed_once() {
        let mut frame = sample();
        assert!(frame.take_raw().is_some());
        assert!(frame.take_raw().is_none());
    }

    #[test]
    fn retained_copy_drops_raw_bytes() {
        let mut frame = sample();
        frame.mark_analyzed();
        let kept = frame.retained();
        assert!(kept.raw().is_none());
        assert_eq!(kept.id, frame.id);
        assert_eq!(kept.status, FrameStatus::Analyzed);
    }

    #[test]
    fn preview_payload_is_base64_jpeg() {
        let frame = sample();
        let payload = frame.preview_payload();
        assert_eq!(payload.frame_id, frame.id);
        assert_eq!(payload.mime_type, "image/jpeg");
        assert_eq!(STANDARD.decode(&payload.data).unwrap(), vec![9, 9]);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["mimeType"], "image/jpeg");
        assert_eq!(json["data"], "CQk=");
    }

    #[test]
    fn mark_error_records_detail() {
        let mut frame = sample();
        frame.mark_error("backend timeout");
        assert_eq!(frame.status, FrameStatus::Error);
        assert_eq!(frame.error.as_deref(), Some("backend timeout"));
    }
}
