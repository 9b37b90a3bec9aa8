use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::preview::gradient_frame;

/// Pull-based camera primitive. Implementations return one encoded image per call.
///
/// Liveness is whatever the last pull returned; `FrameSource` turns the run of outcomes
/// into a health signal.
#[async_trait]
pub trait CameraTransport: Send + Sync {
    async fn next_frame(&mut self) -> Result<Vec<u8>>;

    fn describe(&self) -> String;
}

/// Grabs a single frame per call by running `ffmpeg` against a device path or stream URL.
pub struct FfmpegTransport {
    input: String,
}

impl FfmpegTransport {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
        if self.input.starts_with("/dev/") {
            args.extend(["-f".into(), "v4l2".into()]);
        } else if self.input.starts_with("rtsp://") {
            args.extend(["-rtsp_transport".into(), "tcp".into()]);
        }
        args.extend([
            "-i".into(),
            self.input.clone(),
            "-frames:v".into(),
            "1".into(),
            "-f".into(),
            "image2pipe".into(),
            "-vcodec".into(),
            "mjpeg".into(),
            "-".into(),
        ]);
        args
    }
}

#[async_trait]
impl CameraTransport for FfmpegTransport {
    async fn next_frame(&mut self) -> Result<Vec<u8>> {
        let output = Command::new("ffmpeg")
            .args(self.args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to spawn ffmpeg")?;

        if !output.status.success() || output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "ffmpeg could not read a frame from {} ({}): {}",
                self.input,
                output.status,
                stderr.trim()
            );
        }

        Ok(output.stdout)
    }

    fn describe(&self) -> String {
        format!("ffmpeg:{}", self.input)
    }
}

/// Fetches a still image from a camera's HTTP snapshot endpoint.
pub struct SnapshotTransport {
    url: String,
    client: reqwest::Client,
}

impl SnapshotTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build snapshot HTTP client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl CameraTransport for SnapshotTransport {
    async fn next_frame(&mut self) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("snapshot request to {} failed", self.url))?
            .error_for_status()
            .with_context(|| format!("snapshot endpoint {} returned an error", self.url))?;
        let bytes = response.bytes().await.context("snapshot body read failed")?;
        if bytes.is_empty() {
            bail!("snapshot endpoint {} returned an empty body", self.url);
        }
        Ok(bytes.to_vec())
    }

    fn describe(&self) -> String {
        format!("snapshot:{}", self.url)
    }
}

#[derive(Debug, Clone)]
pub enum MockStep {
    Frame(Vec<u8>),
    Fail(String),
}

/// Deterministic transport that replays a fixed sequence, wrapping around at the end.
pub struct MockTransport {
    steps: Vec<MockStep>,
    cursor: usize,
}

impl MockTransport {
    pub fn scripted(steps: Vec<MockStep>) -> Self {
        Self {
            steps,
            cursor: 0,
        }
    }

    /// Moving gradient test card, `count` distinct frames.
    pub fn gradient(width: u32, height: u32, count: u32) -> Result<Self> {
        let count = count.max(1);
        let step = (width / count).max(1);
        let frames = (0..count)
            .map(|i| gradient_frame(width, height, i * step).map(MockStep::Frame))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::scripted(frames))
    }
}

#[async_trait]
impl CameraTransport for MockTransport {
    async fn next_frame(&mut self) -> Result<Vec<u8>> {
        if self.steps.is_empty() {
            bail!("mock transport has no frames");
        }

        let step = self.steps[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.steps.len();

        match step {
            MockStep::Frame(bytes) => Ok(bytes),
            MockStep::Fail(reason) => Err(anyhow!(reason)),
        }
    }

    fn describe(&self) -> String {
        "mock-camera".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_replays_sequence_in_order() {
        let mut transport = MockTransport::scripted(vec![
            MockStep::Frame(vec![1]),
            MockStep::Fail("lens cap".into()),
            MockStep::Frame(vec![2]),
        ]);

        assert_eq!(transport.next_frame().await.unwrap(), vec![1]);
        let err = transport.next_frame().await.unwrap_err();
        assert_eq!(err.to_string(), "lens cap");
        assert_eq!(transport.next_frame().await.unwrap(), vec![2]);
        assert_eq!(transport.next_frame().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn empty_mock_always_fails() {
        let mut transport = MockTransport::scripted(Vec::new());
        assert!(transport.next_frame().await.is_err());
        assert!(transport.next_frame().await.is_err());
    }

    #[test]
    fn ffmpeg_args_select_input_format() {
        let device = FfmpegTransport::new("/dev/video0").args();
        assert!(device.windows(2).any(|w| w == ["-f", "v4l2"]));

        let rtsp = FfmpegTransport::new("rtsp://cam/live").args();
        assert!(rtsp.windows(2).any(|w| w == ["-rtsp_transport", "tcp"]));
        assert_eq!(rtsp.last().map(String::as_str), Some("-"));
    }
}
