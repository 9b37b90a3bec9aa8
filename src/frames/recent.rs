use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use super::Frame;

/// The last few analyzed frames, shared between the monitor loop (writer) and QA (reader).
#[derive(Clone)]
pub struct RecentFrames {
    inner: Arc<Mutex<VecDeque<Frame>>>,
    capacity: usize,
}

impl RecentFrames {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, frame: &Frame) {
        let mut frames = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        frames.push_back(frame.retained());
        while frames.len() > self.capacity {
            frames.pop_front();
        }
    }

    pub fn latest(&self) -> Option<Frame> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    pub fn find(&self, frame_id: &str) -> Option<Frame> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|frame| frame.id == frame_id)
            .cloned()
    }

    /// Most-recent-first.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{RawFrame, SourceTag};

    fn frame() -> Frame {
        Frame::new(
            SourceTag::Mock,
            RawFrame {
                bytes: Arc::new(vec![0u8; 4]),
            },
            vec![1],
            chrono::Utc::now(),
        )
    }

    #[test]
    fn keeps_only_the_newest_frames() {
        let recent = RecentFrames::new(2);
        let frames: Vec<Frame> = (0..3).map(|_| frame()).collect();
        for f in &frames {
            recent.push(f);
        }

        assert_eq!(recent.len(), 2);
        assert_eq!(recent.latest().unwrap().id, frames[2].id);
        assert!(recent.find(&frames[0].id).is_none());
        let ids: Vec<String> = recent.snapshot().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![frames[2].id.clone(), frames[1].id.clone()]);
    }

    #[test]
    fn stored_frames_drop_raw_bytes() {
        let recent = RecentFrames::new(1);
        recent.push(&frame());
        assert!(recent.latest().unwrap().raw().is_none());
    }
}
