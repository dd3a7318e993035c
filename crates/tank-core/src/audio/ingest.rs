//! Inbound audio: raw Int16LE bytes to timestamped fixed-size frames.
//!
//! The frame queue is bounded with a drop-oldest overflow policy so the
//! transport reader never blocks behind a slow segmenter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::warn;

use crate::audio::{pcm_i16le_to_f32, AudioFrame};

/// Bounded frame queue between AudioIngest and the segmenter.
///
/// `push` is synchronous and never blocks: at capacity the oldest frame is
/// dropped with a WARN log. `pop` awaits the next frame and returns `None`
/// once the queue is closed and empty.
pub struct FrameQueue {
    inner: Mutex<FrameQueueInner>,
    notify: Notify,
    capacity: usize,
}

struct FrameQueueInner {
    frames: VecDeque<AudioFrame>,
    closed: bool,
    dropped: u64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(FrameQueueInner {
                frames: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, frame: AudioFrame) {
        {
            let mut inner = self.inner.lock().expect("frame queue poisoned");
            if inner.closed {
                return;
            }
            if inner.frames.len() >= self.capacity {
                inner.frames.pop_front();
                inner.dropped += 1;
                warn!(
                    dropped_total = inner.dropped,
                    capacity = self.capacity,
                    "audio frame queue overflow, dropping oldest frame"
                );
            }
            inner.frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> Option<AudioFrame> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().expect("frame queue poisoned");
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        self.inner.lock().expect("frame queue poisoned").closed = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("frame queue poisoned").frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames discarded by the overflow policy since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().expect("frame queue poisoned").dropped
    }
}

/// Converts inbound PCM bytes to normalized frames with monotonic timestamps
/// starting at the first received sample.
pub struct AudioIngest {
    sample_rate: u32,
    frame_samples: usize,
    pending: Vec<f32>,
    emitted_samples: u64,
    queue: Arc<FrameQueue>,
}

impl AudioIngest {
    pub fn new(sample_rate: u32, frame_ms: u32, max_frames_queue: usize) -> Self {
        let frame_samples = ((sample_rate as usize * frame_ms as usize) / 1000).max(1);
        Self {
            sample_rate,
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
            emitted_samples: 0,
            queue: Arc::new(FrameQueue::new(max_frames_queue)),
        }
    }

    pub fn queue(&self) -> Arc<FrameQueue> {
        Arc::clone(&self.queue)
    }

    /// Accept one inbound binary payload of Int16LE mono PCM.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        if bytes.len() % 2 != 0 {
            warn!(len = bytes.len(), "inbound PCM payload has odd length, trailing byte ignored");
        }
        self.pending.extend(pcm_i16le_to_f32(bytes));

        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let samples = std::mem::replace(&mut self.pending, rest);
            let t_start = self.emitted_samples as f64 / self.sample_rate as f64;
            self.emitted_samples += samples.len() as u64;
            self.queue.push(AudioFrame {
                samples,
                sample_rate: self.sample_rate,
                t_start,
            });
        }
    }

    pub fn close(&self) {
        self.queue.close();
    }
}
