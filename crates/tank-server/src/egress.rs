//! Outbound audio writes, with a busy/idle signal for the session's
//! speaking state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use tank_core::{audio::pcm_i16_to_le_bytes, AudioChunk};

use crate::api::protocol::OutboundFrame;

const NEVER: u64 = u64::MAX;

/// Writes PCM chunks to the outbound frame channel in production order.
/// Frames already handed to the transport are allowed to drain on cancel;
/// the caller simply stops producing.
#[derive(Clone)]
pub struct AudioEgress {
    out_tx: mpsc::Sender<OutboundFrame>,
    epoch: Instant,
    last_write_ms: Arc<AtomicU64>,
    busy_window: Duration,
}

impl AudioEgress {
    pub fn new(out_tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self::with_busy_window(out_tx, Duration::from_millis(250))
    }

    pub fn with_busy_window(out_tx: mpsc::Sender<OutboundFrame>, busy_window: Duration) -> Self {
        Self {
            out_tx,
            epoch: Instant::now(),
            last_write_ms: Arc::new(AtomicU64::new(NEVER)),
            busy_window,
        }
    }

    /// Returns false when the connection is gone.
    pub async fn write(&self, chunk: AudioChunk) -> bool {
        let bytes = pcm_i16_to_le_bytes(&chunk.pcm);
        if self.out_tx.send(OutboundFrame::Binary(bytes)).await.is_err() {
            return false;
        }
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_write_ms.store(now, Ordering::Relaxed);
        true
    }

    /// True while frames were written within the busy window.
    pub fn is_busy(&self) -> bool {
        let last = self.last_write_ms.load(Ordering::Relaxed);
        if last == NEVER {
            return false;
        }
        let now = self.epoch.elapsed().as_millis() as u64;
        now.saturating_sub(last) <= self.busy_window.as_millis() as u64
    }
}
