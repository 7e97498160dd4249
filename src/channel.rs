use crate::frame::FrameMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Statistics for frame channel pressure monitoring
#[derive(Debug, Default)]
pub struct ChannelStats {
    /// Frames accepted onto the channel
    pub frames_offered: AtomicU64,
    /// Frames dropped because the channel was full
    pub frames_dropped: AtomicU64,
}

impl ChannelStats {
    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            frames_offered: self.frames_offered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelStatsSnapshot {
    pub frames_offered: u64,
    pub frames_dropped: u64,
}

/// Create a bounded frame channel. Multiple ingestors hold cloned
/// [`FrameSender`]s; the session coordinator holds the single
/// [`FrameReceiver`]. The channel is deliberately lossy: a full queue drops
/// the producer's frame rather than stalling capture on other cameras.
pub fn frame_channel(capacity: usize) -> (FrameSender, FrameReceiver) {
    assert!(capacity > 0, "frame channel capacity must be greater than 0");
    let (tx, rx) = mpsc::channel(capacity);
    let stats = Arc::new(ChannelStats::default());
    (
        FrameSender {
            tx,
            stats: Arc::clone(&stats),
        },
        FrameReceiver { rx, stats },
    )
}

/// Producer handle for the frame channel
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<FrameMessage>,
    stats: Arc<ChannelStats>,
}

impl FrameSender {
    /// Offer a frame without blocking. Returns true if the frame was
    /// accepted, false if it was dropped (channel full or closed).
    pub fn offer(&self, message: FrameMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.stats.frames_offered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(msg)) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(camera = %msg.source_id, "frame channel full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Consumer handle for the frame channel
pub struct FrameReceiver {
    rx: mpsc::Receiver<FrameMessage>,
    stats: Arc<ChannelStats>,
}

impl FrameReceiver {
    /// Receive the next frame, giving up after `timeout`. Returns `None`
    /// on timeout or when every sender has gone away and the queue is empty.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<FrameMessage> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Take whatever is already queued without waiting. Used to drain and
    /// discard frames on shutdown.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameData;
    use std::time::SystemTime;

    fn msg(source: &str) -> FrameMessage {
        FrameMessage::new(source, FrameData::new(vec![0u8; 8], 0, 0, SystemTime::now()))
    }

    #[tokio::test]
    async fn test_offer_and_receive() {
        let (tx, mut rx) = frame_channel(4);
        assert!(tx.offer(msg("CAM001")));

        let received = rx.recv_timeout(Duration::from_millis(50)).await;
        assert_eq!(received.unwrap().source_id, "CAM001");
    }

    #[tokio::test]
    async fn test_drops_when_full() {
        let (tx, rx) = frame_channel(2);
        assert!(tx.offer(msg("CAM001")));
        assert!(tx.offer(msg("CAM001")));
        // Channel is full; the third offer must not block, it must drop.
        assert!(!tx.offer(msg("CAM001")));

        let stats = rx.stats();
        assert_eq!(stats.frames_offered, 2);
        assert_eq!(stats.frames_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_times_out_when_empty() {
        let (_tx, mut rx) = frame_channel(2);
        let received = rx.recv_timeout(Duration::from_millis(100)).await;
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_drain_discards_queued_frames() {
        let (tx, mut rx) = frame_channel(8);
        for _ in 0..5 {
            assert!(tx.offer(msg("CAM001")));
        }
        assert_eq!(rx.drain(), 5);
        assert_eq!(rx.drain(), 0);
    }

    #[tokio::test]
    async fn test_multiple_producers() {
        let (tx, mut rx) = frame_channel(16);
        let tx2 = tx.clone();
        assert!(tx.offer(msg("CAM001")));
        assert!(tx2.offer(msg("CAM002")));

        let first = rx.recv_timeout(Duration::from_millis(50)).await.unwrap();
        let second = rx.recv_timeout(Duration::from_millis(50)).await.unwrap();
        assert_eq!(first.source_id, "CAM001");
        assert_eq!(second.source_id, "CAM002");
    }
}
