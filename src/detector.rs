use crate::classifier::FrameClassifier;
use crate::config::{ClipConfig, DetectionConfig};
use crate::encoder::ClipEncoder;
use crate::frame::FrameData;
use crate::ring::FrameRing;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Event emitted by [`AccidentDetector::process_frame`].
#[derive(Debug, Clone)]
pub enum DetectorEvent {
    /// The debounce threshold was met and a clip window was opened.
    Accident { at: Instant },
}

/// A finalized clip ready for record update and upload.
#[derive(Debug, Clone)]
pub struct ClipReady {
    pub path: PathBuf,
}

/// Sequence-number window of frames being collected around a trigger.
/// At most one instance is live per detector.
struct ClipWindow {
    start_seq: u64,
    end_seq: u64,
    frames: Vec<FrameData>,
    last_collected_seq: u64,
}

/// Per-camera accident detector.
///
/// Owns the camera's recent-frame ring and all debounce state. Only ever
/// driven from the coordinator's single dispatch task, so nothing here is
/// synchronized.
///
/// The two-stage debounce works like this: a frame with at least one
/// detection above the confidence threshold appends a pending timestamp,
/// but only while the detector-level cooldown since the last trigger has
/// elapsed. When pending reaches the trigger count, the detector fires an
/// accident event, arms the cooldown, and opens a clip window around the
/// current sequence number. Pending accumulation deliberately has no
/// maximum span: three qualifying frames arbitrarily far apart still fire,
/// matching the deployed behavior this system replicates.
pub struct AccidentDetector {
    camera_id: String,
    fps: u32,
    classifier: Arc<dyn FrameClassifier>,
    encoder: Arc<ClipEncoder>,

    confidence_threshold: f32,
    cooldown: Duration,
    trigger_count: usize,
    pre_frames: u64,
    post_frames: u64,

    seq: u64,
    ring: FrameRing,
    pending: Vec<Instant>,
    last_trigger: Option<Instant>,
    window: Option<ClipWindow>,
}

impl AccidentDetector {
    pub fn new(
        camera_id: impl Into<String>,
        fps: u32,
        detection: &DetectionConfig,
        clip: &ClipConfig,
        classifier: Arc<dyn FrameClassifier>,
        encoder: Arc<ClipEncoder>,
    ) -> Self {
        let fps = fps.max(1);
        Self {
            camera_id: camera_id.into(),
            fps,
            classifier,
            encoder,
            confidence_threshold: detection.confidence_threshold,
            cooldown: detection.cooldown(),
            trigger_count: detection.trigger_count,
            pre_frames: fps as u64 * clip.pre_seconds as u64,
            post_frames: fps as u64 * clip.post_seconds as u64,
            seq: 0,
            ring: FrameRing::new((fps * clip.ring_seconds).max(1) as usize),
            pending: Vec::new(),
            last_trigger: None,
            window: None,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Sequence number of the most recently processed frame.
    pub fn current_seq(&self) -> u64 {
        self.seq
    }

    pub fn has_open_window(&self) -> bool {
        self.window.is_some()
    }

    /// Ingest one frame: buffer it, run inference, and advance the
    /// debounce protocol. Inference failures are logged and treated as
    /// frames without detections; they never escape the detector.
    pub async fn process_frame(&mut self, frame: &FrameData) -> Vec<DetectorEvent> {
        self.seq += 1;
        self.ring.push(frame.clone(), self.seq);

        let detections = match self.classifier.infer(frame).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!(camera = %self.camera_id, seq = self.seq, "inference failed: {}", e);
                Vec::new()
            }
        };

        let hit = detections
            .iter()
            .any(|d| d.confidence > self.confidence_threshold);

        let mut events = Vec::new();
        let now = Instant::now();

        if hit && self.cooldown_elapsed(now) {
            self.pending.push(now);
            debug!(
                camera = %self.camera_id,
                pending = self.pending.len(),
                seq = self.seq,
                "qualifying detection"
            );

            if self.pending.len() >= self.trigger_count {
                self.pending.clear();
                self.last_trigger = Some(now);
                self.open_window();
                events.push(DetectorEvent::Accident { at: now });
                info!(camera = %self.camera_id, seq = self.seq, "accident trigger fired");
            }
        }

        events
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        match self.last_trigger {
            Some(last) => now.duration_since(last) > self.cooldown,
            None => true,
        }
    }

    fn open_window(&mut self) {
        if self.window.is_some() {
            // Only reachable with a cooldown shorter than the post window.
            debug!(camera = %self.camera_id, "replacing live clip window");
        }
        let start_seq = self.seq.saturating_sub(self.pre_frames);
        let end_seq = self.seq + self.post_frames;
        debug!(
            camera = %self.camera_id,
            start_seq,
            end_seq,
            "clip window opened"
        );
        self.window = Some(ClipWindow {
            start_seq,
            end_seq,
            frames: Vec::new(),
            last_collected_seq: 0,
        });
    }

    /// Advance the live clip window, if any: sweep the ring once for frames
    /// in [start, end] not yet collected, then finalize when the window has
    /// been passed (or unconditionally when `force` is set). Finalization
    /// hands the collected frames to the encoder and discards the window;
    /// afterwards this method is a no-op until the next trigger.
    pub async fn collect_window(&mut self, force: bool) -> Vec<ClipReady> {
        let Some(window) = self.window.as_mut() else {
            return Vec::new();
        };

        for (frame, seq) in self.ring.iter() {
            if *seq >= window.start_seq
                && *seq <= window.end_seq
                && *seq > window.last_collected_seq
            {
                window.frames.push(frame.clone());
                window.last_collected_seq = *seq;
            }
        }

        if !(force || self.seq > window.end_seq) {
            return Vec::new();
        }

        // The window is consumed whether or not encoding succeeds.
        let Some(window) = self.window.take() else {
            return Vec::new();
        };
        debug!(
            camera = %self.camera_id,
            frames = window.frames.len(),
            forced = force,
            "finalizing clip window"
        );

        match self
            .encoder
            .write_clip(&self.camera_id, &window.frames, self.fps)
            .await
        {
            Ok(Some(path)) => vec![ClipReady { path }],
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(camera = %self.camera_id, "clip encoding failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Detection;
    use crate::error::Result;
    use crate::testutil::ScriptedClassifier;
    use async_trait::async_trait;
    use std::time::SystemTime;

    fn frame() -> FrameData {
        FrameData::new(vec![0xAB; 16], 0, 0, SystemTime::now())
    }

    fn detection_config() -> DetectionConfig {
        DetectionConfig {
            model: "test".to_string(),
            confidence_threshold: 0.4,
            cooldown_seconds: 12,
            trigger_count: 3,
        }
    }

    fn clip_config(dir: &std::path::Path) -> ClipConfig {
        ClipConfig {
            pre_seconds: 5,
            post_seconds: 5,
            ring_seconds: 20,
            output_dir: dir.to_string_lossy().into_owned(),
            // Missing tool forces the raw-artifact fallback, which keeps
            // these tests independent of an ffmpeg install.
            ffmpeg_path: "/nonexistent/ffmpeg-bin".to_string(),
            encode_timeout_seconds: 5,
        }
    }

    fn detector(
        fps: u32,
        script: Vec<Vec<f32>>,
        dir: &std::path::Path,
    ) -> AccidentDetector {
        let clip = clip_config(dir);
        AccidentDetector::new(
            "CAM001",
            fps,
            &detection_config(),
            &clip,
            ScriptedClassifier::new(script),
            Arc::new(ClipEncoder::new(&clip)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_detections_fire_on_third_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut det = detector(10, vec![vec![0.9], vec![0.8], vec![0.7]], dir.path());

        assert!(det.process_frame(&frame()).await.is_empty());
        assert!(det.process_frame(&frame()).await.is_empty());
        let events = det.process_frame(&frame()).await;
        assert_eq!(events.len(), 1);
        assert!(det.has_open_window());
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_confidence_never_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let mut det = detector(10, vec![vec![0.4], vec![0.39], vec![0.1]], dir.path());

        // 0.4 is not strictly above the threshold.
        for _ in 0..3 {
            assert!(det.process_frame(&frame()).await.is_empty());
        }
        assert!(!det.has_open_window());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_new_accumulation() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![vec![0.9]; 12];
        let mut det = detector(10, script, dir.path());

        // First trigger on frame 3.
        for _ in 0..2 {
            det.process_frame(&frame()).await;
        }
        assert_eq!(det.process_frame(&frame()).await.len(), 1);

        // Still inside the 12s cooldown: detections are ignored.
        for _ in 0..3 {
            assert!(det.process_frame(&frame()).await.is_empty());
        }

        // After the cooldown the protocol starts over.
        tokio::time::advance(Duration::from_secs(13)).await;
        for _ in 0..2 {
            assert!(det.process_frame(&frame()).await.is_empty());
        }
        assert_eq!(det.process_frame(&frame()).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_span_is_unbounded() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![vec![0.9], vec![], vec![0.9], vec![], vec![0.9]];
        let mut det = detector(10, script, dir.path());

        det.process_frame(&frame()).await;
        tokio::time::advance(Duration::from_secs(300)).await;
        det.process_frame(&frame()).await;
        det.process_frame(&frame()).await;
        tokio::time::advance(Duration::from_secs(300)).await;
        det.process_frame(&frame()).await;
        // Sparse detections minutes apart still reach the threshold.
        let events = det.process_frame(&frame()).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_span_and_normal_finalization() {
        let dir = tempfile::tempdir().unwrap();
        // Detections on frames 98-100 trigger at seq 100.
        let mut script = vec![vec![]; 97];
        script.extend(vec![vec![0.9], vec![0.9], vec![0.9]]);
        let mut det = detector(10, script, dir.path());

        for _ in 0..99 {
            det.process_frame(&frame()).await;
        }
        let events = det.process_frame(&frame()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(det.current_seq(), 100);
        {
            let window = det.window.as_ref().unwrap();
            assert_eq!(window.start_seq, 50);
            assert_eq!(window.end_seq, 150);
        }

        // Not past the window yet: collection continues, no clip.
        for _ in 0..50 {
            det.process_frame(&frame()).await;
            assert!(det.collect_window(false).await.is_empty());
        }
        assert_eq!(det.current_seq(), 150);

        // Sequence 151 passes the end of the window.
        det.process_frame(&frame()).await;
        let ready = det.collect_window(false).await;
        assert_eq!(ready.len(), 1);
        assert!(!det.has_open_window());

        // Sequences 50..=150 inclusive, 16 bytes per frame.
        let written = std::fs::read(&ready[0].path).unwrap();
        assert_eq!(written.len(), 101 * 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_finalize_yields_clip_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut det = detector(10, vec![vec![0.9], vec![0.9], vec![0.9]], dir.path());

        for _ in 0..3 {
            det.process_frame(&frame()).await;
        }
        assert!(det.has_open_window());

        let ready = det.collect_window(true).await;
        assert_eq!(ready.len(), 1);
        assert!(!det.has_open_window());
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_after_finalization_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut det = detector(10, vec![vec![0.9], vec![0.9], vec![0.9]], dir.path());

        for _ in 0..3 {
            det.process_frame(&frame()).await;
        }
        assert_eq!(det.collect_window(true).await.len(), 1);

        // Idempotent until a new trigger opens a window.
        assert!(det.collect_window(true).await.is_empty());
        assert!(det.collect_window(false).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_collected_once_per_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut det = detector(10, vec![vec![0.9], vec![0.9], vec![0.9]], dir.path());

        for _ in 0..3 {
            det.process_frame(&frame()).await;
        }
        // Repeated non-finalizing sweeps must not duplicate frames.
        det.collect_window(false).await;
        det.collect_window(false).await;
        let collected = det.window.as_ref().unwrap().frames.len();
        assert_eq!(collected, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inference_failure_treated_as_no_detection() {
        struct FailingClassifier;

        #[async_trait]
        impl FrameClassifier for FailingClassifier {
            async fn infer(&self, _frame: &FrameData) -> Result<Vec<Detection>> {
                Err(crate::error::CrashwatchError::Inference {
                    details: "boom".to_string(),
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let clip = clip_config(dir.path());
        let mut det = AccidentDetector::new(
            "CAM001",
            10,
            &detection_config(),
            &clip,
            Arc::new(FailingClassifier),
            Arc::new(ClipEncoder::new(&clip)),
        );

        assert!(det.process_frame(&frame()).await.is_empty());
        assert_eq!(det.current_seq(), 1);
    }
}
