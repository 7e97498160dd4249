use crate::channel::FrameReceiver;
use crate::config::SessionConfig;
use crate::detector::{AccidentDetector, ClipReady, DetectorEvent};
use crate::frame::FrameMessage;
use crate::records::{AccidentStatus, RecordStore, RecordUpdate};
use crate::storage::ClipStorage;
use crate::uploader;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Everything the coordinator tracks for one camera beyond what the
/// detector itself owns.
struct CameraSession {
    detector: AccidentDetector,
    latitude: f64,
    longitude: f64,

    /// An accident record is open and waiting for its clip.
    active: bool,
    record_id: Option<String>,
    /// When the active accident was triggered; drives the stuck sweep.
    triggered_at: Option<Instant>,
    /// When the last accident record was created; drives the record-level
    /// cooldown, which outlives the detector-level one.
    last_record_at: Option<Instant>,
    produced_frames: u64,
}

impl CameraSession {
    fn reset_accident(&mut self) {
        self.active = false;
        self.record_id = None;
        self.triggered_at = None;
    }
}

/// Single consumer of the frame channel.
///
/// Owns every per-camera detector and drives the whole accident lifecycle:
/// dispatch frames, open records on triggers, finalize clips, hand uploads
/// to background tasks, and force-close accidents that stop making
/// progress. Running detection on one task keeps the per-camera state
/// machines trivially race-free; the cameras' capture loops are the only
/// other moving parts and they touch nothing but the channel.
pub struct SessionCoordinator {
    sessions: HashMap<String, CameraSession>,
    records: Arc<dyn RecordStore>,
    storage: Arc<dyn ClipStorage>,

    record_cooldown: Duration,
    stuck_timeout: Duration,
    recv_timeout: Duration,
    idle_backoff: Duration,
}

impl SessionCoordinator {
    pub fn new(
        session: &SessionConfig,
        records: Arc<dyn RecordStore>,
        storage: Arc<dyn ClipStorage>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            records,
            storage,
            record_cooldown: session.record_cooldown(),
            stuck_timeout: session.stuck_timeout(),
            recv_timeout: session.recv_timeout(),
            idle_backoff: session.idle_backoff(),
        }
    }

    /// Register a camera. Frames whose source id has no session are
    /// discarded by the dispatch loop.
    pub fn add_camera(&mut self, latitude: f64, longitude: f64, detector: AccidentDetector) {
        let camera_id = detector.camera_id().to_string();
        self.sessions.insert(
            camera_id,
            CameraSession {
                detector,
                latitude,
                longitude,
                active: false,
                record_id: None,
                triggered_at: None,
                last_record_at: None,
                produced_frames: 0,
            },
        );
    }

    pub fn camera_count(&self) -> usize {
        self.sessions.len()
    }

    /// Dispatch loop. Returns once `running` is cleared, after draining the
    /// channel and force-finalizing any accident still in flight.
    pub async fn run(mut self, mut receiver: FrameReceiver, running: Arc<AtomicBool>) {
        info!(cameras = self.sessions.len(), "session coordinator started");

        while running.load(Ordering::Relaxed) {
            match receiver.recv_timeout(self.recv_timeout).await {
                Some(message) => self.handle_message(message).await,
                None => tokio::time::sleep(self.idle_backoff).await,
            }
            self.sweep_stuck().await;
        }

        self.shutdown(&mut receiver).await;
    }

    /// Process one frame end to end: detection, trigger handling, and
    /// clip-window progress for the frame's camera.
    async fn handle_message(&mut self, message: FrameMessage) {
        let Some(session) = self.sessions.get_mut(&message.source_id) else {
            trace!(source = %message.source_id, "frame from unregistered source, dropping");
            return;
        };

        session.produced_frames += 1;
        if session.produced_frames % PROGRESS_LOG_INTERVAL == 0 {
            debug!(
                camera = %message.source_id,
                frames = session.produced_frames,
                "frames processed"
            );
        }

        let events = session.detector.process_frame(&message.frame).await;

        for DetectorEvent::Accident { at } in events {
            if session.active {
                debug!(camera = %message.source_id, "trigger while accident active, ignored");
                continue;
            }

            let cooled = match session.last_record_at {
                Some(last) => at.duration_since(last) >= self.record_cooldown,
                None => true,
            };
            if !cooled {
                info!(
                    camera = %message.source_id,
                    "trigger within record cooldown, no new record"
                );
                continue;
            }

            match self
                .records
                .create_accident_record(&message.source_id, session.latitude, session.longitude)
                .await
            {
                Ok(record_id) => {
                    info!(camera = %message.source_id, record = %record_id, "accident record opened");
                    session.active = true;
                    session.record_id = Some(record_id);
                    session.triggered_at = Some(at);
                    session.last_record_at = Some(at);
                }
                Err(e) => {
                    // The clip window stays open; its clip will be dropped
                    // when it finalizes without a record.
                    warn!(camera = %message.source_id, "failed to open accident record: {}", e);
                }
            }
        }

        let ready = session.detector.collect_window(false).await;
        for clip in ready {
            let record_id = session.record_id.take();
            session.reset_accident();
            Self::settle_clip(&self.records, &self.storage, clip, record_id, false).await;
        }
    }

    /// Safety net against accidents that never finalize, e.g. because
    /// their camera's stream died mid-window. Runs every dispatch tick, so
    /// one camera going quiet cannot strand its record while the others
    /// keep the loop alive.
    async fn sweep_stuck(&mut self) {
        let now = Instant::now();

        for (camera_id, session) in self.sessions.iter_mut() {
            if !session.active {
                continue;
            }
            let Some(triggered_at) = session.triggered_at else {
                continue;
            };
            if now.duration_since(triggered_at) <= self.stuck_timeout {
                continue;
            }

            warn!(
                camera = %camera_id,
                elapsed = ?now.duration_since(triggered_at),
                "accident stuck, forcing clip finalization"
            );

            let ready = session.detector.collect_window(true).await;
            let record_id = session.record_id.take();
            session.reset_accident();

            match (ready.into_iter().next(), record_id) {
                (Some(clip), record_id) => {
                    Self::settle_clip(&self.records, &self.storage, clip, record_id, false).await;
                }
                (None, Some(record_id)) => {
                    warn!(camera = %camera_id, record = %record_id, "no clip salvaged for stuck accident");
                    let update = RecordUpdate::status(AccidentStatus::Failed);
                    if let Err(e) = self.records.update_accident_record(&record_id, update).await {
                        warn!(record = %record_id, "failed to mark record failed: {}", e);
                    }
                }
                (None, None) => {}
            }
        }
    }

    /// Drain leftover frames and close out any accident still open. Called
    /// with ingestion already stopped, so uploads run synchronously here
    /// instead of racing process exit.
    async fn shutdown(&mut self, receiver: &mut FrameReceiver) {
        let drained = receiver.drain();
        let stats = receiver.stats();
        info!(
            drained,
            offered = stats.frames_offered,
            dropped = stats.frames_dropped,
            "session coordinator shutting down"
        );

        for (camera_id, session) in self.sessions.iter_mut() {
            if session.produced_frames == 0 || !session.detector.has_open_window() {
                continue;
            }

            info!(camera = %camera_id, "finalizing in-flight accident on shutdown");
            let ready = session.detector.collect_window(true).await;
            let record_id = session.record_id.take();
            session.reset_accident();

            match (ready.into_iter().next(), record_id) {
                (Some(clip), record_id) => {
                    Self::settle_clip(&self.records, &self.storage, clip, record_id, true).await;
                }
                (None, Some(record_id)) => {
                    let update = RecordUpdate::status(AccidentStatus::Failed);
                    if let Err(e) = self.records.update_accident_record(&record_id, update).await {
                        warn!(record = %record_id, "failed to mark record failed: {}", e);
                    }
                }
                (None, None) => {}
            }
        }
    }

    /// Attach a finalized clip to its record and hand it to storage. With
    /// `wait` unset the upload runs as a background task and never blocks
    /// dispatch; shutdown sets it to await completion. A clip without a
    /// record (record creation failed, or the trigger was suppressed) has
    /// nowhere to go and is deleted.
    async fn settle_clip(
        records: &Arc<dyn RecordStore>,
        storage: &Arc<dyn ClipStorage>,
        clip: ClipReady,
        record_id: Option<String>,
        wait: bool,
    ) {
        let Some(record_id) = record_id else {
            debug!(path = %clip.path.display(), "clip without a record, discarding");
            let _ = tokio::fs::remove_file(&clip.path).await;
            return;
        };

        let update = RecordUpdate::status(AccidentStatus::Trimmed)
            .with_clip_path(clip.path.to_string_lossy().into_owned());
        if let Err(e) = records.update_accident_record(&record_id, update).await {
            warn!(record = %record_id, "failed to mark record trimmed: {}", e);
        }

        if wait {
            uploader::upload_and_record(
                Arc::clone(storage),
                Arc::clone(records),
                clip.path,
                record_id,
            )
            .await;
        } else {
            uploader::spawn_upload(
                Arc::clone(storage),
                Arc::clone(records),
                clip.path,
                record_id,
            );
        }
    }
}
