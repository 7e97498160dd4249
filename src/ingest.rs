use crate::channel::FrameSender;
use crate::error::{CrashwatchError, Result};
use crate::frame::{FrameData, FrameMessage};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Frame rate assumed when a source does not report one.
pub const DEFAULT_FPS: u32 = 25;

/// A readable, already-opened video source.
#[async_trait]
pub trait FrameSource: Send {
    /// Read the next frame. `Ok(None)` signals end of stream.
    async fn read_frame(&mut self) -> Result<Option<FrameData>>;
}

/// Opens and probes stream sources. One opener serves all cameras.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn FrameSource>>;

    /// Best-effort frame rate probe; `None` when the source does not say.
    async fn probe_fps(&self, _url: &str) -> Option<u32> {
        None
    }
}

/// Opener that decodes any ffmpeg-supported source (RTSP, HTTP, local
/// files) into an MJPEG frame stream on a child process's stdout.
pub struct FfmpegOpener {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegOpener {
    pub fn new(ffmpeg_path: &str) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

#[async_trait]
impl SourceOpener for FfmpegOpener {
    async fn open(&self, url: &str) -> Result<Box<dyn FrameSource>> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        if url.starts_with("rtsp://") {
            cmd.arg("-rtsp_transport").arg("tcp");
        }
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(url)
            .arg("-an")
            .arg("-f")
            .arg("mjpeg")
            .arg("-q:v")
            .arg("4")
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| CrashwatchError::SourceOpen {
            url: url.to_string(),
            details: e.to_string(),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CrashwatchError::SourceOpen {
                url: url.to_string(),
                details: "no stdout from decoder process".to_string(),
            })?;

        Ok(Box::new(MjpegStreamSource {
            _child: child,
            stdout: BufReader::new(stdout),
            buf: Vec::new(),
        }))
    }

    async fn probe_fps(&self, url: &str) -> Option<u32> {
        let output = tokio::time::timeout(
            Duration::from_secs(10),
            Command::new(&self.ffprobe_path)
                .arg("-v")
                .arg("error")
                .arg("-select_streams")
                .arg("v:0")
                .arg("-show_entries")
                .arg("stream=avg_frame_rate")
                .arg("-of")
                .arg("default=noprint_wrappers=1:nokey=1")
                .arg(url)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .ok()?
        .ok()?;

        if !output.status.success() {
            return None;
        }

        parse_frame_rate(String::from_utf8_lossy(&output.stdout).trim())
    }
}

/// Parse an ffprobe rational frame rate like "25/1" or "30000/1001".
fn parse_frame_rate(raw: &str) -> Option<u32> {
    let (num, den) = match raw.split_once('/') {
        Some((num, den)) => (num.parse::<f64>().ok()?, den.parse::<f64>().ok()?),
        None => (raw.parse::<f64>().ok()?, 1.0),
    };
    if den <= 0.0 || num <= 0.0 {
        return None;
    }
    let fps = (num / den).round() as u32;
    (fps > 0).then_some(fps)
}

/// Frame source splitting a decoder's MJPEG byte stream into JPEG frames
/// by scanning for SOI/EOI markers.
struct MjpegStreamSource {
    _child: Child,
    stdout: BufReader<ChildStdout>,
    buf: Vec<u8>,
}

impl MjpegStreamSource {
    fn extract_frame(&mut self) -> Option<FrameData> {
        let start = self.buf.windows(2).position(|w| w == [0xFF, 0xD8])?;
        let end = self.buf[start + 2..]
            .windows(2)
            .position(|w| w == [0xFF, 0xD9])
            .map(|p| start + 2 + p)?;

        let jpeg = self.buf[start..end + 2].to_vec();
        self.buf.drain(..end + 2);
        Some(FrameData::new(jpeg, 0, 0, SystemTime::now()))
    }
}

#[async_trait]
impl FrameSource for MjpegStreamSource {
    async fn read_frame(&mut self) -> Result<Option<FrameData>> {
        loop {
            if let Some(frame) = self.extract_frame() {
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; 8192];
            let n = self.stdout.read(&mut chunk).await?;
            if n == 0 {
                // Decoder exited; anything left in the buffer is a torn frame.
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Resolve the effective frame rate for a camera: explicit configuration
/// wins, then the source probe, then [`DEFAULT_FPS`].
pub async fn resolve_fps(
    opener: &dyn SourceOpener,
    url: &str,
    configured: Option<u32>,
) -> u32 {
    if let Some(fps) = configured.filter(|f| *f > 0) {
        return fps;
    }
    match opener.probe_fps(url).await.filter(|f| *f > 0) {
        Some(fps) => fps,
        None => {
            debug!(url = %url, "fps unknown, defaulting to {}", DEFAULT_FPS);
            DEFAULT_FPS
        }
    }
}

/// The set of per-camera ingestion tasks plus their shared stop flag.
pub struct IngestorPool {
    running: Arc<AtomicBool>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl IngestorPool {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            handles: Vec::new(),
        }
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Spawn one ingestion task. The task opens its own source; an open
    /// failure retires this camera without affecting the others.
    pub fn spawn(
        &mut self,
        camera_id: &str,
        url: &str,
        fps: u32,
        opener: Arc<dyn SourceOpener>,
        sender: FrameSender,
    ) {
        let camera_id = camera_id.to_string();
        let url = url.to_string();
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(ingest_loop(camera_id.clone(), url, fps, opener, sender, running));
        self.handles.push((camera_id, handle));
    }

    /// Clear the stop flag and join every ingestor, aborting any that
    /// outlive `join_timeout`.
    pub async fn stop(&mut self, join_timeout: Duration) {
        self.running.store(false, Ordering::Relaxed);

        for (camera_id, mut handle) in self.handles.drain(..) {
            match tokio::time::timeout(join_timeout, &mut handle).await {
                Ok(Ok(())) => debug!(camera = %camera_id, "ingestor joined"),
                Ok(Err(e)) => warn!(camera = %camera_id, "ingestor task failed: {}", e),
                Err(_) => {
                    warn!(camera = %camera_id, "ingestor did not exit in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

impl Default for IngestorPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-camera capture loop: read, tag, offer, pace. Reads are paced to the
/// source frame rate; offers never block, so a slow consumer costs this
/// camera frames but never stalls it.
async fn ingest_loop(
    camera_id: String,
    url: String,
    fps: u32,
    opener: Arc<dyn SourceOpener>,
    sender: FrameSender,
    running: Arc<AtomicBool>,
) {
    let mut source = match opener.open(&url).await {
        Ok(source) => source,
        Err(e) => {
            warn!(camera = %camera_id, "failed to open source: {}", e);
            return;
        }
    };

    let fps = fps.max(1);
    let delay = Duration::from_secs_f64(1.0 / fps as f64);
    info!(camera = %camera_id, fps, "ingestor started");

    while running.load(Ordering::Relaxed) {
        match source.read_frame().await {
            Ok(Some(frame)) => {
                sender.offer(FrameMessage::new(&camera_id, frame));
            }
            Ok(None) => {
                info!(camera = %camera_id, "end of stream");
                break;
            }
            Err(e) => {
                warn!(camera = %camera_id, "frame read failed: {}", e);
                break;
            }
        }

        tokio::time::sleep(delay).await;
    }

    debug!(camera = %camera_id, "ingestor exiting");
}
