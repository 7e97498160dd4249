use crate::config::ClipConfig;
use crate::error::{CrashwatchError, Result};
use crate::frame::FrameData;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Serializes a collected clip window to a playable video artifact.
///
/// Frames are first written as an MJPEG intermediate (concatenated JPEG,
/// cheap and dependency-free), then transcoded with ffmpeg into a
/// web-streamable H.264 MP4. When the transcode fails for any reason the
/// intermediate is promoted to the final artifact instead: as long as at
/// least one frame was supplied, a clip always comes out.
pub struct ClipEncoder {
    output_dir: PathBuf,
    ffmpeg_path: String,
    timeout: Duration,
}

impl ClipEncoder {
    pub fn new(config: &ClipConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.output_dir),
            ffmpeg_path: config.ffmpeg_path.clone(),
            timeout: config.encode_timeout(),
        }
    }

    /// Write `frames` as a clip for `camera_id` at `fps`. Returns `None`
    /// when no frames were supplied, otherwise the path of the artifact.
    pub async fn write_clip(
        &self,
        camera_id: &str,
        frames: &[FrameData],
        fps: u32,
    ) -> Result<Option<PathBuf>> {
        if frames.is_empty() {
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;

        let stem = format!("ACCIDENT_{}_{}", camera_id, Utc::now().timestamp());
        let intermediate = self.output_dir.join(format!("{}_temp.mjpeg", stem));
        let final_mp4 = self.output_dir.join(format!("{}.mp4", stem));

        self.write_intermediate(&intermediate, frames).await?;
        debug!(
            camera = %camera_id,
            frames = frames.len(),
            path = %intermediate.display(),
            "intermediate clip written"
        );

        match self.transcode(&intermediate, &final_mp4, fps).await {
            Ok(()) => {
                if let Err(e) = tokio::fs::remove_file(&intermediate).await {
                    warn!(path = %intermediate.display(), "failed to remove intermediate: {}", e);
                }
                info!(camera = %camera_id, path = %final_mp4.display(), "clip transcoded");
                Ok(Some(final_mp4))
            }
            Err(e) => {
                warn!(camera = %camera_id, "transcode failed, keeping raw clip: {}", e);
                // A partial mp4 from a failed run is useless; drop it.
                let _ = tokio::fs::remove_file(&final_mp4).await;

                let fallback = self.output_dir.join(format!("{}.mjpeg", stem));
                tokio::fs::rename(&intermediate, &fallback).await?;
                Ok(Some(fallback))
            }
        }
    }

    /// Concatenate the encoded frame buffers into the intermediate file.
    async fn write_intermediate(&self, path: &Path, frames: &[FrameData]) -> Result<()> {
        let mut file = tokio::fs::File::create(path).await?;
        for frame in frames {
            file.write_all(&frame.data).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// Run the external transcode step, bounded by the configured timeout.
    async fn transcode(&self, input: &Path, output: &Path, fps: u32) -> Result<()> {
        let fps = if fps > 0 { fps } else { 25 };

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("mjpeg")
            .arg("-framerate")
            .arg(fps.to_string())
            .arg("-i")
            .arg(input)
            .arg("-c:v")
            .arg("libx264")
            .arg("-profile:v")
            .arg("baseline")
            .arg("-level")
            .arg("3.0")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-movflags")
            .arg("+faststart")
            .arg("-preset")
            .arg("ultrafast")
            .arg("-crf")
            .arg("23")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, cmd.output()).await;

        match result {
            Ok(Ok(out)) if out.status.success() => Ok(()),
            Ok(Ok(out)) => Err(CrashwatchError::encode(format!(
                "ffmpeg exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ))),
            Ok(Err(e)) => Err(CrashwatchError::encode(format!(
                "failed to run {}: {}",
                self.ffmpeg_path, e
            ))),
            Err(_) => Err(CrashwatchError::encode(format!(
                "transcode exceeded {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClipConfig;
    use std::time::SystemTime;

    fn encoder_with(dir: &Path, ffmpeg: &str) -> ClipEncoder {
        ClipEncoder::new(&ClipConfig {
            pre_seconds: 5,
            post_seconds: 5,
            ring_seconds: 20,
            output_dir: dir.to_string_lossy().into_owned(),
            ffmpeg_path: ffmpeg.to_string(),
            encode_timeout_seconds: 5,
        })
    }

    fn frames(count: usize) -> Vec<FrameData> {
        (0..count)
            .map(|i| FrameData::new(vec![i as u8; 32], 0, 0, SystemTime::now()))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_input_yields_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = encoder_with(dir.path(), "ffmpeg");
        let result = encoder.write_clip("CAM001", &[], 25).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_fallback_when_tool_missing() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = encoder_with(dir.path(), "/nonexistent/ffmpeg-bin");

        let path = encoder
            .write_clip("CAM001", &frames(3), 25)
            .await
            .unwrap()
            .expect("non-empty input must always yield an artifact");

        assert_eq!(path.extension().unwrap(), "mjpeg");
        assert!(path.exists());
        // Intermediate must have been renamed, not copied
        assert!(!path.to_string_lossy().contains("_temp"));
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 3 * 32);
    }

    #[tokio::test]
    async fn test_fallback_when_tool_fails() {
        let dir = tempfile::tempdir().unwrap();
        // "false" exists but always exits non-zero.
        let encoder = encoder_with(dir.path(), "false");

        let path = encoder
            .write_clip("CAM002", &frames(2), 10)
            .await
            .unwrap()
            .expect("fallback artifact expected");
        assert_eq!(path.extension().unwrap(), "mjpeg");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_artifact_name_carries_camera_id() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = encoder_with(dir.path(), "/nonexistent/ffmpeg-bin");
        let path = encoder
            .write_clip("CAM007", &frames(1), 25)
            .await
            .unwrap()
            .unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().contains("CAM007"));
    }
}
