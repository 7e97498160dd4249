use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CrashwatchConfig {
    /// Static camera inventory. When empty the camera list is fetched from
    /// the record store at startup.
    #[serde(default)]
    pub cameras: Vec<CameraSourceConfig>,

    pub detection: DetectionConfig,
    pub clip: ClipConfig,
    pub session: SessionConfig,
    pub collaborators: CollaboratorConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraSourceConfig {
    /// Stable camera identifier (e.g. "CAM001")
    pub id: String,

    /// Camera location, attached to every accident record it produces
    pub latitude: f64,
    pub longitude: f64,

    /// Stream address (RTSP URL, HTTP stream, or local file path)
    pub url: String,

    /// Frames per second; when absent the source is probed and falls back
    /// to 25 if probing fails
    pub fps: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectionConfig {
    /// Model reference handed to the inference collaborator
    #[serde(default = "default_model")]
    pub model: String,

    /// Minimum confidence for a detection to count
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Detector-level cooldown between triggers, in seconds
    #[serde(default = "default_detector_cooldown")]
    pub cooldown_seconds: u64,

    /// Number of pending detections required to fire a trigger
    #[serde(default = "default_trigger_count")]
    pub trigger_count: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClipConfig {
    /// Seconds of footage kept before the trigger
    #[serde(default = "default_pre_seconds")]
    pub pre_seconds: u32,

    /// Seconds of footage kept after the trigger
    #[serde(default = "default_post_seconds")]
    pub post_seconds: u32,

    /// Ring buffer horizon in seconds (capacity = fps x horizon)
    #[serde(default = "default_ring_seconds")]
    pub ring_seconds: u32,

    /// Directory clips are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// ffmpeg binary used for transcoding
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Hard limit on a single transcode, in seconds
    #[serde(default = "default_encode_timeout")]
    pub encode_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Frame channel capacity; producers drop frames when it is full
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Minimum seconds between record creations for one camera
    #[serde(default = "default_record_cooldown")]
    pub record_cooldown_seconds: u64,

    /// Seconds after which an accident that never finalized is forced closed
    #[serde(default = "default_stuck_timeout")]
    pub stuck_timeout_seconds: u64,

    /// Coordinator receive timeout in milliseconds
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,

    /// Backoff sleep when no frame is available, in milliseconds
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// How long to wait for each ingestor to exit on shutdown, in seconds
    #[serde(default = "default_join_timeout")]
    pub join_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CollaboratorConfig {
    /// Base URL of the accident record store
    #[serde(default = "default_record_store_url")]
    pub record_store_url: String,

    /// Base URL of the clip blob storage
    #[serde(default = "default_storage_url")]
    pub storage_url: String,

    /// Base URL of the frame inference service
    #[serde(default = "default_inference_url")]
    pub inference_url: String,
}

impl CrashwatchConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("crashwatch.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("detection.model", default_model())?
            .set_default(
                "detection.confidence_threshold",
                default_confidence_threshold() as f64,
            )?
            .set_default(
                "detection.cooldown_seconds",
                default_detector_cooldown() as i64,
            )?
            .set_default("detection.trigger_count", default_trigger_count() as i64)?
            .set_default("clip.pre_seconds", default_pre_seconds() as i64)?
            .set_default("clip.post_seconds", default_post_seconds() as i64)?
            .set_default("clip.ring_seconds", default_ring_seconds() as i64)?
            .set_default("clip.output_dir", default_output_dir())?
            .set_default("clip.ffmpeg_path", default_ffmpeg_path())?
            .set_default(
                "clip.encode_timeout_seconds",
                default_encode_timeout() as i64,
            )?
            .set_default(
                "session.channel_capacity",
                default_channel_capacity() as i64,
            )?
            .set_default(
                "session.record_cooldown_seconds",
                default_record_cooldown() as i64,
            )?
            .set_default(
                "session.stuck_timeout_seconds",
                default_stuck_timeout() as i64,
            )?
            .set_default("session.recv_timeout_ms", default_recv_timeout_ms() as i64)?
            .set_default("session.idle_backoff_ms", default_idle_backoff_ms() as i64)?
            .set_default(
                "session.join_timeout_seconds",
                default_join_timeout() as i64,
            )?
            .set_default(
                "collaborators.record_store_url",
                default_record_store_url(),
            )?
            .set_default("collaborators.storage_url", default_storage_url())?
            .set_default("collaborators.inference_url", default_inference_url())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with CRASHWATCH_ prefix
            .add_source(Environment::with_prefix("CRASHWATCH").separator("__"))
            .build()?;

        let config: CrashwatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        for camera in &self.cameras {
            if camera.id.is_empty() {
                return Err(ConfigError::Message(
                    "Camera id must not be empty".to_string(),
                ));
            }
            if camera.url.is_empty() {
                return Err(ConfigError::Message(format!(
                    "Camera {} has an empty stream url",
                    camera.id
                )));
            }
            if let Some(fps) = camera.fps {
                if fps == 0 {
                    return Err(ConfigError::Message(format!(
                        "Camera {} fps must be greater than 0",
                        camera.id
                    )));
                }
            }
        }

        if self.detection.model.is_empty() {
            return Err(ConfigError::Message(
                "Detection model reference must not be empty".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::Message(
                "Confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.detection.trigger_count == 0 {
            return Err(ConfigError::Message(
                "Trigger count must be greater than 0".to_string(),
            ));
        }

        if self.clip.ring_seconds == 0 {
            return Err(ConfigError::Message(
                "Ring horizon must be greater than 0".to_string(),
            ));
        }

        if self.clip.pre_seconds == 0 || self.clip.post_seconds == 0 {
            return Err(ConfigError::Message(
                "Clip pre/post window must be greater than 0".to_string(),
            ));
        }

        if self.clip.pre_seconds > self.clip.ring_seconds {
            return Err(ConfigError::Message(
                "Clip pre window cannot exceed the ring horizon".to_string(),
            ));
        }

        if self.session.channel_capacity == 0 {
            return Err(ConfigError::Message(
                "Frame channel capacity must be greater than 0".to_string(),
            ));
        }

        if self.session.stuck_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Stuck accident timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl DetectionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

impl ClipConfig {
    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_seconds)
    }
}

impl SessionConfig {
    pub fn record_cooldown(&self) -> Duration {
        Duration::from_secs(self.record_cooldown_seconds)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_seconds)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_seconds)
    }
}

impl Default for CrashwatchConfig {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            detection: DetectionConfig {
                model: default_model(),
                confidence_threshold: default_confidence_threshold(),
                cooldown_seconds: default_detector_cooldown(),
                trigger_count: default_trigger_count(),
            },
            clip: ClipConfig {
                pre_seconds: default_pre_seconds(),
                post_seconds: default_post_seconds(),
                ring_seconds: default_ring_seconds(),
                output_dir: default_output_dir(),
                ffmpeg_path: default_ffmpeg_path(),
                encode_timeout_seconds: default_encode_timeout(),
            },
            session: SessionConfig {
                channel_capacity: default_channel_capacity(),
                record_cooldown_seconds: default_record_cooldown(),
                stuck_timeout_seconds: default_stuck_timeout(),
                recv_timeout_ms: default_recv_timeout_ms(),
                idle_backoff_ms: default_idle_backoff_ms(),
                join_timeout_seconds: default_join_timeout(),
            },
            collaborators: CollaboratorConfig {
                record_store_url: default_record_store_url(),
                storage_url: default_storage_url(),
                inference_url: default_inference_url(),
            },
        }
    }
}

// Default value functions
fn default_model() -> String {
    "yolov8n".to_string()
}
fn default_confidence_threshold() -> f32 {
    0.4
}
fn default_detector_cooldown() -> u64 {
    12
}
fn default_trigger_count() -> usize {
    3
}

fn default_pre_seconds() -> u32 {
    5
}
fn default_post_seconds() -> u32 {
    5
}
fn default_ring_seconds() -> u32 {
    20
}
fn default_output_dir() -> String {
    "./events".to_string()
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_encode_timeout() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    16
}
fn default_record_cooldown() -> u64 {
    45
}
fn default_stuck_timeout() -> u64 {
    45
}
fn default_recv_timeout_ms() -> u64 {
    1000
}
fn default_idle_backoff_ms() -> u64 {
    10
}
fn default_join_timeout() -> u64 {
    1
}

fn default_record_store_url() -> String {
    "http://localhost:8000/api".to_string()
}
fn default_storage_url() -> String {
    "http://localhost:8000/storage".to_string()
}
fn default_inference_url() -> String {
    "http://localhost:8500".to_string()
}
