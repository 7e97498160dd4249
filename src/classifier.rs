use crate::error::{CrashwatchError, Result};
use crate::frame::FrameData;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A single detection returned by the inference collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Class label (e.g. "accident")
    pub label: String,
    /// Confidence in [0.0, 1.0]
    pub confidence: f32,
    /// Optional bounding box as [x, y, width, height] in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f32; 4]>,
}

/// Contract for the pluggable per-frame classifier. The core only needs
/// detections with confidences; which model produces them is a deployment
/// concern.
#[async_trait]
pub trait FrameClassifier: Send + Sync {
    async fn infer(&self, frame: &FrameData) -> Result<Vec<Detection>>;
}

#[derive(Serialize)]
struct InferRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct InferResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Classifier backed by an HTTP inference service. The model runs out of
/// process; frames are shipped as base64 JPEG and detections come back as
/// JSON.
pub struct HttpClassifier {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpClassifier {
    /// Resolve `model` against the inference service. Fails when the
    /// service is unreachable or does not know the model, which the CLI
    /// treats as a startup error.
    pub async fn resolve(base_url: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::new();
        let url = format!("{}/models/{}", base_url.trim_end_matches('/'), model);

        let response = client.get(&url).send().await.map_err(|e| {
            CrashwatchError::ModelUnresolved {
                model: model.to_string(),
                details: format!("inference service unreachable: {}", e),
            }
        })?;

        if !response.status().is_success() {
            return Err(CrashwatchError::ModelUnresolved {
                model: model.to_string(),
                details: format!("inference service returned {}", response.status()),
            });
        }

        debug!(model = %model, "resolved inference model");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl FrameClassifier for HttpClassifier {
    async fn infer(&self, frame: &FrameData) -> Result<Vec<Detection>> {
        let image = base64::engine::general_purpose::STANDARD.encode(frame.data.as_ref());
        let url = format!("{}/models/{}/infer", self.base_url, self.model);

        let response = self
            .client
            .post(&url)
            .json(&InferRequest { image: &image })
            .send()
            .await
            .map_err(|e| CrashwatchError::Inference {
                details: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CrashwatchError::Inference {
                details: format!("inference service returned {}", response.status()),
            });
        }

        let body: InferResponse =
            response
                .json()
                .await
                .map_err(|e| CrashwatchError::Inference {
                    details: format!("malformed inference response: {}", e),
                })?;

        Ok(body.detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_deserializes_without_bbox() {
        let detection: Detection =
            serde_json::from_str(r#"{"label": "accident", "confidence": 0.72}"#).unwrap();
        assert_eq!(detection.label, "accident");
        assert!(detection.bbox.is_none());
    }

    #[test]
    fn test_infer_response_tolerates_empty_body() {
        let response: InferResponse = serde_json::from_str("{}").unwrap();
        assert!(response.detections.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_fails_when_unreachable() {
        // Nothing listens on this port; resolution must surface a model error.
        let result = HttpClassifier::resolve("http://127.0.0.1:1", "yolov8n").await;
        assert!(matches!(
            result,
            Err(CrashwatchError::ModelUnresolved { .. })
        ));
    }
}
