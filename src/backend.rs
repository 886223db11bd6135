//! Classifier backend seam.
//!
//! The pipeline never talks to an inference engine directly: it sees a
//! `Classifier` built by a `ClassifierFactory` from the fetched model
//! documents. The default factory runs the ONNX export published next to
//! `model.json`; swapping the factory swaps the engine.

use async_trait::async_trait;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::NodeError;
use crate::model::{ModelMetadata, ModelTopology};
use crate::predictions::Prediction;

/// Input edge the model expects when the metadata does not say.
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Executes one decoded image against a loaded model. Implementations must
/// be safe to call from concurrent inference tasks.
pub trait Classifier: Send + Sync {
    fn predict(&self, image: &DynamicImage) -> Result<Vec<Prediction>, NodeError>;
}

/// Builds a runnable classifier from the fetched model documents.
#[async_trait]
pub trait ClassifierFactory: Send + Sync {
    async fn build(
        &self,
        client: &reqwest::Client,
        base_url: &str,
        topology: &ModelTopology,
        metadata: &ModelMetadata,
    ) -> Result<Box<dyn Classifier>, NodeError>;
}

/// Default factory: ONNX Runtime over the graph export served alongside the
/// model documents (`<base_url>model.onnx`).
pub struct OnnxFactory;

#[async_trait]
impl ClassifierFactory for OnnxFactory {
    async fn build(
        &self,
        client: &reqwest::Client,
        base_url: &str,
        topology: &ModelTopology,
        metadata: &ModelMetadata,
    ) -> Result<Box<dyn Classifier>, NodeError> {
        let graph_url = format!("{}model.onnx", base_url);
        debug!(format = ?topology.format, url = %graph_url, "building ONNX classifier");

        let response = client
            .get(&graph_url)
            .send()
            .await
            .map_err(|e| NodeError::ModelLoad(format!("fetch {} failed: {}", graph_url, e)))?;
        if !response.status().is_success() {
            return Err(NodeError::ModelLoad(format!(
                "HTTP error fetching {}: {}",
                graph_url,
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| NodeError::ModelLoad(format!("read {} failed: {}", graph_url, e)))?;

        let session = Session::builder()
            .map_err(|e| NodeError::ModelLoad(format!("session builder error: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| NodeError::ModelLoad(format!("optimization error: {}", e)))?
            .commit_from_memory(&bytes)
            .map_err(|e| NodeError::ModelLoad(format!("load from memory error: {}", e)))?;

        info!(
            model = ?metadata.model_name,
            bytes = bytes.len(),
            "ONNX model loaded"
        );

        Ok(Box::new(OnnxClassifier {
            session: Mutex::new(session),
            labels: metadata.labels.clone(),
            input_size: metadata.image_size.unwrap_or(DEFAULT_IMAGE_SIZE),
        }))
    }
}

/// ONNX Runtime classifier. The session wants `&mut self` to run, so a lock
/// serializes calls; shared `Classifier` handles stay read-only.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    labels: Vec<String>,
    input_size: u32,
}

impl Classifier for OnnxClassifier {
    fn predict(&self, image: &DynamicImage) -> Result<Vec<Prediction>, NodeError> {
        let size = self.input_size;
        let rgb = image
            .resize_exact(size, size, image::imageops::FilterType::Triangle)
            .to_rgb8();

        // NHWC float input, scaled to [-1, 1] as the model was trained with
        let mut input = Array4::<f32>::zeros((1, size as usize, size as usize, 3));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for channel in 0..3 {
                input[[0, y as usize, x as usize, channel]] =
                    pixel[channel] as f32 / 127.5 - 1.0;
            }
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| NodeError::Inference("classifier session poisoned".to_string()))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| NodeError::Inference("model defines no outputs".to_string()))?;

        let input_tensor = ort::value::Value::from_array(input)
            .map_err(|e| NodeError::Inference(format!("tensor error: {}", e)))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| NodeError::Inference(format!("inference failed: {}", e)))?;

        let output = outputs
            .get(&output_name)
            .ok_or_else(|| NodeError::Inference("no output tensor".to_string()))?;
        let (_, scores) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| NodeError::Inference(format!("extract error: {}", e)))?;

        Ok(self
            .labels
            .iter()
            .enumerate()
            .map(|(i, label)| Prediction {
                class_name: label.clone(),
                probability: scores.get(i).copied().unwrap_or(0.0),
            })
            .collect())
    }
}
