//! Model lifecycle management.
//!
//! The manager owns the loading state machine (NotLoaded -> Loading ->
//! Ready/Error), fetches the model documents from the configured base URL
//! and swaps in a fresh `ModelHandle` on success. Readiness is the single
//! gate the inference side reads; only the manager writes it.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::backend::{Classifier, ClassifierFactory};
use crate::config::ClassifierConfig;
use crate::error::{ErrorSender, NodeError};
use crate::predictions::Prediction;
use crate::status::{NodeStatus, StatusKind, StatusReporter};

/// Model loading state. Written only by the manager, read by the inference
/// controller to gate execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceState {
    NotLoaded,
    Loading,
    Ready,
    Error,
}

/// `model.json` as served next to the weights. Kept loosely typed: the graph
/// itself belongs to the classifier factory, the pipeline only needs the
/// envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTopology {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub generated_by: Option<String>,
    #[serde(default)]
    pub converted_by: Option<String>,
    #[serde(default)]
    pub model_topology: serde_json::Value,
    #[serde(default)]
    pub weights_manifest: serde_json::Value,
}

/// `metadata.json`: class labels plus the input size the model was trained
/// at.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    #[serde(default)]
    pub model_name: Option<String>,
    pub labels: Vec<String>,
    #[serde(default)]
    pub image_size: Option<u32>,
}

/// A loaded classifier plus its label mapping. Replaced wholesale on reload,
/// never mutated; concurrent inferences share it read-only.
pub struct ModelHandle {
    labels: Vec<String>,
    classifier: Box<dyn Classifier>,
}

impl ModelHandle {
    pub fn new(labels: Vec<String>, classifier: Box<dyn Classifier>) -> Self {
        Self { labels, classifier }
    }

    pub fn class_labels(&self) -> &[String] {
        &self.labels
    }

    /// Run the classifier off the async runtime. Multiple handles may be
    /// in flight at once; the classifier implementation must tolerate that.
    pub async fn predict(
        self: Arc<Self>,
        image: image::DynamicImage,
    ) -> Result<Vec<Prediction>, NodeError> {
        tokio::task::spawn_blocking(move || self.classifier.predict(&image))
            .await
            .map_err(|e| NodeError::Inference(format!("prediction task failed: {}", e)))?
    }
}

pub struct ModelManager {
    config: ClassifierConfig,
    state: RwLock<InferenceState>,
    handle: RwLock<Option<Arc<ModelHandle>>>,
    factory: Arc<dyn ClassifierFactory>,
    status: StatusReporter,
    errors: ErrorSender,
}

impl ModelManager {
    pub fn new(
        config: ClassifierConfig,
        factory: Arc<dyn ClassifierFactory>,
        status: StatusReporter,
        errors: ErrorSender,
    ) -> Self {
        Self {
            config,
            state: RwLock::new(InferenceState::NotLoaded),
            handle: RwLock::new(None),
            factory,
            status,
            errors,
        }
    }

    pub async fn state(&self) -> InferenceState {
        *self.state.read().await
    }

    pub async fn is_ready(&self) -> bool {
        *self.state.read().await == InferenceState::Ready
    }

    /// Current handle, if a load has succeeded.
    pub async fn handle(&self) -> Option<Arc<ModelHandle>> {
        self.handle.read().await.clone()
    }

    async fn set_state(&self, next: InferenceState) {
        let mut current = self.state.write().await;
        info!("inference state transition: {:?} -> {:?}", *current, next);
        *current = next;
    }

    /// Load (or reload) the model. Each call fully re-runs the load and
    /// replaces the handle on success.
    ///
    /// Configuration violations (unsupported mode, empty URL) are surfaced
    /// through the status indicator only. Fetch/parse/build failures are
    /// additionally routed to the operator error channel, exactly once.
    pub async fn load(&self) -> Result<(), NodeError> {
        self.status
            .report(NodeStatus::Symbolic(StatusKind::ModelLoading));
        self.set_state(InferenceState::Loading).await;

        if self.config.mode != "online" {
            self.status
                .report(NodeStatus::Text("mode not supported".to_string()));
            self.set_state(InferenceState::NotLoaded).await;
            return Err(NodeError::Config(format!(
                "unsupported mode: {}",
                self.config.mode
            )));
        }
        if self.config.model_url.is_empty() {
            self.status
                .report(NodeStatus::Text("set a New URL".to_string()));
            self.set_state(InferenceState::NotLoaded).await;
            return Err(NodeError::Config("model URL is empty".to_string()));
        }

        match self.fetch_and_build().await {
            Ok(handle) => {
                *self.handle.write().await = Some(Arc::new(handle));
                self.set_state(InferenceState::Ready).await;
                self.status
                    .report(NodeStatus::Symbolic(StatusKind::ModelReady));
                crate::metrics::MODEL_LOADS.inc();
                info!(model_url = %self.config.model_url, "model loaded");
                Ok(())
            }
            Err(err) => {
                self.set_state(InferenceState::Error).await;
                crate::metrics::MODEL_LOAD_FAILURES.inc();
                error!(model_url = %self.config.model_url, "model load failed: {}", err);
                let _ = self.errors.send(err.clone());
                self.status
                    .report(NodeStatus::Symbolic(StatusKind::ModelError));
                Err(err)
            }
        }
    }

    async fn fetch_and_build(&self) -> Result<ModelHandle, NodeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| NodeError::ModelLoad(format!("HTTP client init failed: {}", e)))?;

        let model_url = format!("{}model.json", self.config.model_url);
        let metadata_url = format!("{}metadata.json", self.config.model_url);

        let topology: ModelTopology = fetch_json(&client, &model_url).await?;
        let metadata: ModelMetadata = fetch_json(&client, &metadata_url).await?;
        if metadata.labels.is_empty() {
            return Err(NodeError::ModelLoad(
                "metadata has no class labels".to_string(),
            ));
        }

        let classifier = self
            .factory
            .build(&client, &self.config.model_url, &topology, &metadata)
            .await?;

        Ok(ModelHandle::new(metadata.labels, classifier))
    }

    #[cfg(test)]
    pub(crate) async fn force_ready(&self, handle: ModelHandle) {
        *self.handle.write().await = Some(Arc::new(handle));
        self.set_state(InferenceState::Ready).await;
    }
}

async fn fetch_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, NodeError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| NodeError::ModelLoad(format!("fetch {} failed: {}", url, e)))?;
    if !response.status().is_success() {
        return Err(NodeError::ModelLoad(format!(
            "HTTP error fetching {}: {}",
            url,
            response.status()
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| NodeError::ModelLoad(format!("parse {} failed: {}", url, e)))
}
