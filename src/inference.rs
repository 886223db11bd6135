//! Per-message inference orchestration.
//!
//! One controller per node; each `run` handles exactly one message. Calls
//! overlap freely against the shared model handle, there is no internal
//! queuing. Every failure is reported to the operator channel and drops the
//! message; a filtered-to-empty result is not a failure and still forwards.

use base64::Engine as _;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::ClassifierConfig;
use crate::error::{ErrorSender, NodeError};
use crate::message::{Message, Payload};
use crate::model::ModelManager;
use crate::predictions;
use crate::status::{NodeStatus, StatusKind, StatusReporter};

#[derive(Clone)]
pub struct InferenceController {
    config: Arc<ClassifierConfig>,
    manager: Arc<ModelManager>,
    status: StatusReporter,
    errors: ErrorSender,
    output: mpsc::UnboundedSender<Message>,
}

impl InferenceController {
    pub fn new(
        config: Arc<ClassifierConfig>,
        manager: Arc<ModelManager>,
        status: StatusReporter,
        errors: ErrorSender,
        output: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            config,
            manager,
            status,
            errors,
            output,
        }
    }

    /// Process one message end to end. Errors are reported, never propagated.
    pub async fn run(&self, msg: Message) {
        if let Err(err) = self.infer(msg).await {
            crate::metrics::INFERENCE_ERRORS.inc();
            let _ = self.errors.send(err);
        }
    }

    async fn infer(&self, mut msg: Message) -> Result<(), NodeError> {
        if !self.manager.is_ready().await || self.config.model_url.is_empty() {
            return Err(NodeError::NotReady);
        }
        let handle = self.manager.handle().await.ok_or(NodeError::NotReady)?;

        if self.config.pass_through {
            msg.image = passthrough_image(&msg.payload)?;
        }

        let image = image::load_from_memory(&msg.image)
            .map_err(|e| NodeError::Decode(e.to_string()))?;
        msg.classes = Some(handle.class_labels().to_vec());

        self.status.report(NodeStatus::Symbolic(StatusKind::Infering));
        let timer = crate::metrics::Timer::new();
        let raw = handle.predict(image).await?;
        timer.observe_duration_seconds(&crate::metrics::INFERENCE_LATENCY);

        let outcome = predictions::process(raw, &self.config)?;
        self.status.report(outcome.status);
        msg.payload = Payload::Records(outcome.records);

        crate::metrics::INFERENCES_TOTAL.inc();
        self.output
            .send(msg)
            .map_err(|_| NodeError::Inference("output channel closed".to_string()))?;
        Ok(())
    }
}

/// Pass-through: the inbound payload is the image to classify.
fn passthrough_image(payload: &Payload) -> Result<Vec<u8>, NodeError> {
    match payload {
        Payload::Binary(bytes) => Ok(bytes.clone()),
        Payload::Text(text) => base64::engine::general_purpose::STANDARD
            .decode(text.trim())
            .map_err(|e| NodeError::InvalidData(format!("base64 decode failed: {}", e))),
        other => Err(NodeError::InvalidData(format!(
            "payload is not an image: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Classifier, ClassifierFactory};
    use crate::config::OutputMode;
    use crate::model::{ModelHandle, ModelMetadata, ModelTopology};
    use crate::predictions::Prediction;
    use async_trait::async_trait;
    use base64::Engine as _;
    use std::io::Cursor;

    struct FixedClassifier {
        predictions: Vec<Prediction>,
    }

    impl Classifier for FixedClassifier {
        fn predict(
            &self,
            _image: &image::DynamicImage,
        ) -> Result<Vec<Prediction>, NodeError> {
            Ok(self.predictions.clone())
        }
    }

    struct NeverFactory;

    #[async_trait]
    impl ClassifierFactory for NeverFactory {
        async fn build(
            &self,
            _client: &reqwest::Client,
            _base_url: &str,
            _topology: &ModelTopology,
            _metadata: &ModelMetadata,
        ) -> Result<Box<dyn Classifier>, NodeError> {
            panic!("factory must not be reached");
        }
    }

    fn config() -> ClassifierConfig {
        ClassifierConfig {
            mode: "online".to_string(),
            model_url: "https://models.example.com/abc/".to_string(),
            active_threshold: false,
            threshold: 50.0,
            active_max_results: false,
            max_results: 10,
            output: OutputMode::Best,
            pass_through: false,
        }
    }

    struct Harness {
        controller: InferenceController,
        manager: Arc<ModelManager>,
        output_rx: mpsc::UnboundedReceiver<Message>,
        error_rx: crate::error::ErrorReceiver,
        status_rx: crate::status::StatusReceiver,
    }

    fn harness(config: ClassifierConfig) -> Harness {
        let (status, status_rx) = StatusReporter::channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();

        let config = Arc::new(config);
        let manager = Arc::new(ModelManager::new(
            (*config).clone(),
            Arc::new(NeverFactory),
            status.clone(),
            error_tx.clone(),
        ));
        let controller = InferenceController::new(
            config,
            manager.clone(),
            status,
            error_tx,
            output_tx,
        );

        Harness {
            controller,
            manager,
            output_rx,
            error_rx,
            status_rx,
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([128, 64, 32]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    async fn make_ready(manager: &ModelManager, predictions: Vec<Prediction>) {
        let classifier = Box::new(FixedClassifier { predictions });
        manager
            .force_ready(ModelHandle::new(
                vec!["cat".to_string(), "dog".to_string()],
                classifier,
            ))
            .await;
    }

    #[tokio::test]
    async fn rejects_message_when_not_ready() {
        let mut h = harness(config());

        h.controller.run(Message::from_image(png_bytes())).await;

        assert!(matches!(h.error_rx.try_recv(), Ok(NodeError::NotReady)));
        assert!(h.output_rx.try_recv().is_err(), "no output may be emitted");
    }

    #[tokio::test]
    async fn rejects_message_when_url_is_empty_even_if_loaded() {
        let mut cfg = config();
        cfg.model_url = String::new();
        let mut h = harness(cfg);
        make_ready(&h.manager, vec![Prediction::new("cat", 0.9)]).await;

        h.controller.run(Message::from_image(png_bytes())).await;

        assert!(matches!(h.error_rx.try_recv(), Ok(NodeError::NotReady)));
        assert!(h.output_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn forwards_best_result_with_classes_attached() {
        let mut h = harness(config());
        make_ready(
            &h.manager,
            vec![Prediction::new("cat", 0.91), Prediction::new("dog", 0.09)],
        )
        .await;

        h.controller.run(Message::from_image(png_bytes())).await;

        let msg = h.output_rx.try_recv().expect("message must be forwarded");
        assert_eq!(
            msg.classes.as_deref(),
            Some(&["cat".to_string(), "dog".to_string()][..])
        );
        match msg.payload {
            Payload::Records(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].class, "cat");
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        // infering indicator followed by the best-match text
        let infering = h.status_rx.recv().await.unwrap().unwrap();
        assert_eq!(infering.text, "infering...");
        let best = h.status_rx.recv().await.unwrap().unwrap();
        assert_eq!(best.text, "91% - cat");
    }

    #[tokio::test]
    async fn filtered_empty_result_still_forwards_empty_payload() {
        let mut cfg = config();
        cfg.output = OutputMode::All;
        cfg.active_threshold = true;
        cfg.threshold = 50.0;
        let mut h = harness(cfg);
        make_ready(
            &h.manager,
            vec![Prediction::new("cat", 0.3), Prediction::new("dog", 0.2)],
        )
        .await;

        h.controller.run(Message::from_image(png_bytes())).await;

        let msg = h.output_rx.try_recv().expect("zero-result case forwards");
        assert_eq!(msg.payload, Payload::Records(Vec::new()));
        assert!(h.error_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn decode_failure_is_reported_and_drops_message() {
        let mut h = harness(config());
        make_ready(&h.manager, vec![Prediction::new("cat", 0.9)]).await;

        h.controller
            .run(Message::from_image(b"not an image".to_vec()))
            .await;

        assert!(matches!(h.error_rx.try_recv(), Ok(NodeError::Decode(_))));
        assert!(h.output_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pass_through_uses_payload_as_image() {
        let mut cfg = config();
        cfg.pass_through = true;
        let mut h = harness(cfg);
        make_ready(&h.manager, vec![Prediction::new("cat", 0.8)]).await;

        // stale image bytes; the payload carries the real image
        let msg = Message::new(b"stale".to_vec(), Payload::Binary(png_bytes()));
        h.controller.run(msg).await;

        let out = h.output_rx.try_recv().expect("message must be forwarded");
        assert_eq!(out.image, png_bytes());
    }

    #[test]
    fn pass_through_decodes_base64_text_payloads() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"raw");
        let bytes = passthrough_image(&Payload::Text(encoded)).unwrap();
        assert_eq!(bytes, b"raw");

        assert!(matches!(
            passthrough_image(&Payload::Text("!!!".to_string())),
            Err(NodeError::InvalidData(_))
        ));
        assert!(matches!(
            passthrough_image(&Payload::Empty),
            Err(NodeError::InvalidData(_))
        ));
    }
}
