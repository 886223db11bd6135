//! Node lifecycle.
//!
//! Outer state machine binding construction (spawns the model load),
//! message arrival (spawns one inference task per message) and shutdown
//! (clears the status indicator). The host framework talks to a running
//! node exclusively through the channel endpoints handed out at build time.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backend::ClassifierFactory;
use crate::config::ClassifierConfig;
use crate::error::ErrorReceiver;
use crate::inference::InferenceController;
use crate::message::Message;
use crate::model::ModelManager;
use crate::status::{NodeStatus, StatusKind, StatusReceiver, StatusReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Constructed,
    LoadingModel,
    Ready,
    Errored,
    Closed,
}

/// Channel endpoints the host framework wires up.
pub struct NodeChannels {
    pub input: mpsc::UnboundedSender<Message>,
    pub output: mpsc::UnboundedReceiver<Message>,
    pub status: StatusReceiver,
    pub errors: ErrorReceiver,
}

pub struct ClassifierNode {
    controller: InferenceController,
    manager: Arc<ModelManager>,
    status: StatusReporter,
    state: Arc<RwLock<LifecycleState>>,
    load_task: Option<JoinHandle<()>>,
    input_rx: mpsc::UnboundedReceiver<Message>,
}

impl ClassifierNode {
    /// Build a node and the channel endpoints the host attaches to.
    pub fn new(
        config: ClassifierConfig,
        factory: Arc<dyn ClassifierFactory>,
    ) -> (Self, NodeChannels) {
        let (status, status_rx) = StatusReporter::channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();

        let config = Arc::new(config);
        let manager = Arc::new(ModelManager::new(
            (*config).clone(),
            factory,
            status.clone(),
            error_tx.clone(),
        ));
        let controller = InferenceController::new(
            Arc::clone(&config),
            Arc::clone(&manager),
            status.clone(),
            error_tx,
            output_tx,
        );

        let node = Self {
            controller,
            manager,
            status,
            state: Arc::new(RwLock::new(LifecycleState::Constructed)),
            load_task: None,
            input_rx,
        };
        let channels = NodeChannels {
            input: input_tx,
            output: output_rx,
            status: status_rx,
            errors: error_rx,
        };
        (node, channels)
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Readiness query: true once the model load has succeeded.
    pub async fn is_ready(&self) -> bool {
        self.manager.is_ready().await
    }

    async fn set_state(&self, next: LifecycleState) {
        transition(&self.state, next).await;
    }

    /// Kick off the model load. Fire-and-forget relative to construction,
    /// but the task handle is kept so the load remains an explicit task
    /// rather than an implicit completion ordering.
    pub async fn start(&mut self) {
        self.set_state(LifecycleState::LoadingModel).await;

        let manager = Arc::clone(&self.manager);
        let state = Arc::clone(&self.state);
        self.load_task = Some(tokio::spawn(async move {
            let next = match manager.load().await {
                Ok(()) => LifecycleState::Ready,
                Err(_) => LifecycleState::Errored,
            };
            // shutdown may have won the race against the load
            if *state.read().await != LifecycleState::Closed {
                transition(&state, next).await;
            }
        }));
    }

    /// Drive the node until the input channel closes or shutdown fires.
    /// Messages are not queued or serialized: each spawns an independent
    /// inference task against the shared model handle.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                msg = self.input_rx.recv() => match msg {
                    Some(msg) => {
                        let controller = self.controller.clone();
                        tokio::spawn(async move { controller.run(msg).await });
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.close().await;
    }

    /// Clear the status indicator and stop. Nothing else is released; the
    /// model handle goes away with the node.
    pub async fn close(&mut self) {
        self.status.report(NodeStatus::Symbolic(StatusKind::Close));
        self.set_state(LifecycleState::Closed).await;
        if let Some(task) = self.load_task.take() {
            if !task.is_finished() {
                warn!("closing while model load still in flight");
            }
        }
        info!("node closed");
    }
}

async fn transition(state: &RwLock<LifecycleState>, next: LifecycleState) {
    let mut current = state.write().await;
    info!("lifecycle transition: {:?} -> {:?}", *current, next);
    *current = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Classifier, ClassifierFactory};
    use crate::error::NodeError;
    use crate::model::{ModelMetadata, ModelTopology};
    use async_trait::async_trait;
    use tokio::time::{sleep, Duration};

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

    fn config(mode: &str, model_url: &str) -> ClassifierConfig {
        ClassifierConfig {
            mode: mode.to_string(),
            model_url: model_url.to_string(),
            active_threshold: false,
            threshold: 50.0,
            active_max_results: false,
            max_results: 10,
            output: crate::config::OutputMode::Best,
            pass_through: false,
        }
    }

    #[tokio::test]
    async fn starts_constructed_and_errors_on_bad_mode() {
        let (mut node, _channels) = ClassifierNode::new(config("local", "https://x/"), Arc::new(NeverFactory));
        assert_eq!(node.state().await, LifecycleState::Constructed);

        node.start().await;
        if let Some(task) = node.load_task.take() {
            task.await.unwrap();
        }
        assert_eq!(node.state().await, LifecycleState::Errored);
        assert!(!node.is_ready().await);
    }

    #[tokio::test]
    async fn message_before_ready_is_rejected_without_output() {
        let (node, mut channels) =
            ClassifierNode::new(config("online", "https://x/"), Arc::new(NeverFactory));

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let node_task = tokio::spawn(node.run(shutdown_rx));

        channels
            .input
            .send(Message::from_image(vec![1, 2, 3]))
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            channels.errors.try_recv(),
            Ok(NodeError::NotReady)
        ));
        assert!(channels.output.try_recv().is_err());

        drop(channels.input);
        node_task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_clears_status_and_closes() {
        let (node, mut channels) =
            ClassifierNode::new(config("online", "https://x/"), Arc::new(NeverFactory));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let node_task = tokio::spawn(node.run(shutdown_rx));

        shutdown_tx.send(true).unwrap();
        node_task.await.unwrap();

        // the last update on the channel clears the indicator
        let mut last = None;
        while let Ok(update) = channels.status.try_recv() {
            last = Some(update);
        }
        assert_eq!(last, Some(None));
    }

    #[tokio::test]
    async fn input_channel_close_also_shuts_the_node_down() {
        let (node, channels) =
            ClassifierNode::new(config("online", "https://x/"), Arc::new(NeverFactory));

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let node_task = tokio::spawn(node.run(shutdown_rx));

        drop(channels.input);
        node_task.await.unwrap();
    }
}
