pub mod backend;
pub mod config;
pub mod error;
pub mod inference;
pub mod message;
pub mod metrics;
pub mod model;
pub mod node;
pub mod predictions;
pub mod status;
pub mod transport;

// Re-export commonly used types for easier testing
pub use crate::backend::{Classifier, ClassifierFactory, OnnxFactory};
pub use crate::config::{ClassifierConfig, Config, MqttConfig, OutputMode};
pub use crate::error::{ErrorReceiver, ErrorSender, NodeError};
pub use crate::inference::InferenceController;
pub use crate::message::{Message, OutputRecord, Payload};
pub use crate::model::{InferenceState, ModelHandle, ModelManager, ModelMetadata, ModelTopology};
pub use crate::node::{ClassifierNode, LifecycleState, NodeChannels};
pub use crate::predictions::{best_prediction, process, sort_by_probability, Outcome, Prediction};
pub use crate::status::{NodeStatus, StatusIndicator, StatusKind, StatusReporter};
pub use crate::transport::MqttTransport;
