//! Status reporting.
//!
//! The host framework renders a small status indicator per node. The node
//! only ever emits a closed set of symbolic states plus free-form text for
//! dynamic statuses (best-match summaries, threshold messages); the mapping
//! to a visible (fill, shape, text) triple lives here.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Closed set of symbolic node statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    ModelReady,
    ModelLoading,
    Infering,
    ModelError,
    Error,
    Close,
}

/// A status update: a symbolic state or free-form text.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeStatus {
    Symbolic(StatusKind),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fill {
    Green,
    Yellow,
    Blue,
    Red,
    Grey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Dot,
    Ring,
}

/// What the host actually renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusIndicator {
    pub fill: Fill,
    pub shape: Shape,
    pub text: String,
}

impl StatusIndicator {
    fn new(fill: Fill, shape: Shape, text: &str) -> Self {
        Self {
            fill,
            shape,
            text: text.to_string(),
        }
    }
}

impl NodeStatus {
    /// Resolve to the indicator shown by the host; `None` clears it.
    pub fn indicator(&self) -> Option<StatusIndicator> {
        match self {
            NodeStatus::Symbolic(kind) => match kind {
                StatusKind::ModelReady => {
                    Some(StatusIndicator::new(Fill::Green, Shape::Dot, "ready"))
                }
                StatusKind::ModelLoading => Some(StatusIndicator::new(
                    Fill::Yellow,
                    Shape::Ring,
                    "loading model...",
                )),
                StatusKind::Infering => {
                    Some(StatusIndicator::new(Fill::Blue, Shape::Ring, "infering..."))
                }
                StatusKind::ModelError => {
                    Some(StatusIndicator::new(Fill::Red, Shape::Dot, "model error"))
                }
                StatusKind::Error => Some(StatusIndicator::new(Fill::Red, Shape::Dot, "error")),
                StatusKind::Close => None,
            },
            NodeStatus::Text(text) => Some(StatusIndicator::new(Fill::Grey, Shape::Dot, text)),
        }
    }
}

pub type StatusSender = mpsc::UnboundedSender<Option<StatusIndicator>>;
pub type StatusReceiver = mpsc::UnboundedReceiver<Option<StatusIndicator>>;

/// Pushes indicator updates to the host-facing channel. Last write wins:
/// concurrent inferences may interleave updates, completion order decides.
#[derive(Clone)]
pub struct StatusReporter {
    tx: StatusSender,
}

impl StatusReporter {
    pub fn channel() -> (Self, StatusReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn report(&self, status: NodeStatus) {
        let indicator = status.indicator();
        tracing::debug!(?indicator, "status update");
        // The host side may already be gone during shutdown.
        let _ = self.tx.send(indicator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbolic_states_map_to_fixed_triples() {
        let ready = NodeStatus::Symbolic(StatusKind::ModelReady)
            .indicator()
            .unwrap();
        assert_eq!(ready.fill, Fill::Green);
        assert_eq!(ready.shape, Shape::Dot);
        assert_eq!(ready.text, "ready");

        let loading = NodeStatus::Symbolic(StatusKind::ModelLoading)
            .indicator()
            .unwrap();
        assert_eq!(loading.fill, Fill::Yellow);
        assert_eq!(loading.shape, Shape::Ring);
        assert_eq!(loading.text, "loading model...");

        let infering = NodeStatus::Symbolic(StatusKind::Infering)
            .indicator()
            .unwrap();
        assert_eq!(infering.fill, Fill::Blue);
        assert_eq!(infering.shape, Shape::Ring);
        assert_eq!(infering.text, "infering...");

        let model_error = NodeStatus::Symbolic(StatusKind::ModelError)
            .indicator()
            .unwrap();
        assert_eq!(model_error.fill, Fill::Red);
        assert_eq!(model_error.text, "model error");

        let error = NodeStatus::Symbolic(StatusKind::Error).indicator().unwrap();
        assert_eq!(error.fill, Fill::Red);
        assert_eq!(error.text, "error");
    }

    #[test]
    fn close_clears_the_indicator() {
        assert!(NodeStatus::Symbolic(StatusKind::Close).indicator().is_none());
    }

    #[test]
    fn free_text_renders_grey_dot() {
        let status = NodeStatus::Text("91% - cat".to_string()).indicator().unwrap();
        assert_eq!(status.fill, Fill::Grey);
        assert_eq!(status.shape, Shape::Dot);
        assert_eq!(status.text, "91% - cat");
    }

    #[tokio::test]
    async fn reporter_delivers_updates_in_order() {
        let (reporter, mut rx) = StatusReporter::channel();

        reporter.report(NodeStatus::Symbolic(StatusKind::ModelLoading));
        reporter.report(NodeStatus::Symbolic(StatusKind::Close));

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.text, "loading model...");
        assert!(rx.recv().await.unwrap().is_none());
    }
}
