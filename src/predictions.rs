//! Prediction post-processing.
//!
//! Pure transformations from the raw classifier output to the record list
//! handed downstream: stable descending sort, best-match selection, optional
//! threshold and top-K filtering, output-shape remapping.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::config::{ClassifierConfig, OutputMode};
use crate::error::NodeError;
use crate::message::OutputRecord;
use crate::status::NodeStatus;

/// A class label paired with the probability the classifier assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class_name: String,
    pub probability: f32,
}

impl Prediction {
    pub fn new(class_name: impl Into<String>, probability: f32) -> Self {
        Self {
            class_name: class_name.into(),
            probability,
        }
    }
}

/// Post-processing result: the records to forward and the status to show.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub records: Vec<OutputRecord>,
    pub status: NodeStatus,
}

// Reverse comparator: higher probability sorts first, equal stays unordered
// so the (stable) sort keeps relative order on ties.
fn by_probability(a: &Prediction, b: &Prediction) -> Ordering {
    b.probability
        .partial_cmp(&a.probability)
        .unwrap_or(Ordering::Equal)
}

/// Stable descending sort by probability.
pub fn sort_by_probability(mut predictions: Vec<Prediction>) -> Vec<Prediction> {
    predictions.sort_by(by_probability);
    predictions
}

/// The prediction with strictly greatest probability; the earliest one wins
/// on ties.
pub fn best_prediction(predictions: &[Prediction]) -> Option<&Prediction> {
    let mut best: Option<&Prediction> = None;
    for prediction in predictions {
        match best {
            Some(current) if prediction.probability > current.probability => {
                best = Some(prediction)
            }
            None => best = Some(prediction),
            _ => {}
        }
    }
    best
}

// "<percent>% - <class>", rounded to the nearest percentage point.
fn best_text(best: &Prediction) -> String {
    let percent = (best.probability * 100.0).round() as i64;
    format!("{}% - {}", percent, best.class_name)
}

fn to_records(predictions: &[Prediction]) -> Vec<OutputRecord> {
    predictions
        .iter()
        .map(|p| OutputRecord {
            class: p.class_name.clone(),
            score: p.probability,
        })
        .collect()
}

/// Apply the configured output mode and filters to raw predictions.
///
/// An empty input list is an inference error: the classifier contract is one
/// probability per class label.
pub fn process(
    predictions: Vec<Prediction>,
    config: &ClassifierConfig,
) -> Result<Outcome, NodeError> {
    if predictions.is_empty() {
        return Err(NodeError::Inference(
            "classifier returned no predictions".to_string(),
        ));
    }

    let sorted = sort_by_probability(predictions);
    let status_text = best_text(&sorted[0]);

    match config.output {
        OutputMode::Best => Ok(Outcome {
            records: to_records(&sorted[..1]),
            status: NodeStatus::Text(status_text),
        }),
        OutputMode::All => {
            let mut filtered = sorted;
            if config.active_threshold {
                let cutoff = config.threshold / 100.0;
                filtered.retain(|p| p.probability > cutoff);
            }
            if config.active_max_results {
                filtered.truncate(config.max_results);
            }

            if filtered.is_empty() {
                return Ok(Outcome {
                    records: Vec::new(),
                    status: NodeStatus::Text(format!("score < {}%", config.threshold)),
                });
            }

            Ok(Outcome {
                records: to_records(&filtered),
                status: NodeStatus::Text(status_text),
            })
        }
    }
}
