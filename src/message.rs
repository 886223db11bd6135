use serde::{Deserialize, Serialize};

use base64::Engine as _;

/// One ranked classification result; the externally visible record shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub class: String,
    pub score: f32,
}

/// Generic message payload. Arrives as binary/text/JSON from the host and
/// leaves as the record list produced by inference.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Binary(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
    Records(Vec<OutputRecord>),
}

impl Payload {
    /// JSON view used when handing the message back to the host.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Payload::Empty => serde_json::Value::Null,
            Payload::Binary(bytes) => serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(bytes),
            ),
            Payload::Text(text) => serde_json::Value::String(text.clone()),
            Payload::Json(value) => value.clone(),
            Payload::Records(records) => {
                serde_json::to_value(records).unwrap_or(serde_json::Value::Null)
            }
        }
    }
}

/// Unit of work flowing through the node. Transient: handed to the output
/// channel after inference, never retained.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub image: Vec<u8>,
    pub payload: Payload,
    /// Class-label list of the model that served this message, attached
    /// during inference.
    pub classes: Option<Vec<String>>,
}

impl Message {
    pub fn new(image: Vec<u8>, payload: Payload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            image,
            payload,
            classes: None,
        }
    }

    /// Message whose publish body is the image itself.
    pub fn from_image(image: Vec<u8>) -> Self {
        let payload = Payload::Binary(image.clone());
        Self::new(image, payload)
    }
}
