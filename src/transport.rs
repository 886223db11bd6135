//! MQTT host transport.
//!
//! Binds the node's channel endpoints to an MQTT broker: publishes on the
//! input topic become messages, results are republished as JSON on the
//! output topic, and status updates land retained on the status topic so
//! the host side can render the indicator.

use anyhow::Result;
use base64::Engine as _;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::MqttConfig;
use crate::error::NodeError;
use crate::message::{Message, Payload};
use crate::status::{StatusIndicator, StatusReceiver};

/// JSON envelope accepted on the input topic. A publish that is not an
/// envelope is treated as the raw image bytes themselves.
#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    image: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// Result published on the output topic.
#[derive(Debug, Serialize)]
struct OutboundEnvelope<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    classes: Option<&'a [String]>,
    payload: serde_json::Value,
    timestamp: i64,
}

/// Turn a publish body into a node message.
fn message_from_publish(body: &[u8]) -> Result<Message, NodeError> {
    if let Ok(envelope) = serde_json::from_slice::<InboundEnvelope>(body) {
        if let Some(encoded) = envelope.image {
            let image = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| NodeError::InvalidData(format!("base64 image: {}", e)))?;
            let payload = envelope
                .payload
                .map(Payload::Json)
                .unwrap_or(Payload::Empty);
            return Ok(Message::new(image, payload));
        }
    }
    Ok(Message::from_image(body.to_vec()))
}

pub struct MqttTransport {
    client: AsyncClient,
    config: MqttConfig,
    input_tx: mpsc::UnboundedSender<Message>,
}

impl MqttTransport {
    pub fn new(
        config: MqttConfig,
        input_tx: mpsc::UnboundedSender<Message>,
    ) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(
            &config.client_id,
            &config.broker_host,
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(60));

        let (client, eventloop) = AsyncClient::new(options, 10);

        (
            Self {
                client,
                config,
                input_tx,
            },
            eventloop,
        )
    }

    async fn subscribe_input(&self) -> Result<()> {
        tracing::info!("Subscribing to input topic: {}", self.config.input_topic);
        self.client
            .subscribe(self.config.input_topic.clone(), QoS::AtLeastOnce)
            .await?;
        Ok(())
    }

    /// Bridge MQTT and the node channels until the node side closes.
    pub async fn run(
        self,
        mut eventloop: EventLoop,
        mut output_rx: mpsc::UnboundedReceiver<Message>,
        mut status_rx: StatusReceiver,
    ) -> Result<()> {
        tracing::info!("MQTT transport started");

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if publish.topic != self.config.input_topic {
                            continue;
                        }
                        crate::metrics::MESSAGES_IN.inc();
                        match message_from_publish(&publish.payload) {
                            Ok(msg) => {
                                tracing::debug!(id = %msg.id, bytes = msg.image.len(), "input message received");
                                if self.input_tx.send(msg).is_err() {
                                    tracing::info!("Node input closed, stopping transport");
                                    break;
                                }
                            }
                            Err(err) => tracing::warn!("Dropping malformed input message: {}", err),
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("Connected to MQTT broker");
                        if let Err(e) = self.subscribe_input().await {
                            tracing::error!("Failed to subscribe after connection: {}", e);
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        tracing::info!("Disconnected from MQTT broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("MQTT connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                },

                output = output_rx.recv() => match output {
                    Some(msg) => {
                        if let Err(e) = self.publish_result(&msg).await {
                            tracing::error!("Failed to publish result: {}", e);
                        }
                    }
                    None => break,
                },

                status = status_rx.recv() => match status {
                    Some(update) => {
                        if let Err(e) = self.publish_status(update.as_ref()).await {
                            tracing::error!("Failed to publish status: {}", e);
                        }
                    }
                    None => break,
                },
            }
        }

        Ok(())
    }

    async fn publish_result(&self, msg: &Message) -> Result<(), NodeError> {
        let envelope = OutboundEnvelope {
            id: &msg.id,
            classes: msg.classes.as_deref(),
            payload: msg.payload.to_json(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let body = serde_json::to_vec(&envelope)
            .map_err(|e| NodeError::Transport(e.to_string()))?;

        self.client
            .publish(
                self.config.output_topic.clone(),
                QoS::AtLeastOnce,
                false,
                body,
            )
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        crate::metrics::MESSAGES_OUT.inc();
        Ok(())
    }

    // Retained publish so late subscribers see the current indicator; an
    // empty body clears it.
    async fn publish_status(&self, indicator: Option<&StatusIndicator>) -> Result<(), NodeError> {
        let body = match indicator {
            Some(indicator) => serde_json::to_vec(indicator)
                .map_err(|e| NodeError::Transport(e.to_string()))?,
            None => Vec::new(),
        };

        self.client
            .publish(self.config.status_topic.clone(), QoS::AtLeastOnce, true, body)
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))
    }
}
