use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::sync::watch;

use classifier_node::backend::OnnxFactory;
use classifier_node::config::Config;
use classifier_node::metrics;
use classifier_node::node::{ClassifierNode, NodeChannels};
use classifier_node::transport::MqttTransport;

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Prometheus metrics endpoint
async fn metrics_handler() -> String {
    metrics::export_metrics()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with filters
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting image classification node...");

    // Initialize metrics
    metrics::init_metrics();

    // Load configuration
    let config = Config::load()?;

    // Build the node and kick off the model load
    let (mut node, channels) = ClassifierNode::new(
        config.classifier_config.clone(),
        Arc::new(OnnxFactory),
    );
    node.start().await;

    let NodeChannels {
        input,
        output,
        status,
        mut errors,
    } = channels;

    // Single consolidated operator error path
    tokio::spawn(async move {
        while let Some(err) = errors.recv().await {
            tracing::error!("node error: {}", err);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let node_task = tokio::spawn(node.run(shutdown_rx));

    // MQTT host transport
    if config.mqtt_config.enabled {
        tracing::info!(
            "Connecting MQTT transport to {}:{}",
            config.mqtt_config.broker_host,
            config.mqtt_config.broker_port
        );
        let (transport, eventloop) = MqttTransport::new(config.mqtt_config.clone(), input.clone());
        tokio::spawn(async move {
            if let Err(e) = transport.run(eventloop, output, status).await {
                tracing::error!("MQTT transport stopped: {}", e);
            }
        });
    } else {
        tracing::warn!("MQTT transport disabled; node has no input source");
    }

    // Observability server
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));
    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.api_host, config.api_port)).await?;
    tracing::info!(
        "Observability server listening on {}:{}",
        config.api_host,
        config.api_port
    );

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    // Keeps the input endpoint alive until shutdown so the node only stops
    // through the watch channel.
    drop(input);
    let _ = shutdown_tx.send(true);
    let _ = node_task.await;

    Ok(())
}
