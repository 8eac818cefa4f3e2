//! Thin AMQP layer over lapin.
//!
//! The daemon only uses direct publish/consume on the default exchange:
//! one well-known control queue plus one queue per running schedule, all
//! declared on demand and consumed with `no_ack` (at-most-once).

use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions, QueuePurgeOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::BrokerError;

/// Broker connection factory.
#[derive(Debug, Clone)]
pub struct Broker {
    url: String,
}

impl Broker {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Establish a fresh connection and channel.
    pub async fn connect(&self) -> Result<BrokerChannel, BrokerError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        info!(url = %self.url, "Connected to broker");
        Ok(BrokerChannel {
            _connection: connection,
            channel,
        })
    }
}

/// One live AMQP channel. Dropping it tears the connection down.
pub struct BrokerChannel {
    _connection: Connection,
    channel: lapin::Channel,
}

impl BrokerChannel {
    /// Declare a queue, creating it when absent.
    pub async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(name, QueueDeclareOptions::default(), FieldTable::default())
            .await?;
        debug!(queue = name, "Declared queue");
        Ok(())
    }

    /// Drop every message currently sitting in `name`.
    pub async fn purge_queue(&self, name: &str) -> Result<(), BrokerError> {
        let purged = self
            .channel
            .queue_purge(name, QueuePurgeOptions::default())
            .await?;
        info!(queue = name, purged = ?purged, "Purged queue");
        Ok(())
    }

    /// Start a `no_ack` consumer on `queue`.
    pub async fn consume(
        &self,
        queue: &str,
        tag: &str,
    ) -> Result<lapin::Consumer, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        info!(queue, "Consuming queue");
        Ok(consumer)
    }

    /// Publish a JSON payload to `queue` on the default exchange.
    pub async fn publish_json<T: Serialize>(
        &self,
        queue: &str,
        payload: &T,
    ) -> Result<(), BrokerError> {
        let body = serde_json::to_vec(payload).map_err(|e| BrokerError::PublishFailed {
            queue: queue.to_string(),
            reason: e.to_string(),
        })?;
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default(),
            )
            .await?
            .await?;
        debug!(queue, bytes = body.len(), "Published message");
        Ok(())
    }
}
