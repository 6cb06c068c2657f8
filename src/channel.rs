// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Management
//!
//! Establishes the connection to the broker and hands out channels. The
//! connection is owned by an explicit `ConnectionManager` with an
//! init/shutdown lifecycle; one underlying connection is multiplexed into
//! one channel per consumer worker plus one for the publisher, and a channel
//! is never shared between call sites.

use crate::{config::AmqpConfig, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, warn};

/// Owns the broker connection for the lifetime of the process.
pub struct ConnectionManager {
    connection: Arc<Connection>,
}

impl ConnectionManager {
    /// Connects to the broker, retrying with a fixed delay up to the
    /// configured attempt count. Exhausting the attempts is a fatal startup
    /// error.
    pub async fn connect(config: &AmqpConfig) -> Result<ConnectionManager, AmqpError> {
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(config.app_name.clone()));

        let max_attempts = config.max_reconnect_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, "creating amqp connection...");

            match Connection::connect(&config.uri, options.clone()).await {
                Ok(connection) => {
                    debug!("amqp connected");
                    return Ok(ConnectionManager {
                        connection: Arc::new(connection),
                    });
                }
                Err(err) if attempt < max_attempts => {
                    warn!(
                        error = err.to_string(),
                        attempt, "failure to connect, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(config.reconnect_delay_ms)).await;
                }
                Err(err) => {
                    error!(error = err.to_string(), "failure to connect");
                    return Err(AmqpError::ConnectionError(attempt));
                }
            }
        }
    }

    /// Creates a new channel on the shared connection.
    pub async fn create_channel(&self) -> Result<Arc<Channel>, AmqpError> {
        match self.connection.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                Ok(Arc::new(channel))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
        }
    }

    /// Closes the underlying connection.
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.connection.close(200, "shutdown").await.map_err(|err| {
            error!(error = err.to_string(), "error to close the connection");
            AmqpError::InternalError
        })
    }
}
