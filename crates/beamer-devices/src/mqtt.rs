//! MQTT bridge using rumqttc.
//!
//! Subscribes to the control topic, translates allowed command names into
//! queued protocol commands and publishes status changes as retained
//! messages under the configured topic prefix.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use beamer_commands::{
    Command, CommandQueue, CommandTable, QueryType, StatusPublisher, StatusUpdate,
};

/// MQTT bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client ID.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Prefix of the control and status topics.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Delay before polling again after a connection error.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Consecutive connection errors after which the bridge gives up.
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
}

fn default_host() -> String {
    "autoc4".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "beamer-control".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_topic_prefix() -> String {
    "beamer/plenar".to_string()
}

fn default_reconnect_interval() -> u64 {
    5000
}

fn default_max_errors() -> u32 {
    5
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self::new(default_host())
    }
}

impl MqttConfig {
    /// Create a new MQTT configuration.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            topic_prefix: default_topic_prefix(),
            reconnect_interval_ms: default_reconnect_interval(),
            max_errors: default_max_errors(),
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set authentication.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the topic prefix.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::Configuration("MQTT host is empty".into()));
        }
        if self.client_id.is_empty() {
            return Err(BridgeError::Configuration("MQTT client id is empty".into()));
        }
        if self.topic_prefix.is_empty() || self.topic_prefix.contains(['+', '#']) {
            return Err(BridgeError::Configuration(format!(
                "Invalid topic prefix: {:?}",
                self.topic_prefix
            )));
        }
        Ok(())
    }

    /// Topic carrying operator command names.
    pub fn control_topic(&self) -> String {
        format!("{}/control", self.topic_prefix)
    }

    /// Topic of a published status value.
    pub fn status_topic(&self, key: &str) -> String {
        format!("{}/{}", self.topic_prefix, key)
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));

        // Set credentials if provided
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            options.set_credentials(user, pass);
        }
        options
    }
}

/// Bridge error types.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("MQTT connection failed {attempts} times in a row: {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: rumqttc::ConnectionError,
    },
}

/// What became of a control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Command resolved and queued
    Queued(Command),
    /// Name not in the command table
    NotAllowed(String),
    /// Command resolved but the queue was full
    Dropped(Command),
    /// Retained, foreign-topic or undecodable message
    Ignored,
}

/// Translate one control message into a queued command.
pub fn handle_control_message(
    config: &MqttConfig,
    topic: &str,
    payload: &[u8],
    retain: bool,
    table: &CommandTable,
    queue: &CommandQueue,
) -> ControlOutcome {
    // Retained commands are stale by definition.
    if retain || topic != config.control_topic() {
        return ControlOutcome::Ignored;
    }

    let Ok(name) = std::str::from_utf8(payload) else {
        warn!("Control message is not valid UTF-8, ignoring");
        return ControlOutcome::Ignored;
    };

    let Some(command) = table.resolve(name) else {
        info!("Command not allowed: {}", name);
        return ControlOutcome::NotAllowed(name.to_string());
    };

    debug!("Projector command: {}", name);
    match queue.enqueue(command.clone()) {
        Ok(()) => ControlOutcome::Queued(command),
        Err(_) => {
            warn!("Command queue full, dropped command {}", name);
            ControlOutcome::Dropped(command)
        }
    }
}

/// Topic and payload of a status update, if it is published at all.
pub fn status_message(config: &MqttConfig, update: &StatusUpdate) -> Option<(String, Vec<u8>)> {
    update
        .is_broadcast()
        .then(|| (config.status_topic(update.key()), update.payload()))
}

/// Publishes status changes as retained QoS 0 messages.
#[derive(Clone)]
pub struct MqttStatusPublisher {
    client: AsyncClient,
    config: MqttConfig,
}

impl StatusPublisher for MqttStatusPublisher {
    fn publish(&self, update: &StatusUpdate) {
        let Some((topic, payload)) = status_message(&self.config, update) else {
            return;
        };

        // Called from the blocking serial worker, so never await here.
        if let Err(e) = self
            .client
            .try_publish(topic.as_str(), QoS::AtMostOnce, true, payload)
        {
            warn!("Failed to publish {}: {}", topic, e);
        }
    }
}

/// MQTT side of the controller.
pub struct MqttBridge {
    config: MqttConfig,
    client: AsyncClient,
    eventloop: rumqttc::EventLoop,
    table: CommandTable,
    queue: CommandQueue,
}

impl MqttBridge {
    /// Create the bridge and the publisher that shares its connection.
    ///
    /// No connection is made until [`MqttBridge::run`] polls the event loop.
    pub fn new(
        config: MqttConfig,
        table: CommandTable,
        queue: CommandQueue,
    ) -> Result<(Self, MqttStatusPublisher), BridgeError> {
        config.validate()?;

        let (client, eventloop) = AsyncClient::new(config.options(), 10);
        let publisher = MqttStatusPublisher {
            client: client.clone(),
            config: config.clone(),
        };

        Ok((
            Self {
                config,
                client,
                eventloop,
                table,
                queue,
            },
            publisher,
        ))
    }

    /// Poll the connection until it fails persistently.
    ///
    /// rumqttc reconnects on the next poll after an error; only
    /// `max_errors` consecutive failures end the bridge.
    pub async fn run(mut self) -> Result<(), BridgeError> {
        let mut error_count = 0;
        info!(
            "Connecting to MQTT broker {}:{}",
            self.config.host, self.config.port
        );

        loop {
            match self.eventloop.poll().await {
                Ok(event) => {
                    error_count = 0; // Reset error count on success
                    self.handle_event(event);
                }
                Err(e) => {
                    error_count += 1;
                    if error_count >= self.config.max_errors {
                        error!(
                            "MQTT error count reached {}, stopping: {}",
                            self.config.max_errors, e
                        );
                        return Err(BridgeError::Connection {
                            attempts: error_count,
                            source: e,
                        });
                    }
                    warn!(
                        "MQTT error ({}/{}): {}",
                        error_count, self.config.max_errors, e
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.reconnect_interval_ms))
                        .await;
                }
            }
        }
    }

    fn handle_event(&self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                info!("MQTT connection acknowledged");
                self.on_connect();
            }
            Event::Incoming(Packet::Publish(publish)) => {
                handle_control_message(
                    &self.config,
                    &publish.topic,
                    &publish.payload,
                    publish.retain,
                    &self.table,
                    &self.queue,
                );
            }
            _ => {}
        }
    }

    fn on_connect(&self) {
        let topic = self.config.control_topic();
        // try_subscribe: awaiting here would block the loop that drains requests.
        if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            warn!("Failed to subscribe to {}: {}", topic, e);
        }

        // Refresh the retained status after every (re)connect.
        if self
            .queue
            .enqueue(Command::query(QueryType::LampStatus))
            .is_err()
        {
            warn!("Command queue full, dropped lamp status query");
        }
    }
}
