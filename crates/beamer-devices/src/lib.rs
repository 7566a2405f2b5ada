//! Device adapters for the projector controller.
//!
//! - **SerialTransport**: the projector's RS-232 link, implementing
//!   [`beamer_commands::Transport`]
//! - **MqttBridge**: the message bus side, translating control messages into
//!   queued commands and publishing status changes through
//!   [`MqttStatusPublisher`]

pub mod mqtt;
pub mod serial;

pub use mqtt::{
    handle_control_message, BridgeError, ControlOutcome, MqttBridge, MqttConfig,
    MqttStatusPublisher,
};
pub use serial::{SerialConfig, SerialTransport, TransportError};
