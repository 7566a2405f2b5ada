//! Command/response protocol engine for a serially controlled projector.
//!
//! Provides:
//! - Command data structures and the operator command table
//! - Line framing of the raw serial byte stream
//! - Bounded command queue shared with external producers
//! - Response correlation for the single in-flight command
//! - Periodic and deferred status polling
//! - The dispatcher loop tying everything to a transport

pub mod command;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod framer;
pub mod queue;
pub mod scheduler;
pub mod status;
pub mod transport;

// Re-exports
pub use command::{Command, CommandKind, CommandTable, QueryType};

pub use config::{ConfigError, ProtocolConfig};

pub use correlator::{Correlator, PayloadError, Reading, Response, ACK_CODE, ERROR_CODE};

pub use dispatcher::{DispatchError, Dispatcher, StopHandle};

pub use framer::{LineFramer, DELIMITER};

pub use queue::{CommandQueue, QueueError, QueueStats};

pub use scheduler::{DeferredCommand, PollScheduler};

pub use status::{DeviceStatus, StatusChange, StatusPublisher, StatusUpdate};

pub use transport::Transport;
