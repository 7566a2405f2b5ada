//! Dispatcher loop driving the projector protocol.
//!
//! One worker owns the transport and all protocol state. Each cycle reads
//! with a bounded timeout; received bytes feed the framer and the
//! correlator, an idle read lets the dispatcher send the next queued command
//! once nothing is in flight and no partial response is buffered.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::command::CommandTable;
use crate::config::ProtocolConfig;
use crate::correlator::{Correlator, Response, ACK_CODE, ERROR_CODE};
use crate::framer::LineFramer;
use crate::queue::CommandQueue;
use crate::scheduler::{enqueue_lamp_on_queries, PollScheduler};
use crate::status::{DeviceStatus, StatusPublisher, StatusUpdate};
use crate::transport::{encode, Transport};

/// Read buffer size per cycle.
const READ_BUF_SIZE: usize = 64;

/// Cooperative stop flag shared with whoever supervises the loop.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to exit after the current cycle.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Dispatcher error types.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Protocol dispatcher.
pub struct Dispatcher<T, P> {
    /// Byte stream to the projector
    transport: T,
    /// Receiver of status changes
    publisher: P,
    /// Command allow-list, used to recognize power commands
    table: CommandTable,
    /// Shared outgoing command queue
    queue: CommandQueue,
    framer: LineFramer,
    correlator: Correlator,
    scheduler: PollScheduler,
    status: DeviceStatus,
    /// Time of the last transmission or received byte
    last_activity: Instant,
    /// Silence after which the in-flight command is abandoned
    response_timeout: Duration,
}

impl<T: Transport, P: StatusPublisher> Dispatcher<T, P> {
    /// Create a new dispatcher.
    pub fn new(
        transport: T,
        publisher: P,
        table: CommandTable,
        queue: CommandQueue,
        config: &ProtocolConfig,
        now: Instant,
    ) -> Self {
        Self {
            transport,
            publisher,
            table,
            queue,
            framer: LineFramer::new(config.stale_line()),
            correlator: Correlator::new(),
            scheduler: PollScheduler::new(config.refresh_interval(), config.power_follow_up(), now),
            status: DeviceStatus::new(),
            last_activity: now,
            response_timeout: config.stale_line(),
        }
    }

    /// Run until stopped or the transport fails.
    pub fn run(&mut self, stop: &StopHandle) -> Result<(), DispatchError> {
        info!("Serial dispatcher started");

        while !stop.is_stopped() {
            self.step(Instant::now())?;
        }

        info!("Serial dispatcher stopped");
        Ok(())
    }

    /// One read-and-react cycle.
    pub fn step(&mut self, now: Instant) -> Result<(), DispatchError> {
        let mut buf = [0u8; READ_BUF_SIZE];
        let n = self.transport.read(&mut buf)?;

        if n > 0 {
            self.handle_bytes(&buf[..n], now);
        } else {
            self.idle_tick(now)?;
        }
        Ok(())
    }

    /// Feed received bytes through the framer and correlator.
    pub fn handle_bytes(&mut self, bytes: &[u8], now: Instant) {
        if !bytes.is_empty() {
            self.last_activity = now;
        }
        for line in self.framer.feed(bytes, now) {
            self.handle_line(&line);
        }
    }

    /// React to a read that returned no data.
    pub fn idle_tick(&mut self, now: Instant) -> Result<(), DispatchError> {
        if self.framer.is_empty() && self.correlator.is_idle() {
            if self.queue.is_empty() {
                let lamp_on = self.status.lamp_on == Some(true);
                self.scheduler.evaluate(now, lamp_on, &self.queue);
            }
            self.send_next(now)?;
        } else if let Some(discarded) = self.framer.discard_if_stale(now) {
            warn!(
                "Received incomplete line, timed out, resetting buffer ({:?})",
                String::from_utf8_lossy(&discarded)
            );
            self.abandon_in_flight();
        } else if self.framer.is_empty()
            && now.saturating_duration_since(self.last_activity) > self.response_timeout
        {
            warn!("No response from projector");
            self.abandon_in_flight();
        }
        Ok(())
    }

    fn abandon_in_flight(&mut self) {
        if let Some(command) = self.correlator.abandon() {
            warn!("Abandoning command {}", command);
        }
    }

    fn send_next(&mut self, now: Instant) -> Result<(), DispatchError> {
        let Some(command) = self.queue.try_dequeue() else {
            return Ok(());
        };

        debug!("Sending command {}", command);
        self.correlator.on_sent(command.clone());
        self.transport.write_all(&encode(&command))?;
        self.last_activity = now;
        self.scheduler.on_command_sent(&command, &self.table, now);
        Ok(())
    }

    fn handle_line(&mut self, line: &[u8]) {
        debug!(
            "Line received {:?} for command {:?}",
            String::from_utf8_lossy(line),
            self.correlator.in_flight().map(|c| c.opcode.as_str())
        );

        match self.correlator.on_line(line) {
            Response::Acknowledged { .. } | Response::AwaitingPayload { .. } => {}
            Response::UnknownResponse { command, line } => {
                warn!(
                    "Unknown response {:?} to command {}",
                    String::from_utf8_lossy(&line),
                    command
                );
            }
            Response::Unsolicited { line } => {
                if line != ACK_CODE && line != ERROR_CODE {
                    warn!(
                        "Unknown response {:?} with no command in flight",
                        String::from_utf8_lossy(&line)
                    );
                }
            }
            Response::QueryFailed { query } => {
                info!("Query command returned error: {}", query);
            }
            Response::MalformedPayload { query, line, error } => {
                warn!(
                    "Unknown {} response {:?}: {}",
                    query,
                    String::from_utf8_lossy(&line),
                    error
                );
            }
            Response::Reading { query, reading } => {
                debug!("{}: {:?}", query, reading);
                let change = self.status.apply(&reading);

                if change.lamp_turned_on {
                    debug!("Lamp status changed on, querying");
                    let _ = enqueue_lamp_on_queries(&self.queue);
                }

                if change.should_publish() {
                    let update = StatusUpdate::new(reading);
                    if !update.is_broadcast() {
                        info!("Projector {}: {}", query, String::from_utf8_lossy(&update.payload()));
                    }
                    self.publisher.publish(&update);
                }
            }
        }
    }

    /// Handle to the shared command queue.
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Last known device status.
    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn framer(&self) -> &LineFramer {
        &self.framer
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
