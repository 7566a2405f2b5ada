//! Status polling without timer threads.
//!
//! Two mechanisms, both evaluated cooperatively by the dispatcher whenever
//! the channel is idle:
//! - a periodic lamp status refresh, and
//! - deferred one-shot commands with a not-before deadline.
//!
//! The lamp ignites or extinguishes asynchronously after a power command is
//! acknowledged, so every power command schedules a delayed lamp query.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::command::{Command, CommandTable, QueryType};
use crate::queue::{CommandQueue, QueueError};

/// A command that may not be enqueued before its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredCommand {
    pub command: Command,
    pub not_before: Instant,
}

/// Periodic and deferred follow-up command generation.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    /// Interval between automatic lamp status queries
    refresh_interval: Duration,
    /// Delay of the lamp query following a power command
    power_follow_up: Duration,
    /// Last time a lamp status query went out
    last_lamp_query: Instant,
    /// Pending deferred commands, earliest deadline first
    deferred: Vec<DeferredCommand>,
}

impl PollScheduler {
    /// Create a scheduler whose refresh clock starts at `now`.
    pub fn new(refresh_interval: Duration, power_follow_up: Duration, now: Instant) -> Self {
        Self {
            refresh_interval,
            power_follow_up,
            last_lamp_query: now,
            deferred: Vec::new(),
        }
    }

    /// Pending deferred commands, earliest first.
    pub fn deferred(&self) -> &[DeferredCommand] {
        &self.deferred
    }

    /// Last time a lamp status query was transmitted.
    pub fn last_lamp_query(&self) -> Instant {
        self.last_lamp_query
    }

    /// Schedule a command for later.
    pub fn defer(&mut self, command: Command, not_before: Instant) {
        // Insert after entries with the same deadline to keep them FIFO.
        let index = self.deferred.partition_point(|d| d.not_before <= not_before);
        self.deferred.insert(
            index,
            DeferredCommand {
                command,
                not_before,
            },
        );
    }

    /// Generate automatic commands for an idle channel.
    ///
    /// Enqueue failures are swallowed; the refresh retries on the next idle
    /// evaluation because only a transmitted lamp query resets its clock.
    pub fn evaluate(&mut self, now: Instant, lamp_on: bool, queue: &CommandQueue) {
        if now.saturating_duration_since(self.last_lamp_query) > self.refresh_interval {
            debug!("Queueing periodic lamp queries");
            let _ = enqueue_lamp_queries(queue, lamp_on);
            return;
        }

        let due = self
            .deferred
            .first()
            .is_some_and(|entry| entry.not_before <= now);
        if due {
            let entry = self.deferred.remove(0);
            debug!("Queueing deferred command {}", entry.command);
            if queue.enqueue(entry.command).is_err() {
                debug!("Command queue full, deferred command dropped");
            }
        }
    }

    /// Bookkeeping after a command was written to the transport.
    pub fn on_command_sent(&mut self, command: &Command, table: &CommandTable, now: Instant) {
        if command.query_type() == Some(QueryType::LampStatus) {
            self.last_lamp_query = now;
        } else if table.is_power(command) {
            self.defer(
                Command::query(QueryType::LampStatus),
                now + self.power_follow_up,
            );
        }
    }
}

/// Queue the lamp status query, plus the lamp-on-only queries if the lamp is on.
pub fn enqueue_lamp_queries(queue: &CommandQueue, lamp_on: bool) -> Result<(), QueueError> {
    queue.enqueue(Command::query(QueryType::LampStatus))?;
    if lamp_on {
        enqueue_lamp_on_queries(queue)?;
    }
    Ok(())
}

/// Queue the queries that only make sense while the lamp is lit.
pub fn enqueue_lamp_on_queries(queue: &CommandQueue) -> Result<(), QueueError> {
    queue.enqueue(Command::query(QueryType::LampHours))?;
    queue.enqueue(Command::query(QueryType::SourceType))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFRESH: Duration = Duration::from_secs(60);
    const FOLLOW_UP: Duration = Duration::from_secs(5);

    #[test]
    fn test_refresh_after_interval() {
        let start = Instant::now();
        let mut scheduler = PollScheduler::new(REFRESH, FOLLOW_UP, start);
        let queue = CommandQueue::new(10);

        scheduler.evaluate(start + Duration::from_secs(59), false, &queue);
        assert!(queue.is_empty());

        scheduler.evaluate(start + Duration::from_secs(61), false, &queue);
        assert_eq!(queue.try_dequeue(), Some(Command::query(QueryType::LampStatus)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_refresh_with_lamp_on() {
        let start = Instant::now();
        let mut scheduler = PollScheduler::new(REFRESH, FOLLOW_UP, start);
        let queue = CommandQueue::new(10);

        scheduler.evaluate(start + Duration::from_secs(61), true, &queue);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_dequeue().unwrap().query_type(), Some(QueryType::LampStatus));
        assert_eq!(queue.try_dequeue().unwrap().query_type(), Some(QueryType::LampHours));
        assert_eq!(queue.try_dequeue().unwrap().query_type(), Some(QueryType::SourceType));
    }

    #[test]
    fn test_lamp_query_sent_resets_clock() {
        let start = Instant::now();
        let table = CommandTable::default();
        let mut scheduler = PollScheduler::new(REFRESH, FOLLOW_UP, start);
        let queue = CommandQueue::new(10);

        let sent_at = start + Duration::from_secs(50);
        scheduler.on_command_sent(&Command::query(QueryType::LampStatus), &table, sent_at);
        assert_eq!(scheduler.last_lamp_query(), sent_at);

        scheduler.evaluate(start + Duration::from_secs(61), false, &queue);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_power_command_schedules_follow_up() {
        let start = Instant::now();
        let table = CommandTable::default();
        let mut scheduler = PollScheduler::new(REFRESH, FOLLOW_UP, start);
        let queue = CommandQueue::new(10);

        let power_on = table.resolve("power on").unwrap();
        scheduler.on_command_sent(&power_on, &table, start);
        assert_eq!(scheduler.deferred().len(), 1);
        assert_eq!(scheduler.deferred()[0].not_before, start + FOLLOW_UP);

        scheduler.evaluate(start + Duration::from_secs(4), false, &queue);
        assert!(queue.is_empty());

        scheduler.evaluate(start + FOLLOW_UP, false, &queue);
        assert_eq!(queue.try_dequeue(), Some(Command::query(QueryType::LampStatus)));
        assert!(scheduler.deferred().is_empty());
    }

    #[test]
    fn test_non_power_action_schedules_nothing() {
        let start = Instant::now();
        let table = CommandTable::default();
        let mut scheduler = PollScheduler::new(REFRESH, FOLLOW_UP, start);

        scheduler.on_command_sent(&table.resolve("mute").unwrap(), &table, start);
        assert!(scheduler.deferred().is_empty());
    }

    #[test]
    fn test_one_deferred_per_evaluation() {
        let start = Instant::now();
        let mut scheduler = PollScheduler::new(REFRESH, FOLLOW_UP, start);
        let queue = CommandQueue::new(10);

        scheduler.defer(Command::action("B"), start + Duration::from_secs(2));
        scheduler.defer(Command::action("A"), start + Duration::from_secs(1));
        scheduler.defer(Command::action("C"), start + Duration::from_secs(2));

        let later = start + Duration::from_secs(3);
        scheduler.evaluate(later, false, &queue);
        assert_eq!(queue.len(), 1);
        scheduler.evaluate(later, false, &queue);
        scheduler.evaluate(later, false, &queue);

        let order: Vec<_> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|c| c.opcode)
            .collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_deferred_removed_even_when_queue_full() {
        let start = Instant::now();
        let mut scheduler = PollScheduler::new(REFRESH, FOLLOW_UP, start);
        let queue = CommandQueue::new(1);
        queue.enqueue(Command::action("X")).unwrap();

        scheduler.defer(Command::query(QueryType::LampStatus), start);
        scheduler.evaluate(start + Duration::from_secs(1), false, &queue);

        assert!(scheduler.deferred().is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_refresh_skips_deferred_in_same_evaluation() {
        let start = Instant::now();
        let mut scheduler = PollScheduler::new(REFRESH, FOLLOW_UP, start);
        let queue = CommandQueue::new(10);

        scheduler.defer(Command::action("A"), start);
        scheduler.evaluate(start + Duration::from_secs(61), false, &queue);

        assert_eq!(queue.len(), 1);
        assert_eq!(scheduler.deferred().len(), 1);
    }
}
