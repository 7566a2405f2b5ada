//! Response correlation for the single in-flight command.
//!
//! The projector protocol has no request identifiers: a response belongs to
//! whatever command was sent last. The correlator keeps that command in an
//! explicit slot and classifies every framed line against it.
//!
//! - Action commands are done after any one line. `*000` and `*001` are the
//!   expected acknowledgements, anything else is reported as unknown.
//! - Query commands answer `*001` on error, or `*000` followed by exactly
//!   one payload line.
//!
//! Every path that consumes a terminal line empties the slot, so no response
//! can leave the protocol stuck.

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandKind, QueryType};

/// Success acknowledgement.
pub const ACK_CODE: &[u8] = b"*000";

/// Error acknowledgement.
pub const ERROR_CODE: &[u8] = b"*001";

/// The in-flight slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum InFlight {
    /// Nothing sent, or the last command has been fully answered
    #[default]
    Idle,
    /// A command was sent and its response is not complete yet
    Awaiting {
        command: Command,
        /// A query received its `*000` and the payload line is next
        acknowledged: bool,
    },
}

/// Parsed query payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reading {
    LampStatus(bool),
    LampHours(u32),
    SourceType(u32),
    ModelName(String),
    CompanyName(String),
}

/// Classification of one received line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// An action command was acknowledged with a known code
    Acknowledged { command: Command, code: Vec<u8> },
    /// An action command got something other than an acknowledgement code
    UnknownResponse { command: Command, line: Vec<u8> },
    /// A line arrived while nothing was in flight
    Unsolicited { line: Vec<u8> },
    /// A query was rejected with the error code
    QueryFailed { query: QueryType },
    /// A query was acknowledged, its payload follows
    AwaitingPayload { query: QueryType },
    /// A query payload was parsed
    Reading { query: QueryType, reading: Reading },
    /// A query payload did not match its expected format
    MalformedPayload {
        query: QueryType,
        line: Vec<u8>,
        error: PayloadError,
    },
}

impl Response {
    /// Whether this line completed the in-flight command.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::AwaitingPayload { .. })
    }
}

/// Payload parse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("response code where a payload was expected")]
    ResponseCode,

    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("payload does not match `{0}`")]
    Pattern(&'static str),
}

/// Tracks the in-flight command and correlates response lines to it.
#[derive(Debug, Clone, Default)]
pub struct Correlator {
    slot: InFlight,
}

impl Correlator {
    /// Create a correlator with an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether no command is in flight.
    pub fn is_idle(&self) -> bool {
        self.slot == InFlight::Idle
    }

    /// The in-flight command, if any.
    pub fn in_flight(&self) -> Option<&Command> {
        match &self.slot {
            InFlight::Idle => None,
            InFlight::Awaiting { command, .. } => Some(command),
        }
    }

    /// Record that a command was written to the transport.
    pub fn on_sent(&mut self, command: Command) {
        self.slot = InFlight::Awaiting {
            command,
            acknowledged: false,
        };
    }

    /// Give up on the in-flight command, returning it.
    pub fn abandon(&mut self) -> Option<Command> {
        match std::mem::take(&mut self.slot) {
            InFlight::Idle => None,
            InFlight::Awaiting { command, .. } => Some(command),
        }
    }

    /// Classify a framed line and advance the slot.
    pub fn on_line(&mut self, line: &[u8]) -> Response {
        let (command, acknowledged) = match std::mem::take(&mut self.slot) {
            InFlight::Idle => {
                return Response::Unsolicited {
                    line: line.to_vec(),
                }
            }
            InFlight::Awaiting {
                command,
                acknowledged,
            } => (command, acknowledged),
        };

        let query = match command.kind {
            CommandKind::Action => {
                return if is_response_code(line) {
                    Response::Acknowledged {
                        command,
                        code: line.to_vec(),
                    }
                } else {
                    Response::UnknownResponse {
                        command,
                        line: line.to_vec(),
                    }
                };
            }
            CommandKind::Query(query) => query,
        };

        if !acknowledged {
            if line == ERROR_CODE {
                return Response::QueryFailed { query };
            }
            if line == ACK_CODE {
                self.slot = InFlight::Awaiting {
                    command,
                    acknowledged: true,
                };
                return Response::AwaitingPayload { query };
            }
        }

        match parse_payload(query, line) {
            Ok(reading) => Response::Reading { query, reading },
            Err(error) => Response::MalformedPayload {
                query,
                line: line.to_vec(),
                error,
            },
        }
    }
}

fn is_response_code(line: &[u8]) -> bool {
    line == ACK_CODE || line == ERROR_CODE
}

/// Parse a query payload line.
pub fn parse_payload(query: QueryType, line: &[u8]) -> Result<Reading, PayloadError> {
    if is_response_code(line) {
        return Err(PayloadError::ResponseCode);
    }
    let text = std::str::from_utf8(line).map_err(|_| PayloadError::NotUtf8)?;

    match query {
        QueryType::LampStatus => match text {
            "Lamp 0" => Ok(Reading::LampStatus(false)),
            "Lamp 1" => Ok(Reading::LampStatus(true)),
            _ => Err(PayloadError::Pattern("Lamp 0|1")),
        },
        QueryType::LampHours => text
            .trim()
            .parse()
            .map(Reading::LampHours)
            .map_err(|_| PayloadError::Pattern("<hours>")),
        QueryType::SourceType => text
            .strip_prefix("Src ")
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|n| n.parse().ok())
            .map(Reading::SourceType)
            .ok_or(PayloadError::Pattern("Src <n>")),
        QueryType::ModelName => text
            .strip_prefix("Model ")
            .filter(|name| !name.is_empty())
            .map(|name| Reading::ModelName(name.to_string()))
            .ok_or(PayloadError::Pattern("Model <name>")),
        QueryType::CompanyName => text
            .strip_prefix("Name ")
            .filter(|name| !name.is_empty())
            .map(|name| Reading::CompanyName(name.to_string()))
            .ok_or(PayloadError::Pattern("Name <company>")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(command: Command) -> Correlator {
        let mut correlator = Correlator::new();
        correlator.on_sent(command);
        correlator
    }

    #[test]
    fn test_action_ack_clears_slot() {
        let mut correlator = sent(Command::action("* 0 IR 006"));

        let response = correlator.on_line(b"*000");
        assert!(matches!(response, Response::Acknowledged { .. }));
        assert!(correlator.is_idle());
    }

    #[test]
    fn test_action_any_line_clears_slot() {
        let lines: [&[u8]; 4] = [b"*001", b"garbage", b"", b"Lamp 1"];
        for line in lines {
            let mut correlator = sent(Command::action("* 0 IR 008"));
            let response = correlator.on_line(line);
            assert!(response.is_terminal());
            assert!(correlator.is_idle(), "line {:?} left slot occupied", line);
        }
    }

    #[test]
    fn test_action_unknown_response() {
        let mut correlator = sent(Command::action("* 0 IR 008"));
        let response = correlator.on_line(b"huh");
        assert_eq!(
            response,
            Response::UnknownResponse {
                command: Command::action("* 0 IR 008"),
                line: b"huh".to_vec(),
            }
        );
    }

    #[test]
    fn test_query_ack_then_payload() {
        let mut correlator = sent(Command::query(QueryType::LampStatus));

        let response = correlator.on_line(b"*000");
        assert_eq!(
            response,
            Response::AwaitingPayload {
                query: QueryType::LampStatus
            }
        );
        assert!(!correlator.is_idle());

        let response = correlator.on_line(b"Lamp 1");
        assert_eq!(
            response,
            Response::Reading {
                query: QueryType::LampStatus,
                reading: Reading::LampStatus(true),
            }
        );
        assert!(correlator.is_idle());
    }

    #[test]
    fn test_query_error_clears_slot() {
        let mut correlator = sent(Command::query(QueryType::SourceType));
        let response = correlator.on_line(b"*001");
        assert_eq!(
            response,
            Response::QueryFailed {
                query: QueryType::SourceType
            }
        );
        assert!(correlator.is_idle());
    }

    #[test]
    fn test_query_malformed_payload_clears_slot() {
        let mut correlator = sent(Command::query(QueryType::LampHours));
        correlator.on_line(b"*000");

        let response = correlator.on_line(b"abc");
        assert!(matches!(
            response,
            Response::MalformedPayload {
                query: QueryType::LampHours,
                ..
            }
        ));
        assert!(correlator.is_idle());
    }

    #[test]
    fn test_query_second_ack_is_malformed() {
        let mut correlator = sent(Command::query(QueryType::ModelName));
        correlator.on_line(b"*000");

        let response = correlator.on_line(b"*000");
        assert!(matches!(
            response,
            Response::MalformedPayload {
                error: PayloadError::ResponseCode,
                ..
            }
        ));
        assert!(correlator.is_idle());
    }

    #[test]
    fn test_query_payload_without_ack() {
        // A payload line without a preceding ack is still consumed as payload.
        let mut correlator = sent(Command::query(QueryType::SourceType));
        let response = correlator.on_line(b"Src 3");
        assert!(matches!(response, Response::Reading { .. }));
        assert!(correlator.is_idle());
    }

    #[test]
    fn test_unsolicited_line() {
        let mut correlator = Correlator::new();
        let response = correlator.on_line(b"*000");
        assert_eq!(
            response,
            Response::Unsolicited {
                line: b"*000".to_vec()
            }
        );
        assert!(correlator.is_idle());
    }

    #[test]
    fn test_abandon() {
        let mut correlator = sent(Command::query(QueryType::LampHours));
        correlator.on_line(b"*000");

        assert_eq!(correlator.abandon(), Some(Command::query(QueryType::LampHours)));
        assert!(correlator.is_idle());
        assert_eq!(correlator.abandon(), None);
    }

    #[test]
    fn test_parse_payloads() {
        assert_eq!(
            parse_payload(QueryType::LampStatus, b"Lamp 0"),
            Ok(Reading::LampStatus(false))
        );
        assert_eq!(
            parse_payload(QueryType::LampHours, b"1234"),
            Ok(Reading::LampHours(1234))
        );
        assert_eq!(
            parse_payload(QueryType::LampHours, b" 42 "),
            Ok(Reading::LampHours(42))
        );
        assert_eq!(
            parse_payload(QueryType::SourceType, b"Src 12"),
            Ok(Reading::SourceType(12))
        );
        assert_eq!(
            parse_payload(QueryType::ModelName, b"Model H6510BD"),
            Ok(Reading::ModelName("H6510BD".into()))
        );
        assert_eq!(
            parse_payload(QueryType::CompanyName, b"Name Acer"),
            Ok(Reading::CompanyName("Acer".into()))
        );
    }

    #[test]
    fn test_parse_payload_rejects() {
        assert!(parse_payload(QueryType::LampStatus, b"Lamp 2").is_err());
        assert!(parse_payload(QueryType::LampHours, b"abc").is_err());
        assert!(parse_payload(QueryType::SourceType, b"Src ").is_err());
        assert!(parse_payload(QueryType::SourceType, b"Src -1").is_err());
        assert!(parse_payload(QueryType::ModelName, b"Model ").is_err());
        assert!(parse_payload(QueryType::CompanyName, b"Acer").is_err());
        assert_eq!(
            parse_payload(QueryType::LampHours, &[0xff, 0xfe]),
            Err(PayloadError::NotUtf8)
        );
    }
}
