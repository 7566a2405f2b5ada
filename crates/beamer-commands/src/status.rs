//! Last-known device status and the publishing seam.
//!
//! Readings are folded into a [`DeviceStatus`] snapshot; only values that are
//! new or changed are handed to the [`StatusPublisher`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::correlator::Reading;

/// Last known values reported by the projector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub lamp_on: Option<bool>,
    pub lamp_hours: Option<u32>,
    pub source_type: Option<u32>,
    pub model_name: Option<String>,
    pub company_name: Option<String>,
}

/// Result of folding a reading into the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusChange {
    /// No value had been observed before
    pub first_seen: bool,
    /// The value differs from the last known one
    pub changed: bool,
    /// The lamp went from off or unknown to on
    pub lamp_turned_on: bool,
}

impl StatusChange {
    /// Whether the new value should be published.
    pub fn should_publish(&self) -> bool {
        self.first_seen || self.changed
    }
}

impl DeviceStatus {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a reading into the snapshot.
    pub fn apply(&mut self, reading: &Reading) -> StatusChange {
        match reading {
            Reading::LampStatus(on) => {
                let previous = self.lamp_on.replace(*on);
                StatusChange {
                    lamp_turned_on: *on && previous != Some(true),
                    ..compare(previous.as_ref(), on)
                }
            }
            Reading::LampHours(hours) => compare(self.lamp_hours.replace(*hours).as_ref(), hours),
            Reading::SourceType(source) => {
                compare(self.source_type.replace(*source).as_ref(), source)
            }
            Reading::ModelName(name) => {
                compare(self.model_name.replace(name.clone()).as_ref(), name)
            }
            Reading::CompanyName(name) => {
                compare(self.company_name.replace(name.clone()).as_ref(), name)
            }
        }
    }
}

fn compare<T: PartialEq>(previous: Option<&T>, current: &T) -> StatusChange {
    StatusChange {
        first_seen: previous.is_none(),
        changed: previous.is_some_and(|p| p != current),
        lamp_turned_on: false,
    }
}

/// A status value ready for publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub reading: Reading,
}

impl StatusUpdate {
    pub fn new(reading: Reading) -> Self {
        Self { reading }
    }

    /// Topic-like key of the value.
    pub fn key(&self) -> &'static str {
        match self.reading {
            Reading::LampStatus(_) => "lamp_state",
            Reading::LampHours(_) => "lamp_hours",
            Reading::SourceType(_) => "source_type",
            Reading::ModelName(_) => "model_name",
            Reading::CompanyName(_) => "company_name",
        }
    }

    /// Wire representation of the value.
    ///
    /// The lamp state is a single `0x01`/`0x00` byte, everything else is text.
    pub fn payload(&self) -> Vec<u8> {
        match &self.reading {
            Reading::LampStatus(on) => vec![u8::from(*on)],
            Reading::LampHours(n) | Reading::SourceType(n) => n.to_string().into_bytes(),
            Reading::ModelName(s) | Reading::CompanyName(s) => s.clone().into_bytes(),
        }
    }

    /// Whether downstream systems consume this value.
    ///
    /// Model and company name are informational only.
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self.reading,
            Reading::LampStatus(_) | Reading::LampHours(_) | Reading::SourceType(_)
        )
    }
}

/// Receiver of new or changed status values.
pub trait StatusPublisher: Send {
    fn publish(&self, update: &StatusUpdate);
}

impl<P: StatusPublisher + Sync + ?Sized> StatusPublisher for Arc<P> {
    fn publish(&self, update: &StatusUpdate) {
        (**self).publish(update)
    }
}

impl<P: StatusPublisher + ?Sized> StatusPublisher for Box<P> {
    fn publish(&self, update: &StatusUpdate) {
        (**self).publish(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_seen_then_unchanged() {
        let mut status = DeviceStatus::new();

        let change = status.apply(&Reading::LampHours(100));
        assert!(change.first_seen);
        assert!(change.should_publish());

        let change = status.apply(&Reading::LampHours(100));
        assert!(!change.should_publish());

        let change = status.apply(&Reading::LampHours(101));
        assert!(change.changed);
        assert!(!change.first_seen);
        assert_eq!(status.lamp_hours, Some(101));
    }

    #[test]
    fn test_lamp_turned_on() {
        let mut status = DeviceStatus::new();

        assert!(status.apply(&Reading::LampStatus(true)).lamp_turned_on);
        assert!(!status.apply(&Reading::LampStatus(true)).lamp_turned_on);
        assert!(!status.apply(&Reading::LampStatus(false)).lamp_turned_on);
        assert!(status.apply(&Reading::LampStatus(true)).lamp_turned_on);
    }

    #[test]
    fn test_update_payloads() {
        let lamp = StatusUpdate::new(Reading::LampStatus(true));
        assert_eq!(lamp.key(), "lamp_state");
        assert_eq!(lamp.payload(), vec![0x01]);
        assert_eq!(StatusUpdate::new(Reading::LampStatus(false)).payload(), vec![0x00]);

        let hours = StatusUpdate::new(Reading::LampHours(1234));
        assert_eq!(hours.payload(), b"1234".to_vec());
        assert!(hours.is_broadcast());

        let model = StatusUpdate::new(Reading::ModelName("H6510BD".into()));
        assert_eq!(model.key(), "model_name");
        assert!(!model.is_broadcast());
    }
}
