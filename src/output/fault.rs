// src/output/fault.rs
//! Fault taxonomy and the channel that carries faults from native callbacks
//! into the recovery state machine.
//!
//! Windowing-system callbacks run on whatever stack triggered them, possibly
//! in the middle of a frame. They only post a `Fault`; the controller drains
//! the inbox at safe points between surface operations.

use std::error::Error;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};

use log::trace;

/// A single failed request reported by the windowing system. The connection
/// is still usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub error_code: u8,
    pub request_code: u8,
    pub minor_code: u8,
    pub resource_id: u64,
    pub serial: u64,
    pub description: String,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (error {}, request {}.{}, resource 0x{:x}, serial {})",
            self.description,
            self.error_code,
            self.request_code,
            self.minor_code,
            self.resource_id,
            self.serial
        )
    }
}

/// Faults delivered to the recovery controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Non-fatal: one request failed.
    Protocol(ProtocolError),
    /// Fatal: the connection is gone and must be reopened.
    ConnectionLost,
    /// Fatal for current resources: monitors were added, removed or moved.
    /// The connection itself stays valid.
    TopologyChanged,
}

impl Fault {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Fault::Protocol(_))
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Protocol(err) => write!(f, "protocol error: {}", err),
            Fault::ConnectionLost => write!(f, "connection to the windowing system lost"),
            Fault::TopologyChanged => write!(f, "screen topology changed"),
        }
    }
}

/// Why monitor enumeration could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumerationError {
    /// The windowing system has no screen-enumeration capability.
    Unavailable,
    /// The capability exists but the query failed.
    QueryFailed(String),
}

impl fmt::Display for EnumerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnumerationError::Unavailable => write!(f, "screen enumeration is not available"),
            EnumerationError::QueryFailed(reason) => {
                write!(f, "screen enumeration query failed: {}", reason)
            }
        }
    }
}

impl Error for EnumerationError {}

/// Creates a connected sender/inbox pair.
pub fn fault_channel() -> (FaultSender, FaultInbox) {
    let (tx, rx) = channel();
    (FaultSender { tx }, FaultInbox { rx })
}

/// Posting side, cloned into native callback registrations.
#[derive(Debug, Clone)]
pub struct FaultSender {
    tx: Sender<Fault>,
}

impl FaultSender {
    /// Posts a fault. Returns `false` if the inbox is gone, in which case
    /// nobody is left to recover and the fault is dropped.
    pub fn post(&self, fault: Fault) -> bool {
        trace!("Posting fault: {}", fault);
        self.tx.send(fault).is_ok()
    }
}

/// Receiving side, owned by the recovery controller.
#[derive(Debug)]
pub struct FaultInbox {
    rx: Receiver<Fault>,
}

impl FaultInbox {
    /// Takes every fault posted so far, in posting order.
    pub fn drain(&self) -> Vec<Fault> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_error() -> ProtocolError {
        ProtocolError {
            error_code: 9,
            request_code: 62,
            minor_code: 0,
            resource_id: 0x1200004,
            serial: 42,
            description: "BadDrawable".to_string(),
        }
    }

    #[test_log::test]
    fn only_protocol_errors_are_non_fatal() {
        assert!(!Fault::Protocol(sample_error()).is_fatal());
        assert!(Fault::ConnectionLost.is_fatal());
        assert!(Fault::TopologyChanged.is_fatal());
    }

    #[test_log::test]
    fn drain_preserves_posting_order_and_empties_inbox() {
        let (sender, inbox) = fault_channel();
        let cloned = sender.clone();
        assert!(sender.post(Fault::Protocol(sample_error())));
        assert!(cloned.post(Fault::ConnectionLost));

        assert_eq!(
            inbox.drain(),
            vec![Fault::Protocol(sample_error()), Fault::ConnectionLost]
        );
        assert!(inbox.drain().is_empty());
    }

    #[test_log::test]
    fn post_after_inbox_dropped_reports_failure() {
        let (sender, inbox) = fault_channel();
        drop(inbox);
        assert!(!sender.post(Fault::TopologyChanged));
    }

    #[test_log::test]
    fn protocol_error_display_includes_codes() {
        let text = Fault::Protocol(sample_error()).to_string();
        assert!(text.contains("BadDrawable"));
        assert!(text.contains("request 62.0"));
        assert!(text.contains("0x1200004"));
    }
}
