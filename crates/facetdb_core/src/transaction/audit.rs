//! Commit audit feed.
//!
//! A bounded channel carrying one event per committed transaction.
//! Delivery is best-effort: a full or abandoned subscriber never blocks
//! or fails the commit path, events are simply dropped.

use crate::types::{SequenceNumber, TransactionId};
use parking_lot::Mutex;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

/// A committed transaction, as seen by the audit feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Commit sequence number.
    pub seq: SequenceNumber,
    /// The committing transaction.
    pub txn: TransactionId,
    /// Canonical keys upserted, projections included.
    pub puts: usize,
    /// Canonical keys deleted, projections included.
    pub deletes: usize,
}

/// Holds the current subscriber, if any.
#[derive(Default)]
pub(crate) struct AuditLog {
    sender: Mutex<Option<SyncSender<AuditEvent>>>,
}

impl AuditLog {
    /// Opens a fresh subscription with the given buffer capacity,
    /// replacing any previous subscriber.
    pub(crate) fn subscribe(&self, buffer: usize) -> Receiver<AuditEvent> {
        let (tx, rx) = sync_channel(buffer.max(1));
        *self.sender.lock() = Some(tx);
        rx
    }

    /// Publishes one event. Returns whether it was delivered.
    pub(crate) fn publish(&self, event: AuditEvent) -> bool {
        let mut sender = self.sender.lock();
        match sender.as_ref().map(|tx| tx.try_send(event)) {
            Some(Ok(())) => true,
            Some(Err(TrySendError::Full(_))) => false,
            Some(Err(TrySendError::Disconnected(_))) => {
                *sender = None;
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(seq: u64) -> AuditEvent {
        AuditEvent {
            seq: SequenceNumber::new(seq),
            txn: TransactionId::new(seq),
            puts: 1,
            deletes: 0,
        }
    }

    #[test]
    fn events_flow_to_the_subscriber() {
        let log = AuditLog::default();
        assert!(!log.publish(event(1)), "no subscriber yet");
        let rx = log.subscribe(4);
        assert!(log.publish(event(2)));
        assert_eq!(rx.recv().unwrap().seq, SequenceNumber::new(2));
    }

    #[test]
    fn full_buffer_drops_without_blocking() {
        let log = AuditLog::default();
        let _rx = log.subscribe(1);
        assert!(log.publish(event(1)));
        assert!(!log.publish(event(2)), "buffer full, dropped");
    }

    #[test]
    fn dropped_receiver_detaches_the_feed() {
        let log = AuditLog::default();
        drop(log.subscribe(2));
        assert!(!log.publish(event(1)));
    }

    #[test]
    fn resubscribing_replaces_the_old_feed() {
        let log = AuditLog::default();
        let _old = log.subscribe(1);
        let new = log.subscribe(2);
        assert!(log.publish(event(9)));
        assert_eq!(new.recv().unwrap().seq, SequenceNumber::new(9));
    }
}
