//! Bounded FIFO feeding the automaton task.
//!
//! Many producers, one consumer. Posting never blocks: when the queue is
//! full the message is dropped, counted and logged.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

use crate::message::{Event, Message};

pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Creates a queue holding at most `capacity` pending messages.
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        EventSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        EventReceiver { rx },
    )
}

/// Producer side. Cheap to clone into callbacks.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<Message>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Enqueues without waiting. Returns `false` if the message was dropped.
    pub fn post(&self, msg: Message) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(message = ?msg, dropped_total = total, "event queue full, message dropped");
                false
            }
            Err(TrySendError::Disconnected(msg)) => {
                tracing::debug!(message = ?msg, "event queue closed");
                false
            }
        }
    }

    pub fn post_event(&self, event: Event) -> bool {
        self.post(Message::Event(event))
    }

    /// Messages lost to a full queue since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side, owned by the automaton task.
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<Message>,
}

impl EventReceiver {
    /// Blocks until a message arrives; `None` once every sender is gone.
    pub fn recv(&self) -> Option<Message> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<Message> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Command;

    #[test]
    fn fifo_order_preserved() {
        let (tx, rx) = event_queue(4);
        tx.post_event(Event::Boot);
        tx.post(Message::Command(Command::Reboot));
        tx.post_event(Event::ModemInit);

        assert_eq!(rx.try_recv(), Some(Message::Event(Event::Boot)));
        assert_eq!(rx.try_recv(), Some(Message::Command(Command::Reboot)));
        assert_eq!(rx.try_recv(), Some(Message::Event(Event::ModemInit)));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let (tx, rx) = event_queue(2);
        assert!(tx.post_event(Event::PollingTimer));
        assert!(tx.post_event(Event::PollingTimer));
        assert!(!tx.post_event(Event::Boot));
        assert_eq!(tx.dropped(), 1);
        assert_eq!(rx.len(), 2);

        let clone = tx.clone();
        assert!(!clone.post_event(Event::Boot));
        assert_eq!(tx.dropped(), 2, "drop counter shared between clones");
    }

    #[test]
    fn closed_queue_rejects_posts() {
        let (tx, rx) = event_queue(2);
        drop(rx);
        assert!(!tx.post_event(Event::Boot));
        assert_eq!(tx.dropped(), 0);
    }

    #[test]
    fn recv_ends_when_senders_gone() {
        let (tx, rx) = event_queue(2);
        tx.post_event(Event::Boot);
        drop(tx);
        assert_eq!(rx.recv(), Some(Message::Event(Event::Boot)));
        assert_eq!(rx.recv(), None);
    }
}
