//! Notifications from the scan loop to its observers.
//!
//! Observers call [`EventBus::subscribe`] and drain the returned receiver.
//! Delivery is one-way; a subscriber that dropped its receiver is pruned on
//! the next publish. Each receiver buffers at most [`EVENT_QUEUE_CAPACITY`]
//! events; a full receiver misses the events published until it drains.

use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use tracing::warn;

/// Events buffered per subscriber.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// What changed in the scan loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// Scan entered `Running`; `resumed` for a continued scan.
    ScanStarted {
        resumed: bool,
        repeats: usize,
        line_length: usize,
    },
    /// A line was acquired and committed to the scan matrix.
    ScanDataUpdated { row: usize, lines_completed: usize },
    /// A line failed; the matrix is untouched.
    LineFailed { failed_lines: usize },
    /// Teardown finished; the loop is idle again.
    ScanFinished { lines_completed: usize },
    /// Scanner moved; one position per axis.
    PositionChanged(Vec<f64>),
    /// Session replaced.
    SettingsUpdated,
    /// Clock frequency of the session changed.
    ClockFrequencyChanged(f64),
    /// History entry restored.
    HistoryEvent,
    /// Hardware reported an error.
    HardwareError(String),
}

#[derive(Debug)]
struct Subscriber {
    tx: SyncSender<ScanEvent>,
    /// Events missed since the queue last had room.
    missed: usize,
}

/// Fan-out of [`ScanEvent`]s to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// New receiver for the events published from now on.
    ///
    /// The receiver holds up to [`EVENT_QUEUE_CAPACITY`] undrained events;
    /// later ones are dropped for it until it catches up.
    pub fn subscribe(&self) -> Receiver<ScanEvent> {
        let (tx, rx) = mpsc::sync_channel(EVENT_QUEUE_CAPACITY);
        self.subscribers.lock().push(Subscriber { tx, missed: 0 });
        rx
    }

    /// Never blocks.
    pub fn publish(&self, event: ScanEvent) {
        self.subscribers
            .lock()
            .retain_mut(|subscriber| match subscriber.tx.try_send(event.clone()) {
                Ok(()) => {
                    subscriber.missed = 0;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    subscriber.missed += 1;
                    if subscriber.missed == 1 {
                        warn!("Event subscriber full, dropping events until it drains");
                    }
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(ScanEvent::SettingsUpdated);
        assert_eq!(a.try_recv().unwrap(), ScanEvent::SettingsUpdated);
        assert_eq!(b.try_recv().unwrap(), ScanEvent::SettingsUpdated);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish(ScanEvent::ClockFrequencyChanged(10.0));
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(
            kept.try_recv().unwrap(),
            ScanEvent::ClockFrequencyChanged(10.0)
        );
    }

    #[test]
    fn undrained_subscriber_is_bounded() {
        let bus = EventBus::new();
        let slow = bus.subscribe();
        let fast = bus.subscribe();
        for row in 0..EVENT_QUEUE_CAPACITY + 10 {
            bus.publish(ScanEvent::ScanDataUpdated {
                row,
                lines_completed: row + 1,
            });
            assert!(fast.try_recv().is_ok());
        }
        assert_eq!(bus.subscriber_count(), 2);
        assert_eq!(slow.try_iter().count(), EVENT_QUEUE_CAPACITY);

        // drained: delivery resumes
        bus.publish(ScanEvent::SettingsUpdated);
        assert_eq!(slow.try_recv().unwrap(), ScanEvent::SettingsUpdated);
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.publish(ScanEvent::HistoryEvent);
        let late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }
}
