//! Process-scoped memory event bus.
//!
//! Components that react to memory conditions receive an `Arc<EventBus>` at
//! construction and subscribe explicitly. Integrators forward operating
//! system low-memory notifications with [`EventBus::signal_low_memory`].

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::PressureLevel;

const DEFAULT_CAPACITY: usize = 64;

/// Events published on the memory bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryEvent {
    /// The classified pressure level changed.
    PressureChanged {
        /// Level before the change
        previous: PressureLevel,
        /// Level after the change
        current: PressureLevel,
    },

    /// The operating system reported low memory.
    LowMemoryWarning,
}

impl MemoryEvent {
    /// Whether this event reports memory conditions getting worse.
    pub fn is_worsening(&self) -> bool {
        match self {
            MemoryEvent::PressureChanged { previous, current } => current > previous,
            MemoryEvent::LowMemoryWarning => true,
        }
    }

    /// Severity the event implies.
    pub fn level(&self) -> PressureLevel {
        match self {
            MemoryEvent::PressureChanged { current, .. } => *current,
            MemoryEvent::LowMemoryWarning => PressureLevel::Critical,
        }
    }
}

/// Broadcast bus for [`MemoryEvent`]s.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<MemoryEvent>,
}

impl EventBus {
    /// Create a bus with the default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` events per slow subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event, returning how many subscribers will see it.
    pub fn publish(&self, event: MemoryEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Report an operating system low-memory notification.
    pub fn signal_low_memory(&self) -> usize {
        log::warn!("Low memory warning received");
        self.publish(MemoryEvent::LowMemoryWarning)
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription to an [`EventBus`].
///
/// Dropping the subscription, or calling [`Subscription::unsubscribe`],
/// detaches it from the bus.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<MemoryEvent>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the bus is gone.
    ///
    /// Events missed by a lagging subscriber are skipped; the next buffered
    /// event is returned instead.
    pub async fn recv(&mut self) -> Option<MemoryEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Memory event subscriber lagged by {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<MemoryEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Detach from the bus.
    pub fn unsubscribe(self) {}
}

/// Handle to a background loop; the loop is aborted on `stop` or drop.
#[derive(Debug)]
pub struct TaskHandle {
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Stop the background loop.
    pub fn stop(mut self) {
        self.abort();
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
