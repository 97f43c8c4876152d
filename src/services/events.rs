//! Progress event bus
//!
//! Services emit an event after each committed ledger change. Listeners are
//! best-effort: a lagging or absent subscriber never affects the request.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Events emitted after ledger commits
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    LessonStarted {
        user_id: String,
        lesson_id: String,
    },
    LessonCompleted {
        user_id: String,
        lesson_id: String,
        attempt_mode: String,
        xp_earned: u32,
        first_completion: bool,
    },
    StreakAdvanced {
        user_id: String,
        current: u32,
        longest: u32,
    },
    CardUnlocked {
        user_id: String,
        card_id: String,
        lesson_id: String,
    },
    /// Post-commit card evaluation failed; the outbox job will be retried
    CardEvaluationDeferred {
        user_id: String,
        job_id: String,
        error: String,
    },
    HeartLost {
        user_id: String,
        remaining: u32,
    },
    HeartsRefilled {
        user_id: String,
    },
    DailyGoalChanged {
        user_id: String,
        target_xp: u32,
    },
    ProfileReset {
        user_id: String,
    },
    ContentImported {
        lessons: usize,
        cards: usize,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Event bus for broadcasting progress events
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: ProgressEvent) {
        trace!(event = ?event, "Emitting progress event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::LessonCompleted {
                user_id,
                lesson_id,
                attempt_mode,
                xp_earned,
                first_completion,
            } => {
                info!(
                    user_id = %user_id,
                    lesson_id = %lesson_id,
                    mode = %attempt_mode,
                    xp = xp_earned,
                    first = first_completion,
                    "Lesson completed"
                );
            }
            ProgressEvent::CardUnlocked { user_id, card_id, .. } => {
                info!(user_id = %user_id, card_id = %card_id, "Card unlocked");
            }
            ProgressEvent::CardEvaluationDeferred { user_id, job_id, error } => {
                warn!(user_id = %user_id, job_id = %job_id, error = %error, "Card evaluation deferred");
            }
            ProgressEvent::StreakAdvanced { user_id, current, .. } => {
                debug!(user_id = %user_id, streak = current, "Streak advanced");
            }
            ProgressEvent::ProfileReset { user_id } => {
                info!(user_id = %user_id, "Gamification profile reset");
            }
            _ => {
                trace!(event = ?event, "Progress event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(ProgressEvent::CardUnlocked {
            user_id: "u1".into(),
            card_id: "card-first".into(),
            lesson_id: "l1".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            ProgressEvent::CardUnlocked { card_id, .. } => assert_eq!(card_id, "card-first"),
            other => panic!("Wrong event type: {:?}", other),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        bus.emit(ProgressEvent::HeartsRefilled { user_id: "u1".into() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_logging_listener_stops_when_bus_dropped() {
        let bus = Arc::new(EventBus::new());
        let handle = spawn_logging_listener(bus.clone());
        bus.emit(ProgressEvent::ProfileReset { user_id: "u1".into() });
        drop(bus);

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener did not stop")
            .expect("listener panicked");
    }
}
