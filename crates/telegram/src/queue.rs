//! Per-key sequential lanes between the webhook and the dispatcher.
//!
//! Every lane key gets its own worker task draining an unbounded channel,
//! so events for one user (or one channel) are handled strictly in arrival
//! order while different keys proceed concurrently. A worker that sees no
//! traffic for the idle timeout retires its lane.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error};

use crate::events::{EventContext, EventDispatcher};
use crate::update::{LaneKey, UpdateEnvelope};

const DRAIN_POLL: Duration = Duration::from_millis(10);

type Lanes = Arc<Mutex<HashMap<LaneKey, mpsc::UnboundedSender<QueuedEvent>>>>;

struct QueuedEvent {
    envelope: UpdateEnvelope,
    ctx: EventContext,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued(LaneKey),
    /// The event has no lane and nothing would handle it.
    Skipped,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("event queue is closed")]
    Closed,
}

pub struct EventQueue {
    dispatcher: Arc<EventDispatcher>,
    lanes: Lanes,
    idle_timeout: Duration,
    workers: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl EventQueue {
    pub fn new(dispatcher: Arc<EventDispatcher>, idle_timeout: Duration) -> Self {
        Self {
            dispatcher,
            lanes: Arc::default(),
            idle_timeout,
            workers: Arc::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Hands the event to its lane and returns without waiting for it to be
    /// processed. Must be called from within a Tokio runtime.
    pub fn enqueue(&self, envelope: UpdateEnvelope) -> Result<EnqueueOutcome, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let Some(key) = envelope.event.lane_key() else {
            debug!(
                event_name = "queue.event_skipped",
                correlation_id = %EventContext::for_update(envelope.update_id).correlation_id,
                event_type = ?envelope.event.event_type(),
                "event has no lane"
            );
            return Ok(EnqueueOutcome::Skipped);
        };

        let ctx = EventContext::for_update(envelope.update_id);
        let mut event = QueuedEvent { envelope, ctx };
        let mut lanes = lock(&self.lanes);
        if let Some(sender) = lanes.get(&key) {
            match sender.send(event) {
                Ok(()) => return Ok(EnqueueOutcome::Queued(key)),
                // The worker is gone; start a fresh lane with the same event.
                Err(mpsc::error::SendError(returned)) => event = returned,
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        lanes.insert(key, sender);
        drop(lanes);

        self.workers.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(run_lane(
            key,
            event,
            receiver,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.lanes),
            self.idle_timeout,
            Arc::clone(&self.workers),
        ));
        debug!(event_name = "queue.lane_opened", lane = ?key, "lane worker started");
        Ok(EnqueueOutcome::Queued(key))
    }

    pub fn active_lanes(&self) -> usize {
        lock(&self.lanes).len()
    }

    pub fn active_workers(&self) -> usize {
        self.workers.load(Ordering::Acquire)
    }

    /// Stops accepting events. Workers finish what is already queued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.lanes).clear();
    }

    /// Closes the queue and waits up to `deadline` for queued events to be
    /// processed. Returns whether every worker finished in time.
    pub async fn drain(&self, deadline: Duration) -> bool {
        self.close();
        let until = Instant::now() + deadline;
        while self.active_workers() > 0 {
            if Instant::now() >= until {
                return false;
            }
            sleep(DRAIN_POLL).await;
        }
        true
    }
}

async fn run_lane(
    key: LaneKey,
    first: QueuedEvent,
    mut receiver: mpsc::UnboundedReceiver<QueuedEvent>,
    dispatcher: Arc<EventDispatcher>,
    lanes: Lanes,
    idle_timeout: Duration,
    workers: Arc<AtomicUsize>,
) {
    process(&dispatcher, first).await;

    loop {
        match timeout(idle_timeout, receiver.recv()).await {
            Ok(Some(event)) => process(&dispatcher, event).await,
            Ok(None) => break,
            Err(_) => {
                // Enqueue sends under the same lock, so nothing can slip in
                // between this check and the removal.
                let pending = {
                    let mut lanes = lock(&lanes);
                    match receiver.try_recv() {
                        Ok(event) => Some(event),
                        Err(_) => {
                            lanes.remove(&key);
                            None
                        }
                    }
                };
                match pending {
                    Some(event) => process(&dispatcher, event).await,
                    None => break,
                }
            }
        }
    }

    workers.fetch_sub(1, Ordering::AcqRel);
    debug!(event_name = "queue.lane_closed", lane = ?key, "lane worker stopped");
}

async fn process(dispatcher: &EventDispatcher, event: QueuedEvent) {
    let QueuedEvent { envelope, ctx } = event;
    match dispatcher.dispatch(&envelope, &ctx).await {
        Ok(result) => debug!(
            event_name = "dispatch.completed",
            correlation_id = %ctx.correlation_id,
            event_type = ?envelope.event.event_type(),
            result = ?result,
            "event handled"
        ),
        Err(error) => error!(
            event_name = "dispatch.handler_failed",
            correlation_id = %ctx.correlation_id,
            event_type = ?envelope.event.event_type(),
            error = %error,
            "event handler failed; continuing with next event"
        ),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use orderdesk_core::domain::order::{Sender, UserId};

    use super::{EnqueueOutcome, EventQueue, QueueError};
    use crate::client::ChatRef;
    use crate::events::{
        EventContext, EventDispatcher, EventHandler, EventHandlerError, HandlerResult,
    };
    use crate::update::{InboundEvent, InboundEventType, LaneKey, TextMessage, UpdateEnvelope};

    #[derive(Clone, Default)]
    struct SlowRecorder {
        seen: Arc<Mutex<Vec<(i64, String)>>>,
    }

    #[async_trait]
    impl EventHandler for SlowRecorder {
        fn event_type(&self) -> InboundEventType {
            InboundEventType::TextMessage
        }

        async fn handle(
            &self,
            envelope: &UpdateEnvelope,
            ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            let InboundEvent::TextMessage(message) = &envelope.event else {
                return Ok(HandlerResult::Ignored);
            };
            // Earlier events sleep longer; ordering must still hold per lane.
            let delay = 30_u64.saturating_sub(envelope.update_id as u64 * 5);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.seen
                .lock()
                .expect("seen lock")
                .push((message.sender.id.0, format!("{}:{}", ctx.correlation_id, message.text)));
            Ok(HandlerResult::Processed)
        }
    }

    fn text(update_id: i64, user: i64, body: &str) -> UpdateEnvelope {
        UpdateEnvelope {
            update_id,
            event: InboundEvent::TextMessage(TextMessage {
                chat: ChatRef(user),
                sender: Sender::new(user, "Тест"),
                text: body.to_owned(),
            }),
        }
    }

    fn queue(idle: Duration) -> (EventQueue, SlowRecorder) {
        let recorder = SlowRecorder::default();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(recorder.clone());
        (EventQueue::new(Arc::new(dispatcher), idle), recorder)
    }

    #[tokio::test]
    async fn events_for_one_user_are_processed_in_arrival_order() {
        let (queue, recorder) = queue(Duration::from_secs(5));

        for (update_id, body) in [(1, "a"), (2, "b"), (3, "c")] {
            let outcome = queue.enqueue(text(update_id, 7, body)).expect("queued");
            assert_eq!(outcome, EnqueueOutcome::Queued(LaneKey::User(UserId(7))));
        }
        queue.enqueue(text(4, 8, "x")).expect("queued");
        assert_eq!(queue.active_lanes(), 2);

        assert!(queue.drain(Duration::from_secs(5)).await);

        let seen = recorder.seen.lock().expect("seen lock").clone();
        let user_seven: Vec<_> =
            seen.iter().filter(|(user, _)| *user == 7).map(|(_, entry)| entry.as_str()).collect();
        assert_eq!(user_seven, ["update-1:a", "update-2:b", "update-3:c"]);
        assert_eq!(seen.len(), 4);
    }

    #[tokio::test]
    async fn idle_lanes_retire_and_reopen_on_demand() {
        let (queue, recorder) = queue(Duration::from_millis(20));

        queue.enqueue(text(9, 11, "перше")).expect("queued");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(queue.active_lanes(), 0);
        assert_eq!(queue.active_workers(), 0);

        queue.enqueue(text(10, 11, "друге")).expect("queued");
        assert!(queue.drain(Duration::from_secs(5)).await);
        assert_eq!(recorder.seen.lock().expect("seen lock").len(), 2);
    }

    #[tokio::test]
    async fn closed_queue_rejects_and_laneless_events_are_skipped() {
        let (queue, _) = queue(Duration::from_secs(5));

        let unsupported = UpdateEnvelope {
            update_id: 1,
            event: InboundEvent::Unsupported { kind: "poll".to_owned() },
        };
        assert_eq!(queue.enqueue(unsupported), Ok(EnqueueOutcome::Skipped));

        queue.close();
        assert_eq!(queue.enqueue(text(2, 1, "пізно")), Err(QueueError::Closed));
    }
}
