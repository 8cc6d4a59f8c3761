//! Publish/subscribe message broker for annotation changes
//!
//! The `MessageBroker` holds the active subscriptions and the queue of
//! pending change events. A periodic dispatcher drains the queue, decides
//! which subscriber may see each event and hands the resulting notifications
//! to the [`SendPool`].
//!
//! # Architecture
//!
//! ```text
//! publish() ──▶ EventQueue ──drain (every tick)──▶ MessageBroker::run_cycle()
//!                                                        │
//!                                              for each pending event
//!                                                        │
//!                                     DELETE? ──no──▶ AnnotationLookup::find_by_id
//!                                                        │
//!                                              for each subscription
//!                                                        │
//!                                                 should_notify()?
//!                                                        │
//!                              ──yes──▶ AnnotationConverter ──▶ SendPool::submit
//! ```
//!
//! # Notification rules
//!
//! Evaluated per subscription, first match decides:
//!
//! 1. the event came from the subscriber's own client instance → skip
//! 2. the event is a deletion → notify
//! 3. the annotation is gone or not shared → skip
//! 4. the filter does not list the annotation's document URI → skip
//! 5. otherwise → notify

pub mod pool;

pub use pool::{SendJob, SendPool};

use crate::core::annotation::deletion_payload;
use crate::core::{
    Annotation, AnnotationAction, AnnotationConverter, AnnotationLookup, EventQueue, NotifyResult,
    PendingEvent, RawFilter, SubscriptionFilter, UserContext, parse_filter,
};
use crate::server::exposure::websocket::connection::ConnectionHandle;
use crate::server::exposure::websocket::protocol::ServerMessage;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// A connection's standing request for notifications
#[derive(Debug)]
pub struct Subscription {
    pub filter: SubscriptionFilter,
    pub connection: ConnectionHandle,
    pub user: Arc<UserContext>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        filter: SubscriptionFilter,
        connection: ConnectionHandle,
        user: Arc<UserContext>,
    ) -> Self {
        Self {
            filter,
            connection,
            user,
            created_at: Utc::now(),
        }
    }

    /// Decide whether this subscriber hears about `event`
    ///
    /// `annotation` is the current state of the annotation for non-delete
    /// events, `None` if it could not be found.
    pub fn should_notify(&self, event: &PendingEvent, annotation: Option<&Annotation>) -> bool {
        if event.is_from(self.user.client_id()) {
            return false;
        }

        if event.action.is_delete() {
            return true;
        }

        let Some(annotation) = annotation else {
            return false;
        };

        if !annotation.shared {
            return false;
        }

        self.filter.matches_uri(&annotation.document_uri)
    }
}

/// Outcome of one dispatch cycle (for logging and tests)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Events drained from the queue
    pub events: usize,
    /// Send jobs accepted by the pool
    pub submitted: usize,
    /// Send jobs rejected by the pool
    pub rejected: usize,
}

/// Pub/sub core: subscriptions, pending events and fan-out
pub struct MessageBroker {
    /// One subscription per connection, keyed by connection ID
    subscriptions: RwLock<HashMap<String, Arc<Subscription>>>,
    queue: EventQueue,
    lookup: Arc<dyn AnnotationLookup>,
    converter: Arc<dyn AnnotationConverter>,
    pool: SendPool,
}

impl MessageBroker {
    /// Create a broker
    pub fn new(
        lookup: Arc<dyn AnnotationLookup>,
        converter: Arc<dyn AnnotationConverter>,
        pool: SendPool,
    ) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            queue: EventQueue::new(),
            lookup,
            converter,
            pool,
        }
    }

    /// Validate a filter and store a subscription for the connection
    ///
    /// A connection holds at most one subscription; a new one replaces the
    /// previous. An invalid filter stores nothing and returns
    /// [`NotifyError::InvalidFilter`](crate::core::NotifyError::InvalidFilter).
    pub async fn subscribe(
        &self,
        filter: &RawFilter,
        connection: ConnectionHandle,
        user: Arc<UserContext>,
    ) -> NotifyResult<()> {
        let filter = parse_filter(filter)?;
        let connection_id = connection.id().to_string();
        let subscription = Arc::new(Subscription::new(filter, connection, user));

        let replaced = self
            .subscriptions
            .write()
            .await
            .insert(connection_id.clone(), subscription)
            .is_some();

        tracing::debug!(
            connection_id = %connection_id,
            replaced,
            "Subscription stored"
        );

        Ok(())
    }

    /// Remove every subscription owned by a connection
    ///
    /// Returns `true` if something was removed; safe to call repeatedly.
    pub async fn unsubscribe_all(&self, connection_id: &str) -> bool {
        let removed = self
            .subscriptions
            .write()
            .await
            .remove(connection_id)
            .is_some();

        if removed {
            tracing::debug!(connection_id = %connection_id, "Subscription removed");
        }

        removed
    }

    /// Alias of [`unsubscribe_all`](Self::unsubscribe_all)
    pub async fn unsubscribe(&self, connection_id: &str) -> bool {
        self.unsubscribe_all(connection_id).await
    }

    /// Announce an annotation change
    ///
    /// Fire-and-forget: queues the event and returns immediately, whatever
    /// the queue size. An empty annotation ID is ignored. Returns whether
    /// the event was queued.
    pub fn publish(
        &self,
        annotation_id: &str,
        action: AnnotationAction,
        sender_client_id: Option<&str>,
    ) -> bool {
        if annotation_id.is_empty() {
            tracing::debug!(action = %action, "Ignoring publish without annotation id");
            return false;
        }

        self.queue.push(PendingEvent::new(
            annotation_id,
            action,
            sender_client_id.map(str::to_string),
        ));
        true
    }

    /// Number of events waiting for the next cycle
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Number of active subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// The send pool (for monitoring)
    pub fn pool(&self) -> &SendPool {
        &self.pool
    }

    /// Run one dispatch cycle: drain the queue and fan out every event
    pub async fn run_cycle(&self) -> CycleReport {
        let events = self.queue.drain().await;
        let mut report = CycleReport {
            events: events.len(),
            ..Default::default()
        };

        for event in &events {
            let (submitted, rejected) = self.dispatch_event(event).await;
            report.submitted += submitted;
            report.rejected += rejected;
        }

        if report.events > 0 {
            tracing::debug!(
                events = report.events,
                submitted = report.submitted,
                rejected = report.rejected,
                "Dispatch cycle complete"
            );
        }

        report
    }

    /// Match one event against the current subscriptions
    ///
    /// Returns (submitted, rejected) send counts.
    async fn dispatch_event(&self, event: &PendingEvent) -> (usize, usize) {
        let annotation = if event.action.is_delete() {
            None
        } else {
            match self.lookup.find_by_id(&event.annotation_id).await {
                Ok(found) => {
                    if found.is_none() {
                        tracing::debug!(
                            annotation_id = %event.annotation_id,
                            action = %event.action,
                            "Annotation no longer exists"
                        );
                    }
                    found
                }
                Err(e) => {
                    tracing::warn!(
                        annotation_id = %event.annotation_id,
                        action = %event.action,
                        error = %e,
                        "Annotation lookup failed, skipping event"
                    );
                    return (0, 0);
                }
            }
        };

        let subscriptions: Vec<Arc<Subscription>> =
            self.subscriptions.read().await.values().cloned().collect();

        let mut submitted = 0;
        let mut rejected = 0;

        for subscription in &subscriptions {
            if !subscription.should_notify(event, annotation.as_ref()) {
                continue;
            }

            let payload = match (event.action, annotation.as_ref()) {
                (AnnotationAction::Delete, _) => deletion_payload(&event.annotation_id),
                (_, Some(annotation)) => {
                    match self
                        .converter
                        .to_wire_format(annotation, &subscription.user)
                        .await
                    {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(
                                annotation_id = %event.annotation_id,
                                connection_id = %subscription.connection.id(),
                                error = %e,
                                "Failed to convert annotation for subscriber"
                            );
                            continue;
                        }
                    }
                }
                (_, None) => continue,
            };

            let job = SendJob {
                connection: subscription.connection.clone(),
                message: ServerMessage::notification(event.action, vec![payload]),
            };

            if self.pool.submit(job) {
                submitted += 1;
            } else {
                rejected += 1;
            }
        }

        (submitted, rejected)
    }

    /// Start the periodic dispatcher
    ///
    /// The first cycle runs after `initial_delay`, then every `period`.
    /// Cycles never overlap. A panicking cycle is logged and the timer keeps
    /// going. Dropping the returned handle stops the dispatcher.
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        period: Duration,
        initial_delay: Duration,
    ) -> DispatcherHandle {
        let period = period.max(Duration::from_millis(1));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let broker = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                period_ms = period.as_millis() as u64,
                initial_delay_ms = initial_delay.as_millis() as u64,
                "Annotation dispatch loop started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cycle = AssertUnwindSafe(broker.run_cycle()).catch_unwind().await;
                        if cycle.is_err() {
                            tracing::error!("Dispatch cycle panicked, continuing with next tick");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }

            tracing::info!("Annotation dispatch loop stopped");
        });

        DispatcherHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running dispatcher
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stop the dispatcher after the current cycle and wait for it
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Dispatch loop ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
