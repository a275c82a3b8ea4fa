use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::channel::{DeliveryError, EventSink};
use crate::engine::tracker::OrderTracker;
use crate::error::AppError;
use crate::models::event::TrackingEvent;
use crate::models::order::{Actor, Order};
use crate::observability::metrics::Metrics;

pub struct QueueSink {
    tx: Mutex<Option<mpsc::Sender<Arc<TrackingEvent>>>>,
}

impl QueueSink {
    pub fn new(tx: mpsc::Sender<Arc<TrackingEvent>>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl EventSink for QueueSink {
    fn try_deliver(&self, event: Arc<TrackingEvent>) -> Result<(), DeliveryError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(DeliveryError::Disconnected);
        };

        tx.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Backpressure,
            TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }

    fn detach(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

pub fn authorize_viewer(order: &Order, viewer: Actor) -> Result<(), AppError> {
    if viewer.is_party_to(order) {
        Ok(())
    } else {
        warn!(order_id = %order.id, viewer_id = %viewer.id, role = ?viewer.role, "tracking access refused");
        Err(AppError::Forbidden(format!(
            "viewer {} may not track order {}",
            viewer.id, order.id
        )))
    }
}

/// One viewer's live connection to one order.
///
/// Owns the receiving queue; the channel only keeps a weak reference to the
/// sink. Dropping the session, cleanly or not, unsubscribes it.
pub struct TrackingSession {
    id: Uuid,
    viewer: Actor,
    order_id: Uuid,
    subscription_id: Uuid,
    sink: Arc<QueueSink>,
    events: mpsc::Receiver<Arc<TrackingEvent>>,
    tracker: Weak<OrderTracker>,
    metrics: Metrics,
    closed: bool,
}

impl std::fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSession")
            .field("id", &self.id)
            .field("viewer", &self.viewer)
            .field("order_id", &self.order_id)
            .field("subscription_id", &self.subscription_id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl TrackingSession {
    pub(crate) fn open(
        viewer: Actor,
        order: &Order,
        tracker: &Arc<OrderTracker>,
        buffer: usize,
        metrics: Metrics,
    ) -> Result<Self, AppError> {
        authorize_viewer(order, viewer)?;

        let (tx, events) = mpsc::channel(buffer.max(1));
        let sink = Arc::new(QueueSink::new(tx));
        let weak_sink: Weak<dyn EventSink> = {
            let shared: Arc<dyn EventSink> = sink.clone();
            Arc::downgrade(&shared)
        };

        let subscription_id = {
            let mut state = tracker.lock();
            if state.torn_down {
                return Err(AppError::OrderNotTrackable(order.id));
            }
            let channel = state
                .channel
                .as_mut()
                .ok_or(AppError::OrderNotTrackable(order.id))?;
            channel.subscribe(viewer.id, weak_sink)?
        };

        metrics.active_sessions.inc();
        let session = Self {
            id: Uuid::new_v4(),
            viewer,
            order_id: order.id,
            subscription_id,
            sink,
            events,
            tracker: Arc::downgrade(tracker),
            metrics,
            closed: false,
        };
        info!(session_id = %session.id, order_id = %session.order_id, viewer_id = %viewer.id, "tracking session opened");
        Ok(session)
    }

    /// Next event for this viewer. `None` once the session is closed, the
    /// channel has shut down, or the subscriber was evicted.
    pub async fn next_event(&mut self) -> Option<Arc<TrackingEvent>> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<Arc<TrackingEvent>> {
        if self.closed {
            return None;
        }
        self.events.try_recv().ok()
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(tracker) = self.tracker.upgrade() {
            let mut state = tracker.lock();
            if let Some(channel) = state.channel.as_mut() {
                channel.unsubscribe(self.viewer.id, self.subscription_id);
            }
        }

        self.sink.detach();
        self.events.close();
        while self.events.try_recv().is_ok() {}

        self.metrics.active_sessions.dec();
        debug!(session_id = %self.id, order_id = %self.order_id, "tracking session closed");
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
