use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TrackingConfig;
use crate::error::AppError;
use crate::models::event::{HistoryPoint, PositionView, TrackingEvent, TrackingSnapshot};
use crate::models::location::LocationSample;
use crate::models::order::OrderStatus;

/// Receiving end of a subscription. Implementations must never block:
/// a full queue is reported as `Backpressure`, a gone consumer as
/// `Disconnected`.
pub trait EventSink: Send + Sync {
    fn try_deliver(&self, event: Arc<TrackingEvent>) -> Result<(), DeliveryError>;

    /// Called when the channel drops this sink (eviction or close) so the
    /// consumer can observe end-of-stream.
    fn detach(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    Backpressure,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub history_capacity: usize,
    pub max_delivery_failures: u32,
    pub stale_after: Duration,
}

impl From<&TrackingConfig> for ChannelSettings {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            history_capacity: config.history_capacity,
            max_delivery_failures: config.max_delivery_failures,
            stale_after: config.stale_after,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrailingHistory {
    capacity: usize,
    samples: VecDeque<LocationSample>,
}

impl TrailingHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: LocationSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocationSample> {
        self.samples.iter()
    }
}

#[derive(Debug, Clone)]
pub struct TrackedPosition {
    pub sample: LocationSample,
    pub distance_km: f64,
    pub eta_minutes: u32,
}

struct Subscriber {
    subscription_id: Uuid,
    sink: Weak<dyn EventSink>,
    consecutive_failures: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Live tracking state for one order plus its subscriber set.
///
/// Not internally synchronized; the owning `OrderTracker` mutex is the
/// per-order serialization point.
pub struct TrackingChannel {
    order_id: Uuid,
    status: OrderStatus,
    position: Option<TrackedPosition>,
    history: TrailingHistory,
    subscribers: HashMap<Uuid, Subscriber>,
    settings: ChannelSettings,
    closed: bool,
}

impl TrackingChannel {
    pub fn new(order_id: Uuid, status: OrderStatus, settings: ChannelSettings) -> Self {
        Self {
            order_id,
            status,
            position: None,
            history: TrailingHistory::new(settings.history_capacity),
            subscribers: HashMap::new(),
            settings,
            closed: false,
        }
    }

    pub fn position(&self) -> Option<&TrackedPosition> {
        self.position.as_ref()
    }

    pub fn history(&self) -> &TrailingHistory {
        &self.history
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_status(&mut self, status: OrderStatus) {
        self.status = status;
    }

    pub fn record_position(&mut self, sample: LocationSample, distance_km: f64, eta_minutes: u32) {
        self.history.push(sample.clone());
        self.position = Some(TrackedPosition {
            sample,
            distance_km,
            eta_minutes,
        });
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> TrackingSnapshot {
        let position = self.position.as_ref().map(|tracked| PositionView {
            position: tracked.sample.position,
            accuracy_m: tracked.sample.accuracy_m,
            distance_km: tracked.distance_km,
            eta_minutes: tracked.eta_minutes,
            received_at: tracked.sample.received_at,
            stale: self.is_stale(tracked.sample.received_at, now),
        });

        TrackingSnapshot {
            order_id: self.order_id,
            status: self.status,
            position,
            history: self
                .history
                .iter()
                .map(|sample| HistoryPoint {
                    position: sample.position,
                    received_at: sample.received_at,
                })
                .collect(),
            at: now,
        }
    }

    fn is_stale(&self, received_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.settings.stale_after) {
            Ok(limit) => now.signed_duration_since(received_at) > limit,
            Err(_) => false,
        }
    }

    /// Registers `viewer_id`, replacing any earlier subscription of the same
    /// viewer, and immediately hands the new sink a snapshot.
    pub fn subscribe(
        &mut self,
        viewer_id: Uuid,
        sink: Weak<dyn EventSink>,
    ) -> Result<Uuid, AppError> {
        if self.closed {
            return Err(AppError::OrderNotTrackable(self.order_id));
        }

        let subscription_id = Uuid::new_v4();
        let snapshot = Arc::new(TrackingEvent::Snapshot(self.snapshot(Utc::now())));

        let mut subscriber = Subscriber {
            subscription_id,
            sink,
            consecutive_failures: 0,
        };

        match subscriber.sink.upgrade() {
            Some(live) => match live.try_deliver(snapshot) {
                Ok(()) => {}
                Err(DeliveryError::Backpressure) => subscriber.consecutive_failures = 1,
                Err(DeliveryError::Disconnected) => {
                    debug!(order_id = %self.order_id, %viewer_id, "subscriber gone before snapshot");
                    return Ok(subscription_id);
                }
            },
            None => return Ok(subscription_id),
        }

        if let Some(previous) = self.subscribers.insert(viewer_id, subscriber) {
            debug!(order_id = %self.order_id, %viewer_id, "replacing previous subscription");
            if let Some(old_sink) = previous.sink.upgrade() {
                old_sink.detach();
            }
        }

        Ok(subscription_id)
    }

    /// Removes the viewer's registration if it is still `subscription_id`.
    /// A stale handle (already replaced or evicted) is a no-op.
    pub fn unsubscribe(&mut self, viewer_id: Uuid, subscription_id: Uuid) -> bool {
        let matches = self
            .subscribers
            .get(&viewer_id)
            .is_some_and(|subscriber| subscriber.subscription_id == subscription_id);

        if matches {
            self.subscribers.remove(&viewer_id);
        }
        matches
    }

    pub fn broadcast(&mut self, event: TrackingEvent) -> BroadcastReport {
        let event = Arc::new(event);
        let max_failures = self.settings.max_delivery_failures.max(1);
        let order_id = self.order_id;
        let mut report = BroadcastReport::default();

        self.subscribers.retain(|viewer_id, subscriber| {
            let Some(sink) = subscriber.sink.upgrade() else {
                return false;
            };

            match sink.try_deliver(event.clone()) {
                Ok(()) => {
                    subscriber.consecutive_failures = 0;
                    report.delivered += 1;
                    true
                }
                Err(DeliveryError::Disconnected) => false,
                Err(DeliveryError::Backpressure) => {
                    subscriber.consecutive_failures += 1;
                    debug!(%order_id, %viewer_id, failures = subscriber.consecutive_failures, "delivery failed");
                    if subscriber.consecutive_failures >= max_failures {
                        warn!(%order_id, %viewer_id, "evicting unresponsive subscriber");
                        sink.detach();
                        report.evicted += 1;
                        false
                    } else {
                        true
                    }
                }
            }
        });

        report
    }

    pub fn close(&mut self, now: DateTime<Utc>) -> BroadcastReport {
        if self.closed {
            return BroadcastReport::default();
        }

        let report = self.broadcast(TrackingEvent::Closed {
            order_id: self.order_id,
            final_status: self.status,
            at: now,
        });

        for (_, subscriber) in self.subscribers.drain() {
            if let Some(sink) = subscriber.sink.upgrade() {
                sink.detach();
            }
        }
        self.closed = true;
        report
    }
}
