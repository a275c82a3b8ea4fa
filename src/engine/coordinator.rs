use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TrackingConfig;
use crate::engine::channel::{ChannelSettings, TrackingChannel};
use crate::engine::ingest::{IngestOutcome, LocationIngest, SampleDecision};
use crate::engine::session::{TrackingSession, authorize_viewer};
use crate::engine::state_machine::{OrderStateMachine, TransitionRequest};
use crate::engine::tracker::{OrderTracker, TrackerState};
use crate::error::AppError;
use crate::models::event::{
    LocationUpdate, OrderNotification, StatusChange, TrackingEvent, TrackingSnapshot,
};
use crate::models::location::LocationReport;
use crate::models::order::{Actor, ActorRole, Destination, Order, OrderStatus};
use crate::observability::metrics::Metrics;
use crate::store::OrderRepository;

type TrackerArena = Arc<DashMap<Uuid, Arc<OrderTracker>>>;

/// Entry point for every external call into the tracking engine.
///
/// Holds one [`OrderTracker`] per live order; work for different orders never
/// contends on a shared lock. Must be driven from inside a Tokio runtime
/// (terminal transitions spawn the grace-period timer).
pub struct DispatchCoordinator {
    config: TrackingConfig,
    repository: Arc<dyn OrderRepository>,
    trackers: TrackerArena,
    machine: OrderStateMachine,
    ingest: LocationIngest,
    notifications: broadcast::Sender<OrderNotification>,
    metrics: Metrics,
}

impl DispatchCoordinator {
    pub fn new(
        config: TrackingConfig,
        repository: Arc<dyn OrderRepository>,
        metrics: Metrics,
    ) -> Self {
        let (notifications, _unused_rx) = broadcast::channel(config.notification_buffer.max(1));

        Self {
            ingest: LocationIngest::new(&config),
            config,
            repository,
            trackers: Arc::new(DashMap::new()),
            machine: OrderStateMachine,
            notifications,
            metrics,
        }
    }

    pub fn order_count(&self) -> usize {
        self.repository.len()
    }

    pub fn active_channels(&self) -> i64 {
        self.metrics.active_channels.get()
    }

    pub fn active_sessions(&self) -> i64 {
        self.metrics.active_sessions.get()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<OrderNotification> {
        self.notifications.subscribe()
    }

    pub fn get_order(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.repository
            .get(order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    pub fn create_order(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
        restaurant_id: Uuid,
        destination: Destination,
    ) -> Result<Order, AppError> {
        if !destination.point().is_plausible() {
            return Err(AppError::BadRequest(format!(
                "destination out of range: lat={}, lng={}",
                destination.lat, destination.lng
            )));
        }
        if destination.address.trim().is_empty() {
            return Err(AppError::BadRequest(
                "destination address cannot be empty".to_string(),
            ));
        }

        let order = Order::new(order_id, customer_id, restaurant_id, destination);
        self.repository.insert(order.clone())?;
        self.trackers
            .insert(order_id, Arc::new(OrderTracker::new(order_id)));

        info!(%order_id, %customer_id, %restaurant_id, "order created");
        Ok(order)
    }

    pub fn assign_partner(
        &self,
        order_id: Uuid,
        actor: Actor,
        partner_id: Uuid,
    ) -> Result<Order, AppError> {
        let observed = self.get_order(order_id)?;
        let tracker = self.tracker_for(&observed);
        let _state = tracker.lock();

        let mut order = self.get_order(order_id)?;
        let permitted = matches!(actor.role, ActorRole::Admin | ActorRole::Restaurant)
            && actor.is_party_to(&order);
        if !permitted {
            warn!(%order_id, actor_id = %actor.id, role = ?actor.role, "partner assignment refused");
            return Err(AppError::Forbidden(format!(
                "actor {} may not assign a partner to order {order_id}",
                actor.id
            )));
        }

        if order.status.is_terminal() || order.status == OrderStatus::OutForDelivery {
            return Err(AppError::Conflict(format!(
                "order {order_id} is {} and can no longer be reassigned",
                order.status
            )));
        }

        order.delivery_partner_id = Some(partner_id);
        self.repository.update(&order)?;

        info!(%order_id, %partner_id, "delivery partner assigned");
        Ok(order)
    }

    /// Actor-initiated transition. The status observed now is the expected
    /// status at commit time.
    pub fn request_transition(
        &self,
        order_id: Uuid,
        actor: Actor,
        target: OrderStatus,
    ) -> Result<StatusChange, AppError> {
        self.submit_transition(order_id, TransitionRequest::by_actor(actor, target))
    }

    pub fn submit_transition(
        &self,
        order_id: Uuid,
        request: TransitionRequest,
    ) -> Result<StatusChange, AppError> {
        let result = self.serialize_transition(order_id, &request);

        let outcome = match &result {
            Ok(_) => "success",
            Err(AppError::ConflictingTransition { .. }) => "conflict",
            Err(AppError::InvalidTransition { .. }) => "invalid",
            Err(AppError::Forbidden(_)) => "forbidden",
            Err(_) => "error",
        };
        self.metrics
            .transitions_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    fn serialize_transition(
        &self,
        order_id: Uuid,
        request: &TransitionRequest,
    ) -> Result<StatusChange, AppError> {
        let observed = self.get_order(order_id)?;
        let expected = request.expected.unwrap_or(observed.status);
        let tracker = self.tracker_for(&observed);

        let mut guard = tracker.lock();
        let mut order = self.get_order(order_id)?;
        if order.status != expected {
            return Err(AppError::ConflictingTransition {
                expected,
                actual: order.status,
            });
        }

        self.commit_transition(&tracker, &mut guard, &mut order, request)
    }

    /// Applies `request` to `order` and writes it back to the store, then
    /// updates channel state. Caller holds the order's tracker lock.
    fn commit_transition(
        &self,
        tracker: &Arc<OrderTracker>,
        state: &mut TrackerState,
        order: &mut Order,
        request: &TransitionRequest,
    ) -> Result<StatusChange, AppError> {
        let mut next = order.clone();
        let change = self.machine.apply(&mut next, request, Utc::now())?;
        self.repository.update(&next)?;
        *order = next;

        info!(
            order_id = %order.id,
            from = %change.old_status,
            to = %change.new_status,
            origin = ?change.origin,
            "order status changed"
        );

        self.on_status_changed(tracker, state, order, &change);
        Ok(change)
    }

    fn on_status_changed(
        &self,
        tracker: &Arc<OrderTracker>,
        state: &mut TrackerState,
        order: &Order,
        change: &StatusChange,
    ) {
        // Opens on `confirmed`; a direct pending -> cancelled still gets a
        // short-lived channel carrying only the cancellation.
        let trackable = change.new_status != OrderStatus::Pending;
        if trackable && state.channel.is_none() && !state.torn_down {
            state.channel = Some(TrackingChannel::new(
                order.id,
                change.new_status,
                ChannelSettings::from(&self.config),
            ));
            self.metrics.active_channels.inc();
        }

        if let Some(channel) = state.channel.as_mut() {
            channel.set_status(change.new_status);
            let report = channel.broadcast(TrackingEvent::StatusChanged(change.clone()));
            self.metrics
                .subscribers_evicted_total
                .inc_by(report.evicted as u64);
        }

        let _ = self
            .notifications
            .send(OrderNotification::StatusChanged(change.clone()));
        if change.new_status == OrderStatus::Delivered {
            let _ = self.notifications.send(OrderNotification::DeliveryCompleted {
                order_id: order.id,
                customer_id: order.customer_id,
                delivery_partner_id: order.delivery_partner_id,
                at: change.at,
            });
        }

        if change.new_status.is_terminal() {
            self.schedule_teardown(tracker, state);
        }
    }

    fn schedule_teardown(&self, tracker: &Arc<OrderTracker>, state: &mut TrackerState) {
        if state.teardown_scheduled {
            return;
        }
        state.teardown_scheduled = true;

        let trackers = self.trackers.clone();
        let tracker = tracker.clone();
        let metrics = self.metrics.clone();
        let grace = self.config.grace_period;

        tokio::spawn(async move {
            sleep(grace).await;
            teardown(&trackers, &tracker, &metrics);
        });
    }

    pub fn ingest_location(
        &self,
        partner_id: Uuid,
        order_id: Uuid,
        report: LocationReport,
    ) -> Result<IngestOutcome, AppError> {
        let start = Instant::now();
        let result = self.ingest_serialized(partner_id, order_id, &report);

        let outcome = match &result {
            Ok(IngestOutcome::Accepted { .. }) => "accepted",
            Ok(IngestOutcome::Dropped) => "dropped",
            Err(_) => "rejected",
        };
        self.metrics
            .location_samples_total
            .with_label_values(&[outcome])
            .inc();
        self.metrics
            .ingest_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());

        result
    }

    fn ingest_serialized(
        &self,
        partner_id: Uuid,
        order_id: Uuid,
        report: &LocationReport,
    ) -> Result<IngestOutcome, AppError> {
        let observed = self.get_order(order_id)?;
        self.ingest.validate(&observed, partner_id, report)?;

        let tracker = self
            .live_tracker(order_id)
            .ok_or(AppError::OrderNotTrackable(order_id))?;
        let mut guard = tracker.lock();
        let state = &mut *guard;
        if state.torn_down {
            return Err(AppError::OrderNotTrackable(order_id));
        }

        let mut order = self.get_order(order_id)?;
        let decision = {
            let channel = state
                .channel
                .as_mut()
                .ok_or(AppError::OrderNotTrackable(order_id))?;
            self.ingest.process(
                &order,
                partner_id,
                report,
                channel,
                &mut state.limiter,
                Instant::now(),
                Utc::now(),
            )?
        };

        let fix = match decision {
            SampleDecision::Dropped => return Ok(IngestOutcome::Dropped),
            SampleDecision::Accepted(fix) => fix,
        };

        let mut delivered = false;
        if fix.within_radius && order.status == OrderStatus::OutForDelivery {
            let request = TransitionRequest::system(OrderStatus::Delivered);
            match self.commit_transition(&tracker, state, &mut order, &request) {
                Ok(_) => delivered = true,
                Err(err) => {
                    warn!(%order_id, error = %err, "automatic delivery transition failed")
                }
            }
        }

        if let Some(channel) = state.channel.as_mut() {
            let report = channel.broadcast(TrackingEvent::LocationUpdated(LocationUpdate {
                order_id,
                position: fix.sample.position,
                distance_km: fix.distance_km,
                eta_minutes: fix.eta_minutes,
                at: fix.sample.received_at,
            }));
            self.metrics
                .subscribers_evicted_total
                .inc_by(report.evicted as u64);
        }

        Ok(IngestOutcome::Accepted {
            distance_km: fix.distance_km,
            eta_minutes: fix.eta_minutes,
            delivered,
        })
    }

    pub fn open_tracking_session(
        &self,
        viewer: Actor,
        order_id: Uuid,
    ) -> Result<TrackingSession, AppError> {
        let order = self.get_order(order_id)?;
        authorize_viewer(&order, viewer)?;

        let tracker = self
            .live_tracker(order_id)
            .ok_or(AppError::OrderNotTrackable(order_id))?;

        TrackingSession::open(
            viewer,
            &order,
            &tracker,
            self.config.subscriber_buffer,
            self.metrics.clone(),
        )
    }

    pub fn close_tracking_session(&self, session: TrackingSession) {
        session.close();
    }

    pub fn tracking_snapshot(
        &self,
        viewer: Actor,
        order_id: Uuid,
    ) -> Result<TrackingSnapshot, AppError> {
        let order = self.get_order(order_id)?;
        authorize_viewer(&order, viewer)?;

        let tracker = self
            .live_tracker(order_id)
            .ok_or(AppError::OrderNotTrackable(order_id))?;
        let state = tracker.lock();
        state
            .channel
            .as_ref()
            .map(|channel| channel.snapshot(Utc::now()))
            .ok_or(AppError::OrderNotTrackable(order_id))
    }

    pub fn subscriber_count(&self, order_id: Uuid) -> usize {
        self.live_tracker(order_id)
            .map(|tracker| {
                let state = tracker.lock();
                state
                    .channel
                    .as_ref()
                    .map_or(0, TrackingChannel::subscriber_count)
            })
            .unwrap_or(0)
    }

    fn live_tracker(&self, order_id: Uuid) -> Option<Arc<OrderTracker>> {
        self.trackers.get(&order_id).map(|entry| entry.value().clone())
    }

    /// Tracker for `order`, recreated for non-terminal orders that have none
    /// (e.g. loaded from the store directly). Terminal orders whose channel
    /// is gone get a retired stand-in that is never registered.
    fn tracker_for(&self, order: &Order) -> Arc<OrderTracker> {
        if let Some(tracker) = self.live_tracker(order.id) {
            return tracker;
        }
        if order.status.is_terminal() {
            return Arc::new(OrderTracker::retired(order.id));
        }
        self.trackers
            .entry(order.id)
            .or_insert_with(|| Arc::new(OrderTracker::new(order.id)))
            .value()
            .clone()
    }
}

fn teardown(trackers: &TrackerArena, tracker: &Arc<OrderTracker>, metrics: &Metrics) {
    let order_id = tracker.order_id();
    {
        let mut state = tracker.lock();
        if let Some(mut channel) = state.channel.take() {
            let report = channel.close(Utc::now());
            metrics.active_channels.dec();
            info!(%order_id, notified = report.delivered, "tracking channel closed");
        }
        state.torn_down = true;
    }
    trackers.remove_if(&order_id, |_, current| Arc::ptr_eq(current, tracker));
}
