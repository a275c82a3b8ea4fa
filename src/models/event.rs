use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::GeoPoint;
use crate::models::order::{ActorRole, OrderStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionOrigin {
    Actor { actor_id: Uuid, role: ActorRole },
    // raised by the engine itself (proximity auto-delivery).
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub order_id: Uuid,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub origin: TransitionOrigin,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionView {
    pub position: GeoPoint,
    pub accuracy_m: Option<f64>,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub received_at: DateTime<Utc>,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryPoint {
    pub position: GeoPoint,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingSnapshot {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub position: Option<PositionView>,
    pub history: Vec<HistoryPoint>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationUpdate {
    pub order_id: Uuid,
    pub position: GeoPoint,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    Snapshot(TrackingSnapshot),
    StatusChanged(StatusChange),
    LocationUpdated(LocationUpdate),
    Closed {
        order_id: Uuid,
        final_status: OrderStatus,
        at: DateTime<Utc>,
    },
}

/// Off-line fan-out feed for push/SMS collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderNotification {
    StatusChanged(StatusChange),
    DeliveryCompleted {
        order_id: Uuid,
        customer_id: Uuid,
        delivery_partner_id: Option<Uuid>,
        at: DateTime<Utc>,
    },
}
