use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    ReadyForPickup,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::ReadyForPickup => "ready_for_pickup",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Restaurant,
    DeliveryPartner,
    Admin,
}

impl ActorRole {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "customer" => Some(ActorRole::Customer),
            "restaurant" => Some(ActorRole::Restaurant),
            "delivery_partner" | "partner" => Some(ActorRole::DeliveryPartner),
            "admin" => Some(ActorRole::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: Uuid, role: ActorRole) -> Self {
        Self { id, role }
    }

    pub fn is_party_to(&self, order: &Order) -> bool {
        match self.role {
            ActorRole::Admin => true,
            ActorRole::Customer => order.customer_id == self.id,
            ActorRole::Restaurant => order.restaurant_id == self.id,
            ActorRole::DeliveryPartner => order.delivery_partner_id == Some(self.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Destination {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

impl Destination {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub status: OrderStatus,
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub delivery_partner_id: Option<Uuid>,
    pub destination: Destination,
    pub created_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    pub cancellation_reason: Option<String>,
}

impl Order {
    pub fn new(id: Uuid, customer_id: Uuid, restaurant_id: Uuid, destination: Destination) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: OrderStatus::Pending,
            customer_id,
            restaurant_id,
            delivery_partner_id: None,
            destination,
            created_at: now,
            status_changed_at: now,
            cancellation_reason: None,
        }
    }
}
