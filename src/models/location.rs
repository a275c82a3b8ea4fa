use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Finite and inside |lat| <= 90, |lng| <= 180.
    pub fn is_plausible(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat.abs() <= 90.0
            && self.lng.abs() <= 180.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationReport {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub client_timestamp: Option<DateTime<Utc>>,
}

impl LocationReport {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationSample {
    pub partner_id: Uuid,
    pub order_id: Uuid,
    pub position: GeoPoint,
    pub accuracy_m: Option<f64>,
    pub client_timestamp: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}
