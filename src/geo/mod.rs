use crate::models::location::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;
const MIN_ETA_MINUTES: u32 = 1;

pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().min(1.0).asin();

    (EARTH_RADIUS_KM * central_angle).max(0.0)
}

/// Linear ETA: `distance * minutes_per_km`, rounded up, never below one minute.
pub fn estimate_minutes(distance_km: f64, minutes_per_km: f64) -> u32 {
    let raw = (distance_km.max(0.0) * minutes_per_km).ceil();
    if !raw.is_finite() {
        return MIN_ETA_MINUTES;
    }
    (raw as u32).max(MIN_ETA_MINUTES)
}

pub fn is_within_delivery_radius(
    position: &GeoPoint,
    destination: &GeoPoint,
    threshold_meters: f64,
) -> bool {
    distance_km(position, destination) * 1_000.0 < threshold_meters
}
