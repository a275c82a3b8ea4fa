use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use order_tracker::api::rest::router;
use order_tracker::config::TrackingConfig;
use order_tracker::state::AppState;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

struct Ids {
    customer: String,
    restaurant: String,
    partner: String,
}

fn ids() -> Ids {
    Ids {
        customer: Uuid::new_v4().to_string(),
        restaurant: Uuid::new_v4().to_string(),
        partner: Uuid::new_v4().to_string(),
    }
}

fn setup() -> axum::Router {
    let config = TrackingConfig {
        ingest_interval: Duration::ZERO,
        ..TrackingConfig::default()
    };
    router(Arc::new(AppState::new(config)))
}

fn json_request(method: &str, uri: &str, actor: Option<(&str, &str)>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some((id, role)) = actor {
        builder = builder.header("x-actor-id", id).header("x-actor-role", role);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str, actor: Option<(&str, &str)>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some((id, role)) = actor {
        builder = builder.header("x-actor-id", id).header("x-actor-role", role);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn create_order(app: &axum::Router, ids: &Ids) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            None,
            json!({
                "customer_id": ids.customer,
                "restaurant_id": ids.restaurant,
                "destination": { "lat": 52.52, "lng": 13.405, "address": "Alexanderplatz 1" }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await["id"].as_str().unwrap().to_string()
}

async fn transition(
    app: &axum::Router,
    order_id: &str,
    actor: (&str, &str),
    target: &str,
) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/transitions"),
            Some(actor),
            json!({ "target": target }),
        ))
        .await
        .unwrap()
}

async fn report(app: &axum::Router, order_id: &str, partner: &str, lat: f64) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/locations"),
            Some((partner, "delivery_partner")),
            json!({ "lat": lat, "lng": 13.405, "accuracy_m": 6.0 }),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = setup();
    let response = app.oneshot(get_request("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["orders"], 0);
    assert_eq!(body["active_channels"], 0);
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = setup();
    let response = app.oneshot(get_request("/metrics", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("active_channels"));
}

#[tokio::test]
async fn create_order_returns_pending() {
    let app = setup();
    let ids = ids();
    let order_id = create_order(&app, &ids).await;

    let res = app
        .oneshot(get_request(&format!("/orders/{order_id}"), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_json(res).await;
    assert_eq!(body["status"], "pending");
    assert!(body["delivery_partner_id"].is_null());
    assert_eq!(body["destination"]["address"], "Alexanderplatz 1");
}

#[tokio::test]
async fn create_order_with_bad_destination_returns_400() {
    let app = setup();
    let ids = ids();
    let res = app
        .oneshot(json_request(
            "POST",
            "/orders",
            None,
            json!({
                "customer_id": ids.customer,
                "restaurant_id": ids.restaurant,
                "destination": { "lat": 120.0, "lng": 13.405, "address": "Nowhere" }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_order_id_returns_409() {
    let app = setup();
    let ids = ids();
    let order_id = Uuid::new_v4().to_string();
    let body = json!({
        "id": order_id,
        "customer_id": ids.customer,
        "restaurant_id": ids.restaurant,
        "destination": { "lat": 52.52, "lng": 13.405, "address": "Alexanderplatz 1" }
    });

    let first = app
        .clone()
        .oneshot(json_request("POST", "/orders", None, body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(json_request("POST", "/orders", None, body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn get_nonexistent_order_returns_404() {
    let app = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/orders/{fake_id}"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn transition_without_identity_returns_401() {
    let app = setup();
    let ids = ids();
    let order_id = create_order(&app, &ids).await;

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/transitions"),
            None,
            json!({ "target": "confirmed" }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn customer_forbidden_restaurant_allowed_to_prepare() {
    let app = setup();
    let ids = ids();
    let order_id = create_order(&app, &ids).await;

    let res = transition(&app, &order_id, (ids.restaurant.as_str(), "restaurant"), "confirmed").await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = transition(&app, &order_id, (ids.customer.as_str(), "customer"), "preparing").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = transition(&app, &order_id, (ids.restaurant.as_str(), "restaurant"), "preparing").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["old_status"], "confirmed");
    assert_eq!(body["new_status"], "preparing");
    assert_eq!(body["origin"]["kind"], "actor");
}

#[tokio::test]
async fn skipped_state_returns_422() {
    let app = setup();
    let ids = ids();
    let order_id = create_order(&app, &ids).await;

    let res = transition(&app, &order_id, (ids.restaurant.as_str(), "restaurant"), "ready_for_pickup").await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn stale_expected_status_returns_409() {
    let app = setup();
    let ids = ids();
    let order_id = create_order(&app, &ids).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/transitions"),
            Some((ids.restaurant.as_str(), "restaurant")),
            json!({ "target": "preparing", "expected_status": "confirmed" }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn tracking_before_confirmation_returns_410() {
    let app = setup();
    let ids = ids();
    let order_id = create_order(&app, &ids).await;

    let res = app
        .oneshot(get_request(
            &format!("/orders/{order_id}/tracking"),
            Some((ids.customer.as_str(), "customer")),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::GONE);
}

#[tokio::test]
async fn full_delivery_flow() {
    let app = setup();
    let ids = ids();
    let order_id = create_order(&app, &ids).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/assignment"),
            Some((ids.restaurant.as_str(), "restaurant")),
            json!({ "partner_id": ids.partner }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["delivery_partner_id"], ids.partner);

    for (actor, target) in [
        ((ids.restaurant.as_str(), "restaurant"), "confirmed"),
        ((ids.restaurant.as_str(), "restaurant"), "preparing"),
        ((ids.restaurant.as_str(), "restaurant"), "ready_for_pickup"),
        ((ids.partner.as_str(), "delivery_partner"), "out_for_delivery"),
    ] {
        let res = transition(&app, &order_id, actor, target).await;
        assert_eq!(res.status(), StatusCode::OK, "transition to {target}");
    }

    // ~1.9 km out
    let res = report(&app, &order_id, &ids.partner, 52.5371).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["outcome"], "accepted");
    assert_eq!(body["eta_minutes"], 4);
    assert_eq!(body["delivered"], false);

    let res = app
        .clone()
        .oneshot(get_request(
            &format!("/orders/{order_id}/tracking"),
            Some((ids.customer.as_str(), "customer")),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let snapshot = body_json(res).await;
    assert_eq!(snapshot["status"], "out_for_delivery");
    assert_eq!(snapshot["position"]["eta_minutes"], 4);
    assert_eq!(snapshot["history"].as_array().unwrap().len(), 1);

    let res = report(&app, &order_id, &ids.partner, 52.52027).await;
    let body = body_json(res).await;
    assert_eq!(body["delivered"], true);

    let res = app
        .clone()
        .oneshot(get_request(&format!("/orders/{order_id}"), None))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["status"], "delivered");

    let res = app.oneshot(get_request("/health", None)).await.unwrap();
    let health = body_json(res).await;
    assert_eq!(health["orders"], 1);
    assert_eq!(health["active_channels"], 1);
}

#[tokio::test]
async fn location_from_wrong_partner_or_bad_coordinates_is_rejected() {
    let app = setup();
    let ids = ids();
    let order_id = create_order(&app, &ids).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/assignment"),
            Some((ids.restaurant.as_str(), "restaurant")),
            json!({ "partner_id": ids.partner }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = transition(&app, &order_id, (ids.restaurant.as_str(), "restaurant"), "confirmed").await;
    assert_eq!(res.status(), StatusCode::OK);

    let stranger = Uuid::new_v4().to_string();
    let res = report(&app, &order_id, &stranger, 52.53).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = report(&app, &order_id, &ids.partner, -91.0).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/locations"),
            Some((ids.customer.as_str(), "customer")),
            json!({ "lat": 52.53, "lng": 13.405 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}
