use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::api::rest::identity::actor_from_headers;
use crate::engine::ingest::IngestOutcome;
use crate::engine::state_machine::TransitionRequest;
use crate::error::AppError;
use crate::models::event::{StatusChange, TrackingSnapshot};
use crate::models::location::LocationReport;
use crate::models::order::{Actor, ActorRole, Destination, Order, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/assignment", post(assign_partner))
        .route("/orders/:id/transitions", post(request_transition))
        .route("/orders/:id/locations", post(ingest_location))
        .route("/orders/:id/tracking", get(tracking_snapshot))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub destination: Destination,
}

#[derive(Deserialize)]
pub struct AssignPartnerRequest {
    pub partner_id: Uuid,
}

#[derive(Deserialize)]
pub struct TransitionBody {
    pub target: OrderStatus,
    #[serde(default)]
    pub expected_status: Option<OrderStatus>,
    #[serde(default)]
    pub reason: Option<String>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state.coordinator.create_order(
        payload.id.unwrap_or_else(Uuid::new_v4),
        payload.customer_id,
        payload.restaurant_id,
        payload.destination,
    )?;

    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.coordinator.get_order(id)?))
}

async fn assign_partner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<AssignPartnerRequest>,
) -> Result<Json<Order>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let order = state
        .coordinator
        .assign_partner(id, actor, payload.partner_id)?;
    Ok(Json(order))
}

async fn request_transition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<TransitionBody>,
) -> Result<Json<StatusChange>, AppError> {
    let actor = actor_from_headers(&headers)?;

    let mut request = TransitionRequest::by_actor(actor, payload.target);
    if let Some(expected) = payload.expected_status {
        request = request.expecting(expected);
    }
    if let Some(reason) = payload.reason {
        request = request.with_reason(reason);
    }

    let change = state.coordinator.submit_transition(id, request)?;
    Ok(Json(change))
}

async fn ingest_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<LocationReport>,
) -> Result<Json<IngestOutcome>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let partner_id = reporting_partner(actor, id)?;

    let outcome = state.coordinator.ingest_location(partner_id, id, payload)?;
    Ok(Json(outcome))
}

fn reporting_partner(actor: Actor, order_id: Uuid) -> Result<Uuid, AppError> {
    if actor.role != ActorRole::DeliveryPartner {
        warn!(%order_id, actor_id = %actor.id, role = ?actor.role, "location from non-partner role");
        return Err(AppError::Unauthorized(
            "only delivery partners report locations".to_string(),
        ));
    }
    Ok(actor.id)
}

async fn tracking_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<TrackingSnapshot>, AppError> {
    let viewer = actor_from_headers(&headers)?;
    Ok(Json(state.coordinator.tracking_snapshot(viewer, id)?))
}
