use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{Actor, ActorRole};

// Set by the upstream authentication layer; trusted as-is.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let id = header_str(headers, ACTOR_ID_HEADER)?;
    let role = header_str(headers, ACTOR_ROLE_HEADER)?;

    let id = Uuid::parse_str(id)
        .map_err(|err| AppError::MissingIdentity(format!("invalid {ACTOR_ID_HEADER}: {err}")))?;
    let role = ActorRole::parse(role)
        .ok_or_else(|| AppError::MissingIdentity(format!("unknown role: {role}")))?;

    Ok(Actor::new(id, role))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .ok_or_else(|| AppError::MissingIdentity(format!("{name} header is required")))?
        .to_str()
        .map_err(|err| AppError::MissingIdentity(format!("invalid {name}: {err}")))
}
