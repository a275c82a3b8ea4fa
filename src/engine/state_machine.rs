use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::AppError;
use crate::models::event::{StatusChange, TransitionOrigin};
use crate::models::order::{Actor, ActorRole, Order, OrderStatus};

use OrderStatus::*;

/// Every permitted (from, to) edge. Anything else is an `InvalidTransition`.
pub const TRANSITIONS: &[(OrderStatus, OrderStatus)] = &[
    (Pending, Confirmed),
    (Confirmed, Preparing),
    (Preparing, ReadyForPickup),
    (ReadyForPickup, OutForDelivery),
    (OutForDelivery, Delivered),
    (Pending, Cancelled),
    (Confirmed, Cancelled),
    (Preparing, Cancelled),
    (ReadyForPickup, Cancelled),
    (OutForDelivery, Cancelled),
];

#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub target: OrderStatus,
    pub origin: TransitionOrigin,
    /// Status the requester last observed. A mismatch at commit time is a
    /// `ConflictingTransition`.
    pub expected: Option<OrderStatus>,
    pub reason: Option<String>,
}

impl TransitionRequest {
    pub fn by_actor(actor: Actor, target: OrderStatus) -> Self {
        Self {
            target,
            origin: TransitionOrigin::Actor {
                actor_id: actor.id,
                role: actor.role,
            },
            expected: None,
            reason: None,
        }
    }

    pub fn system(target: OrderStatus) -> Self {
        Self {
            target,
            origin: TransitionOrigin::System,
            expected: None,
            reason: None,
        }
    }

    pub fn expecting(mut self, status: OrderStatus) -> Self {
        self.expected = Some(status);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OrderStateMachine;

impl OrderStateMachine {
    pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
        TRANSITIONS.contains(&(from, to))
    }

    pub fn authorize(
        &self,
        order: &Order,
        target: OrderStatus,
        origin: TransitionOrigin,
    ) -> Result<(), AppError> {
        let (actor_id, role) = match origin {
            TransitionOrigin::System if target == Delivered => return Ok(()),
            TransitionOrigin::System => {
                return Err(AppError::Forbidden(format!(
                    "system may not move order to {target}"
                )));
            }
            TransitionOrigin::Actor { actor_id, role } => (actor_id, role),
        };

        if !Actor::new(actor_id, role).is_party_to(order) {
            return Err(AppError::Forbidden(format!(
                "actor {actor_id} is not a party to order {}",
                order.id
            )));
        }

        let permitted = match (role, target) {
            (ActorRole::Admin, _) => true,
            (ActorRole::Restaurant, Confirmed | Preparing | ReadyForPickup | Cancelled) => true,
            (ActorRole::DeliveryPartner, OutForDelivery | Delivered) => true,
            (ActorRole::Customer, Cancelled) => matches!(order.status, Pending | Confirmed),
            _ => false,
        };

        if permitted {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "role {role:?} may not move order to {target}"
            )))
        }
    }

    /// Authorizes, checks the allow-list and mutates `order` in place. On error
    /// the order is left untouched.
    pub fn apply(
        &self,
        order: &mut Order,
        request: &TransitionRequest,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, AppError> {
        let from = order.status;
        let to = request.target;

        if let Err(err) = self.authorize(order, to, request.origin) {
            warn!(order_id = %order.id, origin = ?request.origin, %from, %to, error = %err, "transition refused");
            return Err(err);
        }

        if !Self::can_transition(from, to) {
            return Err(AppError::InvalidTransition { from, to });
        }

        if to == OutForDelivery && order.delivery_partner_id.is_none() {
            return Err(AppError::BadRequest(format!(
                "order {} has no delivery partner assigned",
                order.id
            )));
        }

        order.status = to;
        order.status_changed_at = now;
        if to == Cancelled {
            order.cancellation_reason = request.reason.clone();
        }

        Ok(StatusChange {
            order_id: order.id,
            old_status: from,
            new_status: to,
            origin: request.origin,
            at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{OrderStateMachine, TRANSITIONS, TransitionRequest};
    use crate::error::AppError;
    use crate::models::order::{Actor, ActorRole, Destination, Order, OrderStatus};

    fn order_with_partner() -> Order {
        let mut order = Order::new(
            Uuid::from_u128(1),
            Uuid::from_u128(10),
            Uuid::from_u128(20),
            Destination {
                lat: 52.52,
                lng: 13.405,
                address: "Alexanderplatz 1".to_string(),
            },
        );
        order.delivery_partner_id = Some(Uuid::from_u128(30));
        order
    }

    fn customer() -> Actor {
        Actor::new(Uuid::from_u128(10), ActorRole::Customer)
    }

    fn restaurant() -> Actor {
        Actor::new(Uuid::from_u128(20), ActorRole::Restaurant)
    }

    fn partner() -> Actor {
        Actor::new(Uuid::from_u128(30), ActorRole::DeliveryPartner)
    }

    #[test]
    fn transition_graph_never_revisits_a_state() {
        for (from, to) in TRANSITIONS {
            assert_ne!(from, to);
            assert!(!from.is_terminal());
            assert!(
                !TRANSITIONS.contains(&(*to, *from)),
                "{to} -> {from} would allow a cycle"
            );
        }
    }

    #[test]
    fn happy_path_reaches_delivered() {
        let machine = OrderStateMachine;
        let mut order = order_with_partner();

        let steps = [
            (restaurant(), OrderStatus::Confirmed),
            (restaurant(), OrderStatus::Preparing),
            (restaurant(), OrderStatus::ReadyForPickup),
            (partner(), OrderStatus::OutForDelivery),
            (partner(), OrderStatus::Delivered),
        ];

        for (actor, target) in steps {
            let change = machine
                .apply(&mut order, &TransitionRequest::by_actor(actor, target), Utc::now())
                .unwrap();
            assert_eq!(change.new_status, target);
        }
        assert_eq!(order.status, OrderStatus::Delivered);
    }

    #[test]
    fn customer_cannot_start_preparation_but_restaurant_can() {
        let machine = OrderStateMachine;
        let mut order = order_with_partner();
        order.status = OrderStatus::Confirmed;

        let err = machine
            .apply(
                &mut order,
                &TransitionRequest::by_actor(customer(), OrderStatus::Preparing),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(order.status, OrderStatus::Confirmed);

        machine
            .apply(
                &mut order,
                &TransitionRequest::by_actor(restaurant(), OrderStatus::Preparing),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Preparing);
    }

    #[test]
    fn skipping_states_is_invalid_and_leaves_status() {
        let machine = OrderStateMachine;
        let mut order = order_with_partner();
        let admin = Actor::new(Uuid::from_u128(99), ActorRole::Admin);

        let err = machine
            .apply(
                &mut order,
                &TransitionRequest::by_actor(admin, OrderStatus::OutForDelivery),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::OutForDelivery
            }
        ));
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let machine = OrderStateMachine;
        let admin = Actor::new(Uuid::from_u128(99), ActorRole::Admin);

        for terminal in [OrderStatus::Delivered, OrderStatus::Cancelled] {
            let mut order = order_with_partner();
            order.status = terminal;
            let err = machine
                .apply(
                    &mut order,
                    &TransitionRequest::by_actor(admin, OrderStatus::Cancelled),
                    Utc::now(),
                )
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn system_origin_may_only_deliver() {
        let machine = OrderStateMachine;
        let mut order = order_with_partner();
        order.status = OrderStatus::OutForDelivery;

        let err = machine
            .apply(
                &mut order,
                &TransitionRequest::system(OrderStatus::Cancelled),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        machine
            .apply(
                &mut order,
                &TransitionRequest::system(OrderStatus::Delivered),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Delivered);
    }

    #[test]
    fn unassigned_partner_cannot_pick_up() {
        let machine = OrderStateMachine;
        let mut order = order_with_partner();
        order.status = OrderStatus::ReadyForPickup;
        let stranger = Actor::new(Uuid::from_u128(31), ActorRole::DeliveryPartner);

        let err = machine
            .apply(
                &mut order,
                &TransitionRequest::by_actor(stranger, OrderStatus::OutForDelivery),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn customer_cancel_window_closes_once_preparing() {
        let machine = OrderStateMachine;
        let mut order = order_with_partner();
        order.status = OrderStatus::Preparing;

        let err = machine
            .apply(
                &mut order,
                &TransitionRequest::by_actor(customer(), OrderStatus::Cancelled),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        order.status = OrderStatus::Confirmed;
        machine
            .apply(
                &mut order,
                &TransitionRequest::by_actor(customer(), OrderStatus::Cancelled)
                    .with_reason("changed my mind"),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.cancellation_reason.as_deref(), Some("changed my mind"));
    }
}
