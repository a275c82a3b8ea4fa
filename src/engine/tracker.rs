use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::engine::channel::TrackingChannel;
use crate::engine::ingest::RateLimiter;

#[derive(Default)]
pub struct TrackerState {
    /// Present from `confirmed` until the post-terminal grace period ends.
    pub channel: Option<TrackingChannel>,
    pub limiter: RateLimiter,
    pub teardown_scheduled: bool,
    pub torn_down: bool,
}

/// Per-order serialization point. Every mutation of an order's status,
/// position or subscriber set happens while holding `state`.
pub struct OrderTracker {
    order_id: Uuid,
    state: Mutex<TrackerState>,
}

impl OrderTracker {
    pub fn new(order_id: Uuid) -> Self {
        Self {
            order_id,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn retired(order_id: Uuid) -> Self {
        Self {
            order_id,
            state: Mutex::new(TrackerState {
                torn_down: true,
                ..TrackerState::default()
            }),
        }
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    // Critical sections never await and leave state consistent, so a
    // poisoned lock is still safe to use.
    pub fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
