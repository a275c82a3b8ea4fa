use std::sync::Arc;

use crate::config::TrackingConfig;
use crate::engine::coordinator::DispatchCoordinator;
use crate::observability::metrics::Metrics;
use crate::store::{InMemoryOrderRepository, OrderRepository};

pub struct AppState {
    pub coordinator: DispatchCoordinator,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: TrackingConfig) -> Self {
        Self::with_repository(config, Arc::new(InMemoryOrderRepository::new()))
    }

    pub fn with_repository(config: TrackingConfig, repository: Arc<dyn OrderRepository>) -> Self {
        let metrics = Metrics::new();
        Self {
            coordinator: DispatchCoordinator::new(config, repository, metrics.clone()),
            metrics,
        }
    }
}
