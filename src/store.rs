use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::Order;

/// System of record for orders. The tracking engine reads assignment and
/// status from here before authorizing, and writes every committed
/// transition back before it is broadcast.
pub trait OrderRepository: Send + Sync {
    fn get(&self, id: Uuid) -> Option<Order>;
    fn insert(&self, order: Order) -> Result<(), AppError>;
    fn update(&self, order: &Order) -> Result<(), AppError>;
    fn len(&self) -> usize;
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: DashMap<Uuid, Order>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderRepository for InMemoryOrderRepository {
    fn get(&self, id: Uuid) -> Option<Order> {
        self.orders.get(&id).map(|entry| entry.value().clone())
    }

    fn insert(&self, order: Order) -> Result<(), AppError> {
        match self.orders.entry(order.id) {
            Entry::Occupied(_) => {
                Err(AppError::Conflict(format!("order {} already exists", order.id)))
            }
            Entry::Vacant(slot) => {
                slot.insert(order);
                Ok(())
            }
        }
    }

    fn update(&self, order: &Order) -> Result<(), AppError> {
        let mut stored = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order.id)))?;
        *stored = order.clone();
        Ok(())
    }

    fn len(&self) -> usize {
        self.orders.len()
    }
}
