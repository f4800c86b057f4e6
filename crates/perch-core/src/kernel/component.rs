use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::kernel::error::Result;

/// Lifecycle shared by every long-lived part of the host.
#[async_trait]
pub trait KernelComponent: Any + Send + Sync + Debug {
    fn name(&self) -> &'static str;
    async fn initialize(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// Explicit registry of host components, owned by the top-level composition.
///
/// Components are keyed by their concrete type and remember registration
/// order, which is the order they are initialized and started in. Shutdown
/// walks the same list in reverse.
#[derive(Default, Debug)]
pub struct DependencyRegistry {
    instances: HashMap<TypeId, Arc<dyn KernelComponent>>,
    concrete: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    order: Vec<TypeId>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component instance keyed by its concrete type. Registering
    /// the same type twice replaces the instance but keeps its original slot.
    pub fn register_instance<V>(&mut self, instance: Arc<V>)
    where
        V: KernelComponent + 'static,
    {
        let type_id = TypeId::of::<V>();
        self.concrete.insert(type_id, instance.clone());
        if self.instances.insert(type_id, instance).is_none() {
            self.order.push(type_id);
        }
    }

    pub fn get_concrete<T: KernelComponent + 'static>(&self) -> Option<Arc<T>> {
        self.concrete
            .get(&TypeId::of::<T>())
            .and_then(|any| Arc::downcast::<T>(any.clone()).ok())
    }

    /// Components in registration order.
    pub fn ordered_components(&self) -> Vec<Arc<dyn KernelComponent>> {
        self.order
            .iter()
            .filter_map(|id| self.instances.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.instances.clear();
        self.concrete.clear();
        self.order.clear();
    }
}
