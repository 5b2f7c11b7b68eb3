//! Concrete [`TargetProvider`](crate::provider::TargetProvider)
//! implementations, plus the wiring that registers them into a
//! [`ProviderRegistry`]. Each module here is a small backend that
//! actually implements `get`/`apply` rather than dispatching further.

use std::sync::Arc;

use crate::registry::ProviderRegistry;

pub mod container;
pub mod helm;
pub mod iot_edge;

/// Registers the providers this crate ships out of the box. Embedding
/// applications are free to build their own `ProviderRegistry` and
/// `register` additional or alternative constructors instead.
pub fn register_builtin_providers(registry: &mut ProviderRegistry) {
    registry.register(
        "container",
        Arc::new(|_binding| Ok(Arc::new(container::ContainerProvider::new()) as _)),
    );
    registry.register(
        "helm.v3",
        Arc::new(|binding| Ok(Arc::new(helm::HelmProvider::from_binding(binding)) as _)),
    );
    registry.register(
        "iot-edge-module",
        Arc::new(|_binding| Ok(Arc::new(iot_edge::IotEdgeProvider::new()) as _)),
    );
}
