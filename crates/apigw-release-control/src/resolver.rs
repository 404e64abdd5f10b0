//! Data plane resolution.

use std::sync::Arc;

use apigw_release_core::GatewayId;
use apigw_release_store::{DataPlane, GatewayDataPlaneBinding, Store, StoreError};

use crate::error::Result;

/// Resolves the data planes a gateway is bound to.
pub struct DataPlaneResolver<S: Store> {
    store: Arc<S>,
}

impl<S: Store> DataPlaneResolver<S> {
    /// Create a resolver reading from `store`.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Data planes with an active binding, in binding order.
    ///
    /// An empty list is a valid answer; callers decide how to record it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails twice in a row.
    pub fn active_data_planes(&self, gateway_id: GatewayId) -> Result<Vec<DataPlane>> {
        self.resolve(gateway_id, |binding| binding.active)
    }

    /// Data planes with any binding, active or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails twice in a row.
    pub fn all_data_planes(&self, gateway_id: GatewayId) -> Result<Vec<DataPlane>> {
        self.resolve(gateway_id, |_| true)
    }

    fn resolve(
        &self,
        gateway_id: GatewayId,
        include: impl Fn(&GatewayDataPlaneBinding) -> bool,
    ) -> Result<Vec<DataPlane>> {
        let bindings = Self::retry_once(gateway_id, || self.store.list_bindings(gateway_id))?;

        let mut data_planes = Vec::new();
        for binding in bindings.iter().filter(|b| include(b)) {
            let data_plane = Self::retry_once(gateway_id, || {
                self.store.get_data_plane(binding.data_plane_id)
            })?;

            match data_plane {
                Some(data_plane) => data_planes.push(data_plane),
                None => tracing::warn!(
                    gateway_id = %gateway_id,
                    data_plane_id = %binding.data_plane_id,
                    "Binding refers to an unknown data plane, skipping"
                ),
            }
        }

        if data_planes.is_empty() {
            tracing::warn!(gateway_id = %gateway_id, "No data plane resolved for gateway");
        }

        Ok(data_planes)
    }

    fn retry_once<T>(
        gateway_id: GatewayId,
        op: impl Fn() -> std::result::Result<T, StoreError>,
    ) -> Result<T> {
        match op() {
            Err(e) if e.is_retriable() => {
                tracing::warn!(gateway_id = %gateway_id, error = %e, "Data plane lookup failed, retrying");
                Ok(op()?)
            }
            other => Ok(other?),
        }
    }
}
