use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use straddle_core::{StraddleError, StraddleResult};

use crate::commands::InstanceConfig;
use crate::handle::StrategyHandle;
use crate::strategy_actor::{spawn_instance, Collaborators};

/// Hosts controller instances by id.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    instances: Arc<RwLock<HashMap<String, StrategyHandle>>>,
}

impl StrategyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `config` and registers a new instance in `Created`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for bad parameters or an id that is already registered.
    pub async fn spawn_instance(
        &self,
        config: InstanceConfig,
        collaborators: Collaborators,
    ) -> StraddleResult<StrategyHandle> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&config.instance_id) {
            return Err(StraddleError::ConfigInvalid {
                field: "instance_id",
                reason: format!("{} is already registered", config.instance_id),
            });
        }

        let instance_id = config.instance_id.clone();
        let handle = spawn_instance(config, collaborators)?;
        instances.insert(instance_id.clone(), handle.clone());
        info!(instance_id = %instance_id, "Registered strategy instance");

        Ok(handle)
    }

    #[must_use]
    pub async fn get(&self, instance_id: &str) -> Option<StrategyHandle> {
        self.instances.read().await.get(instance_id).cloned()
    }

    /// Removes and shuts down the instance with the given id.
    ///
    /// Open legs are not closed.
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` if the instance had already shut down.
    pub async fn remove(&self, instance_id: &str) -> StraddleResult<()> {
        let removed = self.instances.write().await.remove(instance_id);
        if let Some(handle) = removed {
            handle.shutdown().await?;
            info!(instance_id, "Removed strategy instance");
        }
        Ok(())
    }

    #[must_use]
    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stops every active instance, then shuts all of them down.
    pub async fn shutdown_all(&self) {
        let handles: Vec<StrategyHandle> = self
            .instances
            .write()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        for handle in handles {
            if handle.latest_status().state.is_active() {
                if let Err(e) = handle.stop().await {
                    warn!(instance_id = handle.instance_id(), error = %e, "Stop failed during shutdown");
                }
            }
            if let Err(e) = handle.shutdown().await {
                warn!(instance_id = handle.instance_id(), error = %e, "Shutdown failed");
            }
        }
    }
}
