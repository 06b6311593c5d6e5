use nimbus_client::{
    CountdownModel, ShadeStatus, StatusEvent, StatusPath, StatusStoreError, StatusStoreTrait,
    StatusSubscription,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::web::metrics::Metrics;

/// Typed writes to the status store plus the local mirror of the record.
///
/// The mirror only changes through [`StatusSynchronizer::reconcile`]; a
/// successful write is not applied locally until the subscription echoes it.
pub struct StatusSynchronizer<S: StatusStoreTrait> {
    store: S,
    mirror: Option<ShadeStatus>,
}

impl<S: StatusStoreTrait> StatusSynchronizer<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            mirror: None,
        }
    }

    pub fn mirror(&self) -> Option<&ShadeStatus> {
        self.mirror.as_ref()
    }

    /// Creates the default record when the store holds none.
    pub async fn initialize(&self) -> Result<(), StatusStoreError> {
        match self.read_status().await {
            Ok(status) => {
                debug!("Status record present: {status:?}");
                Ok(())
            }
            Err(StatusStoreError::NotFound) => {
                info!("No status record found, creating defaults");
                self.replace_status(&ShadeStatus::default()).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn subscribe(&self) -> Result<StatusSubscription, StatusStoreError> {
        self.store.subscribe().await
    }

    /// Applies a subscription event to the mirror. Errors leave it untouched.
    pub fn reconcile(&mut self, event: StatusEvent) -> Result<&ShadeStatus, StatusStoreError> {
        match event {
            Ok(status) => {
                Metrics::inc_snapshots();
                Ok(self.mirror.insert(status))
            }
            Err(e) => {
                Metrics::inc_snapshot_errors();
                warn!("Status subscription error: {e}");
                Err(e)
            }
        }
    }

    pub async fn read_status(&self) -> Result<ShadeStatus, StatusStoreError> {
        let value = self.store.read(StatusPath::Root).await?;
        ShadeStatus::from_snapshot(&value)
    }

    pub async fn replace_status(&self, status: &ShadeStatus) -> Result<(), StatusStoreError> {
        let value = serde_json::to_value(status).map_err(|e| StatusStoreError::Write {
            path: StatusPath::Root,
            message: e.to_string(),
        })?;
        self.write(StatusPath::Root, value).await
    }

    pub async fn set_automatic_mode(&self, enabled: bool) -> Result<(), StatusStoreError> {
        self.write(StatusPath::AutomaticMode, Value::Bool(enabled))
            .await
    }

    pub async fn set_manual_shade(&self, minutes: u32) -> Result<(), StatusStoreError> {
        self.write(StatusPath::ManualShade, Value::from(minutes))
            .await
    }

    pub async fn set_rain_status(&self, raining: bool) -> Result<(), StatusStoreError> {
        self.write(StatusPath::RainStatus, Value::Bool(raining))
            .await
    }

    pub async fn set_shade_status(&self, raw: bool) -> Result<(), StatusStoreError> {
        self.write(StatusPath::ShadeStatus, Value::Bool(raw)).await
    }

    pub async fn set_extend_button(&self, pressed: bool) -> Result<(), StatusStoreError> {
        self.write(StatusPath::ExtendButton, Value::Bool(pressed))
            .await
    }

    /// Arms the countdown subtree with the full remaining time.
    pub async fn start_countdown(&self, seconds_left: u64) -> Result<(), StatusStoreError> {
        let value = serde_json::to_value(CountdownModel { seconds_left }).map_err(|e| {
            StatusStoreError::Write {
                path: StatusPath::CountdownModel,
                message: e.to_string(),
            }
        })?;
        self.write(StatusPath::CountdownModel, value).await
    }

    pub async fn update_countdown(&self, seconds_left: u64) -> Result<(), StatusStoreError> {
        self.write(StatusPath::CountdownSecondsLeft, Value::from(seconds_left))
            .await
    }

    pub async fn cancel_countdown(&self) -> Result<(), StatusStoreError> {
        let result = self.store.delete(StatusPath::CountdownModel).await;
        Metrics::record_store_write(StatusPath::CountdownModel.as_str(), result.is_ok());
        result
    }

    async fn write(&self, path: StatusPath, value: Value) -> Result<(), StatusStoreError> {
        debug!("Writing {path} = {value}");
        let result = self.store.write(path, value).await;
        Metrics::record_store_write(path.as_str(), result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_client::{MemoryStatusStore, StoreOperation, StoreOperationKind};
    use serde_json::json;

    #[tokio::test]
    async fn initialize_creates_defaults_once() {
        let store = MemoryStatusStore::new();
        let sync = StatusSynchronizer::new(store.clone());
        sync.initialize().await.unwrap();
        sync.initialize().await.unwrap();

        let operations = store.operations().await;
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].path, StatusPath::Root);
        assert_eq!(sync.read_status().await.unwrap(), ShadeStatus::default());
    }

    #[tokio::test]
    async fn writes_target_single_fields() {
        let store = MemoryStatusStore::with_status(&ShadeStatus::default());
        let sync = StatusSynchronizer::new(store.clone());
        sync.set_manual_shade(45).await.unwrap();
        sync.start_countdown(600).await.unwrap();
        sync.update_countdown(570).await.unwrap();
        sync.cancel_countdown().await.unwrap();

        assert_eq!(
            store.operations().await,
            vec![
                StoreOperation {
                    path: StatusPath::ManualShade,
                    kind: StoreOperationKind::Set(json!(45)),
                },
                StoreOperation {
                    path: StatusPath::CountdownModel,
                    kind: StoreOperationKind::Set(json!({"secondsLeft": 600})),
                },
                StoreOperation {
                    path: StatusPath::CountdownSecondsLeft,
                    kind: StoreOperationKind::Set(json!(570)),
                },
                StoreOperation {
                    path: StatusPath::CountdownModel,
                    kind: StoreOperationKind::Delete,
                },
            ]
        );
        assert_eq!(sync.read_status().await.unwrap().countdown_model, None);
    }

    #[tokio::test]
    async fn mirror_follows_subscription_not_writes() {
        let store = MemoryStatusStore::with_status(&ShadeStatus::default());
        let mut sync = StatusSynchronizer::new(store.clone());
        let mut subscription = sync.subscribe().await.unwrap();

        sync.set_automatic_mode(false).await.unwrap();
        assert!(sync.mirror().is_none());

        let initial = subscription.next().await.unwrap();
        assert!(sync.reconcile(initial).unwrap().automatic_mode);
        let echoed = subscription.next().await.unwrap();
        assert!(!sync.reconcile(echoed).unwrap().automatic_mode);
    }

    #[tokio::test]
    async fn errors_keep_mirror() {
        let store = MemoryStatusStore::with_status(&ShadeStatus::default());
        let mut sync = StatusSynchronizer::new(store);
        sync.reconcile(Ok(ShadeStatus::default())).unwrap();
        let result = sync.reconcile(Err(StatusStoreError::Malformed("bad".into())));
        assert!(result.is_err());
        assert_eq!(sync.mirror(), Some(&ShadeStatus::default()));
    }
}
